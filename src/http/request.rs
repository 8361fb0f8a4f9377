//! The request handed to the dispatcher.
//!
//! A [`Request`] is assembled from `header` commands and carries a streamed
//! [`Body`] that keeps filling while the application runs. When the host sends
//! `abort`, the request's [`AbortSignal`] fires.

use tokio::sync::watch;
use url::Url;

use super::{Body, Headers, Method};

/// Cooperative cancellation flag attached to a request.
///
/// Cloning is cheap; every clone observes the same flag.
///
/// # Examples
///
/// ```
/// use procweb::http::AbortSignal;
///
/// let (handle, signal) = AbortSignal::pair();
/// assert!(!signal.is_aborted());
/// handle.abort();
/// assert!(signal.is_aborted());
/// ```
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

/// Fires the [`AbortSignal`] it was created with.
#[derive(Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

impl AbortSignal {
    /// Creates a connected handle/signal pair.
    pub fn pair() -> (AbortHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (AbortHandle { tx }, Self { rx })
    }

    /// A signal that can never fire.
    pub fn never() -> Self {
        Self::pair().1
    }

    /// Returns `true` once the request has been aborted.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the request is aborted; pends forever if it never is.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// An HTTP request reconstructed from the inbound command stream.
///
/// # Examples
///
/// ```
/// use procweb::http::{AbortSignal, Body, Headers, Method, Request};
///
/// let url = "https://example.com/search?q=rust".parse().unwrap();
/// let mut headers = Headers::new();
/// headers.insert("accept", "text/html");
/// let request = Request::new(Method::Get, url, headers, Body::empty(), AbortSignal::never());
///
/// assert_eq!(request.path(), "/search");
/// assert_eq!(request.query(), Some("q=rust"));
/// assert_eq!(request.headers().get("Accept"), Some("text/html"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Body,
    signal: AbortSignal,
}

impl Request {
    pub fn new(method: Method, url: Url, headers: Headers, body: Body, signal: AbortSignal) -> Self {
        Self {
            method,
            url,
            headers,
            body,
            signal,
        }
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the (still percent-encoded) request path.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request's cancellation signal.
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Gives mutable access to the body so it can be pulled chunk by chunk.
    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Takes the body out of the request, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn aborted_resolves_after_abort() {
        let (handle, signal) = AbortSignal::pair();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.aborted().await })
        };
        handle.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("abort was not observed")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_does_not_resolve() {
        let signal = AbortSignal::never();
        let res = tokio::time::timeout(Duration::from_secs(5), signal.aborted()).await;
        assert!(res.is_err());
        assert!(!signal.is_aborted());
    }

    #[tokio::test]
    async fn take_body_leaves_empty() {
        let url: Url = "http://localhost/upload".parse().unwrap();
        let mut req = Request::new(
            Method::Post,
            url,
            Headers::new(),
            Body::from("payload"),
            AbortSignal::never(),
        );
        let body = req.take_body();
        assert!(req.body_mut().is_empty());
        assert_eq!(body.collect().await.unwrap(), "payload");
    }
}
