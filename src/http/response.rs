//! HTTP response builder.
//!
//! Responses are produced by the static file stages or by the application and
//! consumed exactly once by the response serializer.

use super::{Body, Headers, StatusCode};

/// An HTTP response with an optional streamed body.
///
/// # Examples
///
/// ```
/// use procweb::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("content-type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.reason(), "OK");
/// assert_eq!(response.headers().get("Content-Type"), Some("application/json"));
/// assert!(response.has_body());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    status_text: Option<String>,
    headers: Headers,
    body: Option<Body>,
}

impl Response {
    /// Creates a new response with the given status and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_text: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// A `text/plain` response, used for the built-in fallbacks.
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(status)
            .header("content-type", "text/plain; charset=utf-8")
            .header("content-length", text.len().to_string())
            .body(text)
    }

    /// Overrides the reason phrase sent in the `status` command.
    #[must_use]
    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the reason phrase: the explicit one if set, else the canonical
    /// phrase for the code, else an empty string.
    pub fn reason(&self) -> &str {
        self.status_text
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns `true` if a body is attached (possibly an empty one).
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Splits the response into its parts for serialization.
    pub fn into_parts(self) -> (StatusCode, String, Headers, Option<Body>) {
        let text = self.reason().to_owned();
        (self.status, text, self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}
