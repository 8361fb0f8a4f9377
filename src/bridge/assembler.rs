//! Builds a [`Request`] out of inbound commands.

use url::Url;

use crate::http::{AbortHandle, AbortSignal, Body, BodySender, Headers, Method, Request};
use crate::protocol::Command;

/// Where the assembler is in the inbound exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitingHeaders,
    BodyStreaming,
    Complete,
    Aborted,
}

/// What the caller should do after feeding a command.
#[derive(Debug)]
pub enum Step {
    /// Keep reading commands.
    Continue,
    /// Headers are complete; the request is ready to dispatch. Its body keeps
    /// filling from later commands.
    Ready(Request),
    /// The inbound side is finished (`end-body` or `abort`); stop reading.
    Finished,
}

/// State machine turning `header`/`start-body`/`data`/`end-body`/`abort`
/// commands into a request with a streamed body.
///
/// Method and URL come from the command line; the stream only carries headers
/// and the body.
#[derive(Debug)]
pub struct RequestAssembler {
    method: Method,
    url: Url,
    headers: Headers,
    state: State,
    body: Option<BodySender>,
    abort: Option<AbortHandle>,
}

impl RequestAssembler {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            state: State::AwaitingHeaders,
            body: None,
            abort: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Feeds one command. Commands that make no sense in the current state are
    /// ignored.
    pub fn handle(&mut self, command: Command) -> Step {
        match (self.state, command) {
            (State::AwaitingHeaders, Command::Header { name, value }) => {
                self.headers.insert(name, value);
                Step::Continue
            }
            (State::AwaitingHeaders, Command::StartBody) => {
                let (sender, body) = Body::channel();
                let (handle, signal) = AbortSignal::pair();
                self.body = Some(sender);
                self.abort = Some(handle);
                self.state = State::BodyStreaming;

                let request = Request::new(
                    self.method.clone(),
                    self.url.clone(),
                    std::mem::take(&mut self.headers),
                    body,
                    signal,
                );
                Step::Ready(request)
            }
            (State::BodyStreaming, Command::Data(chunk)) => {
                if let Some(sender) = &self.body {
                    if !sender.send(chunk) {
                        tracing::debug!("request body dropped by handler, discarding data");
                    }
                }
                Step::Continue
            }
            (State::BodyStreaming, Command::EndBody) => {
                self.body = None;
                self.abort = None;
                self.state = State::Complete;
                Step::Finished
            }
            (State::BodyStreaming, Command::Abort) => {
                if let Some(sender) = self.body.take() {
                    sender.abort("request aborted by host");
                }
                if let Some(handle) = self.abort.take() {
                    handle.abort();
                }
                self.state = State::Aborted;
                Step::Finished
            }
            (State::Complete | State::Aborted, _) => Step::Finished,
            (state, command) => {
                tracing::debug!(?state, command = command.name(), "ignoring command");
                Step::Continue
            }
        }
    }
}
