//! # procweb
//!
//! Serves a single HTTP exchange for a host process that owns the real
//! connection. The host speaks a line-delimited JSON command protocol on our
//! stdin/stdout; we answer from the client asset directory, from prerendered
//! pages, or from an application implementing [`dispatch::App`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::process::ExitCode;
//!
//! use procweb::BoxError;
//! use procweb::dispatch::{App, RequestContext};
//! use procweb::http::{Request, Response, StatusCode};
//!
//! struct Site;
//!
//! impl App for Site {
//!     async fn respond(
//!         &self,
//!         request: Request,
//!         _ctx: RequestContext,
//!     ) -> Result<Option<Response>, BoxError> {
//!         if request.path() == "/health" {
//!             return Ok(Some(Response::text(StatusCode::OK, "ok")));
//!         }
//!         Ok(None)
//!     }
//! }
//!
//! fn main() -> ExitCode {
//!     procweb::server::launch(Site)
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod protocol;
pub mod server;
pub mod statics;

/// Error type returned by application hooks and background tasks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use dispatch::{App, RequestContext};
pub use http::{Body, Headers, Method, Request, Response, StatusCode};
pub use server::{Runtime, ServeError, launch};
