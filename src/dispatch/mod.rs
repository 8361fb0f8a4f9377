//! Picks who answers the request.
//!
//! Stages run in a fixed order and stop at the first one that produces a
//! response:
//!
//! 1. client assets (only when static serving is enabled), with cache headers;
//! 2. prerendered pages, without cache headers;
//! 3. the application's [`App::respond`];
//! 4. a plain-text `404 Not Found`.
//!
//! The application is reached through the [`App`] trait. Per-request state it
//! may need (the client address, background work) is passed explicitly in a
//! [`RequestContext`].

use std::collections::HashMap;
use std::future::Future;
use std::io;

use clap::ArgMatches;
use thiserror::Error;
use tracing::{debug, warn};

use crate::BoxError;
use crate::config::{Manifest, RenderOptions, Settings};
use crate::http::{Request, Response, StatusCode};
use crate::lifecycle::Background;
use crate::statics::StaticFiles;

/// Errors that abort the dispatch of a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("cannot determine client IP: none was given on the command line")]
    ClientAddressUnavailable,

    #[error("application failed: {0}")]
    App(#[source] BoxError),

    #[error("static file I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Passed to [`App::init`] once per process.
#[derive(Debug, Clone)]
pub struct InitConfig {
    /// The process environment.
    pub env: HashMap<String, String>,
    pub manifest: Manifest,
}

impl InitConfig {
    pub fn from_env(manifest: Manifest) -> Self {
        Self {
            env: std::env::vars().collect(),
            manifest,
        }
    }
}

/// The server-rendering application behind the bridge.
///
/// Only [`respond`](App::respond) is required. The hooks run in this order:
/// `setup_cli` while the command line is being built, `bootstrap` with the
/// parsed arguments, then either `init` before the request is read (for
/// `render`) or `command` for a subcommand the application added itself.
///
/// # Examples
///
/// ```rust,no_run
/// use procweb::BoxError;
/// use procweb::dispatch::{App, RequestContext};
/// use procweb::http::{Request, Response, StatusCode};
///
/// struct Hello;
///
/// impl App for Hello {
///     async fn respond(
///         &self,
///         request: Request,
///         ctx: RequestContext,
///     ) -> Result<Option<Response>, BoxError> {
///         let who = ctx.client_address().unwrap_or("stranger");
///         Ok(Some(Response::text(StatusCode::OK, format!("hello {who} at {}", request.path()))))
///     }
/// }
/// ```
pub trait App: Send + Sync + 'static {
    /// Extends the command line before it is parsed.
    fn setup_cli(&self, command: clap::Command) -> clap::Command {
        command
    }

    /// Runs once the arguments are known to be valid. `matches` holds every
    /// argument, including the ones added in [`setup_cli`](App::setup_cli).
    fn bootstrap(&self, _matches: &ArgMatches) -> Result<(), BoxError> {
        Ok(())
    }

    /// Runs a subcommand added in [`setup_cli`](App::setup_cli). `matches`
    /// are the subcommand's own arguments.
    fn command(&self, name: &str, _matches: &ArgMatches) -> Result<(), BoxError> {
        Err(format!("unsupported subcommand `{name}`").into())
    }

    /// Prepares the application for the request.
    fn init(&self, _config: &InitConfig) -> impl Future<Output = Result<(), BoxError>> + Send {
        async { Ok(()) }
    }

    /// Answers the request; `Ok(None)` means the application has no route for it.
    fn respond(
        &self,
        request: Request,
        ctx: RequestContext,
    ) -> impl Future<Output = Result<Option<Response>, BoxError>> + Send;
}

/// An application with no routes: only static stages and the 404 answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticOnly;

impl App for StaticOnly {
    async fn respond(
        &self,
        _request: Request,
        _ctx: RequestContext,
    ) -> Result<Option<Response>, BoxError> {
        Ok(None)
    }
}

/// Per-request capabilities handed to the application.
#[derive(Debug, Clone)]
pub struct RequestContext {
    client_ip: Option<String>,
    background: Background,
}

impl RequestContext {
    pub fn new(client_ip: Option<String>, background: Background) -> Self {
        Self {
            client_ip,
            background,
        }
    }

    /// Returns the client address given with `--client-ip`.
    pub fn client_address(&self) -> Result<&str, DispatchError> {
        self.client_ip
            .as_deref()
            .ok_or(DispatchError::ClientAddressUnavailable)
    }

    /// Keeps the process alive until `task` settles, without delaying the response.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.background.wait_until(task);
    }
}

/// Which stage produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Assets,
    Prerendered,
    App,
    NotFound,
}

/// Runs the stages in order for one request.
#[derive(Debug)]
pub struct Dispatcher<A> {
    app: A,
    assets: StaticFiles,
    prerendered: StaticFiles,
    manifest: Manifest,
}

impl<A: App> Dispatcher<A> {
    pub fn new(app: A, settings: &Settings) -> Self {
        Self {
            app,
            assets: settings.assets(),
            prerendered: settings.prerendered(),
            manifest: settings.manifest.clone(),
        }
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    /// Produces the response for `request`.
    ///
    /// Later stages are only attempted when the earlier ones found nothing.
    pub async fn dispatch(
        &self,
        request: Request,
        options: &RenderOptions,
        background: Background,
    ) -> Result<(Stage, Response), DispatchError> {
        if options.serve_static {
            if let Some(response) = self.assets.serve(&request).await? {
                debug!(status = response.status().as_u16(), "served client asset");
                return Ok((Stage::Assets, response));
            }
        }

        if let Some(response) = self.prerendered.serve(&request).await? {
            debug!(status = response.status().as_u16(), "served prerendered page");
            return Ok((Stage::Prerendered, response));
        }
        if request.method().is_read() && self.manifest.is_prerendered(request.path()) {
            warn!(path = request.path(), "route is listed as prerendered but has no file");
        }

        let ctx = RequestContext::new(options.client_ip.clone(), background);
        match self.app.respond(request, ctx).await {
            Ok(Some(response)) => Ok((Stage::App, response)),
            Ok(None) => {
                debug!("no stage matched");
                Ok((
                    Stage::NotFound,
                    Response::text(StatusCode::NOT_FOUND, "Not Found"),
                ))
            }
            Err(e) => Err(DispatchError::App(e)),
        }
    }
}
