//! One exchange over the host's command stream.
//!
//! [`Runtime::run`] reads commands until the request headers are complete,
//! hands the request to the [`Dispatcher`] while a feeder task keeps pushing
//! body chunks into it, writes the response back as commands, and finally
//! waits for background work. [`launch`] wires it to the process: logging,
//! the command line, stdin and stdout, and the exit code.

use std::ffi::OsString;
use std::io;
use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bridge::{RequestAssembler, ResponseWriter, Step, WriteError, Written};
use crate::config::{Cli, IGNORE_FILES_ENV, RenderArgs, RenderOptions, Settings};
use crate::dispatch::{App, DispatchError, Dispatcher, InitConfig, Stage};
use crate::http::{Method, Request};
use crate::lifecycle::{Background, DrainReport};
use crate::protocol::{Command, LineStream};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "procweb=info";

/// Name of the built-in subcommand that serves one request.
const RENDER_COMMAND: &str = "render";

/// Exit code for invalid arguments, matching clap.
const USAGE_EXIT_CODE: u8 = 2;

/// Errors that end an exchange without a complete response.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to read from the host: {0}")]
    Io(#[from] io::Error),

    #[error("input closed before the request headers were complete")]
    InputClosed,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Summary of a finished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub stage: Stage,
    pub written: Written,
    pub drained: DrainReport,
}

/// Serves a single request per call.
#[derive(Debug)]
pub struct Runtime<A> {
    dispatcher: Dispatcher<A>,
}

impl<A: App> Runtime<A> {
    pub fn new(app: A, settings: &Settings) -> Self {
        Self {
            dispatcher: Dispatcher::new(app, settings),
        }
    }

    pub fn app(&self) -> &A {
        self.dispatcher.app()
    }

    /// Runs one exchange: commands in from `input`, commands out to `output`.
    ///
    /// Background work registered by the application is awaited before this
    /// returns, whether or not the response made it out.
    ///
    /// # Errors
    ///
    /// - [`ServeError::InputClosed`] if `input` ends before `start-body`.
    /// - [`ServeError::Dispatch`] if no response could be produced; nothing
    ///   is written in that case.
    /// - [`ServeError::Write`] if the response could not be written in full.
    pub async fn run<R, W>(
        &self,
        options: &RenderOptions,
        input: R,
        output: W,
    ) -> Result<Exchange, ServeError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin,
    {
        let mut lines = LineStream::new(input);
        let mut assembler = RequestAssembler::new(options.method.clone(), options.url.clone());
        let request = read_head(&mut lines, &mut assembler).await?;

        debug!(
            method = %request.method(),
            path = request.path(),
            headers = request.headers().len(),
            "request headers complete"
        );

        let feeder = tokio::spawn(feed(lines, assembler));
        let background = Background::new();
        let outcome = self
            .respond(request, options, background.clone(), output)
            .await;
        stop(feeder);

        let drained = background.drain().await;
        let (stage, written) = outcome?;
        info!(
            method = %options.method,
            path = options.url.path(),
            status = written.status.as_u16(),
            ?stage,
            bytes = written.bytes,
            background = drained.completed + drained.failed,
            "request served"
        );
        Ok(Exchange {
            stage,
            written,
            drained,
        })
    }

    async fn respond<W>(
        &self,
        request: Request,
        options: &RenderOptions,
        background: Background,
        output: W,
    ) -> Result<(Stage, Written), ServeError>
    where
        W: AsyncWrite + Unpin,
    {
        let (stage, response) = self
            .dispatcher
            .dispatch(request, options, background)
            .await?;
        let suppress_body = options.method == Method::Head;
        let written = ResponseWriter::new(output)
            .write_response(response, suppress_body)
            .await?;
        Ok((stage, written))
    }
}

/// Reads commands until the assembler yields the request.
async fn read_head<R>(
    lines: &mut LineStream<R>,
    assembler: &mut RequestAssembler,
) -> Result<Request, ServeError>
where
    R: AsyncRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        let Some(command) = decode(&line) else {
            continue;
        };
        match assembler.handle(command) {
            Step::Continue => {}
            Step::Ready(request) => return Ok(request),
            Step::Finished => break,
        }
    }
    Err(ServeError::InputClosed)
}

/// Pushes the rest of the inbound commands into the request body. Input that
/// ends or fails mid-body counts as an abort.
async fn feed<R>(mut lines: LineStream<R>, mut assembler: RequestAssembler)
where
    R: AsyncRead + Unpin,
{
    loop {
        let command = match lines.next_line().await {
            Ok(Some(line)) => match decode(&line) {
                Some(command) => command,
                None => continue,
            },
            Ok(None) => {
                debug!("input closed mid-body, treating as abort");
                Command::Abort
            }
            Err(e) => {
                warn!(error = %e, "failed to read request body, treating as abort");
                Command::Abort
            }
        };
        if let Step::Finished = assembler.handle(command) {
            debug!(state = ?assembler.state(), "inbound side finished");
            return;
        }
    }
}

fn decode(line: &str) -> Option<Command> {
    if line.trim().is_empty() {
        return None;
    }
    match Command::decode(line) {
        Ok(command) => Some(command),
        Err(e) => {
            warn!(error = %e, "skipping malformed command");
            None
        }
    }
}

fn stop(feeder: JoinHandle<()>) {
    if !feeder.is_finished() {
        debug!("response done before request body, dropping the rest of the input");
        feeder.abort();
    }
}

/// Installs the stderr logger; stdout belongs to the protocol.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // A subscriber may already be installed by an embedding test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

/// Runs `app` as the process: parses the command line, serves the request
/// on stdin/stdout, and maps the outcome to an exit code.
pub fn launch<A: App>(app: A) -> ExitCode {
    init_tracing();
    let ignore_files = std::env::var(IGNORE_FILES_ENV).ok();
    launch_from(app, std::env::args_os(), ignore_files.as_deref())
}

/// [`launch`] with explicit arguments and ignore list.
///
/// Exit codes: 0 for a written response or a successful app subcommand,
/// 1 for hook, configuration or exchange failures, and clap's own code
/// (2) for invalid arguments.
pub fn launch_from<A, I, T>(app: A, argv: I, ignore_files: Option<&str>) -> ExitCode
where
    A: App,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = match app.setup_cli(Cli::command()).try_get_matches_from(argv) {
        Ok(matches) => matches,
        Err(e) => return usage_error(&e),
    };

    if let Err(e) = app.bootstrap(&matches) {
        error!(error = %e, "bootstrap failed");
        return ExitCode::FAILURE;
    }

    let args = match matches.subcommand() {
        Some((RENDER_COMMAND, sub)) => match RenderArgs::from_arg_matches(sub) {
            Ok(args) => args,
            Err(e) => return usage_error(&e),
        },
        Some((name, sub)) => {
            return match app.command(name, sub) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(command = name, error = %e, "command failed");
                    ExitCode::FAILURE
                }
            };
        }
        None => {
            error!("no subcommand given");
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    let settings = match Settings::load(&args.root, ignore_files) {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let options = RenderOptions::from(&args);

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let init = InitConfig::from_env(settings.manifest.clone());
    let runtime = Runtime::new(app, &settings);
    rt.block_on(async {
        if let Err(e) = runtime.app().init(&init).await {
            error!(error = %e, "application init failed");
            return ExitCode::FAILURE;
        }
        match runtime
            .run(&options, tokio::io::stdin(), tokio::io::stdout())
            .await
        {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "request failed");
                ExitCode::FAILURE
            }
        }
    })
}

/// Prints a clap error (or help/version text) and returns its exit code.
fn usage_error(e: &clap::Error) -> ExitCode {
    let _ = e.print();
    ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(USAGE_EXIT_CODE))
}
