//! Command-line arguments, environment and build-output layout.
//!
//! Everything here is resolved once at startup, before any protocol I/O, so a
//! bad flag or a broken manifest fails the process without touching stdout.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::http::Method;
use crate::statics::StaticFiles;

/// Environment variable holding comma-separated globs of files never served.
pub const IGNORE_FILES_ENV: &str = "IGNORE_FILES";

/// Methods the host may ask us to render.
const RENDER_METHODS: [Method; 6] = [
    Method::Get,
    Method::Head,
    Method::Post,
    Method::Put,
    Method::Patch,
    Method::Options,
];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed manifest {path}: {source}")]
    ManifestJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid pattern in IGNORE_FILES: {0}")]
    IgnorePattern(#[from] globset::Error),
}

#[derive(Debug, Parser)]
#[command(
    name = "procweb",
    about = "Serve one HTTP exchange over a stdin/stdout command stream",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read one request from stdin and write its response to stdout
    Render(RenderArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    /// Absolute URL of the request
    #[arg(short, long, value_parser = parse_url)]
    pub url: Url,

    /// Request method: GET, HEAD, POST, PUT, PATCH or OPTIONS (any case)
    #[arg(short, long, value_parser = parse_method)]
    pub method: Method,

    /// Address of the client, exposed to the application
    #[arg(short = 'i', long)]
    pub client_ip: Option<String>,

    /// Skip the client asset directory
    #[arg(long)]
    pub no_static: bool,

    /// Build output directory (holds `client/`, `prerendered/`, `manifest.json`)
    #[arg(long, env = "PROCWEB_ROOT", default_value = ".")]
    pub root: PathBuf,
}

fn parse_url(value: &str) -> Result<Url, String> {
    Url::parse(value).map_err(|e| format!("`{value}` is not an absolute URL: {e}"))
}

fn parse_method(value: &str) -> Result<Method, String> {
    let upper = value.to_ascii_uppercase();
    RENDER_METHODS
        .into_iter()
        .find(|m| m.as_str() == upper)
        .ok_or_else(|| {
            format!("unsupported method `{value}`, expected one of GET, HEAD, POST, PUT, PATCH, OPTIONS")
        })
}

/// What to render, as given on the command line.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub method: Method,
    pub url: Url,
    pub client_ip: Option<String>,
    pub serve_static: bool,
}

impl From<&RenderArgs> for RenderOptions {
    fn from(args: &RenderArgs) -> Self {
        Self {
            method: args.method.clone(),
            url: args.url.clone(),
            client_ip: args.client_ip.clone(),
            serve_static: !args.no_static,
        }
    }
}

/// Build metadata written next to the server bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default = "default_app_dir")]
    pub app_dir: String,
    #[serde(default)]
    pub immutable_dir: Option<String>,
    /// Routes rendered at build time.
    #[serde(default)]
    pub prerendered: BTreeSet<String>,
}

fn default_app_dir() -> String {
    "_app".to_owned()
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            app_dir: default_app_dir(),
            immutable_dir: None,
            prerendered: BTreeSet::new(),
        }
    }
}

impl Manifest {
    /// Loads `path`; a missing file yields the default manifest.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no manifest, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Manifest {
                    path: path.to_owned(),
                    source,
                });
            }
        };
        serde_json::from_slice(&raw).map_err(|source| ConfigError::ManifestJson {
            path: path.to_owned(),
            source,
        })
    }

    /// Directory of content-hashed assets, relative to the client directory.
    pub fn immutable_dir(&self) -> String {
        match &self.immutable_dir {
            Some(dir) => dir.trim_matches('/').to_owned(),
            None => format!("{}/immutable", self.app_dir.trim_matches('/')),
        }
    }

    /// Returns `true` if `path` was rendered at build time.
    pub fn is_prerendered(&self, path: &str) -> bool {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };
        self.prerendered.contains(trimmed)
    }
}

/// Where the build output lives.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client_dir(&self) -> PathBuf {
        self.root.join("client")
    }

    pub fn prerendered_dir(&self) -> PathBuf {
        self.root.join("prerendered")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }
}

/// Compiles a comma-separated glob list. Blank entries are skipped; an empty
/// list yields `None`.
pub fn parse_ignore(list: &str) -> Result<Option<GlobSet>, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    let mut count = 0;
    for pattern in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        builder.add(Glob::new(pattern.trim_start_matches('/'))?);
        count += 1;
    }
    if count == 0 {
        return Ok(None);
    }
    builder.build().map(Some)
}

/// Startup configuration shared by every stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub layout: Layout,
    pub manifest: Manifest,
    pub ignore: Option<Arc<GlobSet>>,
}

impl Settings {
    /// Loads the manifest under `root` and compiles `ignore_files`.
    pub fn load(root: &Path, ignore_files: Option<&str>) -> Result<Self, ConfigError> {
        let layout = Layout::new(root);
        let manifest = Manifest::load(&layout.manifest_path())?;
        let ignore = match ignore_files {
            Some(list) => parse_ignore(list)?.map(Arc::new),
            None => None,
        };
        Ok(Self {
            layout,
            manifest,
            ignore,
        })
    }

    /// Client assets: cached, with the immutable directory honoured.
    pub fn assets(&self) -> StaticFiles {
        StaticFiles::new(self.layout.client_dir())
            .cache_headers(true)
            .immutable_dir(&self.manifest.immutable_dir())
            .ignore(self.ignore.clone())
    }

    /// Prerendered pages: never sent with cache headers.
    pub fn prerendered(&self) -> StaticFiles {
        StaticFiles::new(self.layout.prerendered_dir())
            .cache_headers(false)
            .ignore(self.ignore.clone())
    }
}
