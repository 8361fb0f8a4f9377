//! Static file serving with HTTP caching semantics.
//!
//! [`StaticFiles`] maps a request path onto a directory of build output and
//! answers GET/HEAD requests directly: index and extension fallbacks, weak
//! ETags, `304 Not Modified`, single byte ranges, and precompressed `.gz` /
//! `.br` siblings. Anything it cannot serve is reported as `None` so the
//! dispatcher can fall through to the next stage.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use globset::GlobSet;
use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::http::{Body, Headers, Request, Response, StatusCode};

pub mod range;

const CACHE_IMMUTABLE: &str = "public,max-age=604800,immutable";
const CACHE_DEFAULT: &str = "public,max-age=14400";

/// A file found under the root for a request path.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl Resolved {
    /// Weak validator built from size and modification time.
    pub fn etag(&self) -> String {
        let mtime_ms = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        format!("W/\"{}-{}\"", self.size, mtime_ms)
    }
}

/// A precompressed variant of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Brotli,
}

impl Encoding {
    fn token(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "br",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Brotli => "br",
        }
    }
}

/// Serves files from one directory.
///
/// # Examples
///
/// ```rust,no_run
/// use procweb::statics::StaticFiles;
///
/// let assets = StaticFiles::new("build/client")
///     .cache_headers(true)
///     .immutable_dir("_app/immutable");
/// ```
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    cache_headers: bool,
    immutable_prefix: Option<String>,
    ignore: Option<Arc<GlobSet>>,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_headers: false,
            immutable_prefix: None,
            ignore: None,
        }
    }

    /// Whether to send `cache-control` on full (non-range) responses.
    #[must_use]
    pub fn cache_headers(mut self, enabled: bool) -> Self {
        self.cache_headers = enabled;
        self
    }

    /// Root-relative directory whose files are content-hashed and may be cached
    /// forever.
    #[must_use]
    pub fn immutable_dir(mut self, dir: &str) -> Self {
        let dir = dir.trim_matches('/');
        self.immutable_prefix = (!dir.is_empty()).then(|| format!("{dir}/"));
        self
    }

    /// Paths (root-relative, no leading `/`) matching any glob are never served.
    #[must_use]
    pub fn ignore(mut self, globs: Option<Arc<GlobSet>>) -> Self {
        self.ignore = globs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Tries to answer `request` from disk.
    ///
    /// Returns `Ok(None)` when this directory has nothing for the request.
    pub async fn serve(&self, request: &Request) -> io::Result<Option<Response>> {
        if !request.method().is_read() {
            return Ok(None);
        }
        if !tokio::fs::metadata(&self.root)
            .await
            .is_ok_and(|m| m.is_dir())
        {
            debug!(root = %self.root.display(), "static root missing");
            return Ok(None);
        }

        let Some(rel) = normalize(request.path()) else {
            return Ok(None);
        };
        if self.is_ignored(&rel) {
            debug!(path = %rel, "path matches an ignore pattern");
            return Ok(None);
        }

        let Some(found) = self.resolve(&rel).await else {
            return Ok(None);
        };
        debug!(path = %found.path.display(), "static file resolved");

        let path = request.path();
        if path != "/" && path.ends_with('/') {
            let mut location = path.trim_end_matches('/').to_owned();
            if location.is_empty() {
                location.push('/');
            }
            if let Some(query) = request.query() {
                location.push('?');
                location.push_str(query);
            }
            return Ok(Some(
                Response::new(StatusCode::FOUND).header("location", location),
            ));
        }

        self.respond(request, &rel, found).await.map(Some)
    }

    /// Finds the first regular file among `p`, `p.html`, `p.htm`,
    /// `p/index.html`, `p/index.htm`.
    pub async fn resolve(&self, rel: &str) -> Option<Resolved> {
        for candidate in candidates(rel) {
            let path = self.root.join(&candidate);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    return Some(Resolved {
                        path,
                        size: meta.len(),
                        modified: meta.modified().unwrap_or(UNIX_EPOCH),
                    });
                }
                _ => continue,
            }
        }
        None
    }

    fn is_ignored(&self, rel: &str) -> bool {
        self.ignore.as_ref().is_some_and(|set| set.is_match(rel))
    }

    fn cache_control(&self, rel: &str) -> Option<&'static str> {
        if !self.cache_headers {
            return None;
        }
        let immutable = self
            .immutable_prefix
            .as_deref()
            .is_some_and(|prefix| rel.starts_with(prefix));
        Some(if immutable { CACHE_IMMUTABLE } else { CACHE_DEFAULT })
    }

    async fn respond(&self, request: &Request, rel: &str, found: Resolved) -> io::Result<Response> {
        let etag = found.etag();
        let mut headers = Headers::new();
        headers.insert("content-type", content_type(&found.path));
        headers.insert("last-modified", httpdate::fmt_http_date(found.modified));
        headers.insert("etag", etag.clone());

        if request
            .headers()
            .get("if-none-match")
            .is_some_and(|value| etag_matches(value, &etag))
        {
            if let Some(cache) = self.cache_control(rel) {
                headers.insert("cache-control", cache);
            }
            return Ok(with_headers(Response::new(StatusCode::NOT_MODIFIED), headers));
        }

        if let Some(value) = request.headers().get("range") {
            headers.insert("accept-ranges", "bytes");
            let Some(window) = range::parse(value, found.size) else {
                debug!(range = value, size = found.size, "range not satisfiable");
                headers.insert("content-range", range::unsatisfiable(found.size));
                headers.insert("content-length", "0");
                return Ok(with_headers(
                    Response::new(StatusCode::RANGE_NOT_SATISFIABLE),
                    headers,
                ));
            };
            let file = tokio::fs::File::open(&found.path).await?;
            let body = Body::file_window(file, window.start, window.len()).await?;
            headers.insert("content-range", window.content_range(found.size));
            headers.set("content-length", window.len().to_string());
            return Ok(with_headers(Response::new(StatusCode::PARTIAL_CONTENT), headers).body(body));
        }

        if let Some(cache) = self.cache_control(rel) {
            headers.insert("cache-control", cache);
        }

        let (path, size) = match negotiate(request.headers(), &found.path).await {
            Some((encoding, path, size)) => {
                headers.insert("content-encoding", encoding.token());
                headers.insert("vary", "accept-encoding");
                (path, size)
            }
            None => {
                headers.insert("accept-ranges", "bytes");
                (found.path, found.size)
            }
        };
        headers.set("content-length", size.to_string());

        let file = tokio::fs::File::open(&path).await?;
        let body = Body::file_window(file, 0, size).await?;
        Ok(with_headers(Response::new(StatusCode::OK), headers).body(body))
    }
}

fn with_headers(mut response: Response, headers: Headers) -> Response {
    *response.headers_mut() = headers;
    response
}

/// Percent-decodes a URL path and resolves `.`/`..` segments without ever
/// climbing above the root. Returns the root-relative path without leading or
/// trailing slashes, or `None` if the path is not valid UTF-8 or smuggles a
/// backslash or NUL.
pub fn normalize(path: &str) -> Option<String> {
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let mut parts: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s if s.contains(['\\', '\0']) => return None,
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}

fn candidates(rel: &str) -> Vec<String> {
    if rel.is_empty() {
        return vec!["index.html".to_owned(), "index.htm".to_owned()];
    }
    vec![
        rel.to_owned(),
        format!("{rel}.html"),
        format!("{rel}.htm"),
        format!("{rel}/index.html"),
        format!("{rel}/index.htm"),
    ]
}

fn content_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let textual = mime.type_() == mime_guess::mime::TEXT
        || matches!(mime.subtype().as_str(), "javascript" | "json" | "xml");
    if textual && mime.get_param(mime_guess::mime::CHARSET).is_none() {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}

fn etag_matches(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}

/// Whether `accept-encoding` admits `encoding`; `q=0` entries refuse it.
fn accepts(headers: &Headers, encoding: Encoding) -> bool {
    headers.get_all("accept-encoding").any(|value| {
        value.split(',').any(|item| {
            let mut parts = item.split(';').map(str::trim);
            let token = parts.next().unwrap_or_default();
            let refused = parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q == 0.0)
            });
            !refused && (token.eq_ignore_ascii_case(encoding.token()) || token == "*")
        })
    })
}

/// Picks a precompressed sibling: `.gz` first, then `.br`.
async fn negotiate(headers: &Headers, path: &Path) -> Option<(Encoding, PathBuf, u64)> {
    if !headers.contains("accept-encoding") {
        return None;
    }
    for encoding in [Encoding::Gzip, Encoding::Brotli] {
        if !accepts(headers, encoding) {
            continue;
        }
        let mut sibling = path.as_os_str().to_owned();
        sibling.push(".");
        sibling.push(encoding.extension());
        let sibling = PathBuf::from(sibling);
        if let Ok(meta) = tokio::fs::metadata(&sibling).await {
            if meta.is_file() {
                return Some((encoding, sibling, meta.len()));
            }
        }
    }
    None
}
