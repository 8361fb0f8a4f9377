//! Whole exchanges driven through `Runtime::run` with in-memory I/O.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use procweb::BoxError;
use procweb::config::{RenderOptions, Settings};
use procweb::dispatch::{App, RequestContext, Stage, StaticOnly};
use procweb::http::{Headers, Method, Request, Response, StatusCode};
use procweb::protocol::{Command, LineReader};
use procweb::server::{Runtime, ServeError};
use tempfile::TempDir;
use tokio::time::Instant;
use url::Url;

/// Status, headers, whether `start-body`/`end-body` were seen, and the body.
#[derive(Debug)]
struct Reply {
    status: u16,
    reason: String,
    headers: Headers,
    data_commands: usize,
    ended: bool,
    body: Bytes,
}

fn reply(raw: &[u8]) -> Reply {
    let mut lines = LineReader::new();
    lines.push(raw);
    let mut reply = Reply {
        status: 0,
        reason: String::new(),
        headers: Headers::new(),
        data_commands: 0,
        ended: false,
        body: Bytes::new(),
    };
    let mut body = BytesMut::new();
    while let Some(line) = lines.next_line() {
        match Command::decode(&line).unwrap() {
            Command::Status { code, text } => {
                reply.status = code;
                reply.reason = text;
            }
            Command::Header { name, value } => reply.headers.insert(name, value),
            Command::Data(chunk) => {
                reply.data_commands += 1;
                body.extend_from_slice(&chunk);
            }
            Command::EndBody => reply.ended = true,
            _ => {}
        }
    }
    reply.body = body.freeze();
    reply
}

fn commands(commands: &[Command]) -> Cursor<Vec<u8>> {
    let raw: String = commands
        .iter()
        .map(|c| format!("{}\n", c.encode()))
        .collect();
    Cursor::new(raw.into_bytes())
}

fn header(name: &str, value: &str) -> Command {
    Command::Header {
        name: name.into(),
        value: value.into(),
    }
}

fn get(headers: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut all: Vec<Command> = headers.iter().map(|(n, v)| header(n, v)).collect();
    all.push(Command::StartBody);
    all.push(Command::EndBody);
    commands(&all)
}

fn options(method: Method, url: &str) -> RenderOptions {
    RenderOptions {
        method,
        url: Url::parse(url).unwrap(),
        client_ip: Some("198.51.100.7".into()),
        serve_static: true,
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn site() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "manifest.json", br#"{"appDir":"_app","prerendered":["/about"]}"#);
    write(root, "client/_app/immutable/entry.js", b"console.log('entry');");
    write(root, "client/_app/immutable/entry.js.gz", b"\x1f\x8bgzipped entry");
    write(root, "client/_app/immutable/entry.js.map", b"{}");
    write(root, "client/robots.txt", b"User-agent: *\n");
    write(root, "prerendered/about.html", b"<h1>About</h1>");
    dir
}

/// Routes `/api/*`; fails on `/boom`; registers slow background work on `/track`.
struct Site;

impl App for Site {
    async fn respond(
        &self,
        mut request: Request,
        ctx: RequestContext,
    ) -> Result<Option<Response>, BoxError> {
        let path = request.path().to_owned();
        match path.as_str() {
            "/boom" => Err("render failed".into()),
            "/track" => {
                ctx.wait_until(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                });
                Ok(Some(Response::text(StatusCode::ACCEPTED, "queued")))
            }
            "/api/echo" => {
                let body = request.take_body().collect().await?;
                let kind = request
                    .headers()
                    .get("content-type")
                    .unwrap_or("none")
                    .to_owned();
                Ok(Some(
                    Response::new(StatusCode::CREATED)
                        .status_text("Stored")
                        .header("x-client", ctx.client_address()?)
                        .header("x-kind", kind)
                        .body(body),
                ))
            }
            "/api/wait" => {
                request.signal().aborted().await;
                Ok(Some(Response::text(StatusCode::OK, "saw abort")))
            }
            _ => Ok(None),
        }
    }
}

fn runtime<A: App>(app: A, dir: &TempDir, ignore: Option<&str>) -> Runtime<A> {
    let settings = Settings::load(dir.path(), ignore).unwrap();
    Runtime::new(app, &settings)
}

#[tokio::test]
async fn serves_immutable_asset_with_precompressed_sibling() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, None);
    let mut out = Vec::new();
    let exchange = rt
        .run(
            &options(Method::Get, "https://example.com/_app/immutable/entry.js"),
            get(&[("accept-encoding", "br, gzip")]),
            &mut out,
        )
        .await
        .unwrap();
    assert_eq!(exchange.stage, Stage::Assets);

    let r = reply(&out);
    assert_eq!(r.status, 200);
    assert_eq!(r.reason, "OK");
    assert_eq!(r.headers.get("content-encoding"), Some("gzip"));
    assert_eq!(r.headers.get("vary"), Some("accept-encoding"));
    assert_eq!(
        r.headers.get("cache-control"),
        Some("public,max-age=604800,immutable")
    );
    assert_eq!(&r.body[..], b"\x1f\x8bgzipped entry");
    assert!(r.ended);
}

#[tokio::test]
async fn conditional_get_returns_not_modified() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, None);
    let url = "https://example.com/robots.txt";

    let mut out = Vec::new();
    rt.run(&options(Method::Get, url), get(&[]), &mut out)
        .await
        .unwrap();
    let first = reply(&out);
    let etag = first.headers.get("etag").unwrap().to_owned();
    assert!(etag.starts_with("W/\""));
    assert_eq!(first.headers.get("cache-control"), Some("public,max-age=14400"));

    let mut out = Vec::new();
    rt.run(
        &options(Method::Get, url),
        get(&[("if-none-match", &etag)]),
        &mut out,
    )
    .await
    .unwrap();
    let second = reply(&out);
    assert_eq!(second.status, 304);
    assert_eq!(second.data_commands, 0);
    assert!(second.ended);
}

#[tokio::test]
async fn head_sends_headers_without_data() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, None);
    let mut out = Vec::new();
    let exchange = rt
        .run(
            &options(Method::Head, "https://example.com/robots.txt"),
            get(&[]),
            &mut out,
        )
        .await
        .unwrap();
    assert_eq!(exchange.written.bytes, 0);

    let r = reply(&out);
    assert_eq!(r.status, 200);
    assert_eq!(r.headers.get("content-length"), Some("14"));
    assert_eq!(r.data_commands, 0);
    assert!(r.ended);
}

#[tokio::test]
async fn byte_range_is_partial_content() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, None);
    let mut out = Vec::new();
    rt.run(
        &options(Method::Get, "https://example.com/robots.txt"),
        get(&[("range", "bytes=0-9")]),
        &mut out,
    )
    .await
    .unwrap();
    let r = reply(&out);
    assert_eq!(r.status, 206);
    assert_eq!(r.headers.get("content-range"), Some("bytes 0-9/14"));
    assert_eq!(&r.body[..], b"User-agent");

    let mut out = Vec::new();
    rt.run(
        &options(Method::Get, "https://example.com/robots.txt"),
        get(&[("range", "bytes=100-")]),
        &mut out,
    )
    .await
    .unwrap();
    let r = reply(&out);
    assert_eq!(r.status, 416);
    assert_eq!(r.headers.get("content-range"), Some("bytes */14"));
}

#[tokio::test]
async fn prerendered_page_and_trailing_slash_redirect() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, None);

    let mut out = Vec::new();
    let exchange = rt
        .run(&options(Method::Get, "https://example.com/about"), get(&[]), &mut out)
        .await
        .unwrap();
    assert_eq!(exchange.stage, Stage::Prerendered);
    let r = reply(&out);
    assert_eq!(&r.body[..], b"<h1>About</h1>");
    assert!(!r.headers.contains("cache-control"));

    let mut out = Vec::new();
    rt.run(
        &options(Method::Get, "https://example.com/about/?ref=nav"),
        get(&[]),
        &mut out,
    )
    .await
    .unwrap();
    let r = reply(&out);
    assert_eq!(r.status, 302);
    assert_eq!(r.headers.get("location"), Some("/about?ref=nav"));
}

#[tokio::test]
async fn ignored_files_are_not_served() {
    let dir = site();
    let rt = runtime(StaticOnly, &dir, Some("**/*.map"));
    let mut out = Vec::new();
    let exchange = rt
        .run(
            &options(Method::Get, "https://example.com/_app/immutable/entry.js.map"),
            get(&[]),
            &mut out,
        )
        .await
        .unwrap();
    assert_eq!(exchange.stage, Stage::NotFound);
    let r = reply(&out);
    assert_eq!(r.status, 404);
    assert_eq!(&r.body[..], b"Not Found");
}

#[tokio::test]
async fn app_reads_streamed_body_and_sets_reason() {
    let dir = site();
    let rt = runtime(Site, &dir, None);
    let input = commands(&[
        header("content-type", "text/plain"),
        Command::StartBody,
        Command::Data(Bytes::from_static(b"hello ")),
        Command::Data(Bytes::from_static(b"world")),
        Command::EndBody,
    ]);
    let mut out = Vec::new();
    let exchange = rt
        .run(&options(Method::Post, "https://example.com/api/echo"), input, &mut out)
        .await
        .unwrap();
    assert_eq!(exchange.stage, Stage::App);

    let r = reply(&out);
    assert_eq!(r.status, 201);
    assert_eq!(r.reason, "Stored");
    assert_eq!(r.headers.get("x-client"), Some("198.51.100.7"));
    assert_eq!(r.headers.get("x-kind"), Some("text/plain"));
    assert_eq!(&r.body[..], b"hello world");
}

#[tokio::test]
async fn abort_reaches_the_app() {
    let dir = site();
    let rt = runtime(Site, &dir, None);
    let (mut host, ours) = tokio::io::duplex(1024);
    let opts = options(Method::Post, "https://example.com/api/wait");
    let mut out = Vec::new();

    let host_side = async move {
        use tokio::io::AsyncWriteExt;
        for command in [Command::StartBody, Command::Data(Bytes::from_static(b"x"))] {
            host.write_all(format!("{}\n", command.encode()).as_bytes())
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        host.write_all(format!("{}\n", Command::Abort.encode()).as_bytes())
            .await
            .unwrap();
        host
    };
    let (result, _host) = tokio::join!(
        rt.run(&opts, ours, &mut out),
        host_side
    );
    result.unwrap();
    assert_eq!(&reply(&out).body[..], b"saw abort");
}

#[tokio::test]
async fn dispatch_failure_writes_nothing() {
    let dir = site();
    let rt = runtime(Site, &dir, None);
    let mut out = Vec::new();
    let err = rt
        .run(&options(Method::Get, "https://example.com/boom"), get(&[]), &mut out)
        .await
        .unwrap_err();
    assert!(matches!(err, ServeError::Dispatch(_)));
    assert!(err.to_string().contains("render failed"));
    assert!(out.is_empty());
}

#[tokio::test(start_paused = true)]
async fn background_work_delays_completion_not_the_response() {
    let dir = site();
    let rt = runtime(Site, &dir, None);
    let mut out = Vec::new();
    let start = Instant::now();
    let exchange = rt
        .run(&options(Method::Post, "https://example.com/track"), get(&[]), &mut out)
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert_eq!(exchange.drained.completed, 1);

    let r = reply(&out);
    assert_eq!(r.status, 202);
    assert_eq!(&r.body[..], b"queued");
    assert!(r.ended);
}
