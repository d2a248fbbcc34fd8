//! Shared test infrastructure for integration tests.
//!
//! `ArchiveServer` is a loopback HTTP server that imitates a snapshot bucket:
//! a paginated XML directory listing, `LAST_CHANGE`, and one zip per revision.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Cursor, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

pub const PLATFORM_DIR: &str = "Linux_x64";
pub const ARCHIVE_NAME: &str = "chrome-linux.zip";
pub const BINARY_PATH: &str = "chrome-linux/chrome";

pub struct ArchiveServer {
    addr: SocketAddr,
}

impl ArchiveServer {
    /// Serve `routes`, keyed by request target (path plus query).
    pub fn start(routes: BTreeMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let routes = Arc::new(routes);
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let routes = Arc::clone(&routes);
                std::thread::spawn(move || serve(stream, &routes));
            }
        });
        Self { addr }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Dependency manifest endpoint; see [`deps_route`].
    pub fn deps_url(&self) -> String {
        format!("{}/DEPS", self.base_url())
    }
}

/// Route for the dependency manifest of `revision` pinning `webkit`.
pub fn deps_route(revision: u64, webkit: u64) -> (String, Vec<u8>) {
    (
        format!("/DEPS?revision={revision}"),
        format!("vars = {{\n  'webkit_revision': '{webkit}',\n}}\n").into_bytes(),
    )
}

fn serve(stream: TcpStream, routes: &BTreeMap<String, Vec<u8>>) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header) {
            Ok(0) | Err(_) => break,
            Ok(_) if header.trim().is_empty() => break,
            Ok(_) => {}
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    let (status, body) = match routes.get(target) {
        Some(body) => ("200 OK", body.as_slice()),
        None => ("404 Not Found", &b""[..]),
    };

    let mut stream = reader.into_inner();
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    if method != "HEAD" {
        let _ = stream.write_all(body);
    }
    let _ = stream.flush();
}

/// Snapshot bucket contents: listing pages, `LAST_CHANGE` and archives.
///
/// `pages` splits the revisions into listing pages linked by markers.
pub fn snapshot_routes(pages: &[&[u64]], script: impl Fn(u64) -> String) -> BTreeMap<String, Vec<u8>> {
    let mut routes = BTreeMap::new();
    let prefix = format!("{PLATFORM_DIR}/");
    let mut marker: Option<String> = None;
    for (index, revisions) in pages.iter().enumerate() {
        let next_marker = (index + 1 < pages.len())
            .then(|| revisions.last().map(|last| format!("{prefix}{last}/")))
            .flatten();
        let target = match &marker {
            Some(marker) => format!("/?delimiter=/&prefix={prefix}&marker={marker}"),
            None => format!("/?delimiter=/&prefix={prefix}"),
        };
        routes.insert(
            target,
            listing_page(&prefix, revisions, next_marker.as_deref()).into_bytes(),
        );
        for revision in revisions.iter() {
            let body = script(*revision);
            routes.insert(
                format!("/{PLATFORM_DIR}/{revision}/{ARCHIVE_NAME}"),
                zip_bytes(&[(BINARY_PATH, 0o755, body.as_str())]),
            );
        }
        marker = next_marker;
    }
    if let Some(latest) = pages.iter().flat_map(|page| page.iter()).max() {
        routes.insert(
            format!("/{PLATFORM_DIR}/LAST_CHANGE"),
            latest.to_string().into_bytes(),
        );
    }
    routes
}

fn listing_page(prefix: &str, revisions: &[u64], next_marker: Option<&str>) -> String {
    let mut xml = String::from(
        "<?xml version='1.0' encoding='UTF-8'?>\
         <ListBucketResult xmlns=\"http://doc.s3.amazonaws.com/2006-03-01\">\
         <Name>chromium-browser-snapshots</Name>",
    );
    xml.push_str(&format!("<Prefix>{prefix}</Prefix>"));
    match next_marker {
        Some(marker) => xml.push_str(&format!(
            "<NextMarker>{marker}</NextMarker><IsTruncated>true</IsTruncated>"
        )),
        None => xml.push_str("<IsTruncated>false</IsTruncated>"),
    }
    for revision in revisions {
        xml.push_str(&format!(
            "<CommonPrefixes><Prefix>{prefix}{revision}/</Prefix></CommonPrefixes>"
        ));
    }
    xml.push_str("</ListBucketResult>");
    xml
}

/// Zip `(name, mode, contents)` entries into memory.
pub fn zip_bytes(entries: &[(&str, u32, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, mode, contents) in entries {
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(*mode);
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(contents.as_bytes()).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Run the built binary with a clean settings environment.
///
/// `deps_url` keeps the manifest lookup off the network.
pub fn run_bisect(args: &[&str], download_dir: &Path, deps_url: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_build-bisect"))
        .arg("--download-dir")
        .arg(download_dir)
        .args(args)
        .env_remove("BISECT_BASE_URL")
        .env_remove("BISECT_OFFICIAL_BASE_URL")
        .env_remove("BISECT_DOWNLOAD_DIR")
        .env_remove("BISECT_CONFIG")
        .env_remove("RUST_LOG")
        .env("BISECT_DEPS_URL", deps_url)
        .stdin(Stdio::null())
        .output()
        .expect("run build-bisect")
}
