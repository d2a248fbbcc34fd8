//! Blocking HTTP seam shared by the catalogs and the artifact fetcher.
use anyhow::{Context, Result};
use std::io::Read;

/// An open response body plus its advertised size.
pub struct Download {
    pub content_length: Option<u64>,
    pub body: Box<dyn Read>,
}

/// Minimal transport surface: fetch a body or probe for existence.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Download>;

    /// True when `url` answers a HEAD request with a success status.
    fn exists(&self, url: &str) -> bool;

    fn get_text(&self, url: &str) -> Result<String> {
        let mut download = self.get(url)?;
        let mut text = String::new();
        download
            .body
            .read_to_string(&mut text)
            .with_context(|| format!("read body of {url}"))?;
        Ok(text)
    }
}

/// Transport backed by `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpTransport;

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Download> {
        let resp = ureq::get(url)
            .call()
            .with_context(|| format!("GET {url}"))?;
        let content_length = resp.body().content_length();
        let body = resp.into_body().into_reader();
        Ok(Download {
            content_length,
            body: Box::new(body),
        })
    }

    fn exists(&self, url: &str) -> bool {
        match ureq::head(url).call() {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(url, error = %err, "probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory transport for exercising catalogs and fetchers offline.
    use super::{Download, Transport};
    use anyhow::{anyhow, Result};
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    pub enum Route {
        Body(Vec<u8>),
        /// Streams zeros forever, slowly, so cancellation can be observed.
        Endless,
        /// Blocks inside the first read for far longer than any test runs.
        Stalled,
        Fail,
    }

    #[derive(Default)]
    pub struct MemoryTransport {
        routes: Mutex<BTreeMap<String, Route>>,
        requests: Mutex<Vec<String>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(&self, url: impl Into<String>, route: Route) {
            self.routes
                .lock()
                .expect("routes lock")
                .insert(url.into(), route);
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    struct EndlessReader;

    impl Read for EndlessReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(2));
            let n = buf.len().min(512);
            buf[..n].fill(0);
            Ok(n)
        }
    }

    struct StalledReader;

    impl Read for StalledReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_secs(600));
            Ok(0)
        }
    }

    impl Transport for MemoryTransport {
        fn get(&self, url: &str) -> Result<Download> {
            self.requests
                .lock()
                .expect("requests lock")
                .push(url.to_string());
            let route = self
                .routes
                .lock()
                .expect("routes lock")
                .get(url)
                .cloned();
            match route {
                Some(Route::Body(bytes)) => Ok(Download {
                    content_length: Some(bytes.len() as u64),
                    body: Box::new(std::io::Cursor::new(bytes)),
                }),
                Some(Route::Endless) => Ok(Download {
                    content_length: None,
                    body: Box::new(EndlessReader),
                }),
                Some(Route::Stalled) => Ok(Download {
                    content_length: None,
                    body: Box::new(StalledReader),
                }),
                Some(Route::Fail) => Err(anyhow!("GET {url}: connection reset")),
                None => Err(anyhow!("GET {url}: 404 Not Found")),
            }
        }

        fn exists(&self, url: &str) -> bool {
            matches!(
                self.routes.lock().expect("routes lock").get(url),
                Some(Route::Body(_)) | Some(Route::Endless) | Some(Route::Stalled)
            )
        }
    }
}
