//! Background archive downloads with cooperative cancellation.
//!
//! Each [`FetchHandle`] owns one worker thread and one destination file. A
//! transfer never reports failure from [`ArtifactFetcher::start`]; the result
//! is only observed through [`FetchHandle::wait`].
use crate::revision::Revision;
use crate::signal::Interrupt;
use crate::transport::Transport;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const CHUNK_BYTES: usize = 64 * 1024;
/// How often a blocked caller checks whether the worker has finished.
const JOIN_POLL: Duration = Duration::from_millis(10);
/// How long an aborted worker may take to notice before it is detached.
const ABORT_GRACE: Duration = Duration::from_millis(250);

/// Slot a download occupies relative to the current pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Active,
    Down,
    Up,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Active => "active",
            Role::Down => "down",
            Role::Up => "up",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed { bytes: u64 },
    Cancelled,
    TransferError(String),
}

impl FetchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FetchOutcome::Completed { .. })
    }
}

/// Starts downloads over a shared transport.
pub struct ArtifactFetcher {
    transport: Arc<dyn Transport>,
    interrupt: Interrupt,
}

impl ArtifactFetcher {
    pub fn new(transport: Arc<dyn Transport>, interrupt: Interrupt) -> Self {
        Self {
            transport,
            interrupt,
        }
    }

    /// Begin downloading `url` into `dest` on a new thread.
    pub fn start(&self, revision: &Revision, url: String, dest: PathBuf, role: Role) -> FetchHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(AtomicBool::new(false));
        let job = TransferJob {
            transport: Arc::clone(&self.transport),
            interrupt: self.interrupt.clone(),
            url,
            dest: dest.clone(),
            cancel: Arc::clone(&cancel),
            progress: Arc::clone(&progress),
        };
        tracing::debug!(revision = %revision, role = %role, dest = %dest.display(), "starting fetch");
        let spawned = std::thread::Builder::new()
            .name(format!("{role}_fetch"))
            .spawn(move || job.run());
        let (worker, outcome) = match spawned {
            Ok(worker) => (Some(worker), None),
            Err(err) => (
                None,
                Some(FetchOutcome::TransferError(format!(
                    "spawn download thread: {err}"
                ))),
            ),
        };
        FetchHandle {
            revision: revision.clone(),
            dest,
            interrupt: self.interrupt.clone(),
            cancel,
            progress,
            worker,
            outcome,
            stopped: false,
        }
    }
}

/// One in-flight or finished download.
pub struct FetchHandle {
    revision: Revision,
    dest: PathBuf,
    interrupt: Interrupt,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicBool>,
    worker: Option<JoinHandle<FetchOutcome>>,
    outcome: Option<FetchOutcome>,
    stopped: bool,
}

impl FetchHandle {
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Block until the transfer finishes, showing progress meanwhile.
    pub fn wait(&mut self) -> FetchOutcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        eprintln!("Downloading revision {}...", self.revision);
        self.progress.store(true, Ordering::SeqCst);
        let outcome = self.join_worker();
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Ask the transfer to abort at its next chunk boundary, then stop.
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.stop();
    }

    /// Join the worker and delete the destination file. Idempotent.
    ///
    /// A worker stuck in a read that does not notice the abort within
    /// [`ABORT_GRACE`] is detached; it removes its own file once it wakes.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        if self.outcome.is_none() {
            let outcome = self.join_worker();
            self.outcome = Some(outcome);
        }
        match std::fs::remove_file(&self.dest) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %self.dest.display(), error = %err, "could not remove download");
            }
        }
        self.stopped = true;
        tracing::debug!(revision = %self.revision, "fetch stopped");
    }

    fn aborted(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.interrupt.is_raised()
    }

    fn join_worker(&mut self) -> FetchOutcome {
        let Some(worker) = self.worker.take() else {
            return FetchOutcome::Cancelled;
        };
        let mut abort_seen: Option<Instant> = None;
        while !worker.is_finished() {
            if self.aborted() {
                let since = *abort_seen.get_or_insert_with(Instant::now);
                if since.elapsed() >= ABORT_GRACE {
                    tracing::warn!(revision = %self.revision, "download worker stalled; detaching it");
                    return FetchOutcome::Cancelled;
                }
            }
            std::thread::sleep(JOIN_POLL);
        }
        worker
            .join()
            .unwrap_or_else(|_| FetchOutcome::TransferError("download thread panicked".to_string()))
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        if !self.stopped {
            self.cancel();
        }
    }
}

struct TransferJob {
    transport: Arc<dyn Transport>,
    interrupt: Interrupt,
    url: String,
    dest: PathBuf,
    cancel: Arc<AtomicBool>,
    progress: Arc<AtomicBool>,
}

impl TransferJob {
    fn aborted(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.interrupt.is_raised()
    }

    /// The owning handle may already be gone, so clean up here too.
    fn abandon(&self, line: &mut ProgressLine) -> FetchOutcome {
        line.finish();
        let _ = std::fs::remove_file(&self.dest);
        FetchOutcome::Cancelled
    }

    fn run(self) -> FetchOutcome {
        if self.aborted() {
            return FetchOutcome::Cancelled;
        }
        let mut download = match self.transport.get(&self.url) {
            Ok(download) => download,
            Err(err) => {
                tracing::debug!(url = %self.url, error = %err, "download request failed");
                return FetchOutcome::TransferError(format!("{err:#}"));
            }
        };
        let mut file = match File::create(&self.dest) {
            Ok(file) => file,
            Err(err) => {
                return FetchOutcome::TransferError(format!(
                    "create {}: {err}",
                    self.dest.display()
                ))
            }
        };

        let mut line = ProgressLine::new(download.content_length);
        let mut buf = vec![0u8; CHUNK_BYTES];
        let mut received = 0u64;
        loop {
            if self.aborted() {
                return self.abandon(&mut line);
            }
            let n = match download.body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    line.finish();
                    return FetchOutcome::TransferError(format!("read {}: {err}", self.url));
                }
            };
            if let Err(err) = file.write_all(&buf[..n]) {
                line.finish();
                return FetchOutcome::TransferError(format!(
                    "write {}: {err}",
                    self.dest.display()
                ));
            }
            received += n as u64;
            if self.progress.load(Ordering::SeqCst) {
                line.report(received);
            }
        }
        if self.aborted() {
            return self.abandon(&mut line);
        }
        line.finish();
        if let Err(err) = file.flush() {
            return FetchOutcome::TransferError(format!("flush {}: {err}", self.dest.display()));
        }
        tracing::info!(url = %self.url, bytes = received, "download complete");
        FetchOutcome::Completed { bytes: received }
    }
}

/// Single-line progress display rewritten with `\r`.
struct ProgressLine {
    total: Option<u64>,
    shown: bool,
}

impl ProgressLine {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|total| *total > 0),
            shown: false,
        }
    }

    fn report(&mut self, received: u64) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{}", format_progress(received, self.total));
        let _ = stderr.flush();
        self.shown = true;
    }

    fn finish(&mut self) {
        if self.shown {
            eprintln!();
            self.shown = false;
        }
    }
}

/// Human progress text, with a percentage when the size is known.
pub fn format_progress(received: u64, total: Option<u64>) -> String {
    match total {
        Some(total) if total > 0 => {
            let size = received.min(total);
            format!(
                "Received {size} of {total} bytes, {:.2}%",
                100.0 * size as f64 / total as f64
            )
        }
        _ => format!("Received {received} bytes"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{MemoryTransport, Route};
    use std::time::Duration;

    fn fetcher(transport: Arc<MemoryTransport>) -> (ArtifactFetcher, Interrupt) {
        let interrupt = Interrupt::new();
        (ArtifactFetcher::new(transport, interrupt.clone()), interrupt)
    }

    #[test]
    fn completed_download_lands_on_disk_until_stopped() {
        let dir = tempfile::tempdir().expect("temp dir");
        let transport = Arc::new(MemoryTransport::new());
        transport.route("http://a/120.zip", Route::Body(vec![7u8; 200_000]));
        let (fetcher, _) = fetcher(transport);

        let dest = dir.path().join("120-chrome-linux.zip");
        let mut handle = fetcher.start(
            &Revision::Number(120),
            "http://a/120.zip".to_string(),
            dest.clone(),
            Role::Active,
        );
        assert_eq!(handle.wait(), FetchOutcome::Completed { bytes: 200_000 });
        assert_eq!(std::fs::metadata(&dest).expect("metadata").len(), 200_000);

        handle.stop();
        assert!(!dest.exists());
        assert_eq!(handle.wait(), FetchOutcome::Completed { bytes: 200_000 });
    }

    #[test]
    fn transfer_errors_surface_only_through_wait() {
        let dir = tempfile::tempdir().expect("temp dir");
        let transport = Arc::new(MemoryTransport::new());
        transport.route("http://a/broken.zip", Route::Fail);
        let (fetcher, _) = fetcher(transport);

        let mut handle = fetcher.start(
            &Revision::Number(1),
            "http://a/broken.zip".to_string(),
            dir.path().join("1.zip"),
            Role::Down,
        );
        match handle.wait() {
            FetchOutcome::TransferError(message) => assert!(message.contains("connection reset")),
            other => panic!("unexpected outcome {other:?}"),
        }
        handle.stop();
        assert!(!dir.path().join("1.zip").exists());
    }

    #[test]
    fn cancel_aborts_a_running_transfer_and_removes_the_partial_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let transport = Arc::new(MemoryTransport::new());
        transport.route("http://a/slow.zip", Route::Endless);
        let (fetcher, _) = fetcher(transport);

        let dest = dir.path().join("slow.zip");
        let mut handle = fetcher.start(
            &Revision::Number(2),
            "http://a/slow.zip".to_string(),
            dest.clone(),
            Role::Up,
        );
        std::thread::sleep(Duration::from_millis(30));
        handle.cancel();
        assert_eq!(handle.wait(), FetchOutcome::Cancelled);
        assert!(!dest.exists());
        handle.cancel();
    }

    #[test]
    fn raised_interrupt_cancels_transfers_and_drop_cleans_up() {
        let dir = tempfile::tempdir().expect("temp dir");
        let transport = Arc::new(MemoryTransport::new());
        transport.route("http://a/slow.zip", Route::Endless);
        let (fetcher, interrupt) = fetcher(transport);

        let dest = dir.path().join("slow.zip");
        let mut handle = fetcher.start(
            &Revision::Number(3),
            "http://a/slow.zip".to_string(),
            dest.clone(),
            Role::Active,
        );
        std::thread::sleep(Duration::from_millis(10));
        interrupt.raise();
        assert_eq!(handle.wait(), FetchOutcome::Cancelled);
        drop(handle);
        assert!(!dest.exists());
    }

    #[test]
    fn interrupt_detaches_a_read_that_never_returns() {
        let dir = tempfile::tempdir().expect("temp dir");
        let transport = Arc::new(MemoryTransport::new());
        transport.route("http://a/stalled.zip", Route::Stalled);
        let (fetcher, interrupt) = fetcher(transport);

        let dest = dir.path().join("stalled.zip");
        let mut handle = fetcher.start(
            &Revision::Number(4),
            "http://a/stalled.zip".to_string(),
            dest.clone(),
            Role::Active,
        );
        std::thread::sleep(Duration::from_millis(30));
        interrupt.raise();

        let started = Instant::now();
        assert_eq!(handle.wait(), FetchOutcome::Cancelled);
        handle.cancel();
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancel blocked for {:?}",
            started.elapsed()
        );
        assert!(!dest.exists());
    }

    #[test]
    fn progress_text_matches_known_and_unknown_sizes() {
        assert_eq!(format_progress(512, None), "Received 512 bytes");
        assert_eq!(
            format_progress(250, Some(1000)),
            "Received 250 of 1000 bytes, 25.00%"
        );
        assert_eq!(
            format_progress(1500, Some(1000)),
            "Received 1000 of 1000 bytes, 100.00%"
        );
        assert_eq!(format_progress(10, Some(0)), "Received 10 bytes");
    }
}
