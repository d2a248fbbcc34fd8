//! Bisection controller.
//!
//! Drives the search over a [`RevisionCatalog`], keeping the current pivot's
//! archive downloaded and prefetching both possible next pivots while the
//! current candidate is being evaluated.
mod search;
mod transfers;
mod window;

pub use search::BisectionResult;
pub use transfers::TransferEvent;
pub use window::Orientation;

use search::{Next, Search};
use transfers::ActiveTransfers;

use crate::catalog::RevisionCatalog;
use crate::error::BisectError;
use crate::fetch::{ArtifactFetcher, Role};
use crate::judge::{Judge, Judgement, Verdict};
use crate::revision::Revision;
use crate::runner::Runner;
use crate::signal::Interrupt;
use std::path::{Path, PathBuf};

/// Download attempts for the active pivot before it is treated as unknown.
const ACTIVE_FETCH_ATTEMPTS: usize = 2;

/// How a bisection run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conclusion {
    Bracketed(BisectionResult),
    /// The judge asked to stop; nothing was concluded.
    Quit,
}

pub struct BisectionController<'a> {
    catalog: &'a dyn RevisionCatalog,
    fetcher: ArtifactFetcher,
    runner: Box<dyn Runner + 'a>,
    judge: Box<dyn Judge + 'a>,
    download_dir: PathBuf,
    interrupt: Interrupt,
    transfers: ActiveTransfers,
}

impl<'a> BisectionController<'a> {
    pub fn new(
        catalog: &'a dyn RevisionCatalog,
        fetcher: ArtifactFetcher,
        runner: Box<dyn Runner + 'a>,
        judge: Box<dyn Judge + 'a>,
        download_dir: PathBuf,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            runner,
            judge,
            download_dir,
            interrupt,
            transfers: ActiveTransfers::new(),
        }
    }

    /// Transfers started, stopped and promoted so far.
    pub fn transfer_events(&self) -> &[TransferEvent] {
        self.transfers.events()
    }

    /// Bisect between `good` and `bad`, which may come in either order.
    ///
    /// Every outstanding download is cancelled before this returns, whether
    /// the run concluded, quit or failed.
    pub fn run(&mut self, good: &Revision, bad: &Revision) -> Result<Conclusion, BisectError> {
        let result = self.drive(good, bad);
        self.transfers.cancel_all();
        result
    }

    fn drive(&mut self, good: &Revision, bad: &Revision) -> Result<Conclusion, BisectError> {
        let orientation = Orientation::from_bounds(good, bad);
        eprintln!("Downloading list of known revisions...");
        let list = self.catalog.list_revisions(good, bad)?;
        tracing::info!(revisions = list.len(), good = %good, bad = %bad, "revision list ready");
        let mut search = Search::new(list, orientation)?;
        self.check_interrupt()?;

        if !search.is_converged() {
            self.start_fetch(Role::Active, search.pivot_revision());
            self.transfers.wait(Role::Active);
        }

        while !search.is_converged() {
            self.check_interrupt()?;
            let (low, high) = search.bounds();
            let (low_label, high_label) = match orientation {
                Orientation::GoodIsLower => ("good", "bad"),
                Orientation::BadIsLower => ("bad", "good"),
            };
            eprintln!("Bisecting range [{low} ({low_label}), {high} ({high_label})].");
            let window = search.window();
            tracing::debug!(
                min = window.min,
                max = window.max,
                remaining = search.list().len(),
                pivot = %search.pivot_revision(),
                "search window"
            );

            let candidates = search.speculative_pivots();
            if let Some(index) = candidates.down {
                self.start_fetch(Role::Down, search.revision_at(index));
            }
            if let Some(index) = candidates.up {
                self.start_fetch(Role::Up, search.revision_at(index));
            }

            let revision = search.pivot_revision().clone();
            let verdict = match self.evaluate_active(&revision)? {
                Judgement::Verdict(verdict) => verdict,
                Judgement::Quit => {
                    tracing::info!(revision = %revision, "bisection quit by judge");
                    return Ok(Conclusion::Quit);
                }
            };
            tracing::info!(revision = %revision, verdict = %verdict, "revision judged");

            match search.advance(verdict, candidates) {
                Next::Adopt { role, .. } => {
                    self.transfers.stop(other_speculative(role));
                    self.transfers.promote(role);
                }
                Next::Fresh { .. } => {
                    self.stop_speculative();
                    self.start_fetch(Role::Active, search.pivot_revision());
                }
                Next::Converged => self.stop_speculative(),
            }
        }

        let (low, high) = search.bounds();
        debug_assert!(search.verdicts().contains_key(low) && search.verdicts().contains_key(high));
        let result = search.result();
        tracing::info!(low = %result.low, high = %result.high, "bisection converged");
        Ok(Conclusion::Bracketed(result))
    }

    /// Download, run and judge the active pivot. Failures to obtain or run
    /// the candidate count as an unknown verdict.
    fn evaluate_active(&mut self, revision: &Revision) -> Result<Judgement, BisectError> {
        let Some(archive) = self.ensure_active_ready(revision)? else {
            self.transfers.stop(Role::Active);
            eprintln!("Could not download revision {revision}; treating it as unknown.");
            return Ok(Judgement::Verdict(Verdict::Unknown));
        };

        println!("Trying revision {revision}...");
        let outcome = self.runner.run(revision, &archive);
        self.transfers.stop(Role::Active);
        self.check_interrupt()?;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(revision = %revision, error = %err, "candidate failed to run");
                eprintln!("Revision {revision} could not be run ({err}); treating it as unknown.");
                return Ok(Judgement::Verdict(Verdict::Unknown));
            }
        };

        let judgement = self.judge.evaluate(revision, &outcome)?;
        self.check_interrupt()?;
        Ok(judgement)
    }

    /// Path of the completed active archive, or `None` once every attempt failed.
    fn ensure_active_ready(&mut self, revision: &Revision) -> Result<Option<PathBuf>, BisectError> {
        for attempt in 1..=ACTIVE_FETCH_ATTEMPTS {
            if attempt > 1 || !self.transfers.has(Role::Active) {
                self.start_fetch(Role::Active, revision);
            }
            let waited = self.transfers.wait(Role::Active);
            self.check_interrupt()?;
            match waited {
                Some((outcome, dest)) if outcome.is_completed() => return Ok(Some(dest)),
                Some((outcome, _)) => {
                    tracing::warn!(revision = %revision, attempt, outcome = ?outcome, "active download failed");
                }
                None => {}
            }
        }
        Ok(None)
    }

    fn start_fetch(&mut self, role: Role, revision: &Revision) {
        let url = self.catalog.url_for(revision);
        let dest = archive_path(&self.download_dir, revision, self.catalog.layout().archive_name);
        self.transfers
            .start(&self.fetcher, role, revision, url, dest);
    }

    fn stop_speculative(&mut self) {
        self.transfers.stop(Role::Down);
        self.transfers.stop(Role::Up);
    }

    fn check_interrupt(&mut self) -> Result<(), BisectError> {
        if self.interrupt.is_raised() {
            self.transfers.cancel_all();
            return Err(BisectError::Interrupted);
        }
        Ok(())
    }
}

fn other_speculative(role: Role) -> Role {
    match role {
        Role::Down => Role::Up,
        _ => Role::Down,
    }
}

/// Local file a revision's archive is downloaded to.
pub fn archive_path(download_dir: &Path, revision: &Revision, archive_name: &str) -> PathBuf {
    download_dir.join(format!("{revision}-{archive_name}"))
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
