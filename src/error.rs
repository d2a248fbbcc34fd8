//! Error taxonomy for the bisection engine.
//!
//! Fatal conditions surface as [`BisectError`]; per-candidate failures surface
//! as [`RunError`] and are folded into an unknown verdict by the controller.
use thiserror::Error;

/// Conditions that stop a bisection run.
#[derive(Debug, Error)]
pub enum BisectError {
    /// The remote listing could not be fetched or parsed.
    #[error("revision listing unavailable: {0}")]
    CatalogUnavailable(String),

    /// Fewer than two archived revisions fall inside the requested bounds.
    #[error("not enough builds to bisect: found {found} revision(s) in range")]
    EmptyRange { found: usize },

    /// No archive layout exists for this platform and build kind.
    #[error("no {kind} archives are published for platform {platform}")]
    UnsupportedPlatform { platform: String, kind: String },

    /// A revision bound could not be parsed.
    #[error("invalid revision {0:?}")]
    InvalidRevision(String),

    /// A judge returned something other than good, bad, unknown or quit.
    #[error("judge returned an invalid verdict: {0:?}")]
    InvalidVerdict(String),

    /// SIGINT was received; outstanding transfers were cancelled.
    #[error("interrupted")]
    Interrupted,
}

/// Failures preparing or launching a single candidate.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to extract archive: {0}")]
    ExtractionFailed(String),

    #[error("failed to launch candidate: {0}")]
    ProcessLaunchFailed(String),
}
