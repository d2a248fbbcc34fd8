use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod bisect;
mod catalog;
mod cli;
mod config;
mod error;
mod fetch;
mod judge;
mod platform;
mod revision;
mod runner;
mod signal;
mod transport;

use crate::bisect::{BisectionController, Conclusion};
use crate::catalog::{build_catalog, RevisionCatalog};
use crate::cli::{JudgeMode, RootArgs};
use crate::config::{resolve_settings, SettingOverrides};
use crate::error::BisectError;
use crate::fetch::ArtifactFetcher;
use crate::judge::{ExitCodeJudge, Judge, PatternJudge, PromptJudge, ScriptJudge};
use crate::platform::{archive_layout, BuildKind};
use crate::revision::Revision;
use crate::runner::{launch_args, CandidateRunner, CommandTemplate};
use crate::signal::{install_sigint_handler, Interrupt};
use crate::transport::{HttpTransport, Transport};

const EXIT_QUIT: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

/// Used when `LAST_CHANGE` cannot be read.
const FALLBACK_BAD_REVISION: u64 = 999_999_999;
const OFFICIAL_GOOD_REVISION: &str = "0.0.0.0";
const OFFICIAL_BAD_REVISION: &str = "999.0.0.0";

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(err) => {
            if matches!(err.downcast_ref::<BisectError>(), Some(BisectError::Interrupted)) {
                eprintln!("Interrupted.");
                return ExitCode::from(EXIT_INTERRUPTED);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: RootArgs) -> Result<ExitCode> {
    let overrides = SettingOverrides {
        base_url: args.base_url.as_deref(),
        official_base_url: args.official_base_url.as_deref(),
        download_dir: args.download_dir.as_deref(),
        config: args.config.as_deref(),
    };
    let settings = resolve_settings(&overrides, |key| std::env::var(key).ok())?;

    let kind = if args.official {
        BuildKind::Official
    } else {
        BuildKind::Snapshot
    };
    let layout = archive_layout(args.archive, kind)?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport);
    let catalog = build_catalog(
        kind,
        Arc::clone(&transport),
        settings.base_url_for(kind),
        &settings.deps_url,
        layout.clone(),
    );
    let (good, bad) = resolve_bounds(&args, kind, catalog.as_ref())?;
    tracing::info!(platform = %args.archive, kind = kind.as_str(), good = %good, bad = %bad, "bisecting");

    let interrupt = Interrupt::new();
    install_sigint_handler(&interrupt)?;

    // Held until the end of the run so the session directory outlives every transfer.
    let session_dir;
    let download_dir = match &settings.download_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create download dir {}", dir.display()))?;
            dir.clone()
        }
        None => {
            session_dir = tempfile::Builder::new()
                .prefix("bisect_downloads")
                .tempdir()
                .context("create session download dir")?;
            session_dir.path().to_path_buf()
        }
    };

    let no_sandbox = kind == BuildKind::Official && args.archive.is_linux();
    let runner = CandidateRunner::new(
        std::env::temp_dir(),
        layout.launch_path(),
        CommandTemplate::parse(&args.command)?,
        launch_args(&args.profile, no_sandbox, &args.args),
        args.times,
    );
    let judge = build_judge(&args, &interrupt)?;

    let mut controller = BisectionController::new(
        catalog.as_ref(),
        ArtifactFetcher::new(transport, interrupt.clone()),
        Box::new(runner),
        judge,
        download_dir,
        interrupt,
    );
    let conclusion = controller.run(&good, &bad);
    if args.verbose {
        eprintln!("Transfer journal:");
        for event in controller.transfer_events() {
            eprintln!("  {event}");
        }
    }

    match conclusion? {
        Conclusion::Bracketed(result) => {
            tracing::info!(good = %result.good(), bad = %result.bad(), "bisection finished");
            println!("{}", result.summary());
            if let Some(url) = catalog.blink_changelog_url(&result.low, &result.high) {
                println!("BLINK CHANGELOG URL:");
                println!("  {url}");
            }
            println!("CHANGELOG URL:");
            println!("  {}", catalog.changelog_url(&result.low, &result.high));
            Ok(ExitCode::SUCCESS)
        }
        Conclusion::Quit => {
            println!("Quit without a result.");
            Ok(ExitCode::from(EXIT_QUIT))
        }
    }
}

/// Fill in omitted bounds: zero for good, the newest published build for bad.
fn resolve_bounds(
    args: &RootArgs,
    kind: BuildKind,
    catalog: &dyn RevisionCatalog,
) -> Result<(Revision, Revision)> {
    let good = match (&args.good, kind) {
        (Some(good), _) => good.clone(),
        (None, BuildKind::Snapshot) => Revision::from(0),
        (None, BuildKind::Official) => OFFICIAL_GOOD_REVISION.parse::<Revision>()?,
    };
    let bad = match (&args.bad, kind) {
        (Some(bad), _) => bad.clone(),
        (None, BuildKind::Official) => OFFICIAL_BAD_REVISION.parse::<Revision>()?,
        (None, BuildKind::Snapshot) => catalog.latest_revision().unwrap_or_else(|| {
            tracing::warn!(fallback = FALLBACK_BAD_REVISION, "LAST_CHANGE unavailable");
            eprintln!("Could not determine the latest revision; using {FALLBACK_BAD_REVISION}.");
            Revision::from(FALLBACK_BAD_REVISION)
        }),
    };
    Ok((good, bad))
}

fn build_judge(args: &RootArgs, interrupt: &Interrupt) -> Result<Box<dyn Judge>> {
    let judge: Box<dyn Judge> = match args.judge {
        JudgeMode::Prompt => Box::new(PromptJudge::stdin(interrupt.clone())?),
        JudgeMode::ExitCode => Box::new(ExitCodeJudge),
        JudgeMode::Pattern => {
            let pattern = args
                .bad_pattern
                .as_deref()
                .context("--judge pattern needs --bad-pattern")?;
            Box::new(PatternJudge::new(pattern)?)
        }
        JudgeMode::Script => {
            let command = args
                .judge_command
                .as_deref()
                .context("--judge script needs --judge-command")?;
            Box::new(ScriptJudge::new(command)?)
        }
    };
    Ok(judge)
}
