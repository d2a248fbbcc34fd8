//! Candidate execution: unpack a fetched archive and run the binary inside it.
//!
//! Every run gets a fresh `bisect_tmp*` directory that is removed when the run
//! returns, whichever way it returns.
use crate::error::RunError;
use crate::revision::Revision;
use anyhow::{anyhow, Context, Result};
use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Exit status and captured streams of the last repeated run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Executes a downloaded candidate; the controller only needs this seam.
pub trait Runner {
    fn run(&self, revision: &Revision, archive: &Path) -> Result<RunOutcome, RunError>;
}

/// Command line template with `%p`, `%a` and `%s` placeholders.
///
/// `%a` must be a whole token and expands to the extra arguments; `%p` is the
/// launch path and `%s` the extra arguments joined by spaces, both substituted
/// inside any token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    tokens: Vec<String>,
}

impl CommandTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let tokens = shell_words::split(template)
            .with_context(|| format!("parse command template: {template}"))?;
        if tokens.is_empty() {
            return Err(anyhow!("command template is empty"));
        }
        Ok(Self { tokens })
    }

    pub fn expand(&self, launch_path: &Path, args: &[String]) -> Vec<String> {
        let launch = launch_path.display().to_string();
        let joined = args.join(" ");
        let mut argv = Vec::with_capacity(self.tokens.len() + args.len());
        for token in &self.tokens {
            if token == "%a" {
                argv.extend(args.iter().cloned());
            } else {
                argv.push(token.replace("%p", &launch).replace("%s", &joined));
            }
        }
        argv
    }
}

/// Candidate arguments: the profile first, then the user's own, then the
/// sandbox opt-out.
pub fn launch_args(profile: &Path, no_sandbox: bool, extra: &[String]) -> Vec<String> {
    let mut args = Vec::with_capacity(extra.len() + 2);
    args.push(format!("--user-data-dir={}", profile.display()));
    args.extend(extra.iter().cloned());
    if no_sandbox {
        args.push("--no-sandbox".to_string());
    }
    args
}

/// Runs candidates extracted from zip archives.
#[derive(Debug, Clone)]
pub struct CandidateRunner {
    scratch_root: PathBuf,
    launch_path: PathBuf,
    command: CommandTemplate,
    args: Vec<String>,
    repeat: u32,
}

impl CandidateRunner {
    /// Extraction directories are created under `scratch_root`.
    pub fn new(
        scratch_root: PathBuf,
        launch_path: PathBuf,
        command: CommandTemplate,
        args: Vec<String>,
        repeat: u32,
    ) -> Self {
        Self {
            scratch_root,
            launch_path,
            command,
            args,
            repeat,
        }
    }
}

impl Runner for CandidateRunner {
    fn run(&self, revision: &Revision, archive: &Path) -> Result<RunOutcome, RunError> {
        tracing::debug!(revision = %revision, archive = %archive.display(), "running candidate");
        run_candidate(
            archive,
            &self.scratch_root,
            &self.launch_path,
            &self.command,
            &self.args,
            self.repeat,
        )
    }
}

/// Extract `archive` into a fresh directory under `scratch_root` and run its
/// binary `repeat` times, keeping the last result.
pub fn run_candidate(
    archive: &Path,
    scratch_root: &Path,
    launch_rel: &Path,
    command: &CommandTemplate,
    args: &[String],
    repeat: u32,
) -> Result<RunOutcome, RunError> {
    let workdir = tempfile::Builder::new()
        .prefix("bisect_tmp")
        .tempdir_in(scratch_root)
        .map_err(|err| RunError::ExtractionFailed(format!("create extraction dir: {err}")))?;
    extract_zip(archive, workdir.path())?;

    let argv = command.expand(&workdir.path().join(launch_rel), args);
    let Some((program, rest)) = argv.split_first() else {
        return Err(RunError::ProcessLaunchFailed("empty command".to_string()));
    };

    let mut last = None;
    for attempt in 1..=repeat.max(1) {
        let output = Command::new(program)
            .args(rest)
            .current_dir(workdir.path())
            .output()
            .map_err(|err| RunError::ProcessLaunchFailed(format!("{program}: {err}")))?;
        tracing::debug!(attempt, exit_code = ?output.status.code(), "candidate run finished");
        last = Some(output);
    }
    let output = last.ok_or_else(|| RunError::ProcessLaunchFailed("no run attempted".to_string()))?;
    Ok(RunOutcome {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Unpack a zip archive, restoring recorded POSIX permission bits.
pub fn extract_zip(archive: &Path, out_dir: &Path) -> Result<(), RunError> {
    let fail = |what: String| RunError::ExtractionFailed(what);
    let file = File::open(archive).map_err(|err| fail(format!("open {}: {err}", archive.display())))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| fail(format!("read {}: {err}", archive.display())))?;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| fail(format!("zip entry {index}: {err}")))?;
        let name = entry.name().to_string();
        let out_path = out_dir.join(sanitize_rel_path(Path::new(&name))?);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|err| fail(format!("create {}: {err}", out_path.display())))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| fail(format!("create {}: {err}", parent.display())))?;
        }
        let mut out = File::create(&out_path)
            .map_err(|err| fail(format!("create {}: {err}", out_path.display())))?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|err| fail(format!("write {}: {err}", out_path.display())))?;
        drop(out);

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|err| fail(format!("chmod {}: {err}", out_path.display())))?;
        }
    }
    Ok(())
}

fn sanitize_rel_path(path: &Path) -> Result<PathBuf, RunError> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => {
                return Err(RunError::ExtractionFailed(format!(
                    "invalid archive path (absolute): {}",
                    path.display()
                )))
            }
            Component::ParentDir => {
                return Err(RunError::ExtractionFailed(format!(
                    "invalid archive path (..): {}",
                    path.display()
                )))
            }
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
        }
    }
    Ok(out)
}
