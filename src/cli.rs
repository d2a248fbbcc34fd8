//! CLI argument parsing for the bisection tool.
use crate::platform::Platform;
use crate::revision::Revision;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "build-bisect",
    version,
    about = "Bisect archived snapshot or official builds to find where a behavior changed",
    after_help = "Command template placeholders:\n  %p  path to the extracted binary\n  %a  extra arguments, one token each\n  %s  extra arguments joined by spaces\n\nExamples:\n  build-bisect -a linux64 -g 100000 -b 100500\n  build-bisect -a linux64 -g 100000 --judge exit-code -c 'xvfb-run %p %a' -- --headless\n  build-bisect -a mac -o -g 20.0.1100.0 -b 21.0.1150.0"
)]
pub struct RootArgs {
    /// Platform whose archives are bisected
    #[arg(short = 'a', long, value_enum, value_name = "PLATFORM")]
    pub archive: Platform,

    /// Bisect official builds instead of continuous snapshots
    #[arg(short = 'o', long)]
    pub official: bool,

    /// Known-good revision (default: 0, or 0.0.0.0 for official builds)
    #[arg(short = 'g', long, value_name = "REV")]
    pub good: Option<Revision>,

    /// Known-bad revision (default: latest snapshot, or 999.0.0.0 for official builds)
    #[arg(short = 'b', long, value_name = "REV")]
    pub bad: Option<Revision>,

    /// Run each candidate this many times; the last run is judged
    #[arg(
        short = 't',
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub times: u32,

    /// Command template used to launch each candidate
    #[arg(short = 'c', long, value_name = "TEMPLATE", default_value = "%p %a")]
    pub command: String,

    /// Profile directory passed as --user-data-dir, relative to the
    /// extracted build so every run starts clean
    #[arg(
        short = 'p',
        long,
        visible_alias = "user-data-dir",
        value_name = "DIR",
        default_value = "profile"
    )]
    pub profile: PathBuf,

    /// Where verdicts come from
    #[arg(long, value_enum, default_value_t = JudgeMode::Prompt)]
    pub judge: JudgeMode,

    /// Regex that marks a run as bad when it matches stdout or stderr
    #[arg(long, value_name = "REGEX", required_if_eq("judge", "pattern"))]
    pub bad_pattern: Option<String>,

    /// Command that prints g, b, u or q for each run
    #[arg(long, value_name = "CMD", required_if_eq("judge", "script"))]
    pub judge_command: Option<String>,

    /// Snapshot archive base URL
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Official build archive base URL
    #[arg(long, value_name = "URL")]
    pub official_base_url: Option<String>,

    /// Keep downloaded archives here instead of a temporary directory
    #[arg(long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging and a transfer journal at the end
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Extra arguments for the candidate, substituted for %a and %s
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

/// Verdict source for each evaluated revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JudgeMode {
    /// Ask on the terminal
    Prompt,
    /// 0 is good, 125 is unknown, anything else is bad
    ExitCode,
    /// Bad when --bad-pattern matches the output
    Pattern,
    /// Ask --judge-command
    Script,
}
