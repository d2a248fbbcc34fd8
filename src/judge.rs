//! Verdict sources: interactive prompt or automated predicates.
//!
//! A judge only sees the revision and its run outcome; it never touches the
//! controller's window or list.
use crate::error::BisectError;
use crate::revision::Revision;
use crate::runner::RunOutcome;
use crate::signal::Interrupt;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::fmt;
use std::io::{BufRead, Write};
use std::process::Command;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

const PROMPT_POLL: Duration = Duration::from_millis(100);

/// Exit status `git bisect run` reserves for "cannot test this revision".
const SKIP_EXIT_CODE: i32 = 125;

/// Classification of one evaluated revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Good,
    Bad,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
            Verdict::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a judge decided: a verdict, or that the user wants to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgement {
    Verdict(Verdict),
    Quit,
}

/// Map a one-letter answer (`g`, `b`, `u`, `q`) to a judgement.
pub fn parse_answer(answer: &str) -> Option<Judgement> {
    match answer.trim() {
        "g" => Some(Judgement::Verdict(Verdict::Good)),
        "b" => Some(Judgement::Verdict(Verdict::Bad)),
        "u" => Some(Judgement::Verdict(Verdict::Unknown)),
        "q" => Some(Judgement::Quit),
        _ => None,
    }
}

pub trait Judge {
    fn evaluate(&mut self, revision: &Revision, outcome: &RunOutcome)
        -> Result<Judgement, BisectError>;
}

impl<F> Judge for F
where
    F: FnMut(&Revision, &RunOutcome) -> Result<Judgement, BisectError>,
{
    fn evaluate(
        &mut self,
        revision: &Revision,
        outcome: &RunOutcome,
    ) -> Result<Judgement, BisectError> {
        self(revision, outcome)
    }
}

/// Asks a human on a line-oriented terminal.
///
/// Input is read on a helper thread so a raised interrupt is noticed while
/// waiting for an answer.
pub struct PromptJudge<W: Write> {
    lines: Receiver<String>,
    out: W,
    interrupt: Interrupt,
}

impl PromptJudge<std::io::Stdout> {
    pub fn stdin(interrupt: Interrupt) -> Result<Self> {
        Self::new(
            std::io::BufReader::new(std::io::stdin()),
            std::io::stdout(),
            interrupt,
        )
    }
}

impl<W: Write> PromptJudge<W> {
    pub fn new<R>(input: R, out: W, interrupt: Interrupt) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("judge-input".to_string())
            .spawn(move || {
                for line in input.lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .context("spawn prompt reader")?;
        Ok(Self {
            lines: rx,
            out,
            interrupt,
        })
    }

    fn next_line(&self) -> Option<String> {
        loop {
            if self.interrupt.is_raised() {
                return None;
            }
            match self.lines.recv_timeout(PROMPT_POLL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

impl<W: Write> Judge for PromptJudge<W> {
    fn evaluate(
        &mut self,
        revision: &Revision,
        _outcome: &RunOutcome,
    ) -> Result<Judgement, BisectError> {
        loop {
            let _ = write!(
                self.out,
                "Revision {revision} is [(g)ood/(b)ad/(u)nknown/(q)uit]: "
            );
            let _ = self.out.flush();
            let Some(line) = self.next_line() else {
                let _ = writeln!(self.out);
                return Ok(Judgement::Quit);
            };
            if let Some(judgement) = parse_answer(&line) {
                return Ok(judgement);
            }
        }
    }
}

/// Exit 0 is good, 125 is unknown, anything else is bad.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitCodeJudge;

impl Judge for ExitCodeJudge {
    fn evaluate(
        &mut self,
        revision: &Revision,
        outcome: &RunOutcome,
    ) -> Result<Judgement, BisectError> {
        let verdict = match outcome.exit_code {
            Some(0) => Verdict::Good,
            Some(SKIP_EXIT_CODE) | None => Verdict::Unknown,
            Some(_) => Verdict::Bad,
        };
        println!("Revision {revision} is {verdict} (exit code {:?})", outcome.exit_code);
        Ok(Judgement::Verdict(verdict))
    }
}

/// Bad when the pattern appears in stdout or stderr, good otherwise.
#[derive(Debug, Clone)]
pub struct PatternJudge {
    pattern: Regex,
}

impl PatternJudge {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("compile bad pattern {pattern:?}"))?;
        Ok(Self { pattern })
    }
}

impl Judge for PatternJudge {
    fn evaluate(
        &mut self,
        revision: &Revision,
        outcome: &RunOutcome,
    ) -> Result<Judgement, BisectError> {
        let matched =
            self.pattern.is_match(&outcome.stdout) || self.pattern.is_match(&outcome.stderr);
        let verdict = if matched { Verdict::Bad } else { Verdict::Good };
        println!("Revision {revision} is {verdict}");
        Ok(Judgement::Verdict(verdict))
    }
}

/// Delegates the decision to an external command printing `g`, `b`, `u` or `q`.
#[derive(Debug, Clone)]
pub struct ScriptJudge {
    argv: Vec<String>,
}

impl ScriptJudge {
    pub fn new(command: &str) -> Result<Self> {
        let argv = shell_words::split(command)
            .with_context(|| format!("parse judge command: {command}"))?;
        if argv.is_empty() {
            return Err(anyhow!("judge command is empty"));
        }
        Ok(Self { argv })
    }
}

impl Judge for ScriptJudge {
    fn evaluate(
        &mut self,
        revision: &Revision,
        outcome: &RunOutcome,
    ) -> Result<Judgement, BisectError> {
        let exit_code = outcome
            .exit_code
            .map(|code| code.to_string())
            .unwrap_or_default();
        let output = Command::new(&self.argv[0])
            .args(&self.argv[1..])
            .env("BISECT_REVISION", revision.to_string())
            .env("BISECT_EXIT_CODE", exit_code)
            .env("BISECT_STDOUT", &outcome.stdout)
            .env("BISECT_STDERR", &outcome.stderr)
            .output()
            .map_err(|err| {
                BisectError::InvalidVerdict(format!("judge command {}: {err}", self.argv[0]))
            })?;
        let answer = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(revision = %revision, answer = %answer, "judge command answered");
        parse_answer(&answer).ok_or_else(|| BisectError::InvalidVerdict(answer))
    }
}
