//! Terminal presentation for the CLI.
//!
//! Startup stages get a spinner on a TTY and a `==>` line otherwise. During
//! a run, `RunDisplay` shows the latest crowd count on a live status line;
//! in plain mode it stays silent and leaves reporting to the log.

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::analyzer::FrameOutcome;
use crate::frame::Frame;
use crate::monitor::FrameObserver;

const TICK: Duration = Duration::from_millis(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

impl FromStr for UiMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(UiMode::Auto),
            "plain" => Ok(UiMode::Plain),
            "pretty" => Ok(UiMode::Pretty),
            other => Err(anyhow!("ui must be auto, plain or pretty (got '{}')", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn is_pretty(&self) -> bool {
        self.is_tty && !matches!(self.mode, UiMode::Plain)
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.is_pretty() {
            let spinner = spinner();
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    pub fn run_display(&self, max_people: usize) -> RunDisplay {
        let spinner = if self.is_pretty() {
            let spinner = spinner();
            spinner.set_message("waiting for frames");
            Some(spinner)
        } else {
            None
        };
        RunDisplay {
            spinner,
            max_people,
            last_count: 0,
        }
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(TICK);
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// Live status line. Skipped and failed frames keep the last shown count.
pub struct RunDisplay {
    spinner: Option<ProgressBar>,
    max_people: usize,
    last_count: usize,
}

impl RunDisplay {
    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

impl FrameObserver for RunDisplay {
    fn on_frame(&mut self, index: u64, _frame: &Frame, outcome: &FrameOutcome) {
        let Some(spinner) = &self.spinner else {
            return;
        };
        let note = match outcome {
            FrameOutcome::Processed(result) => {
                self.last_count = result.count;
                ""
            }
            FrameOutcome::Skipped => " (skipped)",
            FrameOutcome::Failed(_) => " (detector error)",
        };
        spinner.set_message(status_line(index, self.last_count, self.max_people, note));
    }
}

fn status_line(index: u64, count: usize, max_people: usize, note: &str) -> String {
    let alert = if count > max_people { "  ALERT" } else { "" };
    format!("frame {index}: {count} people{alert}{note}")
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
