//! Progress reporting across concurrently migrated sources.
//!
//! Every source keeps one human readable line on a shared [`ProgressBoard`]
//! ("`event_store 42%`"). The migrator drains the board on a fixed interval
//! and hands sorted snapshots to a [`ProgressSink`].

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::info;

/// Receives snapshots of the progress lines of all sources.
pub trait ProgressSink: Send + Sync {
    /// Called with the current line of every source, sorted.
    fn report(&self, lines: &[String]);

    /// Called once after the final snapshot.
    fn finish(&self) {}
}

/// Line shown for a source that has not committed anything yet.
#[must_use]
pub fn started_label(event_store: &str) -> String {
    format!("{} 0%", event_store)
}

/// Line shown after a commit, `progress` being a fraction in `[0, 1]`.
#[must_use]
pub fn progress_label(event_store: &str, progress: f64) -> String {
    let percent = (progress.clamp(0.0, 1.0) * 100.0).round() as u32;
    format!("{} {}%", event_store, percent)
}

/// Line shown for a source that has been fully migrated.
#[must_use]
pub fn done_label(event_store: &str) -> String {
    format!("{} Done!", event_store)
}

#[derive(Debug, Default)]
struct Board {
    lines: Vec<String>,
    changed: bool,
}

/// Latest progress line per source.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    board: Mutex<Board>,
}

impl ProgressBoard {
    /// A board with one slot per line in `initial`.
    #[must_use]
    pub fn new(initial: Vec<String>) -> Self {
        Self {
            board: Mutex::new(Board {
                lines: initial,
                changed: true,
            }),
        }
    }

    /// Replaces the line of source `slot`. Unknown slots are ignored.
    pub fn update(&self, slot: usize, line: String) {
        let mut guard = self.board.lock();
        let board = &mut *guard;
        if let Some(current) = board.lines.get_mut(slot) {
            if *current != line {
                *current = line;
                board.changed = true;
            }
        }
    }

    /// Sorted lines, if anything changed since the last call.
    pub fn take_changed(&self) -> Option<Vec<String>> {
        let mut board = self.board.lock();
        if !board.changed {
            return None;
        }
        board.changed = false;
        let mut lines = board.lines.clone();
        lines.sort();
        Some(lines)
    }

    /// Sorted lines, regardless of changes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut lines = self.board.lock().lines.clone();
        lines.sort();
        lines
    }
}

/// Logs snapshots through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn report(&self, lines: &[String]) {
        info!("Progress:\n\t{}", lines.join("\n\t"));
    }
}

/// Renders snapshots next to a terminal spinner.
#[derive(Debug)]
pub struct TerminalProgressSink {
    bar: ProgressBar,
}

impl TerminalProgressSink {
    /// Creates and starts the spinner.
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl Default for TerminalProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgressSink {
    fn report(&self, lines: &[String]) {
        self.bar.set_message(lines.join(" | "));
    }

    fn finish(&self) {
        self.bar.finish_with_message("Migration complete");
    }
}

/// Keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    snapshots: Mutex<Vec<Vec<String>>>,
    finished: Mutex<bool>,
}

impl MemoryProgressSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots received so far.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Vec<String>> {
        self.snapshots.lock().clone()
    }

    /// Whether [`ProgressSink::finish`] was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.lock()
    }
}

impl ProgressSink for MemoryProgressSink {
    fn report(&self, lines: &[String]) {
        self.snapshots.lock().push(lines.to_vec());
    }

    fn finish(&self) {
        *self.finished.lock() = true;
    }
}
