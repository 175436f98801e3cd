//! Byte-accurate progress accounting.
//!
//! A [`ProgressTracker`] belongs to exactly one file in flight. Adapters feed
//! it either cumulative `(transferred, total)` pairs or incremental chunk
//! sizes; it renders the fixed-width line and flips to the completion
//! rendering when the byte count reaches the file size.

use crate::command::CommandResult;
use crate::descriptor::DestinationDescriptor;
use crate::orchestrator::TransferResult;
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Number of cells in the rendered bar.
pub const BAR_WIDTH: usize = 35;

const MIB: f64 = 1_048_576.0;

/// Per-file counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}

/// One rendering of the progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLine {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Percentage rounded to two decimals.
    pub percentage: f64,
    /// Filled cells out of [`BAR_WIDTH`].
    pub filled: usize,
    pub complete: bool,
}

impl RenderedLine {
    fn new(state: ProgressState) -> Self {
        let ratio = if state.total_bytes == 0 {
            1.0
        } else {
            state.transferred_bytes as f64 / state.total_bytes as f64
        };
        let percentage = round2(ratio * 100.0);
        let filled = ((percentage / 100.0) * BAR_WIDTH as f64).round() as usize;
        Self {
            total_bytes: state.total_bytes,
            transferred_bytes: state.transferred_bytes,
            percentage,
            filled: filled.min(BAR_WIDTH),
            complete: state.transferred_bytes >= state.total_bytes,
        }
    }

    pub fn bar(&self) -> String {
        format!("{}{}", "#".repeat(self.filled), " ".repeat(BAR_WIDTH - self.filled))
    }
}

impl fmt::Display for RenderedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = if self.complete {
            "File transferred."
        } else {
            "Amount of file transferred:"
        };
        write!(
            f,
            "Size: {} bytes({} MB) || {} [{}] {}%",
            self.total_bytes,
            short_decimal(round2(self.total_bytes as f64 / MIB)),
            label,
            self.bar(),
            short_decimal(self.percentage)
        )
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Two decimals at most, trailing zeros dropped, at least one decimal kept
/// (`50.0`, `33.33`, `12.5`).
fn short_decimal(v: f64) -> String {
    let s = format!("{:.2}", v);
    let s = s.trim_end_matches('0');
    if s.ends_with('.') {
        format!("{}0", s)
    } else {
        s.to_string()
    }
}

/// Counter for the file currently in flight.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: ProgressState,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new file of `total_bytes`.
    pub fn start_file(&mut self, total_bytes: u64) {
        self.state = ProgressState {
            total_bytes,
            transferred_bytes: 0,
        };
    }

    /// Cumulative callback shape. Values that would move backwards or past
    /// the total are clamped.
    pub fn update(&mut self, transferred_bytes: u64, total_bytes: u64) -> RenderedLine {
        self.state.total_bytes = total_bytes;
        let clamped = transferred_bytes.min(total_bytes);
        self.state.transferred_bytes = self.state.transferred_bytes.max(clamped).min(total_bytes);
        RenderedLine::new(self.state)
    }

    /// Incremental callback shape: add `chunk` bytes to the accumulator.
    pub fn advance(&mut self, chunk: u64) -> RenderedLine {
        let next = self.state.transferred_bytes.saturating_add(chunk);
        self.state.transferred_bytes = next.min(self.state.total_bytes);
        RenderedLine::new(self.state)
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    pub fn render(&self) -> RenderedLine {
        RenderedLine::new(self.state)
    }
}

/// Receiver of run events. Every method defaults to a no-op.
pub trait ProgressSink: Send + Sync {
    fn destination_started(&self, _destination: &DestinationDescriptor) {}

    fn file_started(&self, _local: &Path, _location: &str, _destination: &DestinationDescriptor) {}

    fn progress(&self, _line: &RenderedLine) {}

    fn directory_created(&self, _remote: &str, _created: bool) {}

    fn destination_finished(&self, _result: &TransferResult) {}

    fn command_finished(&self, _result: &CommandResult) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {}

/// Tracker bound to a sink for one file. Adapters only ever see this.
pub struct FileProgress<'a> {
    tracker: ProgressTracker,
    sink: &'a dyn ProgressSink,
    /// `(percentage in hundredths, filled cells, complete)` of the last line drawn.
    last_drawn: Option<(u64, usize, bool)>,
    completion_drawn: bool,
}

impl<'a> FileProgress<'a> {
    pub fn new(sink: &'a dyn ProgressSink, total_bytes: u64) -> Self {
        let mut tracker = ProgressTracker::new();
        tracker.start_file(total_bytes);
        Self {
            tracker,
            sink,
            last_drawn: None,
            completion_drawn: false,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.tracker.state().total_bytes
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.tracker.state().transferred_bytes
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        let total = self.total_bytes();
        let line = self.tracker.update(transferred_bytes, total);
        self.emit(line);
    }

    pub fn advance(&mut self, chunk: u64) {
        let line = self.tracker.advance(chunk);
        self.emit(line);
    }

    /// Force the completion rendering if the adapter never reported the last
    /// bytes (zero-length files, servers that do not stream callbacks).
    pub fn finish(&mut self) {
        let total = self.total_bytes();
        if !self.completion_drawn {
            let line = self.tracker.update(total, total);
            self.emit(line);
        }
    }

    /// Drain chunk sizes sent from a blocking worker until it drops its
    /// sender.
    pub async fn drain(&mut self, mut rx: UnboundedReceiver<u64>) {
        while let Some(chunk) = rx.recv().await {
            self.advance(chunk);
        }
    }

    /// Skip redraws that would not change the visible line. The label flip
    /// to "File transferred." is a visible change even at an unchanged 100%.
    fn emit(&mut self, line: RenderedLine) {
        let key = ((line.percentage * 100.0).round() as u64, line.filled, line.complete);
        if self.last_drawn == Some(key) {
            return;
        }
        self.last_drawn = Some(key);
        self.completion_drawn |= line.complete;
        self.sink.progress(&line);
    }
}

/// Channel pair for blocking workers that report chunk sizes.
pub fn chunk_channel() -> (UnboundedSender<u64>, UnboundedReceiver<u64>) {
    tokio::sync::mpsc::unbounded_channel()
}
