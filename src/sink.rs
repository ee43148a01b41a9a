use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

/// One progress notification. `increment` is the forward-only delta since
/// the previous update of the same run; status-only updates carry 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub current: u64,
    pub total: u64,
    pub increment: u8,
    pub message: String,
}

impl ProgressUpdate {
    pub fn status(current: u64, total: u64, message: impl Into<String>) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (current.min(total) * 100 / total) as u8
        };
        Self {
            percent,
            current,
            total,
            increment: 0,
            message: message.into(),
        }
    }
}

/// Where the engine reports what it is doing: raw text lines for the
/// transcript and structured progress for a progress display.
pub trait ProgressSink: Send + Sync {
    fn log_line(&self, line: &str);
    fn progress(&self, update: &ProgressUpdate);
}

/// Bounded in-memory transcript of everything logged through it.
pub struct Transcript {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, line: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }

    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Sink used by the CLI: lines go to `tracing` at debug level and into the
/// transcript, progress goes to `tracing` at info level.
#[derive(Default)]
pub struct TracingSink {
    transcript: Transcript,
}

impl TracingSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            transcript: Transcript::new(capacity),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }
}

impl ProgressSink for TracingSink {
    fn log_line(&self, line: &str) {
        debug!(target: "pdf_translate::transcript", "{line}");
        self.transcript.push(line);
    }

    fn progress(&self, update: &ProgressUpdate) {
        info!(percent = update.percent, "{}", update.message);
    }
}

/// Records everything; handy for callers that want to inspect a run after
/// the fact.
#[derive(Default)]
pub struct MemorySink {
    pub transcript: Transcript,
    updates: Mutex<Vec<ProgressUpdate>>,
}

impl MemorySink {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn increments(&self) -> Vec<u8> {
        self.updates()
            .into_iter()
            .filter(|u| u.increment > 0)
            .map(|u| u.increment)
            .collect()
    }
}

impl ProgressSink for MemorySink {
    fn log_line(&self, line: &str) {
        self.transcript.push(line);
    }

    fn progress(&self, update: &ProgressUpdate) {
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(update.clone());
    }
}
