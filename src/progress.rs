//! Progress extraction from the translator's tqdm-style stderr.
//!
//! A progress line looks like `29%|██  | 2/7 [00:00<00:02, 2.08it/s]`:
//! a percentage, later a `current/total` pair, then a bracketed timing
//! segment. Anything else is ordinary output.

use crate::sink::ProgressUpdate;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    pub percent: u8,
    pub current: u64,
    pub total: u64,
    pub timing: String,
}

impl ProgressSample {
    pub fn message(&self) -> String {
        format!(
            "{}/{} pages ({}%) - {}",
            self.current, self.total, self.percent, self.timing
        )
    }
}

pub trait ProgressParser: Send + Sync {
    /// `None` means "not a progress line", never an error.
    fn parse(&self, line: &str) -> Option<ProgressSample>;
}

pub struct TqdmParser {
    re: Regex,
}

impl TqdmParser {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r"(\d+)%.*?(\d+)/(\d+)\s*\[([^\]]+)\]")
                .expect("valid progress regex"),
        }
    }
}

impl Default for TqdmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for TqdmParser {
    fn parse(&self, line: &str) -> Option<ProgressSample> {
        let caps = self.re.captures(line)?;
        let percent: u8 = caps[1].parse().ok()?;
        if percent > 100 {
            return None;
        }
        Some(ProgressSample {
            percent,
            current: caps[2].parse().ok()?,
            total: caps[3].parse().ok()?,
            timing: caps[4].trim().to_string(),
        })
    }
}

/// Turns a stream of samples into forward-only updates.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_percent(&self) -> u8 {
        self.last
    }

    pub fn observe(&mut self, sample: &ProgressSample) -> Option<ProgressUpdate> {
        if sample.percent <= self.last {
            return None;
        }
        let increment = sample.percent - self.last;
        self.last = sample.percent;
        Some(ProgressUpdate {
            percent: sample.percent,
            current: sample.current,
            total: sample.total,
            increment,
            message: sample.message(),
        })
    }
}
