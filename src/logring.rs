use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default per-service retention, in lines.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One captured line of service output.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub line: String,
}

impl LogEntry {
    pub fn now(stream: LogStream, line: String) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            line,
        }
    }
}

/// Bounded, ordered, append-only line store. Oldest entries evicted first.
#[derive(Debug, Clone)]
pub struct LogRing {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Appends a line, evicting the oldest entry when full.
    /// Returns `true` if an entry was dropped to make room.
    pub fn push(&mut self, entry: LogEntry) -> bool {
        let mut dropped = false;
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            dropped = true;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// The most recent `limit` lines in original order; all lines when
    /// `limit` is `None`.
    pub fn tail(&self, limit: Option<usize>) -> Vec<String> {
        let take = limit.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .map(|e| e.line.clone())
            .collect()
    }
}
