//! Bounded ring of recent serial traffic for UI replay
//!
//! Every session keeps the most recent entries of its wire conversation so
//! the frontend can render a console view. The ring is shared between the
//! session (writer) and HTTP handlers (readers).

use std::collections::VecDeque;

use chrono::Local;
use parking_lot::RwLock;
use serde::Serialize;

/// Maximum entries retained; oldest are dropped first
pub const MAX_HISTORY: usize = 100;

/// Who produced a history line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
    System,
}

/// One recorded line with a wall-clock timestamp
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub direction: Direction,
    pub message: String,
}

/// Fixed-capacity history ring
pub struct HistoryRing {
    entries: RwLock<VecDeque<HistoryEntry>>,
}

impl HistoryRing {
    pub fn new() -> Self {
        HistoryRing {
            entries: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    /// Append an entry, evicting the oldest when full
    pub fn record(&self, direction: Direction, message: impl Into<String>) {
        let entry = HistoryEntry {
            timestamp: Local::now().format("%H:%M:%S").to_string(),
            direction,
            message: message.into(),
        };

        let mut entries = self.entries.write();
        if entries.len() == MAX_HISTORY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Console-formatted lines, oldest first. Sent lines carry a `>` marker.
    pub fn formatted(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| match e.direction {
                Direction::Sent => format!("[{}] > {}", e.timestamp, e.message),
                _ => format!("[{}] {}", e.timestamp, e.message),
            })
            .collect()
    }

    /// Snapshot of the raw entries, oldest first
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.read().iter().cloned().collect()
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let ring = HistoryRing::new();
        for i in 0..250 {
            ring.record(Direction::Received, format!("line {i}"));
        }
        assert_eq!(ring.len(), MAX_HISTORY);

        // Oldest entries were dropped first
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.first().unwrap().message, "line 150");
        assert_eq!(snapshot.last().unwrap().message, "line 249");
    }

    #[test]
    fn test_sent_lines_are_marked() {
        let ring = HistoryRing::new();
        ring.record(Direction::Sent, "STATUS");
        ring.record(Direction::Received, "STATUS:READY");
        ring.record(Direction::System, "connected");

        let lines = ring.formatted();
        assert!(lines[0].contains("> STATUS"));
        assert!(!lines[1].contains('>'));
        assert!(lines[2].ends_with("connected"));
    }
}
