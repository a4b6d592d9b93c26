//! Recent status lines for the on-screen debug overlay.
//!
//! A fixed-size ring buffer behind a mutex. Create one at startup and hand
//! clones to whoever needs to write or read it; all clones share the same
//! buffer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const DEBUG_LOG_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct DebugLog {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::with_capacity(DEBUG_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Add a line, dropping the oldest one when full.
    pub fn append(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Current lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let log = DebugLog::new();
        for i in 0..12 {
            log.append(format!("line {}", i));
        }
        let lines = log.snapshot();
        assert_eq!(lines.len(), DEBUG_LOG_CAPACITY);
        assert_eq!(lines.first().map(String::as_str), Some("line 2"));
        assert_eq!(lines.last().map(String::as_str), Some("line 11"));
    }

    #[test]
    fn test_clones_share_buffer() {
        let log = DebugLog::new();
        let writer = log.clone();
        writer.append("Scanned: x");
        assert_eq!(log.snapshot(), vec!["Scanned: x".to_string()]);
    }

    #[test]
    fn test_concurrent_appends() {
        let log = DebugLog::with_capacity(4);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append(format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.snapshot().len(), 4);
    }
}
