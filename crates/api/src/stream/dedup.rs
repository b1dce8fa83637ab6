//! Per-connection duplicate suppression

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Remembers event ids pushed to one connection for a bounded time.
#[derive(Debug)]
pub struct DedupWindow {
    window: Duration,
    max_entries: usize,
    seen: HashMap<String, Instant>,
    order: VecDeque<(Instant, String)>,
}

impl DedupWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Whether `id` was recorded within the window.
    pub fn contains(&mut self, id: &str) -> bool {
        self.evict(Instant::now());
        self.seen.contains_key(id)
    }

    pub fn record(&mut self, id: &str) {
        let now = Instant::now();
        self.evict(now);
        self.seen.insert(id.to_string(), now);
        self.order.push_back((now, id.to_string()));

        while self.seen.len() > self.max_entries {
            match self.order.pop_front() {
                Some((at, oldest)) => self.forget(&oldest, at),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn evict(&mut self, now: Instant) {
        while let Some((at, _)) = self.order.front() {
            if now.duration_since(*at) < self.window {
                break;
            }
            if let Some((at, id)) = self.order.pop_front() {
                self.forget(&id, at);
            }
        }
    }

    // A re-recorded id has a newer entry further back in `order`
    fn forget(&mut self, id: &str, at: Instant) {
        if self.seen.get(id) == Some(&at) {
            self.seen.remove(id);
        }
    }
}
