// SPDX-License-Identifier: Apache-2.0
//! Sliding-window per-sender rate limiter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    window: Duration,
    max: usize,
    senders: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            senders: HashMap::new(),
        }
    }

    /// Trims `sender_id`'s timestamp list to entries within the window, then
    /// reports whether it is already at the limit. Does *not* append on a
    /// limited call; appends `now` and returns `false` otherwise.
    pub fn is_limited(&mut self, sender_id: &str) -> bool {
        let now = Instant::now();
        let window = self.window;
        let entry = self.senders.entry(sender_id.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) <= window);

        if entry.len() >= self.max {
            return true;
        }
        entry.push(now);
        false
    }

    /// Periodic prune (every 5 min per spec) of senders whose list is empty.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.senders.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) <= window);
            !entries.is_empty()
        });
    }
}
