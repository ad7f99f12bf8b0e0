// SPDX-License-Identifier: Apache-2.0
//! Dedup structures: process-wide cross-account dedup, and the per-account
//! dedup set each `Monitor` owns. Both are built directly on [`BoundedMap`]/
//! [`BoundedSet`] — see `bounded.rs` for why those are the only allowed
//! eviction mechanism for caches like these.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::bounded::{BoundedMap, BoundedSet};

/// Process-wide dedup shared by every account monitor: `claim(id)` returns
/// `true` the first time, `false` on every later call. Created lazily on
/// first use, lives for the process, pruned by age + capacity — this is the
/// only process-wide mutable state the gateway core owns, so every
/// operation must be atomic against concurrent claims from other monitors.
pub struct CrossAccountDedup {
    seen_at: Mutex<BoundedMap<String, Instant>>,
    max_age: Duration,
}

impl CrossAccountDedup {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            seen_at: Mutex::new(BoundedMap::new(capacity)),
            max_age,
        }
    }

    /// Returns `true` the first time `message_id` is claimed, `false` on
    /// every subsequent call for the same id.
    pub fn claim(&self, message_id: &str) -> bool {
        let mut seen_at = self.seen_at.lock().expect("cross-account dedup mutex poisoned");
        if seen_at.contains_key(&message_id.to_string()) {
            return false;
        }

        // Proactively drop anything stale before falling back to
        // `BoundedMap`'s own oldest-first eviction for whatever is still
        // over capacity after that.
        if seen_at.len() >= seen_at.capacity() {
            let max_age = self.max_age;
            let now = Instant::now();
            let stale: Vec<String> = seen_at
                .iter()
                .filter(|(_, at)| now.duration_since(**at) > max_age)
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                seen_at.remove(&id);
            }
        }

        seen_at.set(message_id.to_string(), Instant::now());
        true
    }
}

/// Per-account dedup set. Wraps [`BoundedSet`] directly, so overflow evicts
/// the single oldest entry per insert rather than any ad-hoc batching.
pub struct PerAccountDedup {
    members: BoundedSet<String>,
}

impl PerAccountDedup {
    pub fn new(capacity: usize) -> Self {
        Self {
            members: BoundedSet::new(capacity),
        }
    }

    /// Returns `true` the first time `message_id` is claimed for this
    /// account.
    pub fn claim(&mut self, message_id: &str) -> bool {
        self.members.add(message_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}
