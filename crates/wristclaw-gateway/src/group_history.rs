// SPDX-License-Identifier: Apache-2.0
//! Per-group bounded history buffer. Appended when a non-mentioning
//! message arrives in a `mention`-policy
//! group, handed to the agent as context when a mention finally triggers a
//! dispatch, then cleared.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::host::{HistoryApi, InboundHistoryEntry};

/// One `Monitor`'s group-history buffers, keyed by `channelId`. A plain
/// `Mutex`-guarded map rather than per-channel locks: entries are small and
/// contention is a single account's own event loop, not cross-account.
pub struct GroupHistoryStore {
    channels: Mutex<HashMap<String, VecDeque<InboundHistoryEntry>>>,
}

impl GroupHistoryStore {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<InboundHistoryEntry>>> {
        self.channels.lock().expect("group history mutex poisoned")
    }
}

impl Default for GroupHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryApi for GroupHistoryStore {
    async fn record_pending_history_entry_if_enabled(
        &self,
        channel_id: &str,
        entry: InboundHistoryEntry,
        limit: usize,
    ) -> Result<(), GatewayError> {
        if limit == 0 {
            return Ok(());
        }
        let mut channels = self.lock();
        let entries = channels.entry(channel_id.to_string()).or_default();
        entries.push_back(entry);
        while entries.len() > limit {
            entries.pop_front();
        }
        Ok(())
    }

    async fn build_pending_history_context_from_map(
        &self,
        channel_id: &str,
    ) -> Result<Vec<InboundHistoryEntry>, GatewayError> {
        let channels = self.lock();
        Ok(channels
            .get(channel_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_history_entries_if_enabled(&self, channel_id: &str) -> Result<(), GatewayError> {
        self.lock().remove(channel_id);
        Ok(())
    }
}
