// SPDX-License-Identifier: Apache-2.0
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Root configuration: one entry per configured Server account, plus the
/// tunables that drive every monitor's timers and bounded caches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Keyed by `accountId`. The loader copies the key onto
    /// [`Account::account_id`] so a `Monitor` can carry a self-contained
    /// value without holding a reference back into this map.
    #[serde(default)]
    pub accounts: std::collections::HashMap<String, Account>,
    #[serde(default)]
    pub gateway: GatewaySettings,
}

/// DM access policy. Default `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmPolicy {
    #[default]
    Open,
    Allowlist,
    Disabled,
}

/// Group access policy. Default `mention`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupPolicy {
    Mention,
    Open,
    Disabled,
}

impl Default for GroupPolicy {
    fn default() -> Self {
        GroupPolicy::Mention
    }
}

fn default_group_history_limit() -> usize {
    20
}

/// One configured Server account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Filled in by the loader from the map key; present here so a value
    /// can travel alone once pulled out of `Config.accounts`.
    #[serde(default)]
    pub account_id: String,
    /// HTTP base URL of the Server (e.g. `https://chat.example.com`).
    pub server_base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub dm_policy: DmPolicy,
    #[serde(default)]
    pub dm_allowlist: Vec<String>,
    #[serde(default)]
    pub group_policy: GroupPolicy,
    #[serde(default)]
    pub group_allowlist: Vec<String>,
    /// Lowercased mention names the account responds to in `mention`-policy
    /// groups, in addition to the bot's own display name and `"all"`.
    #[serde(default)]
    pub mention_names: HashSet<String>,
    #[serde(default = "default_group_history_limit")]
    pub group_history_limit: usize,
    #[serde(default)]
    pub secretary_agent_id: Option<String>,
}

impl Account {
    /// True when `sender_id` is this account's configured owner.
    pub fn is_owner(&self, sender_id: &str) -> bool {
        self.owner_user_id.as_deref() == Some(sender_id)
    }
}

fn default_max_concurrent_dispatches() -> usize {
    3
}
fn default_dedup_cache_capacity() -> usize {
    2000
}
fn default_dedup_prune_age_secs() -> u64 {
    300
}
fn default_per_account_dedup_capacity() -> usize {
    1000
}
fn default_message_author_cache_capacity() -> usize {
    500
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_rate_limit_max() -> usize {
    10
}
fn default_rate_limit_cleanup_secs() -> u64 {
    300
}
fn default_media_group_debounce_ms() -> u64 {
    800
}
fn default_voice_waiter_timeout_ms() -> u64 {
    15_000
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_pong_timeout_secs() -> u64 {
    10
}
fn default_reconnect_initial_backoff_ms() -> u64 {
    1000
}
fn default_reconnect_max_backoff_ms() -> u64 {
    60_000
}
fn default_typing_heartbeat_ms() -> u64 {
    3500
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_fetch_retries() -> u32 {
    2
}
fn default_catchup_page_limit() -> u32 {
    50
}

/// Tunable constants shared by every `Monitor`. Every field here corresponds
/// to a default spec gives inline — kept as overridable configuration rather
/// than literals so operators can tune without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_max_concurrent_dispatches")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "default_dedup_cache_capacity")]
    pub dedup_cache_capacity: usize,
    #[serde(default = "default_dedup_prune_age_secs")]
    pub dedup_prune_age_secs: u64,
    #[serde(default = "default_per_account_dedup_capacity")]
    pub per_account_dedup_capacity: usize,
    #[serde(default = "default_message_author_cache_capacity")]
    pub message_author_cache_capacity: usize,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub rate_limit_cleanup_secs: u64,
    #[serde(default = "default_media_group_debounce_ms")]
    pub media_group_debounce_ms: u64,
    #[serde(default = "default_voice_waiter_timeout_ms")]
    pub voice_waiter_timeout_ms: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_reconnect_initial_backoff_ms")]
    pub reconnect_initial_backoff_ms: u64,
    #[serde(default = "default_reconnect_max_backoff_ms")]
    pub reconnect_max_backoff_ms: u64,
    #[serde(default = "default_typing_heartbeat_ms")]
    pub typing_heartbeat_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default = "default_catchup_page_limit")]
    pub catchup_page_limit: u32,
    /// Whether a voice message with empty transcription after the waiter
    /// times out falls back to a placeholder instead of being dropped.
    /// Resolved to `false` (drop) by default — see DESIGN.md's Open
    /// Question notes; kept configurable only because one of the two
    /// observed source variants used the fallback.
    #[serde(default)]
    pub voice_empty_fallback: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: default_max_concurrent_dispatches(),
            dedup_cache_capacity: default_dedup_cache_capacity(),
            dedup_prune_age_secs: default_dedup_prune_age_secs(),
            per_account_dedup_capacity: default_per_account_dedup_capacity(),
            message_author_cache_capacity: default_message_author_cache_capacity(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_cleanup_secs: default_rate_limit_cleanup_secs(),
            media_group_debounce_ms: default_media_group_debounce_ms(),
            voice_waiter_timeout_ms: default_voice_waiter_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
            reconnect_initial_backoff_ms: default_reconnect_initial_backoff_ms(),
            reconnect_max_backoff_ms: default_reconnect_max_backoff_ms(),
            typing_heartbeat_ms: default_typing_heartbeat_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            fetch_retries: default_fetch_retries(),
            catchup_page_limit: default_catchup_page_limit(),
            voice_empty_fallback: false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
