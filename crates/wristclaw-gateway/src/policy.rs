// SPDX-License-Identifier: Apache-2.0
//! Pure, side-effect-free access and safety policy primitives.

use std::collections::HashSet;

use regex::Regex;
use url::Url;
use wristclaw_config::{Account, DmPolicy, GroupPolicy};

/// An event is an echo iff it carries `via == "openclaw"`, or `botUserId`
/// is known and equals the event's `authorId`.
pub fn is_echo(via: Option<&str>, author_id: &str, bot_user_id: Option<&str>) -> bool {
    if via == Some("openclaw") {
        return true;
    }
    matches!(bot_user_id, Some(id) if !id.is_empty() && id == author_id)
}

/// A media URL is safe iff non-empty and either server-relative (`/…`) or
/// same-hostname as the account's server.
pub fn is_safe_media_url(url: &str, server_base_url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    if url.starts_with('/') {
        return true;
    }
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Ok(server) = Url::parse(server_base_url) else {
        return false;
    };
    matches!((parsed.host_str(), server.host_str()), (Some(a), Some(b)) if a == b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
    /// Group `mention` policy: caller must check @mention separately.
    RecordOnly,
}

/// DM gate. The owner is always allowed regardless of policy.
pub fn dm_gate(account: &Account, sender_id: &str) -> GateDecision {
    if account.is_owner(sender_id) {
        return GateDecision::Allow;
    }
    match account.dm_policy {
        DmPolicy::Disabled => GateDecision::Deny,
        DmPolicy::Open => GateDecision::Allow,
        DmPolicy::Allowlist => {
            let allowed = account.dm_allowlist.iter().any(|e| e == "*" || e == sender_id);
            if allowed {
                GateDecision::Allow
            } else {
                GateDecision::Deny
            }
        }
    }
}

/// Group gate. The owner bypasses the group allowlist (but not a `disabled`
/// policy).
pub fn group_gate(account: &Account, sender_id: &str) -> GateDecision {
    if account.group_policy == GroupPolicy::Disabled {
        return GateDecision::Deny;
    }
    if !account.is_owner(sender_id) && !account.group_allowlist.is_empty() {
        let allowed = account
            .group_allowlist
            .iter()
            .any(|e| e == "*" || e == sender_id);
        if !allowed {
            return GateDecision::Deny;
        }
    }
    match account.group_policy {
        GroupPolicy::Disabled => GateDecision::Deny,
        GroupPolicy::Open => GateDecision::Allow,
        GroupPolicy::Mention => GateDecision::RecordOnly,
    }
}

/// Result of [`detect_and_strip_mention`].
pub struct MentionResult {
    pub mentioned: bool,
    pub stripped: String,
}

/// Builds the mention pool for a group: the account's configured
/// `mentionNames`, the bot's display name (lowercased, if known), and the
/// literal `"all"`.
pub fn mention_pool(account: &Account, bot_display_name: Option<&str>) -> HashSet<String> {
    let mut pool: HashSet<String> = account
        .mention_names
        .iter()
        .map(|n| n.to_lowercase())
        .collect();
    if let Some(name) = bot_display_name {
        if !name.is_empty() {
            pool.insert(name.to_lowercase());
        }
    }
    pool.insert("all".to_string());
    pool
}

/// Case-insensitive @mention detect-and-strip. Text is "mentioned" iff it
/// contains `@<name>` for some `name` in the pool; when mentioned, every
/// occurrence of `@<name>` (any name, optional trailing whitespace) is
/// removed and the result trimmed.
pub fn detect_and_strip_mention(text: &str, names: &HashSet<String>) -> MentionResult {
    let mut mentioned = false;
    let mut stripped = text.to_string();

    for name in names {
        if name.is_empty() {
            continue;
        }
        let pattern = format!(r"(?i)@{}\s*", regex::escape(name));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        if re.is_match(&stripped) {
            mentioned = true;
            stripped = re.replace_all(&stripped, "").to_string();
        }
    }

    MentionResult {
        mentioned,
        stripped: stripped.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account {
            account_id: "a1".into(),
            server_base_url: "https://chat.example.com".into(),
            api_key: "k".into(),
            owner_user_id: Some("owner-1".into()),
            dm_policy: DmPolicy::Open,
            dm_allowlist: Vec::new(),
            group_policy: GroupPolicy::Mention,
            group_allowlist: Vec::new(),
            mention_names: HashSet::new(),
            group_history_limit: 20,
            secretary_agent_id: None,
        }
    }

    #[test]
    fn echo_detected_via_openclaw() {
        assert!(is_echo(Some("openclaw"), "u1", None));
    }

    #[test]
    fn echo_detected_via_bot_user_id() {
        assert!(is_echo(None, "bot-1", Some("bot-1")));
        assert!(!is_echo(None, "u1", Some("bot-1")));
        assert!(!is_echo(None, "u1", Some("")));
    }

    #[test]
    fn media_url_safety() {
        assert!(!is_safe_media_url("", "https://chat.example.com"));
        assert!(is_safe_media_url("/files/a.png", "https://chat.example.com"));
        assert!(is_safe_media_url(
            "https://chat.example.com/files/a.png",
            "https://chat.example.com"
        ));
        assert!(!is_safe_media_url(
            "https://evil.example.com/a.png",
            "https://chat.example.com"
        ));
        assert!(!is_safe_media_url("not a url", "https://chat.example.com"));
    }

    #[test]
    fn dm_gate_owner_always_allowed() {
        let mut a = account();
        a.dm_policy = DmPolicy::Disabled;
        assert_eq!(dm_gate(&a, "owner-1"), GateDecision::Allow);
    }

    #[test]
    fn dm_gate_disabled_denies_non_owner() {
        let mut a = account();
        a.dm_policy = DmPolicy::Disabled;
        assert_eq!(dm_gate(&a, "u2"), GateDecision::Deny);
    }

    #[test]
    fn dm_gate_allowlist_requires_membership() {
        let mut a = account();
        a.dm_policy = DmPolicy::Allowlist;
        a.dm_allowlist = vec!["u2".into()];
        assert_eq!(dm_gate(&a, "u2"), GateDecision::Allow);
        assert_eq!(dm_gate(&a, "u3"), GateDecision::Deny);
    }

    #[test]
    fn dm_gate_allowlist_wildcard() {
        let mut a = account();
        a.dm_policy = DmPolicy::Allowlist;
        a.dm_allowlist = vec!["*".into()];
        assert_eq!(dm_gate(&a, "anyone"), GateDecision::Allow);
    }

    #[test]
    fn group_gate_mention_policy_records_only() {
        let a = account();
        assert_eq!(group_gate(&a, "u2"), GateDecision::RecordOnly);
    }

    #[test]
    fn group_gate_allowlist_blocks_non_members() {
        let mut a = account();
        a.group_allowlist = vec!["u2".into()];
        assert_eq!(group_gate(&a, "u3"), GateDecision::Deny);
        assert_eq!(group_gate(&a, "u2"), GateDecision::RecordOnly);
    }

    #[test]
    fn group_gate_owner_bypasses_allowlist() {
        let mut a = account();
        a.group_allowlist = vec!["u2".into()];
        assert_eq!(group_gate(&a, "owner-1"), GateDecision::RecordOnly);
    }

    #[test]
    fn mention_detect_and_strip_removes_all_occurrences() {
        let mut names = HashSet::new();
        names.insert("bot".to_string());
        let result = detect_and_strip_mention("@bot @bot hello", &names);
        assert!(result.mentioned);
        assert_eq!(result.stripped, "hello");
    }

    #[test]
    fn mention_detect_is_case_insensitive() {
        let mut names = HashSet::new();
        names.insert("bot".to_string());
        let result = detect_and_strip_mention("@BOT hi", &names);
        assert!(result.mentioned);
        assert_eq!(result.stripped, "hi");
    }

    #[test]
    fn mention_not_present_leaves_text_unchanged_but_trimmed() {
        let mut names = HashSet::new();
        names.insert("bot".to_string());
        let result = detect_and_strip_mention("  hello  ", &names);
        assert!(!result.mentioned);
        assert_eq!(result.stripped, "hello");
    }
}
