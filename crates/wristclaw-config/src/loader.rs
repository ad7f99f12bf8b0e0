// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest
/// priority. Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/wristclaw/config.yaml"));
    paths.push(PathBuf::from("/etc/wristclaw/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/wristclaw/config.yaml"));
        paths.push(home.join(".config/wristclaw/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("wristclaw/config.yaml"));
        paths.push(cfg.join("wristclaw/config.yml"));
    }

    paths.push(PathBuf::from(".wristclaw.yaml"));
    paths.push(PathBuf::from(".wristclaw.yml"));
    paths.push(PathBuf::from("wristclaw.yaml"));
    paths.push(PathBuf::from("wristclaw.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then copying
/// each account's map key onto its own `account_id` field — the key and the
/// field must agree so a `Monitor` can carry the `Account`
/// value in isolation).
///
/// The `extra` argument may provide an explicit path (e.g. a `--config` CLI
/// flag owned by the enclosing plugin shell — out of scope here).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).context("deserialising merged wristclaw config")?
    };

    backfill_account_ids(&mut config);
    Ok(config)
}

/// Parse a config already held in memory (used by a plugin host that owns
/// its own file-discovery and only needs the schema + backfill step).
pub fn load_from_str(yaml: &str) -> anyhow::Result<Config> {
    let mut config: Config = serde_yaml::from_str(yaml).context("parsing wristclaw config")?;
    backfill_account_ids(&mut config);
    Ok(config)
}

fn backfill_account_ids(config: &mut Config) {
    for (id, account) in config.accounts.iter_mut() {
        if account.account_id.is_empty() {
            account.account_id = id.clone();
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
