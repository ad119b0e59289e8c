//! Layered configuration (spec §6).
//!
//! Leg 1 (caller) and leg 2 (callee) each get their own independently
//! layered config stack: a baked-in default, overridden in order by the
//! `-o`/`-d` files the operator passed on the command line. This mirrors
//! `original_source`'s `Config.load_configs(args.caller)` /
//! `Config.load_configs(args.callee)`, which never merge the two legs
//! together.

use std::path::Path;

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::{HubError, Result};

/// Baked-in default configuration, analogous to `original_source`'s
/// `../resources/default.cfg`.
const DEFAULT_CONFIG: &str = include_str!("../resources/default.toml");

/// Policy and announcement configuration under the `[Switchboard]` group.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchboardConfig {
    pub introduction: Vec<String>,
    pub closing: String,
    pub rejected: String,
    pub noanswer: String,
    pub calling: String,
    pub call_db: String,
    pub last24_max_num_calls: u32,
    pub last24_max_total_time: f64,
    pub blacklist_for: f64,
    pub max_call_length: f64,
    pub wait_time_before_calling_back: f64,
    #[serde(default)]
    pub call_back_uri: Option<String>,
    #[serde(default)]
    pub call_back_uri_subs: Option<Vec<(String, String)>>,
}

/// Hub-wide tuning under the `[Hub]` group.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    pub main_loop_sleep_time: f64,
}

/// One leg's fully-resolved configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "Switchboard")]
    pub switchboard: SwitchboardConfig,
    #[serde(rename = "Hub")]
    pub hub: HubConfig,
}

/// Load the default config, then layer each override file on top in order.
/// Later files win on a per-key basis (spec §6: "additional config files
/// overwrite any default or previous values").
pub fn load_leg_config(overrides: &[impl AsRef<Path>]) -> Result<AppConfig> {
    let mut builder = Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

    for path in overrides {
        let path = path.as_ref();
        builder = builder.add_source(File::from(path.to_path_buf()));
    }

    let built = builder
        .build()
        .map_err(|e| HubError::Config(format!("failed to merge configuration: {e}")))?;

    built
        .try_deserialize()
        .map_err(|e| HubError::Config(format!("failed to parse configuration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_baked_in_default() {
        let cfg = load_leg_config::<&str>(&[]).expect("default config must parse");
        assert!(!cfg.switchboard.introduction.is_empty());
        assert!(cfg.hub.main_loop_sleep_time > 0.0);
    }

    #[test]
    fn override_file_wins_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("override.toml");
        std::fs::write(&path, "[Switchboard]\nlast24_max_num_calls = 7\n").unwrap();

        let cfg = load_leg_config(&[path]).unwrap();
        assert_eq!(cfg.switchboard.last24_max_num_calls, 7);
        // Untouched keys still come from the default layer.
        assert!(!cfg.switchboard.closing.is_empty());
    }

    #[test]
    fn later_override_file_wins_over_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        std::fs::write(&first, "[Switchboard]\nlast24_max_num_calls = 7\n").unwrap();
        std::fs::write(&second, "[Switchboard]\nlast24_max_num_calls = 9\n").unwrap();

        let cfg = load_leg_config(&[first, second]).unwrap();
        assert_eq!(cfg.switchboard.last24_max_num_calls, 9);
    }
}
