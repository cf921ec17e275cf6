// =============================================================================
// Configuration
// =============================================================================
//
// Static, operator-tunable configuration loaded from `Config.toml` at
// startup. Any key may be overridden by an `EES_<UPPER_SNAKE_KEY>`
// environment variable, applied after the file is parsed — useful for
// container deployments that inject secrets-adjacent overrides (e.g.
// `EES_ENVIRONMENT=sandbox`) without touching the checked-in file.
//
// Persisted *runtime* state (phase, trading mode, consecutive-loss
// counters) lives in `persistence.rs`, not here — this module only
// covers the read-mostly knobs of §6.5.
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::types::AccountMode;

fn default_exchange_timezone() -> String {
    "America/New_York".to_string()
}

fn default_universe_path() -> String {
    "universe.csv".to_string()
}

fn default_scan_interval_sec() -> u64 {
    120
}

fn default_position_tick_sec() -> u64 {
    60
}

fn default_max_concurrent_positions() -> usize {
    20
}

fn default_min_agreeing_strategies() -> usize {
    2
}

fn default_min_composite_confidence() -> f64 {
    0.90
}

fn default_breakeven_trigger_pct() -> f64 {
    0.005
}

fn default_trail_base_min_pct() -> f64 {
    0.005
}

fn default_trail_base_max_pct() -> f64 {
    0.05
}

fn default_explosive_trigger_pct() -> f64 {
    0.10
}

fn default_moon_trigger_pct() -> f64 {
    0.25
}

fn default_max_holding_duration_hours() -> i64 {
    4
}

fn default_quote_ttl_sec() -> u64 {
    60
}

fn default_bar_ttl_sec() -> u64 {
    3600
}

fn default_keep_alive_interval_sec() -> u64 {
    5400
}

fn default_clock_skew_tolerance_sec() -> i64 {
    120
}

fn default_provider_order() -> Vec<String> {
    vec![
        "broker".to_string(),
        "polygon".to_string(),
        "alphavantage".to_string(),
        "yahoo".to_string(),
    ]
}

fn default_max_daily_loss_pct() -> f64 {
    3.0
}

fn default_max_consecutive_losses() -> u32 {
    4
}

fn default_reconcile_interval_sec() -> u64 {
    300
}

/// Static configuration surface, §6.5. Every field has a default so a
/// missing or partially populated `Config.toml` still produces a usable
/// configuration, mirroring the teacher's permissive-deserialise style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_exchange_timezone")]
    pub exchange_timezone: String,

    #[serde(default)]
    pub environment: AccountMode,

    #[serde(default = "default_universe_path")]
    pub universe_path: String,

    #[serde(default)]
    pub sentiment_path: Option<String>,

    #[serde(default = "default_scan_interval_sec")]
    pub scan_interval_sec: u64,

    #[serde(default = "default_position_tick_sec")]
    pub position_tick_sec: u64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    #[serde(default = "default_min_agreeing_strategies")]
    pub min_agreeing_strategies: usize,

    #[serde(default = "default_min_composite_confidence")]
    pub min_composite_confidence: f64,

    #[serde(default = "default_breakeven_trigger_pct")]
    pub breakeven_trigger_pct: f64,

    #[serde(default = "default_trail_base_min_pct")]
    pub trail_base_min_pct: f64,

    #[serde(default = "default_trail_base_max_pct")]
    pub trail_base_max_pct: f64,

    #[serde(default = "default_explosive_trigger_pct")]
    pub explosive_trigger_pct: f64,

    #[serde(default = "default_moon_trigger_pct")]
    pub moon_trigger_pct: f64,

    #[serde(default = "default_max_holding_duration_hours")]
    pub max_holding_duration_hours: i64,

    #[serde(default = "default_quote_ttl_sec")]
    pub quote_ttl_sec: u64,

    #[serde(default = "default_bar_ttl_sec")]
    pub bar_ttl_sec: u64,

    #[serde(default = "default_keep_alive_interval_sec")]
    pub keep_alive_interval_sec: u64,

    #[serde(default = "default_clock_skew_tolerance_sec")]
    pub clock_skew_tolerance_sec: i64,

    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,

    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    #[serde(default = "default_reconcile_interval_sec")]
    pub reconcile_interval_sec: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange_timezone: default_exchange_timezone(),
            environment: AccountMode::default(),
            universe_path: default_universe_path(),
            sentiment_path: None,
            scan_interval_sec: default_scan_interval_sec(),
            position_tick_sec: default_position_tick_sec(),
            max_concurrent_positions: default_max_concurrent_positions(),
            min_agreeing_strategies: default_min_agreeing_strategies(),
            min_composite_confidence: default_min_composite_confidence(),
            breakeven_trigger_pct: default_breakeven_trigger_pct(),
            trail_base_min_pct: default_trail_base_min_pct(),
            trail_base_max_pct: default_trail_base_max_pct(),
            explosive_trigger_pct: default_explosive_trigger_pct(),
            moon_trigger_pct: default_moon_trigger_pct(),
            max_holding_duration_hours: default_max_holding_duration_hours(),
            quote_ttl_sec: default_quote_ttl_sec(),
            bar_ttl_sec: default_bar_ttl_sec(),
            keep_alive_interval_sec: default_keep_alive_interval_sec(),
            clock_skew_tolerance_sec: default_clock_skew_tolerance_sec(),
            provider_order: default_provider_order(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            reconcile_interval_sec: default_reconcile_interval_sec(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults for any field the
    /// file omits, then apply `EES_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        };
        config.apply_env_overrides();
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Overlay `EES_*` environment variables onto the loaded config.
    /// Unknown keys or unparsable values are logged and ignored rather
    /// than treated as fatal — an operator typo in an override should
    /// not prevent startup with the file-derived value.
    fn apply_env_overrides(&mut self) {
        macro_rules! override_str {
            ($env:literal, $field:expr) => {
                if let Ok(v) = std::env::var($env) {
                    $field = v;
                }
            };
        }
        macro_rules! override_parsed {
            ($env:literal, $field:expr) => {
                if let Ok(v) = std::env::var($env) {
                    match v.parse() {
                        Ok(parsed) => $field = parsed,
                        Err(_) => warn!(env = $env, value = %v, "ignoring unparsable config override"),
                    }
                }
            };
        }

        override_str!("EES_EXCHANGE_TIMEZONE", self.exchange_timezone);
        if let Ok(v) = std::env::var("EES_ENVIRONMENT") {
            self.environment = match v.to_lowercase().as_str() {
                "live" => AccountMode::Live,
                "sandbox" => AccountMode::Sandbox,
                other => {
                    warn!(value = %other, "ignoring unrecognised EES_ENVIRONMENT override");
                    self.environment
                }
            };
        }
        override_str!("EES_UNIVERSE_PATH", self.universe_path);
        if let Ok(v) = std::env::var("EES_SENTIMENT_PATH") {
            self.sentiment_path = Some(v);
        }
        override_parsed!("EES_SCAN_INTERVAL_SEC", self.scan_interval_sec);
        override_parsed!("EES_POSITION_TICK_SEC", self.position_tick_sec);
        override_parsed!("EES_MAX_CONCURRENT_POSITIONS", self.max_concurrent_positions);
        override_parsed!("EES_MIN_AGREEING_STRATEGIES", self.min_agreeing_strategies);
        override_parsed!("EES_MIN_COMPOSITE_CONFIDENCE", self.min_composite_confidence);
        override_parsed!("EES_BREAKEVEN_TRIGGER_PCT", self.breakeven_trigger_pct);
        override_parsed!("EES_TRAIL_BASE_MIN_PCT", self.trail_base_min_pct);
        override_parsed!("EES_TRAIL_BASE_MAX_PCT", self.trail_base_max_pct);
        override_parsed!("EES_EXPLOSIVE_TRIGGER_PCT", self.explosive_trigger_pct);
        override_parsed!("EES_MOON_TRIGGER_PCT", self.moon_trigger_pct);
        override_parsed!("EES_MAX_HOLDING_DURATION_HOURS", self.max_holding_duration_hours);
        override_parsed!("EES_QUOTE_TTL_SEC", self.quote_ttl_sec);
        override_parsed!("EES_BAR_TTL_SEC", self.bar_ttl_sec);
        override_parsed!("EES_KEEP_ALIVE_INTERVAL_SEC", self.keep_alive_interval_sec);
        override_parsed!("EES_CLOCK_SKEW_TOLERANCE_SEC", self.clock_skew_tolerance_sec);
        if let Ok(v) = std::env::var("EES_PROVIDER_ORDER") {
            self.provider_order = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        override_parsed!("EES_MAX_DAILY_LOSS_PCT", self.max_daily_loss_pct);
        override_parsed!("EES_MAX_CONSECUTIVE_LOSSES", self.max_consecutive_losses);
        override_parsed!("EES_RECONCILE_INTERVAL_SEC", self.reconcile_interval_sec);
    }

    /// Atomically persist the config (used by the control API path that
    /// lets an operator adjust a knob and have it survive a restart).
    /// Writes to a sibling `.tmp` file, fsyncs it, then renames over the
    /// real path — rename is atomic on the same filesystem, so a reader
    /// never observes a partially written file, and the fsync ensures
    /// the write has actually reached disk before the rename is visible.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("toml.tmp");
        let serialized = toml::to_string_pretty(self).context("serialising config")?;
        let mut file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        use std::io::Write as _;
        file.write_all(serialized.as_bytes())
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("fsyncing {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.exchange_timezone, "America/New_York");
        assert_eq!(config.max_concurrent_positions, 20);
        assert_eq!(config.min_composite_confidence, 0.90);
        assert_eq!(config.provider_order, vec!["broker", "polygon", "alphavantage", "yahoo"]);
    }

    #[test]
    fn deserialise_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scan_interval_sec, 120);
        assert_eq!(config.min_agreeing_strategies, 2);
    }

    #[test]
    fn deserialise_partial_toml_fills_defaults() {
        let config: Config = toml::from_str("scan_interval_sec = 30\n").unwrap();
        assert_eq!(config.scan_interval_sec, 30);
        assert_eq!(config.position_tick_sec, 60);
    }

    #[test]
    fn roundtrip_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ees-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Config.toml");
        let config = Config {
            scan_interval_sec: 45,
            ..Config::default()
        };
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.scan_interval_sec, 45);
        std::fs::remove_dir_all(&dir).ok();
    }
}
