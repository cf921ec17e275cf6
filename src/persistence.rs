// =============================================================================
// Persisted State (§6.6)
// =============================================================================
//
// Single JSON file covering session phase, open positions, in-flight
// orders, and the day's risk counters. Same atomic write discipline as
// `config.rs`: write `state.json.tmp`, fsync, rename over `state.json`
// (§9 "persistence race"). On startup, a `state.json.tmp` left behind
// with no `state.json` means the process died mid-write; the state is
// treated as corrupt and the caller falls back to broker reconciliation
// instead of trusting it.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::position::Position;
use crate::types::Phase;

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSessionState {
    pub phase: Phase,
    pub entered_at: DateTime<Utc>,
}

/// An order the executor had placed but not yet seen reach a terminal
/// status when the state was last saved. Best-effort: the executor
/// itself polls in-process rather than resuming from this record, but
/// a surviving entry here tells startup reconciliation a fill might
/// exist at the broker under an id we haven't accounted for locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedCounters {
    pub trades_today: u32,
    pub realized_pnl_today: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub last_saved_at: DateTime<Utc>,
    pub session_state: PersistedSessionState,
    pub positions: Vec<Position>,
    #[serde(default)]
    pub orders: Vec<PersistedOrder>,
    pub counters: PersistedCounters,
}

impl PersistedState {
    pub fn new(
        session_state: PersistedSessionState,
        positions: Vec<Position>,
        orders: Vec<PersistedOrder>,
        counters: PersistedCounters,
    ) -> Self {
        Self { schema_version: SCHEMA_VERSION, last_saved_at: Utc::now(), session_state, positions, orders, counters }
    }
}

/// Outcome of a startup load, so the caller can decide whether to trust
/// the recovered positions or reconcile from the broker instead.
pub enum LoadOutcome {
    Loaded(PersistedState),
    Absent,
    Corrupt,
}

/// Loads `state.json`. Returns `Corrupt` (never an error) if the file
/// is missing but its `.tmp` sibling exists, or if the file fails to
/// parse — both are recoverable by reconciling from the broker rather
/// than by halting.
pub fn load(path: &Path) -> LoadOutcome {
    let tmp_path = tmp_path_for(path);
    if !path.exists() {
        if tmp_path.exists() {
            warn!(path = %tmp_path.display(), "found a leftover state.json.tmp with no state.json, treating as corrupt");
            return LoadOutcome::Corrupt;
        }
        return LoadOutcome::Absent;
    }

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read persisted state");
            return LoadOutcome::Corrupt;
        }
    };
    match serde_json::from_str::<PersistedState>(&raw) {
        Ok(state) => LoadOutcome::Loaded(state),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "persisted state failed to parse");
            LoadOutcome::Corrupt
        }
    }
}

pub fn save(path: &Path, state: &PersistedState) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    let serialized = serde_json::to_string_pretty(state).context("serialising persisted state")?;
    let mut file =
        std::fs::File::create(&tmp_path).with_context(|| format!("creating {}", tmp_path.display()))?;
    use std::io::Write as _;
    file.write_all(serialized.as_bytes()).with_context(|| format!("writing {}", tmp_path.display()))?;
    file.sync_all().with_context(|| format!("fsyncing {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming {} to {}", tmp_path.display(), path.display()))?;
    info!(path = %path.display(), positions = state.positions.len(), "state saved");
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(".tmp");
    std::path::PathBuf::from(os_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::StealthMode;
    use crate::price::Price;
    use crate::types::Side;

    fn sample_state() -> PersistedState {
        let mut position = Position::open("TQQQ", Side::Buy, 70, Price::from_f64(50.0), 0.98);
        position.stealth_mode = StealthMode::Trailing;
        PersistedState::new(
            PersistedSessionState { phase: Phase::Open, entered_at: Utc::now() },
            vec![position],
            vec![],
            PersistedCounters { trades_today: 2, realized_pnl_today: 125.50 },
        )
    }

    #[test]
    fn roundtrip_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ees_persistence_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        let state = sample_state();
        save(&path, &state).unwrap();

        match load(&path) {
            LoadOutcome::Loaded(loaded) => {
                assert_eq!(loaded.schema_version, SCHEMA_VERSION);
                assert_eq!(loaded.positions.len(), 1);
                assert_eq!(loaded.counters.trades_today, 2);
            }
            _ => panic!("expected a loaded state"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_absent_not_corrupt() {
        let dir = std::env::temp_dir().join(format!("ees_persistence_absent_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        assert!(matches!(load(&path), LoadOutcome::Absent));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn leftover_tmp_with_no_real_file_is_corrupt() {
        let dir = std::env::temp_dir().join(format!("ees_persistence_corrupt_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");
        std::fs::write(tmp_path_for(&path), b"{}").unwrap();

        assert!(matches!(load(&path), LoadOutcome::Corrupt));
        std::fs::remove_dir_all(&dir).ok();
    }
}
