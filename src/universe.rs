// =============================================================================
// Tracked-symbol universe and sentiment mapping (§6.7)
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::types::Direction;

/// A single tradeable symbol, loaded from the universe CSV (§3.1 Symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub direction: Direction,
    #[serde(rename = "underlyingId")]
    pub underlying_id: String,
    #[serde(rename = "leverageFactor")]
    pub leverage_factor: f64,
    #[serde(rename = "pairSymbol")]
    pub pair_symbol: String,
}

/// The full tracked universe, keyed by symbol for O(1) lookup during
/// scan ticks.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    symbols: HashMap<String, Symbol>,
}

impl Universe {
    /// Parse a CSV with header `symbol,direction,underlyingId,leverageFactor,pairSymbol`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening universe file {}", path.display()))?;
        let mut symbols = HashMap::new();
        for record in reader.deserialize() {
            let symbol: Symbol = record.context("parsing universe record")?;
            symbols.insert(symbol.symbol.clone(), symbol);
        }
        info!(count = symbols.len(), path = %path.display(), "universe loaded");
        Ok(Self { symbols })
    }

    pub fn get(&self, symbol: &str) -> Option<&Symbol> {
        self.symbols.get(symbol)
    }

    pub fn all(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Per-underlying sentiment snapshot loaded from an operator-curated JSON
/// file (§3.1 SentimentSnapshot, §6.7). Re-read on a fixed interval by
/// the sentiment filter rather than on every scan tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentEntry {
    #[serde(rename = "underlyingId")]
    pub underlying_id: String,
    pub score: f64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(rename = "newsCount", default)]
    pub news_count: u32,
    #[serde(rename = "asOf")]
    pub as_of: chrono::DateTime<chrono::Utc>,
}

fn default_confidence() -> f64 {
    0.5
}

pub fn load_sentiment_map(path: &Path) -> Result<HashMap<String, SentimentEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading sentiment file {}", path.display()))?;
    let entries: Vec<SentimentEntry> =
        serde_json::from_str(&raw).context("parsing sentiment file")?;
    let map = entries
        .into_iter()
        .map(|e| (e.underlying_id.clone(), e))
        .collect();
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_universe_csv() {
        let dir = std::env::temp_dir().join(format!("ees-universe-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("universe.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "symbol,direction,underlyingId,leverageFactor,pairSymbol").unwrap();
        writeln!(file, "TQQQ,Bull,QQQ,3.0,SQQQ").unwrap();
        writeln!(file, "SQQQ,Bear,QQQ,3.0,TQQQ").unwrap();
        drop(file);

        let universe = Universe::load(&path).unwrap();
        assert_eq!(universe.len(), 2);
        let tqqq = universe.get("TQQQ").unwrap();
        assert_eq!(tqqq.direction, Direction::Bull);
        assert_eq!(tqqq.leverage_factor, 3.0);
        std::fs::remove_dir_all(&dir).ok();
    }
}
