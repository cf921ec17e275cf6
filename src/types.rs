// =============================================================================
// Shared types used across the engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the broker (§3.1 AccountSnapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or a paper/sandbox account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Sandbox,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Sandbox
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sandbox => write!(f, "Sandbox"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Market-phase the session scheduler drives the system through (§4.1).
/// Ordinal order matters: `SessionState.phase` may not regress within a
/// calendar day, enforced by comparing the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Dark,
    Prep,
    Open,
    Cooldown,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Dark
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dark => write!(f, "DARK"),
            Self::Prep => write!(f, "PREP"),
            Self::Open => write!(f, "OPEN"),
            Self::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// Directional polarity of a tracked symbol relative to its underlying
/// (§3.1 Symbol.direction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bull,
    Bear,
    Neutral,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "Bull"),
            Self::Bear => write!(f, "Bear"),
            Self::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Order side. The system only ever buys the leveraged symbol and sells it
/// to exit (§1 Non-goals exclude short-selling the underlying); the type
/// still names the side explicitly at the executor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order lifecycle status (§3.1). Transitions are acyclic per §3.2:
/// `Pending -> Previewed -> Placed -> (PartiallyFilled*) -> Filled |
/// Cancelled | Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Previewed,
    Placed,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Previewed => "Previewed",
            Self::Placed => "Placed",
            Self::PartiallyFilled => "PartiallyFilled",
            Self::Filled => "Filled",
            Self::Cancelled => "Cancelled",
            Self::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

impl OrderStatus {
    /// `true` once the order will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// A single strategy's verdict on a symbol (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictKind {
    Enter,
    Skip,
    Exit,
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Enter => write!(f, "Enter"),
            Self::Skip => write!(f, "Skip"),
            Self::Exit => write!(f, "Exit"),
        }
    }
}

/// Bucketed count of strategies agreeing on `Enter` (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgreementLevel {
    None,
    Low,
    Medium,
    High,
    Maximum,
}

impl AgreementLevel {
    pub fn from_count(agree: usize) -> Self {
        match agree {
            0 => Self::None,
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            _ => Self::Maximum,
        }
    }

    /// Multiplier applied to the weighted-mean confidence (§4.4).
    pub fn confidence_boost(self) -> f64 {
        match self {
            Self::None | Self::Low => 1.0,
            Self::Medium => 1.1,
            Self::High => 1.2,
            Self::Maximum => 1.3,
        }
    }

    /// Additive position-sizing bonus (§4.6 step 6).
    pub fn sizing_bonus(self) -> f64 {
        match self {
            Self::None | Self::Low => 0.0,
            Self::Medium => 0.25,
            Self::High => 0.50,
            Self::Maximum => 1.00,
        }
    }
}

impl std::fmt::Display for AgreementLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Maximum => "Maximum",
        };
        write!(f, "{s}")
    }
}

/// Sentiment filter decision (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentimentDecision {
    Block,
    Boost,
    Neutral,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_ordinal_enforces_no_regress() {
        assert!(Phase::Dark < Phase::Prep);
        assert!(Phase::Prep < Phase::Open);
        assert!(Phase::Open < Phase::Cooldown);
    }

    #[test]
    fn agreement_level_buckets() {
        assert_eq!(AgreementLevel::from_count(0), AgreementLevel::None);
        assert_eq!(AgreementLevel::from_count(1), AgreementLevel::Low);
        assert_eq!(AgreementLevel::from_count(2), AgreementLevel::Medium);
        assert_eq!(AgreementLevel::from_count(3), AgreementLevel::High);
        assert_eq!(AgreementLevel::from_count(4), AgreementLevel::Maximum);
        assert_eq!(AgreementLevel::from_count(9), AgreementLevel::Maximum);
    }

    #[test]
    fn order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Placed.is_terminal());
    }
}
