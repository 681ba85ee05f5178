//! Shared domain types for the CVRF engine.
//!
//! Everything here crosses the snapshot boundary and derives serde.
//! Decisions are immutable once recorded; the engine assigns their ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Portfolio action taken by a trading decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    /// Returns true for actions that move a position (buy/sell).
    pub fn is_directional(&self) -> bool {
        matches!(self, TradeAction::Buy | TradeAction::Sell)
    }

    /// Returns true when `other` is the directional opposite (buy vs sell).
    ///
    /// `Hold` opposes nothing.
    pub fn opposes(&self, other: TradeAction) -> bool {
        matches!(
            (self, other),
            (TradeAction::Buy, TradeAction::Sell) | (TradeAction::Sell, TradeAction::Buy)
        )
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeAction::Buy => write!(f, "buy"),
            TradeAction::Sell => write!(f, "sell"),
            TradeAction::Hold => write!(f, "hold"),
        }
    }
}

/// A recorded trading decision within an episode.
///
/// Immutable once appended. Ids are assigned by the episode manager,
/// scoped to the owning episode's decision count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingDecision {
    /// `"{episode_id}:{seq}"`, assigned at recording time
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: TradeAction,
    /// Portfolio weight before the decision
    pub weight_before: f64,
    /// Portfolio weight after the decision
    pub weight_after: f64,
    /// Free-text rationale supplied by the caller
    pub reason: String,
    /// Caller's conviction in [0, 1]
    pub confidence: f64,
    /// Factor names this decision was driven by
    pub factors: Vec<String>,
}

impl TradingDecision {
    /// Net weight change introduced by this decision.
    pub fn weight_change(&self) -> f64 {
        self.weight_after - self.weight_before
    }
}

/// Caller-supplied portion of a decision, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub action: TradeAction,
    pub weight_before: f64,
    pub weight_after: f64,
    pub reason: String,
    pub confidence: f64,
    pub factors: Vec<String>,
}

/// Factor exposure record from the external factor-calculation engine.
///
/// Attached to episode metrics; this engine consumes it as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorExposure {
    pub factor: String,
    pub exposure: f64,
    pub t_stat: f64,
    pub confidence: f64,
    /// Signed return contribution attributed to this factor
    pub contribution: f64,
}

/// Opaque result from the external portfolio optimizer, stored for reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: BTreeMap<String, f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Categorical market-state classification held in belief state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Bull,
    Bear,
    Volatile,
    Sideways,
}

impl MarketRegime {
    /// Risk scaling applied to optimizer constraints per regime.
    pub fn risk_multiplier(&self) -> f64 {
        match self {
            MarketRegime::Bull => 1.1,
            MarketRegime::Bear => 0.8,
            MarketRegime::Volatile => 0.7,
            MarketRegime::Sideways => 1.0,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "bull"),
            MarketRegime::Bear => write!(f, "bear"),
            MarketRegime::Volatile => write!(f, "volatile"),
            MarketRegime::Sideways => write!(f, "sideways"),
        }
    }
}

/// Regime detection output from the external ML engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePrediction {
    pub regime: MarketRegime,
    pub confidence: f64,
}

/// Factor momentum signal from the external ML engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorMomentum {
    pub factor: String,
    /// Signed momentum in [−1, 1]
    pub momentum: f64,
    pub confidence: f64,
}

/// Factor attribution signal from the external ML engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorAttribution {
    pub factor: String,
    /// Signed attribution score
    pub attribution: f64,
}

/// Optional ML signal bundle supplied by the caller before a cycle runs.
///
/// Each prediction kind is an explicit optional sub-record. The engine
/// never fetches these itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MlPredictions {
    pub regime: Option<RegimePrediction>,
    pub factor_momentum: Option<Vec<FactorMomentum>>,
    pub factor_attribution: Option<Vec<FactorAttribution>>,
}

/// A current portfolio position, supplied to the within-episode risk governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Portfolio weight as a fraction
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_action_opposes() {
        assert!(TradeAction::Buy.opposes(TradeAction::Sell));
        assert!(TradeAction::Sell.opposes(TradeAction::Buy));
        assert!(!TradeAction::Buy.opposes(TradeAction::Buy));
        assert!(!TradeAction::Hold.opposes(TradeAction::Buy));
        assert!(!TradeAction::Sell.opposes(TradeAction::Hold));
    }

    #[test]
    fn test_trade_action_directional() {
        assert!(TradeAction::Buy.is_directional());
        assert!(TradeAction::Sell.is_directional());
        assert!(!TradeAction::Hold.is_directional());
    }

    #[test]
    fn test_regime_risk_multipliers() {
        assert_eq!(MarketRegime::Bull.risk_multiplier(), 1.1);
        assert_eq!(MarketRegime::Bear.risk_multiplier(), 0.8);
        assert_eq!(MarketRegime::Volatile.risk_multiplier(), 0.7);
        assert_eq!(MarketRegime::Sideways.risk_multiplier(), 1.0);
    }

    #[test]
    fn test_action_serde_snake_case() {
        let json = serde_json::to_string(&TradeAction::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let back: TradeAction = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(back, TradeAction::Sell);
    }

    #[test]
    fn test_regime_display() {
        assert_eq!(format!("{}", MarketRegime::Volatile), "volatile");
        assert_eq!(format!("{}", MarketRegime::Sideways), "sideways");
    }
}
