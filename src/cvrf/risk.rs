//! Within-episode risk governor based on Conditional Value at Risk.
//!
//! Runs in real time against the live return series, independent of the
//! over-episode learning loop. When tail losses breach the belief state's
//! drawdown threshold, the governor escalates through rebalance → hedge →
//! reduce-exposure tiers by severity.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::warn;

use super::belief::BeliefState;
use super::config::CvrfConfig;
use super::types::Position;

/// Fixed hedge instrument set used by the hedge tier.
pub const HEDGE_INSTRUMENTS: [&str; 3] = ["SH", "SDS", "VIXY"];

/// Severity above which exposure is reduced outright.
const REDUCE_SEVERITY: f64 = 1.5;
/// Severity above which hedges are added.
const HEDGE_SEVERITY: f64 = 1.2;

/// Kind of risk adjustment recommended by the governor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAdjustmentType {
    None,
    Rebalance,
    Hedge,
    ReduceExposure,
}

impl std::fmt::Display for RiskAdjustmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskAdjustmentType::None => write!(f, "none"),
            RiskAdjustmentType::Rebalance => write!(f, "rebalance"),
            RiskAdjustmentType::Hedge => write!(f, "hedge"),
            RiskAdjustmentType::ReduceExposure => write!(f, "reduce_exposure"),
        }
    }
}

/// A recommended adjustment: what to do, how much, and to which instruments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustment {
    #[serde(rename = "type")]
    pub kind: RiskAdjustmentType,
    /// Fraction of the portfolio the adjustment should move
    pub magnitude: f64,
    /// Symbols or hedge instruments the adjustment targets
    pub targets: Vec<String>,
}

impl RiskAdjustment {
    /// The no-op adjustment.
    pub fn none() -> Self {
        Self {
            kind: RiskAdjustmentType::None,
            magnitude: 0.0,
            targets: Vec::new(),
        }
    }
}

/// Result of a within-episode risk check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithinEpisodeRiskControl {
    pub current_cvar: f64,
    /// The belief state's drawdown threshold at check time
    pub threshold: f64,
    pub triggered: bool,
    pub adjustment: RiskAdjustment,
}

/// Conditional Value at Risk: mean of the worst-case tail.
///
/// Sorts returns ascending, takes the first `max(1, floor(n·(1−cl)))`
/// elements as the tail, and averages them. An empty series yields 0.
pub fn conditional_value_at_risk(returns: &[f64], confidence_level: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let var_index = (sorted.len() as f64 * (1.0 - confidence_level)).floor() as usize;
    let tail_len = var_index.max(1).min(sorted.len());
    let tail = &sorted[..tail_len];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Evaluate the within-episode risk governor.
///
/// Severity boundaries are strict: exactly 1.5 falls to the hedge tier and
/// exactly 1.2 falls to the rebalance tier.
pub(crate) fn evaluate_within_episode_risk(
    beliefs: &BeliefState,
    config: &CvrfConfig,
    portfolio_value: f64,
    portfolio_returns: &[f64],
    positions: &[Position],
) -> WithinEpisodeRiskControl {
    let threshold = beliefs.max_drawdown_threshold;
    if !config.enable_cvar_control {
        return WithinEpisodeRiskControl {
            current_cvar: 0.0,
            threshold,
            triggered: false,
            adjustment: RiskAdjustment::none(),
        };
    }

    let cvar = conditional_value_at_risk(portfolio_returns, config.cvar_confidence_level);
    let triggered = cvar.abs() > threshold;
    if !triggered {
        return WithinEpisodeRiskControl {
            current_cvar: cvar,
            threshold,
            triggered: false,
            adjustment: RiskAdjustment::none(),
        };
    }

    let severity = cvar.abs() / threshold;
    let adjustment = if severity > REDUCE_SEVERITY {
        RiskAdjustment {
            kind: RiskAdjustmentType::ReduceExposure,
            magnitude: ((severity - 1.0) * 0.2).min(0.3),
            targets: top_positions_by_weight(positions, 3),
        }
    } else if severity > HEDGE_SEVERITY {
        RiskAdjustment {
            kind: RiskAdjustmentType::Hedge,
            magnitude: ((severity - 1.0) * 0.15).min(0.2),
            targets: HEDGE_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
        }
    } else {
        RiskAdjustment {
            kind: RiskAdjustmentType::Rebalance,
            magnitude: ((severity - 1.0) * 0.1).min(0.1),
            targets: positions
                .iter()
                .filter(|p| p.weight > beliefs.concentration_limit)
                .map(|p| p.symbol.clone())
                .collect(),
        }
    };

    warn!(
        cvar,
        threshold,
        severity,
        portfolio_value,
        action = %adjustment.kind,
        magnitude = adjustment.magnitude,
        "within-episode risk triggered"
    );

    WithinEpisodeRiskControl {
        current_cvar: cvar,
        threshold,
        triggered: true,
        adjustment,
    }
}

/// The `n` largest positions by weight; ties fall to symbol order.
fn top_positions_by_weight(positions: &[Position], n: usize) -> Vec<String> {
    let mut by_weight: Vec<&Position> = positions.iter().collect();
    by_weight.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    by_weight.into_iter().take(n).map(|p| p.symbol.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(symbol: &str, weight: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            weight,
        }
    }

    fn beliefs_with_threshold(threshold: f64) -> BeliefState {
        BeliefState {
            max_drawdown_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_cvar_worked_example() {
        // varIndex = floor(5·0.05) = 0, tail = [-0.05]
        let returns = [-0.05, -0.02, 0.01, 0.03, 0.04];
        let cvar = conditional_value_at_risk(&returns, 0.95);
        assert!((cvar - (-0.05)).abs() < 1e-10);
    }

    #[test]
    fn test_cvar_empty_returns_zero() {
        assert_eq!(conditional_value_at_risk(&[], 0.95), 0.0);
    }

    #[test]
    fn test_cvar_averages_tail() {
        // n = 40, varIndex = floor(40·0.1) = 4: mean of the 4 worst
        let mut returns = vec![0.01; 36];
        returns.extend([-0.10, -0.08, -0.06, -0.04]);
        let cvar = conditional_value_at_risk(&returns, 0.90);
        assert!((cvar - (-0.07)).abs() < 1e-10);
    }

    #[test]
    fn test_untriggered_below_threshold() {
        let beliefs = beliefs_with_threshold(0.15);
        let config = CvrfConfig::default();
        let returns = [-0.01, 0.005, 0.01, -0.002, 0.02];

        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &[]);
        assert!(!control.triggered);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::None);
        assert_eq!(control.adjustment.magnitude, 0.0);
        assert!(control.adjustment.targets.is_empty());
        assert!((control.threshold - 0.15).abs() < 1e-10);
    }

    #[test]
    fn test_disabled_control_never_triggers() {
        let beliefs = beliefs_with_threshold(0.01);
        let config = CvrfConfig {
            enable_cvar_control: false,
            ..Default::default()
        };
        let returns = [-0.5, -0.4, -0.3];

        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &[]);
        assert!(!control.triggered);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::None);
    }

    #[test]
    fn test_rebalance_tier_targets_concentrated_positions() {
        // CVaR = -0.11, threshold 0.10: severity 1.1
        let beliefs = beliefs_with_threshold(0.10);
        let config = CvrfConfig::default();
        let returns: Vec<f64> = std::iter::once(-0.11)
            .chain(std::iter::repeat(0.01).take(19))
            .collect();
        let positions = [
            position("AAPL", 0.30),
            position("MSFT", 0.20),
            position("NVDA", 0.28),
        ];

        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &positions);
        assert!(control.triggered);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::Rebalance);
        // magnitude = min(0.1, 0.1·0.1) = 0.01
        assert!((control.adjustment.magnitude - 0.01).abs() < 1e-10);
        // Only positions above the 0.25 concentration limit
        assert_eq!(control.adjustment.targets, vec!["AAPL", "NVDA"]);
    }

    #[test]
    fn test_hedge_tier_uses_fixed_instruments() {
        // CVaR = -0.13, threshold 0.10: severity 1.3
        let beliefs = beliefs_with_threshold(0.10);
        let config = CvrfConfig::default();
        let returns: Vec<f64> = std::iter::once(-0.13)
            .chain(std::iter::repeat(0.01).take(19))
            .collect();

        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &[]);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::Hedge);
        // magnitude = min(0.2, 0.3·0.15) = 0.045
        assert!((control.adjustment.magnitude - 0.045).abs() < 1e-10);
        assert_eq!(control.adjustment.targets, vec!["SH", "SDS", "VIXY"]);
    }

    #[test]
    fn test_reduce_tier_targets_top_positions() {
        // CVaR = -0.20, threshold 0.10: severity 2.0
        let beliefs = beliefs_with_threshold(0.10);
        let config = CvrfConfig::default();
        let returns: Vec<f64> = std::iter::once(-0.20)
            .chain(std::iter::repeat(0.01).take(19))
            .collect();
        let positions = [
            position("AAPL", 0.15),
            position("MSFT", 0.25),
            position("NVDA", 0.20),
            position("TSLA", 0.10),
        ];

        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &positions);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::ReduceExposure);
        // magnitude = min(0.3, 1.0·0.2) = 0.2
        assert!((control.adjustment.magnitude - 0.2).abs() < 1e-10);
        assert_eq!(control.adjustment.targets, vec!["MSFT", "NVDA", "AAPL"]);
    }

    #[test]
    fn test_severity_boundaries_are_strict() {
        // severity exactly 1.5 stays in the hedge tier
        let beliefs = beliefs_with_threshold(0.10);
        let config = CvrfConfig::default();
        let returns: Vec<f64> = std::iter::once(-0.15)
            .chain(std::iter::repeat(0.01).take(19))
            .collect();
        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &[]);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::Hedge);

        // severity exactly 1.2 stays in the rebalance tier
        let returns: Vec<f64> = std::iter::once(-0.12)
            .chain(std::iter::repeat(0.01).take(19))
            .collect();
        let control =
            evaluate_within_episode_risk(&beliefs, &config, 100_000.0, &returns, &[]);
        assert_eq!(control.adjustment.kind, RiskAdjustmentType::Rebalance);
    }

    #[test]
    fn test_adjustment_serde_uses_type_key() {
        let adjustment = RiskAdjustment {
            kind: RiskAdjustmentType::ReduceExposure,
            magnitude: 0.2,
            targets: vec!["AAPL".to_string()],
        };
        let json = serde_json::to_string(&adjustment).unwrap();
        assert!(json.contains("\"type\":\"reduce_exposure\""));
    }
}
