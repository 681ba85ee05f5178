//! Longitudinal performance metrics over cycle history.
//!
//! All derived, read-only views. With fewer than two cycles the metrics
//! collapse to a trivial baseline.

use serde::{Deserialize, Serialize};

use super::extractor::ImpactDirection;
use super::manager::CvrfCycleResult;

/// How many cycles insight-quality scoring needs before it reports
/// anything other than its 0.5 default.
const INSIGHT_QUALITY_MIN_CYCLES: usize = 3;

/// Derived read-only metrics over the engine's cycle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvrfPerformanceMetrics {
    pub total_cycles: usize,
    /// Mean of (1 − τ) over all cycles
    pub average_learning_rate: f64,
    /// Belief stability in [0, 1]; 1 means beliefs barely move
    pub belief_stability: f64,
    /// Fraction of insights whose direction agreed with the following
    /// cycle's performance-delta sign
    pub insight_quality: f64,
    /// Scales with mean belief updates per cycle; saturates at 1
    pub overfit_risk: f64,
    /// Scales with regime-change frequency across cycles; saturates at 1
    pub adaptation_speed: f64,
}

impl CvrfPerformanceMetrics {
    fn baseline(total_cycles: usize) -> Self {
        Self {
            total_cycles,
            average_learning_rate: 0.0,
            belief_stability: 1.0,
            insight_quality: 0.0,
            overfit_risk: 0.0,
            adaptation_speed: 0.0,
        }
    }
}

/// Compute performance metrics from cycle history and the updater's
/// stability score.
pub(crate) fn compute_performance_metrics(
    cycles: &[CvrfCycleResult],
    belief_stability: f64,
) -> CvrfPerformanceMetrics {
    let total = cycles.len();
    if total < 2 {
        return CvrfPerformanceMetrics::baseline(total);
    }

    let average_learning_rate = cycles
        .iter()
        .map(|c| 1.0 - c.episode_comparison.decision_overlap)
        .sum::<f64>()
        / total as f64;

    let insight_quality = if total < INSIGHT_QUALITY_MIN_CYCLES {
        0.5
    } else {
        insight_quality(cycles)
    };

    let mean_updates_per_cycle = cycles
        .iter()
        .map(|c| c.belief_updates.len() as f64)
        .sum::<f64>()
        / total as f64;
    let overfit_risk = (mean_updates_per_cycle / 10.0).min(1.0);

    let regime_changes = cycles
        .windows(2)
        .filter(|pair| {
            pair[1].new_belief_state.current_regime != pair[0].new_belief_state.current_regime
        })
        .count();
    let adaptation_speed = (regime_changes as f64 / total as f64 * 5.0).min(1.0);

    CvrfPerformanceMetrics {
        total_cycles: total,
        average_learning_rate,
        belief_stability,
        insight_quality,
        overfit_risk,
        adaptation_speed,
    }
}

/// Fraction of (insight, next-cycle delta-sign) pairs that agree.
fn insight_quality(cycles: &[CvrfCycleResult]) -> f64 {
    let mut pairs = 0usize;
    let mut agreements = 0usize;

    for window in cycles.windows(2) {
        let next_delta = window[1].episode_comparison.performance_delta;
        for insight in &window[0].extracted_insights {
            pairs += 1;
            let agrees = match insight.impact_direction {
                ImpactDirection::Positive => next_delta > 0.0,
                ImpactDirection::Negative => next_delta < 0.0,
                ImpactDirection::Neutral => next_delta == 0.0,
            };
            if agrees {
                agreements += 1;
            }
        }
    }

    if pairs == 0 {
        0.5
    } else {
        agreements as f64 / pairs as f64
    }
}
