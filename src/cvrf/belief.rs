//! Belief state and its revision rule.
//!
//! The belief state steers the downstream portfolio optimizer: factor
//! weights and confidences, the current market regime, and risk thresholds.
//! Revisions follow a textual-gradient-descent rule: the step size is
//! `base_learning_rate × (1 − τ)`, so episodes that repeated the same
//! decisions (high overlap τ) barely move beliefs, while divergent episodes
//! drive larger updates.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use crate::errors::StateImportError;

use super::comparison::EpisodeComparison;
use super::config::CvrfConfig;
use super::extractor::{ConceptualInsight, MetaPrompt};
use super::snapshot::BeliefSnapshot;
use super::types::{MarketRegime, MlPredictions};

/// Bounds for the drawdown threshold belief.
const DRAWDOWN_THRESHOLD_BOUNDS: (f64, f64) = (0.05, 0.5);
/// Bounds for the volatility target belief.
const VOLATILITY_TARGET_BOUNDS: (f64, f64) = (0.05, 0.5);
/// Bounds for the risk tolerance belief.
const RISK_TOLERANCE_BOUNDS: (f64, f64) = (0.1, 0.9);
/// Bounds for the concentration limit belief.
const CONCENTRATION_LIMIT_BOUNDS: (f64, f64) = (0.05, 0.5);

/// Numeric changes below this are not reported as updates.
const UPDATE_EPSILON: f64 = 1e-12;

/// The engine's current parameters steering portfolio construction.
///
/// Singly-owned by [`BeliefUpdater`] and mutated only through
/// [`BeliefUpdater::update_beliefs`]; effectively versioned via cycle history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    /// Normalized factor weights (sum to 1 when non-empty)
    pub factor_weights: BTreeMap<String, f64>,
    /// Per-factor confidence in [0, 1]
    pub factor_confidences: BTreeMap<String, f64>,
    pub current_regime: MarketRegime,
    pub regime_confidence: f64,
    /// Within-episode CVaR trigger threshold, a fraction in [0.05, 0.5]
    pub max_drawdown_threshold: f64,
    /// Maximum single-position weight
    pub concentration_limit: f64,
    /// Minimum position weight worth holding
    pub min_position_size: f64,
    /// Annualized volatility target as a fraction
    pub volatility_target: f64,
    /// Overall risk appetite in [0.1, 0.9]
    pub risk_tolerance: f64,
}

impl Default for BeliefState {
    fn default() -> Self {
        Self {
            factor_weights: BTreeMap::new(),
            factor_confidences: BTreeMap::new(),
            current_regime: MarketRegime::Sideways,
            regime_confidence: 0.5,
            max_drawdown_threshold: 0.15,
            concentration_limit: 0.25,
            min_position_size: 0.01,
            volatility_target: 0.15,
            risk_tolerance: 0.5,
        }
    }
}

impl BeliefState {
    /// Validate documented bounds; used on snapshot import.
    pub(crate) fn validate(&self) -> Result<(), String> {
        for (name, value, (lo, hi)) in [
            (
                "max_drawdown_threshold",
                self.max_drawdown_threshold,
                DRAWDOWN_THRESHOLD_BOUNDS,
            ),
            (
                "concentration_limit",
                self.concentration_limit,
                CONCENTRATION_LIMIT_BOUNDS,
            ),
            (
                "volatility_target",
                self.volatility_target,
                VOLATILITY_TARGET_BOUNDS,
            ),
            ("risk_tolerance", self.risk_tolerance, RISK_TOLERANCE_BOUNDS),
        ] {
            if !value.is_finite() || value < lo || value > hi {
                return Err(format!("{name} {value} outside [{lo}, {hi}]"));
            }
        }
        if !self.min_position_size.is_finite()
            || !(0.0..=1.0).contains(&self.min_position_size)
        {
            return Err(format!(
                "min_position_size {} outside [0, 1]",
                self.min_position_size
            ));
        }
        if !self.regime_confidence.is_finite()
            || !(0.0..=1.0).contains(&self.regime_confidence)
        {
            return Err(format!(
                "regime_confidence {} outside [0, 1]",
                self.regime_confidence
            ));
        }
        for (factor, weight) in &self.factor_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(format!("factor weight {factor} = {weight} invalid"));
            }
        }
        for (factor, confidence) in &self.factor_confidences {
            if !confidence.is_finite() || !(0.0..=1.0).contains(confidence) {
                return Err(format!("factor confidence {factor} = {confidence} invalid"));
            }
        }
        Ok(())
    }
}

/// A value before/after a belief revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeliefValue {
    Number(f64),
    Regime(MarketRegime),
}

impl BeliefValue {
    /// The numeric payload, if this value is numeric.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            BeliefValue::Number(n) => Some(*n),
            BeliefValue::Regime(_) => None,
        }
    }
}

impl std::fmt::Display for BeliefValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeliefValue::Number(n) => write!(f, "{n:.4}"),
            BeliefValue::Regime(r) => write!(f, "{r}"),
        }
    }
}

/// One reported field change from a belief revision.
///
/// Per-factor entries use dotted field names, e.g. `factor_weights.momentum`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefUpdate {
    pub field: String,
    pub old_value: BeliefValue,
    pub new_value: BeliefValue,
}

/// Result of a belief revision: the new state plus every changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefRevision {
    pub new_beliefs: BeliefState,
    /// Every changed field exactly once; unchanged fields are omitted
    pub updates: Vec<BeliefUpdate>,
}

/// Owns the current belief state and applies comparison-driven revisions.
#[derive(Debug, Clone)]
pub struct BeliefUpdater {
    config: CvrfConfig,
    beliefs: BeliefState,
    /// Mean absolute numeric delta per revision, most recent last,
    /// capped at `config.stability_window`
    update_magnitudes: VecDeque<f64>,
}

impl BeliefUpdater {
    pub fn new(config: CvrfConfig) -> Self {
        Self {
            config,
            beliefs: BeliefState::default(),
            update_magnitudes: VecDeque::new(),
        }
    }

    /// Apply a belief revision derived from a cycle's comparison, insights,
    /// and meta-prompt. Returns the new state and the reported field changes.
    pub fn update_beliefs(
        &mut self,
        comparison: &EpisodeComparison,
        insights: &[ConceptualInsight],
        meta_prompt: &MetaPrompt,
        ml: Option<&MlPredictions>,
    ) -> BeliefRevision {
        let (new_beliefs, updates) =
            apply_belief_deltas(&self.beliefs, &self.config, comparison, insights, meta_prompt, ml);

        let numeric_deltas: Vec<f64> = updates
            .iter()
            .filter_map(|u| Some((u.new_value.as_number()? - u.old_value.as_number()?).abs()))
            .collect();
        let magnitude = if numeric_deltas.is_empty() {
            0.0
        } else {
            numeric_deltas.iter().sum::<f64>() / numeric_deltas.len() as f64
        };
        if self.update_magnitudes.len() >= self.config.stability_window {
            self.update_magnitudes.pop_front();
        }
        self.update_magnitudes.push_back(magnitude);

        debug!(
            changes = updates.len(),
            magnitude, regime = %new_beliefs.current_regime,
            "beliefs revised"
        );
        self.beliefs = new_beliefs.clone();
        BeliefRevision {
            new_beliefs,
            updates,
        }
    }

    pub fn current_beliefs(&self) -> &BeliefState {
        &self.beliefs
    }

    /// Stability score in [0, 1]; 1 means beliefs barely move between cycles.
    ///
    /// Computed as `1 / (1 + 10·m)` where `m` is the mean per-cycle update
    /// magnitude over the stability window. With no revision history the
    /// score is 1.
    pub fn belief_stability(&self) -> f64 {
        if self.update_magnitudes.is_empty() {
            return 1.0;
        }
        let mean =
            self.update_magnitudes.iter().sum::<f64>() / self.update_magnitudes.len() as f64;
        1.0 / (1.0 + 10.0 * mean)
    }

    pub fn export(&self) -> BeliefSnapshot {
        BeliefSnapshot {
            beliefs: self.beliefs.clone(),
            update_magnitudes: self.update_magnitudes.iter().copied().collect(),
        }
    }

    /// Restore from a snapshot; validates bounds before touching live state.
    pub fn import(&mut self, snapshot: BeliefSnapshot) -> Result<(), StateImportError> {
        snapshot.validate()?;
        self.beliefs = snapshot.beliefs;
        self.update_magnitudes = snapshot.update_magnitudes.into_iter().collect();
        while self.update_magnitudes.len() > self.config.stability_window {
            self.update_magnitudes.pop_front();
        }
        Ok(())
    }
}

/// The concrete belief-revision rule, as a pure function.
///
/// Step size η = `base_learning_rate × (1 − τ)`:
/// - factor weights move by η toward (weight + meta-prompt adjustment),
///   floored at zero, then renormalized to sum 1;
/// - factor confidences move by η toward the supporting insight's confidence
///   (absent factors start at 0.5);
/// - the drawdown threshold moves by η/2 toward the worse episode's observed
///   drawdown within its bounds;
/// - risk tolerance is nudged by η·0.1 along the sign of the better
///   episode's return;
/// - the volatility target moves by η toward a per-regime anchor;
/// - in a volatile regime the concentration limit tightens by η/2 toward 0.15;
/// - the regime is re-derived from comparison evidence, unless an ML regime
///   prediction with higher confidence than the current belief is supplied.
///
/// Every changed field is reported exactly once; all outputs are clamped to
/// their documented bounds.
pub(crate) fn apply_belief_deltas(
    current: &BeliefState,
    config: &CvrfConfig,
    comparison: &EpisodeComparison,
    insights: &[ConceptualInsight],
    meta_prompt: &MetaPrompt,
    ml: Option<&MlPredictions>,
) -> (BeliefState, Vec<BeliefUpdate>) {
    let tau = comparison.decision_overlap;
    let eta = (config.base_learning_rate * (1.0 - tau)).clamp(0.0, 1.0);

    let mut next = current.clone();

    // Factor weights: move toward (weight + adjustment), then renormalize
    for (factor, adjustment) in &meta_prompt.factor_adjustments {
        let weight = next.factor_weights.entry(factor.clone()).or_insert(0.0);
        let target = (*weight + adjustment).max(0.0);
        *weight += eta * (target - *weight);
    }
    let total: f64 = next.factor_weights.values().sum();
    if total > 0.0 {
        for weight in next.factor_weights.values_mut() {
            *weight /= total;
        }
    } else if !next.factor_weights.is_empty() {
        let uniform = 1.0 / next.factor_weights.len() as f64;
        for weight in next.factor_weights.values_mut() {
            *weight = uniform;
        }
    }

    // Factor confidences: move toward the supporting insight's confidence
    for insight in insights {
        let Some(factor) = &insight.related_factor else {
            continue;
        };
        let confidence = next
            .factor_confidences
            .entry(factor.clone())
            .or_insert(0.5);
        *confidence = (*confidence + eta * (insight.confidence - *confidence)).clamp(0.0, 1.0);
    }

    // Regime: ML prediction wins when it is more confident than the belief
    let (target_regime, target_confidence) = match ml.and_then(|ml| ml.regime.as_ref()) {
        Some(prediction) if prediction.confidence > current.regime_confidence => {
            (prediction.regime, prediction.confidence.clamp(0.0, 1.0))
        }
        _ => derive_regime(comparison, current),
    };
    if target_regime != next.current_regime {
        next.current_regime = target_regime;
        next.regime_confidence = target_confidence;
    } else {
        // Same regime observed again: reinforce
        next.regime_confidence =
            (next.regime_confidence + eta * (1.0 - next.regime_confidence) * 0.5).clamp(0.0, 1.0);
    }

    // Drawdown threshold tracks observed worse-episode drawdown
    let observed = comparison
        .worse_episode
        .max_drawdown
        .clamp(DRAWDOWN_THRESHOLD_BOUNDS.0, DRAWDOWN_THRESHOLD_BOUNDS.1);
    next.max_drawdown_threshold = (next.max_drawdown_threshold
        + (eta / 2.0) * (observed - next.max_drawdown_threshold))
        .clamp(DRAWDOWN_THRESHOLD_BOUNDS.0, DRAWDOWN_THRESHOLD_BOUNDS.1);

    // Risk tolerance follows the sign of realized performance
    let direction = if comparison.better_episode.portfolio_return > 0.0 {
        1.0
    } else if comparison.better_episode.portfolio_return < 0.0 {
        -1.0
    } else {
        0.0
    };
    next.risk_tolerance = (next.risk_tolerance + direction * eta * 0.1)
        .clamp(RISK_TOLERANCE_BOUNDS.0, RISK_TOLERANCE_BOUNDS.1);

    // Volatility target pulls toward the regime anchor
    let anchor = match next.current_regime {
        MarketRegime::Bull => 0.18,
        MarketRegime::Sideways => 0.15,
        MarketRegime::Bear => 0.10,
        MarketRegime::Volatile => 0.08,
    };
    next.volatility_target = (next.volatility_target + eta * (anchor - next.volatility_target))
        .clamp(VOLATILITY_TARGET_BOUNDS.0, VOLATILITY_TARGET_BOUNDS.1);

    // Volatile regimes tighten concentration
    if next.current_regime == MarketRegime::Volatile {
        next.concentration_limit = (next.concentration_limit
            + (eta / 2.0) * (0.15 - next.concentration_limit))
            .clamp(CONCENTRATION_LIMIT_BOUNDS.0, CONCENTRATION_LIMIT_BOUNDS.1);
    }

    let updates = diff_beliefs(current, &next);
    (next, updates)
}

/// Heuristic regime derivation from comparison evidence.
fn derive_regime(comparison: &EpisodeComparison, beliefs: &BeliefState) -> (MarketRegime, f64) {
    let better = &comparison.better_episode;
    let worse = &comparison.worse_episode;

    let regime = if better.max_drawdown > beliefs.max_drawdown_threshold
        || worse.max_drawdown > beliefs.max_drawdown_threshold
    {
        MarketRegime::Volatile
    } else if better.portfolio_return > 0.02 {
        MarketRegime::Bull
    } else if better.portfolio_return < -0.02 {
        MarketRegime::Bear
    } else {
        MarketRegime::Sideways
    };

    // Evidence-derived confidence: stronger deltas read as clearer regimes
    let confidence = (0.5 + comparison.performance_delta / 4.0).clamp(0.5, 0.9);
    (regime, confidence)
}

/// Report every changed field exactly once.
fn diff_beliefs(old: &BeliefState, new: &BeliefState) -> Vec<BeliefUpdate> {
    let mut updates = Vec::new();

    let mut push_number = |field: String, before: f64, after: f64| {
        if (after - before).abs() > UPDATE_EPSILON {
            updates.push(BeliefUpdate {
                field,
                old_value: BeliefValue::Number(before),
                new_value: BeliefValue::Number(after),
            });
        }
    };

    for (factor, after) in &new.factor_weights {
        let before = old.factor_weights.get(factor).copied().unwrap_or(0.0);
        push_number(format!("factor_weights.{factor}"), before, *after);
    }
    for (factor, after) in &new.factor_confidences {
        let before = old.factor_confidences.get(factor).copied().unwrap_or(0.5);
        push_number(format!("factor_confidences.{factor}"), before, *after);
    }
    push_number(
        "regime_confidence".to_string(),
        old.regime_confidence,
        new.regime_confidence,
    );
    push_number(
        "max_drawdown_threshold".to_string(),
        old.max_drawdown_threshold,
        new.max_drawdown_threshold,
    );
    push_number(
        "concentration_limit".to_string(),
        old.concentration_limit,
        new.concentration_limit,
    );
    push_number(
        "min_position_size".to_string(),
        old.min_position_size,
        new.min_position_size,
    );
    push_number(
        "volatility_target".to_string(),
        old.volatility_target,
        new.volatility_target,
    );
    push_number(
        "risk_tolerance".to_string(),
        old.risk_tolerance,
        new.risk_tolerance,
    );

    if old.current_regime != new.current_regime {
        updates.push(BeliefUpdate {
            field: "current_regime".to_string(),
            old_value: BeliefValue::Regime(old.current_regime),
            new_value: BeliefValue::Regime(new.current_regime),
        });
    }
    updates
}
