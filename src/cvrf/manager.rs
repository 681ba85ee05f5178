//! CVRF orchestration.
//!
//! Coordinates episode lifecycle, concept extraction, belief revision, and
//! the dual-level risk surface: the within-episode CVaR governor runs in
//! real time, while over-episode belief adjustments accumulate one cycle at
//! a time. Hosts construct and own a [`CvrfManager`]; there is no ambient
//! shared instance.
//!
//! All operations are synchronous and must not be invoked concurrently:
//! mutating calls read-modify-write the open episode, the belief state, and
//! the cycle history. A host embedding a long-lived manager serializes
//! access (a mutex, an actor, or a request queue).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::errors::{StateImportError, ValidationError};

use super::belief::{BeliefState, BeliefUpdate, BeliefUpdater};
use super::comparison::EpisodeComparison;
use super::config::CvrfConfig;
use super::episode::{Episode, EpisodeManager, EpisodeMetricsUpdate};
use super::extractor::{ConceptExtractor, ConceptualInsight, MetaPrompt};
use super::metrics::{compute_performance_metrics, CvrfPerformanceMetrics};
use super::risk::{evaluate_within_episode_risk, WithinEpisodeRiskControl};
use super::snapshot::{CvrfSnapshot, SnapshotMetadata, SNAPSHOT_VERSION};
use super::types::{DecisionInput, MarketRegime, MlPredictions, Position, TradingDecision};

/// Result of one full learning cycle. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvrfCycleResult {
    /// `"cycle_{n}"` from the manager's counter
    pub cycle_id: String,
    /// Derived from the compared episodes' end dates
    pub timestamp: DateTime<Utc>,
    pub episode_comparison: EpisodeComparison,
    pub extracted_insights: Vec<ConceptualInsight>,
    pub meta_prompt: MetaPrompt,
    pub belief_updates: Vec<BeliefUpdate>,
    pub new_belief_state: BeliefState,
    /// Human-readable cycle summary for reporting layers
    pub explanation: String,
    pub ml_predictions: Option<MlPredictions>,
}

/// Over-episode belief adjustment derived from the most recent cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverEpisodeBeliefAdjustment {
    pub conceptual_insights: Vec<ConceptualInsight>,
    /// `None` when no cycle has run yet
    pub meta_prompt: Option<MetaPrompt>,
    /// The latest cycle's decision overlap τ; 0.5 when no cycle has run
    pub learning_rate: f64,
    /// Numeric belief deltas (`new − old`) from the latest cycle
    pub belief_deltas: BTreeMap<String, f64>,
}

impl OverEpisodeBeliefAdjustment {
    fn neutral() -> Self {
        Self {
            conceptual_insights: Vec::new(),
            meta_prompt: None,
            learning_rate: 0.5,
            belief_deltas: BTreeMap::new(),
        }
    }
}

/// Per-factor target band handed to the portfolio optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorTarget {
    pub target: f64,
    pub tolerance: f64,
}

/// Constraint set derived from current beliefs for the portfolio optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConstraints {
    pub factor_targets: BTreeMap<String, FactorTarget>,
    /// Equals the belief state's concentration limit
    pub max_weight: f64,
    /// Equals the belief state's minimum position size
    pub min_weight: f64,
    /// Volatility target scaled by the regime risk multiplier
    pub volatility_target: f64,
    /// Risk tolerance scaled by the regime risk multiplier
    pub risk_budget: f64,
}

/// Compact state summary for reporting layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvrfSummary {
    pub archived_episodes: usize,
    pub open_episode: bool,
    pub total_cycles: usize,
    pub current_regime: MarketRegime,
    pub regime_confidence: f64,
    pub belief_stability: f64,
}

impl std::fmt::Display for CvrfSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CVRF: {} episodes archived ({}), {} cycles, regime {} ({:.0}%), stability {:.2}",
            self.archived_episodes,
            if self.open_episode { "one open" } else { "none open" },
            self.total_cycles,
            self.current_regime,
            self.regime_confidence * 100.0,
            self.belief_stability
        )
    }
}

/// Orchestrates the episodic learning loop and the risk surface.
#[derive(Debug, Clone)]
pub struct CvrfManager {
    config: CvrfConfig,
    episodes: EpisodeManager,
    extractor: ConceptExtractor,
    beliefs: BeliefUpdater,
    /// Cycle results, oldest first, bounded by `config.max_cycle_history`
    cycles: Vec<CvrfCycleResult>,
    cycle_counter: u64,
}

impl CvrfManager {
    /// Construct a manager from a validated config.
    pub fn new(config: CvrfConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            episodes: EpisodeManager::new(config.clone()),
            extractor: ConceptExtractor::new(),
            beliefs: BeliefUpdater::new(config.clone()),
            cycles: Vec::new(),
            cycle_counter: 0,
            config,
        })
    }

    /// Construct with the default config.
    pub fn with_defaults() -> Self {
        Self::new(CvrfConfig::default()).expect("default config is valid")
    }

    pub fn config(&self) -> &CvrfConfig {
        &self.config
    }

    // === Episode lifecycle (delegated) ===

    /// Start a new episode, force-closing any open one without running a cycle.
    pub fn start_episode(&mut self, start_date: DateTime<Utc>) -> &Episode {
        self.episodes.start_episode(start_date)
    }

    /// Record a decision in the open episode, implicitly opening one if needed.
    pub fn record_decision(
        &mut self,
        input: DecisionInput,
    ) -> Result<TradingDecision, ValidationError> {
        self.episodes.record_decision(input)
    }

    /// Overwrite realized metrics on the open episode.
    pub fn update_episode_metrics(
        &mut self,
        update: EpisodeMetricsUpdate,
    ) -> Result<(), ValidationError> {
        self.episodes.update_episode_metrics(update)
    }

    /// Close the open episode; returns it, or `None` if none was open.
    pub fn close_episode(&mut self, end_date: DateTime<Utc>) -> Option<Episode> {
        self.episodes.close_episode(end_date)
    }

    pub fn current_episode(&self) -> Option<&Episode> {
        self.episodes.current_episode()
    }

    pub fn get_recent_episodes(&self, n: usize) -> Vec<&Episode> {
        self.episodes.get_recent_episodes(n)
    }

    pub fn get_episode_history(&self) -> &[Episode] {
        self.episodes.episode_history()
    }

    // === Learning cycle ===

    /// Run one full CVRF cycle: compare → extract → meta-prompt → revise
    /// beliefs → explain.
    ///
    /// Returns `None` (not an error) when fewer than
    /// `min_episodes_for_comparison` episodes are archived or no comparison
    /// can be formed. ML predictions are optional and supplied by the caller;
    /// the engine never fetches them.
    pub fn run_cvrf_cycle(&mut self, ml: Option<&MlPredictions>) -> Option<CvrfCycleResult> {
        if !self.episodes.has_enough_episodes_for_cvrf() {
            debug!(
                archived = self.episodes.archived_count(),
                required = self.config.min_episodes_for_comparison,
                "skipping cycle: not enough episodes"
            );
            return None;
        }
        let comparison = self.episodes.get_latest_comparison()?;

        let insights = self.extractor.extract_insights(&comparison, ml);
        let meta_prompt = self.extractor.generate_meta_prompt(&comparison, &insights, ml);
        let revision = self
            .beliefs
            .update_beliefs(&comparison, &insights, &meta_prompt, ml);

        let explanation = build_explanation(&comparison, &insights, &meta_prompt, &revision.new_beliefs);

        self.cycle_counter += 1;
        let result = CvrfCycleResult {
            cycle_id: format!("cycle_{}", self.cycle_counter),
            timestamp: meta_prompt.generated_at,
            episode_comparison: comparison,
            extracted_insights: insights,
            meta_prompt,
            belief_updates: revision.updates,
            new_belief_state: revision.new_beliefs,
            explanation,
            ml_predictions: ml.cloned(),
        };

        info!(
            cycle = %result.cycle_id,
            delta = result.episode_comparison.performance_delta,
            overlap = result.episode_comparison.decision_overlap,
            updates = result.belief_updates.len(),
            "cycle complete"
        );

        self.cycles.push(result.clone());
        if self.cycles.len() > self.config.max_cycle_history {
            self.cycles.remove(0);
        }
        Some(result)
    }

    pub fn get_cycle_history(&self) -> &[CvrfCycleResult] {
        &self.cycles
    }

    // === Dual-level risk control ===

    /// Real-time CVaR check against the live return series.
    ///
    /// Uses the current belief state's drawdown threshold; the portfolio
    /// value is carried through for logging and reporting only.
    pub fn check_within_episode_risk(
        &self,
        current_portfolio_value: f64,
        portfolio_returns: &[f64],
        positions: &[Position],
    ) -> WithinEpisodeRiskControl {
        evaluate_within_episode_risk(
            self.beliefs.current_beliefs(),
            &self.config,
            current_portfolio_value,
            portfolio_returns,
            positions,
        )
    }

    /// The most recent cycle's insights, meta-prompt, learning rate, and
    /// numeric belief deltas. Neutral when no cycle has run yet.
    pub fn get_over_episode_adjustment(&self) -> OverEpisodeBeliefAdjustment {
        let Some(latest) = self.cycles.last() else {
            return OverEpisodeBeliefAdjustment::neutral();
        };

        let belief_deltas = latest
            .belief_updates
            .iter()
            .filter_map(|update| {
                let old = update.old_value.as_number()?;
                let new = update.new_value.as_number()?;
                Some((update.field.clone(), new - old))
            })
            .collect();

        OverEpisodeBeliefAdjustment {
            conceptual_insights: latest.extracted_insights.clone(),
            meta_prompt: Some(latest.meta_prompt.clone()),
            learning_rate: latest.episode_comparison.decision_overlap,
            belief_deltas,
        }
    }

    // === Optimizer interface ===

    /// Constraint set for the downstream portfolio optimizer, derived from
    /// the current belief state and scaled by the regime risk multiplier.
    pub fn get_optimization_constraints(&self) -> OptimizationConstraints {
        let beliefs = self.beliefs.current_beliefs();
        let multiplier = beliefs.current_regime.risk_multiplier();

        let factor_targets = beliefs
            .factor_weights
            .iter()
            .map(|(factor, weight)| {
                let confidence = beliefs
                    .factor_confidences
                    .get(factor)
                    .copied()
                    .unwrap_or(0.5);
                (
                    factor.clone(),
                    FactorTarget {
                        target: weight * 2.0 - 0.5,
                        tolerance: 0.3 * (1.0 - confidence),
                    },
                )
            })
            .collect();

        OptimizationConstraints {
            factor_targets,
            max_weight: beliefs.concentration_limit,
            min_weight: beliefs.min_position_size,
            volatility_target: beliefs.volatility_target * multiplier,
            risk_budget: beliefs.risk_tolerance * multiplier,
        }
    }

    // === Introspection ===

    pub fn get_current_beliefs(&self) -> &BeliefState {
        self.beliefs.current_beliefs()
    }

    pub fn get_belief_stability(&self) -> f64 {
        self.beliefs.belief_stability()
    }

    /// Longitudinal metrics over cycle history. With fewer than two cycles,
    /// returns a trivial baseline.
    pub fn get_performance_metrics(&self) -> CvrfPerformanceMetrics {
        compute_performance_metrics(&self.cycles, self.beliefs.belief_stability())
    }

    /// Compact state summary for reporting layers.
    pub fn summary(&self) -> CvrfSummary {
        let beliefs = self.beliefs.current_beliefs();
        CvrfSummary {
            archived_episodes: self.episodes.archived_count(),
            open_episode: self.episodes.current_episode().is_some(),
            total_cycles: self.cycles.len(),
            current_regime: beliefs.current_regime,
            regime_confidence: beliefs.regime_confidence,
            belief_stability: self.beliefs.belief_stability(),
        }
    }

    // === Persistence ===

    /// Atomic snapshot of config, beliefs, episodes, cycles, and counters.
    pub fn export_state(&self) -> CvrfSnapshot {
        CvrfSnapshot {
            metadata: SnapshotMetadata {
                version: SNAPSHOT_VERSION,
                episode_count: self.episodes.archived_count(),
                cycle_count: self.cycles.len(),
            },
            config: self.config.clone(),
            beliefs: self.beliefs.export(),
            episodes: self.episodes.export_history(),
            cycles: self.cycles.clone(),
            cycle_counter: self.cycle_counter,
        }
    }

    /// Restore from a snapshot, fully replacing prior in-memory state
    /// including the cycle counter.
    ///
    /// Validation runs against the whole payload first; on any failure the
    /// manager is left exactly as it was.
    pub fn import_state(&mut self, snapshot: CvrfSnapshot) -> Result<(), StateImportError> {
        snapshot.validate()?;

        let mut episodes = EpisodeManager::new(snapshot.config.clone());
        episodes.import_history(snapshot.episodes)?;
        let mut beliefs = BeliefUpdater::new(snapshot.config.clone());
        beliefs.import(snapshot.beliefs)?;

        self.config = snapshot.config;
        self.episodes = episodes;
        self.beliefs = beliefs;
        self.cycles = snapshot.cycles;
        self.cycle_counter = snapshot.cycle_counter;
        info!(
            episodes = self.episodes.archived_count(),
            cycles = self.cycles.len(),
            "state imported"
        );
        Ok(())
    }
}

/// Human-readable cycle summary: performance delta, overlap, top insight,
/// top factor adjustment, new regime, and the optimization direction.
fn build_explanation(
    comparison: &EpisodeComparison,
    insights: &[ConceptualInsight],
    meta_prompt: &MetaPrompt,
    beliefs: &BeliefState,
) -> String {
    let mut parts = vec![format!(
        "Episode {} beat {} by {:.2} Sharpe with decision overlap {:.2}.",
        comparison.better_episode.id,
        comparison.worse_episode.id,
        comparison.performance_delta,
        comparison.decision_overlap
    )];

    if let Some(top) = insights.first() {
        parts.push(format!("Top insight: {}.", top.concept));
    }

    let top_adjustment = meta_prompt
        .factor_adjustments
        .iter()
        .max_by(|(fa, a), (fb, b)| {
            a.abs()
                .partial_cmp(&b.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| fb.cmp(fa))
        });
    if let Some((factor, adjustment)) = top_adjustment {
        parts.push(format!(
            "Largest factor adjustment: {factor} {adjustment:+.2}."
        ));
    }

    parts.push(format!(
        "Regime is now {} ({:.0}% confidence).",
        beliefs.current_regime,
        beliefs.regime_confidence * 100.0
    ));
    parts.push(format!("Direction: {}", meta_prompt.optimization_direction));

    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cvrf::types::{FactorExposure, MarketRegime, TradeAction};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn decision(symbol: &str, action: TradeAction, day: u32) -> DecisionInput {
        DecisionInput {
            timestamp: ts(day),
            symbol: symbol.to_string(),
            action,
            weight_before: 0.0,
            weight_after: 0.1,
            reason: "signal".to_string(),
            confidence: 0.8,
            factors: vec!["momentum".to_string()],
        }
    }

    fn exposure(factor: &str) -> FactorExposure {
        FactorExposure {
            factor: factor.to_string(),
            exposure: 0.7,
            t_stat: 2.2,
            confidence: 0.85,
            contribution: 0.02,
        }
    }

    /// Archive one episode with the given metrics and a couple of decisions.
    /// Symbols vary per episode so consecutive episodes do not fully overlap.
    fn run_episode(manager: &mut CvrfManager, start: u32, end: u32, sharpe: f64, ret: f64) {
        manager.start_episode(ts(start));
        manager.record_decision(decision("AAPL", TradeAction::Buy, start)).unwrap();
        manager
            .record_decision(decision(&format!("SYM{start}"), TradeAction::Sell, start))
            .unwrap();
        manager
            .update_episode_metrics(EpisodeMetricsUpdate {
                portfolio_return: Some(ret),
                sharpe_ratio: Some(sharpe),
                max_drawdown: Some(0.08),
                factor_exposures: Some(vec![exposure("momentum")]),
                ..Default::default()
            })
            .unwrap();
        manager.close_episode(ts(end));
    }

    #[test]
    fn test_cycle_returns_none_with_one_episode() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        assert!(manager.run_cvrf_cycle(None).is_none());
        assert!(manager.get_cycle_history().is_empty());
    }

    #[test]
    fn test_cycle_runs_with_two_episodes() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);

        let result = manager.run_cvrf_cycle(None).expect("cycle should run");
        assert_eq!(result.cycle_id, "cycle_1");
        assert_eq!(result.episode_comparison.better_episode.id, "episode_2");
        assert!(!result.extracted_insights.is_empty());
        assert!(!result.explanation.is_empty());
        assert_eq!(manager.get_cycle_history().len(), 1);
    }

    #[test]
    fn test_explanation_covers_required_elements() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);

        let result = manager.run_cvrf_cycle(None).unwrap();
        assert!(result.explanation.contains("episode_2 beat episode_1"));
        assert!(result.explanation.contains("overlap"));
        assert!(result.explanation.contains("Top insight"));
        assert!(result.explanation.contains("Regime is now"));
        assert!(result.explanation.contains("Direction:"));
    }

    #[test]
    fn test_over_episode_adjustment_neutral_without_cycles() {
        let manager = CvrfManager::with_defaults();
        let adjustment = manager.get_over_episode_adjustment();
        assert!(adjustment.conceptual_insights.is_empty());
        assert!(adjustment.meta_prompt.is_none());
        assert!((adjustment.learning_rate - 0.5).abs() < 1e-10);
        assert!(adjustment.belief_deltas.is_empty());
    }

    #[test]
    fn test_over_episode_adjustment_reflects_latest_cycle() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);
        let result = manager.run_cvrf_cycle(None).unwrap();

        let adjustment = manager.get_over_episode_adjustment();
        assert_eq!(
            adjustment.learning_rate,
            result.episode_comparison.decision_overlap
        );
        assert_eq!(adjustment.conceptual_insights, result.extracted_insights);

        // Deltas match the reported numeric updates
        for update in &result.belief_updates {
            let (Some(old), Some(new)) =
                (update.old_value.as_number(), update.new_value.as_number())
            else {
                continue;
            };
            let delta = adjustment.belief_deltas[&update.field];
            assert!((delta - (new - old)).abs() < 1e-12);
        }
        // Regime changes are not numeric deltas
        assert!(!adjustment.belief_deltas.contains_key("current_regime"));
    }

    #[test]
    fn test_constraints_track_beliefs_and_regime() {
        let mut manager = CvrfManager::with_defaults();
        let beliefs = manager.get_current_beliefs().clone();
        let constraints = manager.get_optimization_constraints();
        assert_eq!(constraints.max_weight, beliefs.concentration_limit);
        assert_eq!(constraints.min_weight, beliefs.min_position_size);
        // Sideways: multiplier 1.0
        assert!((constraints.risk_budget - beliefs.risk_tolerance).abs() < 1e-10);

        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);
        manager.run_cvrf_cycle(None).unwrap();

        let beliefs = manager.get_current_beliefs().clone();
        let constraints = manager.get_optimization_constraints();
        assert_eq!(constraints.max_weight, beliefs.concentration_limit);
        let multiplier = beliefs.current_regime.risk_multiplier();
        assert!(
            (constraints.volatility_target - beliefs.volatility_target * multiplier).abs() < 1e-10
        );
        assert!((constraints.risk_budget - beliefs.risk_tolerance * multiplier).abs() < 1e-10);

        for (factor, target) in &constraints.factor_targets {
            let weight = beliefs.factor_weights[factor];
            let confidence = beliefs.factor_confidences.get(factor).copied().unwrap_or(0.5);
            assert!((target.target - (weight * 2.0 - 0.5)).abs() < 1e-10);
            assert!((target.tolerance - 0.3 * (1.0 - confidence)).abs() < 1e-10);
        }
    }

    #[test]
    fn test_risk_budget_scales_per_regime() {
        for (regime, multiplier) in [
            (MarketRegime::Bull, 1.1),
            (MarketRegime::Bear, 0.8),
            (MarketRegime::Volatile, 0.7),
            (MarketRegime::Sideways, 1.0),
        ] {
            let mut manager = CvrfManager::with_defaults();
            let mut snapshot = manager.export_state();
            snapshot.beliefs.beliefs.current_regime = regime;
            manager.import_state(snapshot).unwrap();

            let constraints = manager.get_optimization_constraints();
            let expected = manager.get_current_beliefs().risk_tolerance * multiplier;
            assert!(
                (constraints.risk_budget - expected).abs() < 1e-10,
                "regime {regime}"
            );
        }
    }

    #[test]
    fn test_metrics_baseline_below_two_cycles() {
        let mut manager = CvrfManager::with_defaults();
        let metrics = manager.get_performance_metrics();
        assert_eq!(metrics.total_cycles, 0);
        assert_eq!(metrics.belief_stability, 1.0);
        assert_eq!(metrics.average_learning_rate, 0.0);
        assert_eq!(metrics.insight_quality, 0.0);
        assert_eq!(metrics.overfit_risk, 0.0);
        assert_eq!(metrics.adaptation_speed, 0.0);

        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);
        manager.run_cvrf_cycle(None).unwrap();
        assert_eq!(manager.get_performance_metrics().total_cycles, 1);
        assert_eq!(manager.get_performance_metrics().belief_stability, 1.0);
    }

    #[test]
    fn test_metrics_with_history() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 3, 1.0, 0.02);
        for i in 0..4u32 {
            let start = 4 + i * 3;
            run_episode(&mut manager, start, start + 2, 1.2 + 0.2 * i as f64, 0.03);
            manager.run_cvrf_cycle(None).unwrap();
        }

        let metrics = manager.get_performance_metrics();
        assert_eq!(metrics.total_cycles, 4);
        assert!(metrics.average_learning_rate > 0.0);
        assert!(metrics.average_learning_rate <= 1.0);
        assert!(metrics.belief_stability > 0.0 && metrics.belief_stability < 1.0);
        assert!((0.0..=1.0).contains(&metrics.insight_quality));
        assert!(metrics.overfit_risk > 0.0 && metrics.overfit_risk <= 1.0);
        assert!((0.0..=1.0).contains(&metrics.adaptation_speed));
    }

    #[test]
    fn test_cycle_history_eviction() {
        let config = CvrfConfig {
            max_cycle_history: 2,
            ..Default::default()
        };
        let mut manager = CvrfManager::new(config).unwrap();
        run_episode(&mut manager, 1, 2, 1.0, 0.02);
        for i in 0..3u32 {
            let start = 3 + i * 2;
            run_episode(&mut manager, start, start + 1, 1.1 + 0.1 * i as f64, 0.03);
            manager.run_cvrf_cycle(None).unwrap();
        }
        let history = manager.get_cycle_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].cycle_id, "cycle_2");
        assert_eq!(history[1].cycle_id, "cycle_3");
    }

    #[test]
    fn test_export_import_roundtrip_deep_equality() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);
        manager.run_cvrf_cycle(None).unwrap();
        manager.start_episode(ts(11));

        let snapshot = manager.export_state();
        let json = snapshot.to_json().unwrap();

        let mut restored = CvrfManager::with_defaults();
        restored
            .import_state(CvrfSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(restored.get_current_beliefs(), manager.get_current_beliefs());
        assert_eq!(restored.get_cycle_history(), manager.get_cycle_history());
        assert_eq!(restored.get_episode_history(), manager.get_episode_history());
        assert_eq!(restored.current_episode(), manager.current_episode());
        assert!(
            (restored.get_belief_stability() - manager.get_belief_stability()).abs() < 1e-12
        );

        // Counters continue where they left off
        restored.close_episode(ts(12));
        run_episode(&mut restored, 13, 14, 1.8, 0.06);
        let next = restored.run_cvrf_cycle(None).unwrap();
        assert_eq!(next.cycle_id, "cycle_2");
    }

    #[test]
    fn test_failed_import_leaves_state_untouched() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);
        manager.run_cvrf_cycle(None).unwrap();
        let before = manager.export_state();

        let mut bad = before.clone();
        bad.metadata.version = 42;
        assert!(matches!(
            manager.import_state(bad),
            Err(StateImportError::UnsupportedVersion { .. })
        ));
        assert_eq!(manager.export_state(), before);

        let mut bad = before.clone();
        bad.cycle_counter = 0;
        assert!(matches!(
            manager.import_state(bad),
            Err(StateImportError::CycleCounterBehind { .. })
        ));
        assert_eq!(manager.export_state(), before);
    }

    #[test]
    fn test_ml_predictions_stored_on_cycle() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        run_episode(&mut manager, 6, 10, 1.6, 0.05);

        let ml = MlPredictions::default();
        let result = manager.run_cvrf_cycle(Some(&ml)).unwrap();
        assert_eq!(result.ml_predictions, Some(ml));
    }

    #[test]
    fn test_summary_display() {
        let mut manager = CvrfManager::with_defaults();
        run_episode(&mut manager, 1, 5, 1.0, 0.02);
        manager.start_episode(ts(6));

        let summary = manager.summary();
        assert_eq!(summary.archived_episodes, 1);
        assert!(summary.open_episode);
        assert_eq!(summary.total_cycles, 0);

        let text = format!("{summary}");
        assert!(text.contains("1 episodes archived"));
        assert!(text.contains("one open"));
    }
}
