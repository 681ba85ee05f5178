//! Episode lifecycle: open, record, update metrics, close, archive.
//!
//! At most one episode is open at a time. Starting a new episode force-closes
//! any open one without running a learning cycle; cycles only run through
//! `CvrfManager::run_cvrf_cycle`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{StateImportError, ValidationError};

use super::comparison::EpisodeComparison;
use super::config::CvrfConfig;
use super::snapshot::EpisodeHistorySnapshot;
use super::types::{DecisionInput, FactorExposure, OptimizationResult, TradingDecision};

/// A bounded trading period with recorded decisions and realized metrics.
///
/// Openness is tracked by the manager, not a flag on the struct: the episode
/// held in `current` is open, archived episodes are frozen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// `"episode_{n}"` from the manager's counter
    pub id: String,
    pub start_date: DateTime<Utc>,
    /// Planned end at creation (`start + episode_length_days`); overwritten
    /// with the actual end when the episode closes
    pub end_date: DateTime<Utc>,
    /// Append-only decision sequence
    pub decisions: Vec<TradingDecision>,
    pub portfolio_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub factor_exposures: Vec<FactorExposure>,
    pub optimization_result: Option<OptimizationResult>,
}

/// Partial metrics update for the open episode. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeMetricsUpdate {
    pub portfolio_return: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub max_drawdown: Option<f64>,
    pub factor_exposures: Option<Vec<FactorExposure>>,
    pub optimization_result: Option<OptimizationResult>,
}

/// Owns episode lifecycle and history.
#[derive(Debug, Clone)]
pub struct EpisodeManager {
    config: CvrfConfig,
    /// The open episode, if any
    current: Option<Episode>,
    /// Closed episodes in close order, oldest first
    archived: Vec<Episode>,
    /// Monotonic id source; survives export/import
    episode_counter: u64,
}

impl EpisodeManager {
    pub fn new(config: CvrfConfig) -> Self {
        Self {
            config,
            current: None,
            archived: Vec::new(),
            episode_counter: 0,
        }
    }

    /// Start a new episode, force-closing any open one first.
    ///
    /// The force-close archives the open episode with `start_date` as its end
    /// and does not run a learning cycle. The new episode's end date is
    /// pre-set to the configured planned window.
    pub fn start_episode(&mut self, start_date: DateTime<Utc>) -> &Episode {
        if self.current.is_some() {
            debug!(start = %start_date, "force-closing open episode before starting a new one");
            self.close_episode(start_date);
        }

        self.episode_counter += 1;
        let id = format!("episode_{}", self.episode_counter);
        debug!(%id, start = %start_date, "starting episode");

        self.current = Some(Episode {
            id,
            start_date,
            end_date: start_date + Duration::days(self.config.episode_length_days),
            decisions: Vec::new(),
            portfolio_return: 0.0,
            sharpe_ratio: 0.0,
            max_drawdown: 0.0,
            factor_exposures: Vec::new(),
            optimization_result: None,
        });
        self.current.as_ref().expect("just set")
    }

    /// Record a decision in the open episode, implicitly opening one when
    /// none is open (using the decision's own timestamp as the start date).
    ///
    /// The stored decision's id is scoped to the episode's decision count.
    pub fn record_decision(
        &mut self,
        input: DecisionInput,
    ) -> Result<TradingDecision, ValidationError> {
        validate_decision(&input)?;

        if self.current.is_none() {
            self.start_episode(input.timestamp);
        }
        let episode = self.current.as_mut().expect("opened above");

        let decision = TradingDecision {
            id: format!("{}:{}", episode.id, episode.decisions.len() + 1),
            timestamp: input.timestamp,
            symbol: input.symbol,
            action: input.action,
            weight_before: input.weight_before,
            weight_after: input.weight_after,
            reason: input.reason,
            confidence: input.confidence,
            factors: input.factors,
        };
        episode.decisions.push(decision.clone());
        Ok(decision)
    }

    /// Overwrite realized metrics on the open episode.
    ///
    /// Validates the update regardless, then no-ops when no episode is open.
    pub fn update_episode_metrics(
        &mut self,
        update: EpisodeMetricsUpdate,
    ) -> Result<(), ValidationError> {
        validate_metrics(&update)?;

        let Some(episode) = self.current.as_mut() else {
            return Ok(());
        };
        if let Some(v) = update.portfolio_return {
            episode.portfolio_return = v;
        }
        if let Some(v) = update.sharpe_ratio {
            episode.sharpe_ratio = v;
        }
        if let Some(v) = update.max_drawdown {
            episode.max_drawdown = v;
        }
        if let Some(v) = update.factor_exposures {
            episode.factor_exposures = v;
        }
        if let Some(v) = update.optimization_result {
            episode.optimization_result = Some(v);
        }
        Ok(())
    }

    /// Close the open episode: set its actual end date, archive it, clear
    /// current. Returns the archived episode, or `None` if none was open.
    pub fn close_episode(&mut self, end_date: DateTime<Utc>) -> Option<Episode> {
        let mut episode = self.current.take()?;
        episode.end_date = end_date;
        debug!(id = %episode.id, end = %end_date, decisions = episode.decisions.len(), "closing episode");

        self.archived.push(episode.clone());
        if self.archived.len() > self.config.max_episode_history {
            self.archived.remove(0);
        }
        Some(episode)
    }

    /// Compare two episodes; outcome is independent of argument order.
    pub fn compare_episodes(&self, a: &Episode, b: &Episode) -> EpisodeComparison {
        EpisodeComparison::between(a, b)
    }

    /// The `n` most recently started archived episodes, most recent last.
    pub fn get_recent_episodes(&self, n: usize) -> Vec<&Episode> {
        let mut by_start: Vec<&Episode> = self.archived.iter().collect();
        by_start.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        let skip = by_start.len().saturating_sub(n);
        by_start.split_off(skip)
    }

    /// Comparison of the two most-recently-started archived episodes,
    /// or `None` when fewer than two exist.
    pub fn get_latest_comparison(&self) -> Option<EpisodeComparison> {
        let recent = self.get_recent_episodes(2);
        match recent.as_slice() {
            [a, b] => Some(EpisodeComparison::between(a, b)),
            _ => None,
        }
    }

    /// Whether enough episodes are archived for a learning cycle.
    pub fn has_enough_episodes_for_cvrf(&self) -> bool {
        self.archived.len() >= self.config.min_episodes_for_comparison
    }

    pub fn current_episode(&self) -> Option<&Episode> {
        self.current.as_ref()
    }

    /// Archived episodes in close order, oldest first.
    pub fn episode_history(&self) -> &[Episode] {
        &self.archived
    }

    pub fn archived_count(&self) -> usize {
        self.archived.len()
    }

    /// Full snapshot of archived episodes, the open episode, and the counter.
    pub fn export_history(&self) -> EpisodeHistorySnapshot {
        EpisodeHistorySnapshot {
            archived: self.archived.clone(),
            current: self.current.clone(),
            episode_counter: self.episode_counter,
        }
    }

    /// Restore from a snapshot, replacing all episode state.
    ///
    /// Validation happens before any live state is touched.
    pub fn import_history(
        &mut self,
        snapshot: EpisodeHistorySnapshot,
    ) -> Result<(), StateImportError> {
        snapshot.validate()?;
        self.archived = snapshot.archived;
        self.current = snapshot.current;
        self.episode_counter = snapshot.episode_counter;
        Ok(())
    }
}

fn validate_decision(input: &DecisionInput) -> Result<(), ValidationError> {
    if input.symbol.trim().is_empty() {
        return Err(ValidationError::EmptySymbol);
    }
    if !input.confidence.is_finite() || !(0.0..=1.0).contains(&input.confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(input.confidence));
    }
    for (field, value) in [
        ("weight_before", input.weight_before),
        ("weight_after", input.weight_after),
    ] {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { field, value });
        }
    }
    Ok(())
}

fn validate_metrics(update: &EpisodeMetricsUpdate) -> Result<(), ValidationError> {
    for (field, value) in [
        ("portfolio_return", update.portfolio_return),
        ("sharpe_ratio", update.sharpe_ratio),
        ("max_drawdown", update.max_drawdown),
    ] {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(ValidationError::NonFinite { field, value: v });
            }
        }
    }
    if let Some(v) = update.max_drawdown {
        if !(0.0..=1.0).contains(&v) {
            return Err(ValidationError::FractionOutOfRange {
                field: "max_drawdown",
                value: v,
            });
        }
    }
    if let Some(exposures) = &update.factor_exposures {
        for exposure in exposures {
            if !exposure.exposure.is_finite() {
                return Err(ValidationError::NonFinite {
                    field: "factor_exposure",
                    value: exposure.exposure,
                });
            }
            if !exposure.confidence.is_finite() || !(0.0..=1.0).contains(&exposure.confidence) {
                return Err(ValidationError::ConfidenceOutOfRange(exposure.confidence));
            }
        }
    }
    Ok(())
}
