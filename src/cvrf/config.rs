//! CVRF engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the CVRF engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvrfConfig {
    /// Planned episode window in days. `start_episode` pre-sets the episode's
    /// end date to `start + episode_length_days`; closing overwrites it.
    pub episode_length_days: i64,

    /// Minimum archived episodes before a cycle can run.
    /// Below this, `run_cvrf_cycle` returns `None`, never an error.
    pub min_episodes_for_comparison: usize,

    /// Archived episodes kept in memory; oldest are evicted beyond this.
    pub max_episode_history: usize,

    /// Cycle results kept in memory; oldest are evicted beyond this.
    pub max_cycle_history: usize,

    /// Confidence level for CVaR, e.g. 0.95 = mean of worst 5% tail.
    pub cvar_confidence_level: f64,

    /// When false, the within-episode governor always reports untriggered.
    pub enable_cvar_control: bool,

    /// Base step size for belief revisions. The effective step is
    /// `base_learning_rate × (1 − τ)` where τ is the decision overlap.
    pub base_learning_rate: f64,

    /// Number of recent cycles the belief stability score considers.
    pub stability_window: usize,
}

impl Default for CvrfConfig {
    fn default() -> Self {
        Self {
            episode_length_days: 30,         // monthly episodes
            min_episodes_for_comparison: 2,  // need a pair to compare
            max_episode_history: 100,
            max_cycle_history: 500,
            cvar_confidence_level: 0.95,     // worst 5% tail
            enable_cvar_control: true,
            base_learning_rate: 0.3,
            stability_window: 10,
        }
    }
}

impl CvrfConfig {
    /// Validate invariants that would cause incorrect behavior downstream.
    ///
    /// Returns a descriptive error for the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.episode_length_days < 1 {
            return Err(format!(
                "episode_length_days must be >= 1, got {}",
                self.episode_length_days
            ));
        }
        if self.min_episodes_for_comparison < 2 {
            return Err(format!(
                "min_episodes_for_comparison must be >= 2, got {}. A comparison needs a pair.",
                self.min_episodes_for_comparison
            ));
        }
        if self.max_episode_history < self.min_episodes_for_comparison {
            return Err(format!(
                "max_episode_history ({}) must be >= min_episodes_for_comparison ({})",
                self.max_episode_history, self.min_episodes_for_comparison
            ));
        }
        if self.max_cycle_history < 1 {
            return Err(format!(
                "max_cycle_history must be >= 1, got {}",
                self.max_cycle_history
            ));
        }
        if self.cvar_confidence_level <= 0.5 || self.cvar_confidence_level >= 1.0 {
            return Err(format!(
                "cvar_confidence_level must be in (0.5, 1.0), got {}",
                self.cvar_confidence_level
            ));
        }
        if self.base_learning_rate <= 0.0 || self.base_learning_rate > 1.0 {
            return Err(format!(
                "base_learning_rate must be in (0.0, 1.0], got {}",
                self.base_learning_rate
            ));
        }
        if self.stability_window < 1 {
            return Err(format!(
                "stability_window must be >= 1, got {}",
                self.stability_window
            ));
        }
        Ok(())
    }
}
