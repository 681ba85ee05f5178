//! Concept extraction: turns an episode comparison into ranked insights
//! and a structured meta-prompt.
//!
//! Extraction is a pure function of its inputs. Given an identical
//! comparison and identical ML predictions, the output is byte-identical:
//! ranking uses a total order (relevance, then concept text) and every
//! timestamp is derived from the episodes themselves, never the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::comparison::EpisodeComparison;
use super::types::MlPredictions;

/// Direction an insight is expected to push performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    Positive,
    Negative,
    Neutral,
}

impl std::fmt::Display for ImpactDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImpactDirection::Positive => write!(f, "positive"),
            ImpactDirection::Negative => write!(f, "negative"),
            ImpactDirection::Neutral => write!(f, "neutral"),
        }
    }
}

/// A conceptual insight derived from an episode comparison.
///
/// Produced fresh per cycle; the most salient insight is first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptualInsight {
    pub concept: String,
    pub impact_direction: ImpactDirection,
    pub confidence: f64,
    /// Set when the insight is about a specific factor
    pub related_factor: Option<String>,
}

/// Structured + textual summary of what changed between episodes,
/// driving the belief update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaPrompt {
    /// Always non-empty
    pub optimization_direction: String,
    pub key_learnings: Vec<String>,
    /// Signed deltas in [−1, 1], keyed only by factors present in the insights
    pub factor_adjustments: BTreeMap<String, f64>,
    pub risk_guidance: String,
    pub timing_insights: String,
    /// Derived from the compared episodes' end dates, never the ambient clock
    pub generated_at: DateTime<Utc>,
}

/// How many insights feed `key_learnings`.
const KEY_LEARNING_COUNT: usize = 3;

/// Overlap below this produces a strategy-divergence insight.
const DIVERGENCE_THRESHOLD: f64 = 0.4;

/// Stateless insight extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConceptExtractor;

impl ConceptExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Derive ranked insights from a comparison and optional ML signals.
    ///
    /// Deterministic: identical inputs produce identical output. Insights
    /// are ranked by relevance (|exposure| × confidence for factor insights),
    /// most salient first.
    pub fn extract_insights(
        &self,
        comparison: &EpisodeComparison,
        ml: Option<&MlPredictions>,
    ) -> Vec<ConceptualInsight> {
        let better = &comparison.better_episode;
        let worse = &comparison.worse_episode;
        let tau = comparison.decision_overlap;
        let delta = comparison.performance_delta;

        let mut ranked: Vec<(f64, ConceptualInsight)> = Vec::new();

        // Performance delta
        if delta > 0.0 {
            ranked.push((
                delta,
                ConceptualInsight {
                    concept: format!(
                        "Episode {} outperformed {} by {:.2} Sharpe",
                        better.id, worse.id, delta
                    ),
                    impact_direction: ImpactDirection::Positive,
                    confidence: (delta / (delta + 1.0) + 0.5).min(0.95),
                    related_factor: None,
                },
            ));
        } else {
            ranked.push((
                0.1,
                ConceptualInsight {
                    concept: format!(
                        "Episodes {} and {} performed equivalently",
                        better.id, worse.id
                    ),
                    impact_direction: ImpactDirection::Neutral,
                    confidence: 0.5,
                    related_factor: None,
                },
            ));
        }

        // Factor exposures of the stronger episode
        for exposure in &better.factor_exposures {
            let mut relevance = exposure.exposure.abs() * exposure.confidence;
            let mut confidence = exposure.confidence.clamp(0.0, 1.0);

            if let Some(ml) = ml {
                if let Some(momentum) = ml
                    .factor_momentum
                    .as_deref()
                    .and_then(|m| m.iter().find(|fm| fm.factor == exposure.factor))
                {
                    confidence = (confidence
                        * (1.0 + 0.2 * momentum.momentum * momentum.confidence))
                        .clamp(0.0, 1.0);
                }
                if let Some(attribution) = ml
                    .factor_attribution
                    .as_deref()
                    .and_then(|a| a.iter().find(|fa| fa.factor == exposure.factor))
                {
                    relevance += attribution.attribution.abs() * 0.1;
                }
            }

            let impact_direction = if exposure.contribution > 0.0 {
                ImpactDirection::Positive
            } else if exposure.contribution < 0.0 {
                ImpactDirection::Negative
            } else {
                ImpactDirection::Neutral
            };

            ranked.push((
                relevance,
                ConceptualInsight {
                    concept: format!(
                        "Factor {} ({:+.2} exposure) contributed {:+.3} in the stronger episode",
                        exposure.factor, exposure.exposure, exposure.contribution
                    ),
                    impact_direction,
                    confidence,
                    related_factor: Some(exposure.factor.clone()),
                },
            ));
        }

        // Strategy divergence
        if tau < DIVERGENCE_THRESHOLD {
            let impact_direction = if delta > 0.0 {
                ImpactDirection::Positive
            } else {
                ImpactDirection::Neutral
            };
            ranked.push((
                1.0 - tau,
                ConceptualInsight {
                    concept: format!(
                        "Decision overlap was low ({tau:.2}); the episodes pursued different strategies"
                    ),
                    impact_direction,
                    confidence: (1.0 - tau).clamp(0.0, 1.0),
                    related_factor: None,
                },
            ));
        }

        // Trade categorization
        if !comparison.profitable_trades.is_empty() {
            let n = comparison.profitable_trades.len();
            let mean_confidence = comparison
                .profitable_trades
                .iter()
                .map(|d| d.confidence)
                .sum::<f64>()
                / n as f64;
            let share = n as f64 / better.decisions.len().max(1) as f64;
            ranked.push((
                mean_confidence * share,
                ConceptualInsight {
                    concept: format!(
                        "{n} high-conviction directional trades drove the stronger episode"
                    ),
                    impact_direction: ImpactDirection::Positive,
                    confidence: mean_confidence,
                    related_factor: None,
                },
            ));
        }
        if !comparison.losing_trades.is_empty() {
            let n = comparison.losing_trades.len();
            let share = n as f64 / worse.decisions.len().max(1) as f64;
            ranked.push((
                0.6 * share,
                ConceptualInsight {
                    concept: format!(
                        "{n} decisions in the weaker episode traded against the stronger episode's direction"
                    ),
                    impact_direction: ImpactDirection::Negative,
                    confidence: 0.6,
                    related_factor: None,
                },
            ));
        }

        // External regime signal
        if let Some(regime) = ml.and_then(|ml| ml.regime.as_ref()) {
            ranked.push((
                regime.confidence * 0.5,
                ConceptualInsight {
                    concept: format!(
                        "External regime signal points to a {} market ({:.0}% confidence)",
                        regime.regime,
                        regime.confidence * 100.0
                    ),
                    impact_direction: ImpactDirection::Neutral,
                    confidence: regime.confidence.clamp(0.0, 1.0),
                    related_factor: None,
                },
            ));
        }

        // Relevance descending, concept text as the deterministic tie-break
        ranked.sort_by(|(ra, ia), (rb, ib)| {
            rb.partial_cmp(ra)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ia.concept.cmp(&ib.concept))
        });
        ranked.into_iter().map(|(_, insight)| insight).collect()
    }

    /// Build the meta-prompt from a comparison and its extracted insights.
    ///
    /// Factor adjustments are scaled by (1 − τ) and clamped to [−1, 1];
    /// only factors carried by the insights appear as keys.
    pub fn generate_meta_prompt(
        &self,
        comparison: &EpisodeComparison,
        insights: &[ConceptualInsight],
        _ml: Option<&MlPredictions>,
    ) -> MetaPrompt {
        let better = &comparison.better_episode;
        let worse = &comparison.worse_episode;
        let tau = comparison.decision_overlap;
        let delta = comparison.performance_delta;
        let step = 1.0 - tau;

        let mut factor_adjustments = BTreeMap::new();
        for insight in insights {
            let Some(factor) = &insight.related_factor else {
                continue;
            };
            let sign = match insight.impact_direction {
                ImpactDirection::Positive => 1.0,
                ImpactDirection::Negative => -1.0,
                ImpactDirection::Neutral => continue,
            };
            let adjustment = (sign * insight.confidence * step).clamp(-1.0, 1.0);
            if adjustment != 0.0 {
                // First (most relevant) insight per factor wins
                factor_adjustments.entry(factor.clone()).or_insert(adjustment);
            }
        }

        let optimization_direction = if delta > 0.5 {
            format!(
                "Rotate decisively toward the factor profile of {}; a Sharpe gap of {:.2} justifies larger tilts",
                better.id, delta
            )
        } else if delta > 0.0 {
            format!(
                "Lean gradually toward the factor profile of {}; the Sharpe gap of {:.2} is modest",
                better.id, delta
            )
        } else {
            "Hold the current allocation; the compared episodes were statistically indistinguishable"
                .to_string()
        };

        let risk_guidance = if worse.max_drawdown > better.max_drawdown {
            format!(
                "The weaker episode drew down {:.1}%; cap drawdown near the stronger episode's {:.1}%",
                worse.max_drawdown * 100.0,
                better.max_drawdown * 100.0
            )
        } else {
            "Drawdowns were comparable across episodes; maintain the current risk posture"
                .to_string()
        };

        let timing_insights = if tau >= 0.7 {
            "Decision timing was consistent across episodes; revisions should be incremental"
                .to_string()
        } else if tau >= DIVERGENCE_THRESHOLD {
            "Partial overlap in decisions; review the divergent symbols for timing edge".to_string()
        } else {
            "Low overlap; entry and exit timing diverged materially between episodes".to_string()
        };

        MetaPrompt {
            optimization_direction,
            key_learnings: insights
                .iter()
                .take(KEY_LEARNING_COUNT)
                .map(|i| i.concept.clone())
                .collect(),
            factor_adjustments,
            risk_guidance,
            timing_insights,
            generated_at: better.end_date.max(worse.end_date),
        }
    }
}
