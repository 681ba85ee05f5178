//! Episode comparison: better/worse ranking, decision overlap, trade categorization.
//!
//! The overlap score τ doubles as the engine's implicit learning-rate signal:
//! two episodes that made the same calls (τ near 1) carry little new
//! information, so downstream belief revisions shrink accordingly.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::episode::Episode;
use super::types::{TradeAction, TradingDecision};

/// Derived comparison between two closed episodes.
///
/// Never stored independently; produced fresh for each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeComparison {
    /// Episode with the higher Sharpe ratio (ties broken by higher return)
    pub better_episode: Episode,
    pub worse_episode: Episode,
    /// `better.sharpe − worse.sharpe`, non-negative by construction
    pub performance_delta: f64,
    /// Symbol-level action/direction agreement τ in [0, 1]
    pub decision_overlap: f64,
    /// High-conviction directional decisions from the better episode
    pub profitable_trades: Vec<TradingDecision>,
    /// Worse-episode decisions that opposed the better episode's direction
    pub losing_trades: Vec<TradingDecision>,
}

impl EpisodeComparison {
    /// Compare two episodes. The outcome is independent of argument order:
    /// higher Sharpe wins, ties fall to higher return, then to episode id.
    pub fn between(a: &Episode, b: &Episode) -> Self {
        let a_better = match a
            .sharpe_ratio
            .partial_cmp(&b.sharpe_ratio)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match a
                .portfolio_return
                .partial_cmp(&b.portfolio_return)
                .unwrap_or(Ordering::Equal)
            {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => a.id <= b.id,
            },
        };
        let (better, worse) = if a_better { (a, b) } else { (b, a) };

        let (profitable_trades, losing_trades) =
            categorize_trades(&better.decisions, &worse.decisions);

        Self {
            better_episode: better.clone(),
            worse_episode: worse.clone(),
            performance_delta: better.sharpe_ratio - worse.sharpe_ratio,
            decision_overlap: decision_overlap(&better.decisions, &worse.decisions),
            profitable_trades,
            losing_trades,
        }
    }
}

/// Per-symbol fold of an episode's decisions.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DecisionSignature {
    pub(crate) last_action: TradeAction,
    pub(crate) net_weight_change: f64,
}

/// Fold all decisions for each symbol into `{last_action, net_weight_change}`.
pub(crate) fn decision_signatures(
    decisions: &[TradingDecision],
) -> BTreeMap<String, DecisionSignature> {
    let mut signatures: BTreeMap<String, DecisionSignature> = BTreeMap::new();
    for decision in decisions {
        let entry = signatures
            .entry(decision.symbol.clone())
            .or_insert(DecisionSignature {
                last_action: decision.action,
                net_weight_change: 0.0,
            });
        entry.last_action = decision.action;
        entry.net_weight_change += decision.weight_change();
    }
    signatures
}

fn weight_sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Decision overlap τ between two episodes' decision sets.
///
/// For every symbol in the better episode's signature set, 0.5 is awarded
/// when the last action matches the worse episode's signature for the same
/// symbol, and 0.5 when the net weight-change sign matches. The denominator
/// counts the better episode's symbols plus symbols present only on the
/// worse side. Defaults to 0.5 when either decision list is empty or the
/// symbol universe is empty.
pub(crate) fn decision_overlap(better: &[TradingDecision], worse: &[TradingDecision]) -> f64 {
    if better.is_empty() || worse.is_empty() {
        return 0.5;
    }

    let better_sigs = decision_signatures(better);
    let worse_sigs = decision_signatures(worse);

    let mut matches = 0.0;
    for (symbol, sig) in &better_sigs {
        if let Some(other) = worse_sigs.get(symbol) {
            if sig.last_action == other.last_action {
                matches += 0.5;
            }
            if weight_sign(sig.net_weight_change) == weight_sign(other.net_weight_change) {
                matches += 0.5;
            }
        }
    }

    let worse_only = worse_sigs
        .keys()
        .filter(|s| !better_sigs.contains_key(*s))
        .count();
    let total = better_sigs.len() + worse_only;
    if total == 0 {
        return 0.5;
    }
    matches / total as f64
}

/// High-conviction threshold for profitable-trade categorization.
const CONVICTION_THRESHOLD: f64 = 0.6;

/// Categorize trades across the two episodes.
///
/// Profitable: better-episode decisions with confidence above the conviction
/// threshold and a directional action. Losing: worse-episode decisions whose
/// action opposes the better episode's last action on the same symbol;
/// symbols absent from the better episode are excluded.
pub(crate) fn categorize_trades(
    better: &[TradingDecision],
    worse: &[TradingDecision],
) -> (Vec<TradingDecision>, Vec<TradingDecision>) {
    let profitable: Vec<TradingDecision> = better
        .iter()
        .filter(|d| d.confidence > CONVICTION_THRESHOLD && d.action.is_directional())
        .cloned()
        .collect();

    let better_sigs = decision_signatures(better);
    let losing: Vec<TradingDecision> = worse
        .iter()
        .filter(|d| {
            better_sigs
                .get(&d.symbol)
                .map(|sig| d.action.opposes(sig.last_action))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    (profitable, losing)
}
