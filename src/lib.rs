#![deny(unreachable_pub)]

// Core modules
mod errors;

// Feature modules
pub mod cvrf;

// Re-exports
pub use cvrf::{
    BeliefRevision, BeliefState, BeliefUpdate, BeliefUpdater, BeliefValue, ConceptExtractor,
    ConceptualInsight, CvrfConfig, CvrfCycleResult, CvrfManager, CvrfPerformanceMetrics,
    CvrfSnapshot, CvrfSummary, DecisionInput, Episode, EpisodeComparison, EpisodeManager,
    EpisodeMetricsUpdate, FactorAttribution, FactorExposure, FactorMomentum, FactorTarget,
    ImpactDirection, MarketRegime, MetaPrompt, MlPredictions, OptimizationConstraints,
    OptimizationResult, OverEpisodeBeliefAdjustment, Position, RegimePrediction, RiskAdjustment,
    RiskAdjustmentType, TradeAction, TradingDecision, WithinEpisodeRiskControl,
};
pub use errors::{StateImportError, ValidationError};
