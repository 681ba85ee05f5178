use thiserror::Error;

/// Input validation errors at the decision/metrics recording boundary.
///
/// The engine rejects malformed inputs instead of silently accepting them:
/// a non-finite weight or an out-of-range confidence would otherwise poison
/// every downstream comparison and belief update.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Decision symbol was empty or whitespace-only
    #[error("decision symbol must not be empty")]
    EmptySymbol,

    /// Confidence outside [0, 1]
    #[error("confidence must be in [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    /// A numeric input was NaN or infinite
    #[error("{field} must be finite, got {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// A fraction-valued input outside [0, 1]
    #[error("{field} must be in [0, 1], got {value}")]
    FractionOutOfRange { field: &'static str, value: f64 },
}

/// Snapshot import errors.
///
/// Import is all-or-nothing: every variant here is raised before any live
/// state is touched, so a failed import leaves the engine unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateImportError {
    /// Snapshot schema version does not match this build
    #[error("unsupported snapshot version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Embedded configuration failed validation
    #[error("snapshot config rejected: {0}")]
    Config(String),

    /// Episode id counter is behind the archived episode count
    #[error("episode counter {counter} is behind archived episode count {archived}")]
    EpisodeCounterBehind { counter: u64, archived: usize },

    /// Cycle counter is behind the recorded cycle count
    #[error("cycle counter {counter} is behind recorded cycle count {cycles}")]
    CycleCounterBehind { counter: u64, cycles: usize },

    /// A belief state value violates its documented bounds
    #[error("belief state out of bounds: {0}")]
    BeliefOutOfBounds(String),

    /// An episode record in the snapshot is internally inconsistent
    #[error("episode history invalid: {0}")]
    EpisodeHistoryInvalid(String),
}
