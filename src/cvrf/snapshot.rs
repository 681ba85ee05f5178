//! Snapshot payloads for persisting engine state across sessions.
//!
//! The engine does not touch durable storage itself; callers serialize the
//! exported snapshot and hand it back later. Payloads carry a schema version
//! so the caller can migrate old blobs, and every import validates the
//! payload before any live state is replaced.

use serde::{Deserialize, Serialize};

use crate::errors::StateImportError;

use super::belief::BeliefState;
use super::config::CvrfConfig;
use super::episode::Episode;
use super::manager::CvrfCycleResult;

/// Current snapshot schema version.
pub(crate) const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot metadata for versioning and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Schema version for forward compatibility
    pub version: u32,
    /// Archived episode count at export time
    pub episode_count: usize,
    /// Recorded cycle count at export time
    pub cycle_count: usize,
}

/// Episode-manager state: archive, open episode, and the id counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeHistorySnapshot {
    pub archived: Vec<Episode>,
    pub current: Option<Episode>,
    pub episode_counter: u64,
}

impl EpisodeHistorySnapshot {
    pub(crate) fn validate(&self) -> Result<(), StateImportError> {
        if self.episode_counter < self.archived.len() as u64 {
            return Err(StateImportError::EpisodeCounterBehind {
                counter: self.episode_counter,
                archived: self.archived.len(),
            });
        }
        for episode in self.archived.iter().chain(self.current.iter()) {
            if episode.end_date < episode.start_date {
                return Err(StateImportError::EpisodeHistoryInvalid(format!(
                    "episode {} ends before it starts",
                    episode.id
                )));
            }
            for decision in &episode.decisions {
                if !decision.confidence.is_finite()
                    || !(0.0..=1.0).contains(&decision.confidence)
                {
                    return Err(StateImportError::EpisodeHistoryInvalid(format!(
                        "decision {} has confidence {}",
                        decision.id, decision.confidence
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Belief-updater state: the belief values plus the stability window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefSnapshot {
    pub beliefs: BeliefState,
    /// Per-cycle update magnitudes feeding the stability score
    pub update_magnitudes: Vec<f64>,
}

impl BeliefSnapshot {
    pub(crate) fn validate(&self) -> Result<(), StateImportError> {
        self.beliefs
            .validate()
            .map_err(StateImportError::BeliefOutOfBounds)?;
        for magnitude in &self.update_magnitudes {
            if !magnitude.is_finite() || *magnitude < 0.0 {
                return Err(StateImportError::BeliefOutOfBounds(format!(
                    "update magnitude {magnitude} invalid"
                )));
            }
        }
        Ok(())
    }
}

/// Complete engine snapshot: config, beliefs, episodes, cycles, counters.
///
/// Treated as an opaque, versionless blob by the engine's callers; schema
/// evolution is their responsibility, keyed off `metadata.version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvrfSnapshot {
    pub metadata: SnapshotMetadata,
    pub config: CvrfConfig,
    pub beliefs: BeliefSnapshot,
    pub episodes: EpisodeHistorySnapshot,
    pub cycles: Vec<CvrfCycleResult>,
    pub cycle_counter: u64,
}

impl CvrfSnapshot {
    /// Validate the whole payload before any live state is touched.
    pub(crate) fn validate(&self) -> Result<(), StateImportError> {
        if self.metadata.version != SNAPSHOT_VERSION {
            return Err(StateImportError::UnsupportedVersion {
                found: self.metadata.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        self.config.validate().map_err(StateImportError::Config)?;
        self.beliefs.validate()?;
        self.episodes.validate()?;
        if self.cycle_counter < self.cycles.len() as u64 {
            return Err(StateImportError::CycleCounterBehind {
                counter: self.cycle_counter,
                cycles: self.cycles.len(),
            });
        }
        Ok(())
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize from a JSON string.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
