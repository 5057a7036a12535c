//! Store for computed poll and group aggregates.

use async_trait::async_trait;
use footprint_events::SimulationSummary;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Aggregate a simulation contributes to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum StatsScope {
    /// Organisation poll
    Poll(Uuid),
    /// Friends group
    Group(Uuid),
}

impl fmt::Display for StatsScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsScope::Poll(id) => write!(f, "poll:{id}"),
            StatsScope::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Stats store errors.
#[derive(Debug, Error)]
pub enum StatsError {
    /// Store unreachable
    #[error("Stats store unavailable: {0}")]
    Unavailable(String),
}

/// Ephemeral store of computed aggregates.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Fold a simulation into the aggregate of `scope`.
    async fn record_simulation(
        &self,
        scope: StatsScope,
        simulation: &SimulationSummary,
    ) -> Result<(), StatsError>;

    /// Drop the aggregate of `scope` so it is recomputed on next read.
    async fn invalidate(&self, scope: StatsScope) -> Result<(), StatsError>;
}
