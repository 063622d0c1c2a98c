//! Engine error types

use delivery_domain::DomainError;
use delivery_persistence::PersistenceError;
use thiserror::Error;
use uuid::Uuid;

/// Dispatch and simulation errors.
///
/// Running out of drones and running out of battery are outcomes, not
/// errors: see `AssignmentOutcome::NoDroneAvailable` and
/// `StepOutcome::EmergencyLanding`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any write: delivery not pending, or too heavy for every candidate
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    /// A conditional status write lost a race
    #[error("Concurrent claim conflict on {entity_type} {id}")]
    ConcurrentClaimConflict { entity_type: &'static str, id: Uuid },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: &'static str, id: Uuid },

    #[error("Invalid telemetry: {0}")]
    InvalidTelemetry(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Stored records disagree with each other
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EngineError {
    pub const fn not_found(entity_type: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity_type, id }
    }

    pub const fn conflict(entity_type: &'static str, id: Uuid) -> Self {
        Self::ConcurrentClaimConflict { entity_type, id }
    }

    /// The caller may retry or skip this cycle
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentClaimConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
