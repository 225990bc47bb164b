use thiserror::Error;
use uuid::Uuid;

/// Engine error taxonomy. Every variant that reaches a caller carries a
/// stable machine code plus a message specific enough to act on.
///
/// Scheduling infeasibility is deliberately NOT here: the auto-scheduler
/// reports it per item inside its response (see `services::autoschedule`),
/// never as an operation-level error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or missing input (missing rejection notes, price out of
    /// band, empty update, ...). Never retried.
    #[error("{1}")]
    Validation(&'static str, String),

    /// A state precondition failed (wrong approval status, item already
    /// committed, paid invoice blocks the edit). The message names the
    /// blocking state and the remediation step.
    #[error("{1}")]
    Conflict(&'static str, String),

    /// Unknown plan/phase/item/service identifier.
    #[error("{1}")]
    NotFound(&'static str, String),

    /// Store failure (connection, decode, transaction).
    #[error("storage error: {0}")]
    Storage(String),

    /// A collaborator (calendar, shifts, ledger, rooms, invoicing) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl EngineError {
    pub fn plan_not_found(plan_id: Uuid) -> Self {
        EngineError::NotFound("PLAN_NOT_FOUND", format!("Treatment plan not found: {plan_id}"))
    }

    pub fn phase_not_found(phase_id: Uuid) -> Self {
        EngineError::NotFound("PHASE_NOT_FOUND", format!("Treatment plan phase not found: {phase_id}"))
    }

    pub fn item_not_found(item_id: Uuid) -> Self {
        EngineError::NotFound("ITEM_NOT_FOUND", format!("Treatment plan item not found: {item_id}"))
    }

    pub fn service_not_found(service_code: &str) -> Self {
        EngineError::NotFound("SERVICE_NOT_FOUND", format!("Service not found: {service_code}"))
    }

    /// Stable machine code for the thin API layer to map onto a status.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(code, _) => code,
            EngineError::Conflict(code, _) => code,
            EngineError::NotFound(code, _) => code,
            EngineError::Storage(_) => "STORAGE",
            EngineError::Collaborator(_) => "COLLABORATOR",
        }
    }
}
