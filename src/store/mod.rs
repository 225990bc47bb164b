//! Persistence for the plan/phase/item aggregate and its audit trail.
//!
//! Every mutating operation in the engine is a read-modify-write of one
//! plan aggregate: load, apply the change in memory, `save_plan` once.
//! Implementations must make `save_plan` atomic per plan (the Postgres
//! store uses a single transaction; the in-memory store a single lock),
//! which is the per-plan write boundary the engine relies on.

pub mod memory;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{PlanAuditEntry, TreatmentPlan};

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Load the full aggregate: plan, phases in order, items in order.
    async fn plan(&self, plan_id: Uuid) -> Result<TreatmentPlan, EngineError>;

    /// Load the aggregate owning the given phase.
    async fn plan_for_phase(&self, phase_id: Uuid) -> Result<TreatmentPlan, EngineError>;

    /// Load the aggregate owning the given item.
    async fn plan_for_item(&self, item_id: Uuid) -> Result<TreatmentPlan, EngineError>;

    /// Persist the whole aggregate atomically (insert or update).
    async fn save_plan(&self, plan: &TreatmentPlan) -> Result<(), EngineError>;

    async fn append_audit(&self, entry: &PlanAuditEntry) -> Result<(), EngineError>;

    /// Audit entries for a plan, newest first.
    async fn audit_for_plan(&self, plan_id: Uuid) -> Result<Vec<PlanAuditEntry>, EngineError>;
}
