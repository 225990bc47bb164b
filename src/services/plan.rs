//! Plan authoring: a new plan starts empty, in DRAFT, with its named
//! phases. Items arrive later through the addition flow.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    ApprovalStatus, AuditAction, PhaseStatus, PlanAuditEntry, PlanPhase, PlanStatus, TreatmentPlan,
};
use crate::store::PlanStore;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePhaseRequest {
    pub phase_number: i32,
    pub phase_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTreatmentPlanRequest {
    pub plan_name: String,
    pub patient_id: Uuid,
    /// Fixed discount on the plan total, in cents.
    pub discount_cents: i64,
    pub phases: Vec<CreatePhaseRequest>,
}

pub struct PlanService {
    store: Arc<dyn PlanStore>,
}

impl PlanService {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self { store }
    }

    pub async fn create_plan(
        &self,
        actor_id: Uuid,
        request: CreateTreatmentPlanRequest,
    ) -> Result<TreatmentPlan, EngineError> {
        if request.plan_name.trim().is_empty() {
            return Err(EngineError::Validation(
                "PLAN_NAME_REQUIRED",
                "A plan name is required".into(),
            ));
        }
        if request.discount_cents < 0 {
            return Err(EngineError::Validation(
                "INVALID_DISCOUNT",
                "Discount cannot be negative".into(),
            ));
        }

        let mut phase_numbers: Vec<i32> = request.phases.iter().map(|p| p.phase_number).collect();
        phase_numbers.sort_unstable();
        phase_numbers.dedup();
        if phase_numbers.len() != request.phases.len() {
            return Err(EngineError::Validation(
                "DUPLICATE_PHASE_NUMBER",
                "Phase numbers must be unique".into(),
            ));
        }

        let now = Utc::now();
        let mut phases: Vec<PlanPhase> = request
            .phases
            .into_iter()
            .map(|p| PlanPhase {
                phase_id: Uuid::new_v4(),
                phase_number: p.phase_number,
                phase_name: p.phase_name,
                status: PhaseStatus::Active,
                completion_date: None,
                items: vec![],
            })
            .collect();
        phases.sort_by_key(|p| p.phase_number);

        let mut plan = TreatmentPlan {
            plan_id: Uuid::new_v4(),
            plan_name: request.plan_name.trim().to_string(),
            patient_id: request.patient_id,
            created_by: actor_id,
            status: PlanStatus::Draft,
            approval_status: ApprovalStatus::Draft,
            total_price_cents: 0,
            discount_cents: request.discount_cents,
            final_cost_cents: 0,
            approved_by: None,
            approved_at: None,
            review_notes: None,
            created_at: now,
            updated_at: now,
            phases,
        };
        plan.recompute_final_cost();

        self.store.save_plan(&plan).await?;

        let entry = PlanAuditEntry::record(
            &plan,
            AuditAction::PlanCreated,
            actor_id,
            ApprovalStatus::Draft,
            Some(format!("Created plan '{}' with {} phase(s)", plan.plan_name, plan.phases.len())),
        );
        self.store.append_audit(&entry).await?;

        tracing::info!(plan_id = %plan.plan_id, %actor_id, "treatment plan created");

        Ok(plan)
    }
}
