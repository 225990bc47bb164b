//! In-memory `PlanStore` for tests and embedded use. One lock over the
//! whole map serializes writers, which trivially satisfies the per-plan
//! write boundary.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{PlanAuditEntry, TreatmentPlan};
use crate::store::PlanStore;

#[derive(Default)]
pub struct MemoryPlanStore {
    inner: RwLock<State>,
}

#[derive(Default)]
struct State {
    plans: HashMap<Uuid, TreatmentPlan>,
    audit: Vec<PlanAuditEntry>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn plan(&self, plan_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        self.inner
            .read()
            .await
            .plans
            .get(&plan_id)
            .cloned()
            .ok_or_else(|| EngineError::plan_not_found(plan_id))
    }

    async fn plan_for_phase(&self, phase_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        self.inner
            .read()
            .await
            .plans
            .values()
            .find(|plan| plan.phases.iter().any(|p| p.phase_id == phase_id))
            .cloned()
            .ok_or_else(|| EngineError::phase_not_found(phase_id))
    }

    async fn plan_for_item(&self, item_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        self.inner
            .read()
            .await
            .plans
            .values()
            .find(|plan| plan.item(item_id).is_some())
            .cloned()
            .ok_or_else(|| EngineError::item_not_found(item_id))
    }

    async fn save_plan(&self, plan: &TreatmentPlan) -> Result<(), EngineError> {
        self.inner.write().await.plans.insert(plan.plan_id, plan.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: &PlanAuditEntry) -> Result<(), EngineError> {
        self.inner.write().await.audit.push(entry.clone());
        Ok(())
    }

    async fn audit_for_plan(&self, plan_id: Uuid) -> Result<Vec<PlanAuditEntry>, EngineError> {
        let state = self.inner.read().await;
        let mut entries: Vec<PlanAuditEntry> = state
            .audit
            .iter()
            .filter(|e| e.plan_id == plan_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApprovalStatus, PhaseStatus, PlanItem, PlanItemStatus, PlanPhase, PlanStatus};
    use chrono::Utc;

    fn plan_with_one_item() -> TreatmentPlan {
        TreatmentPlan {
            plan_id: Uuid::new_v4(),
            plan_name: "Ortho".into(),
            patient_id: Uuid::new_v4(),
            created_by: Uuid::new_v4(),
            status: PlanStatus::Active,
            approval_status: ApprovalStatus::Draft,
            total_price_cents: 10_000,
            discount_cents: 0,
            final_cost_cents: 10_000,
            approved_by: None,
            approved_at: None,
            review_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            phases: vec![PlanPhase {
                phase_id: Uuid::new_v4(),
                phase_number: 1,
                phase_name: "Phase 1".into(),
                status: PhaseStatus::Active,
                completion_date: None,
                items: vec![PlanItem {
                    item_id: Uuid::new_v4(),
                    service_id: Uuid::new_v4(),
                    sequence_number: 1,
                    item_name: "Scaling".into(),
                    price_cents: 10_000,
                    estimated_minutes: 30,
                    status: PlanItemStatus::Pending,
                    completed_at: None,
                }],
            }],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = MemoryPlanStore::new();
        let plan = plan_with_one_item();
        store.save_plan(&plan).await.unwrap();

        let loaded = store.plan(plan.plan_id).await.unwrap();
        assert_eq!(loaded.plan_id, plan.plan_id);
        assert_eq!(loaded.phases.len(), 1);
        assert_eq!(loaded.phases[0].items.len(), 1);
    }

    #[tokio::test]
    async fn lookups_by_phase_and_item() {
        let store = MemoryPlanStore::new();
        let plan = plan_with_one_item();
        let phase_id = plan.phases[0].phase_id;
        let item_id = plan.phases[0].items[0].item_id;
        store.save_plan(&plan).await.unwrap();

        assert_eq!(store.plan_for_phase(phase_id).await.unwrap().plan_id, plan.plan_id);
        assert_eq!(store.plan_for_item(item_id).await.unwrap().plan_id, plan.plan_id);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MemoryPlanStore::new();
        let err = store.plan(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "PLAN_NOT_FOUND");
        let err = store.plan_for_item(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "ITEM_NOT_FOUND");
    }
}
