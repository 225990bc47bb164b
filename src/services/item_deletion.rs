//! Deleting an item from a plan.
//!
//! Two guards protect the flow: an item already committed to an
//! appointment can never be removed silently, and a plan whose costs are
//! locked by the approval gate must be rejected back to DRAFT first.
//! The item's price is captured and subtracted from the totals before the
//! entity is dropped so the recalculation never reads a missing value.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{ApprovalStatus, AuditAction, PlanAuditEntry, PlanItemStatus};
use crate::store::PlanStore;

#[derive(Debug, Clone, Serialize)]
pub struct DeletePlanItemResponse {
    pub item_id: Uuid,
    pub item_name: String,
    pub price_cents: i64,
    pub total_price_cents: i64,
    pub final_cost_cents: i64,
}

pub struct ItemDeletionService {
    store: Arc<dyn PlanStore>,
}

impl ItemDeletionService {
    pub fn new(store: Arc<dyn PlanStore>) -> Self {
        Self { store }
    }

    pub async fn delete_item(&self, item_id: Uuid, actor_id: Uuid) -> Result<DeletePlanItemResponse, EngineError> {
        let mut plan = self.store.plan_for_item(item_id).await?;
        let (pi, ii) = plan
            .locate_item(item_id)
            .ok_or_else(|| EngineError::item_not_found(item_id))?;

        let status = plan.phases[pi].items[ii].status;
        if matches!(
            status,
            PlanItemStatus::Scheduled | PlanItemStatus::InProgress | PlanItemStatus::Completed
        ) {
            return Err(EngineError::Conflict(
                "ITEM_COMMITTED_CANNOT_DELETE",
                format!(
                    "Cannot delete an item that is {}. Cancel the appointment or skip the item instead",
                    status.as_str()
                ),
            ));
        }

        if matches!(
            plan.approval_status,
            ApprovalStatus::Approved | ApprovalStatus::PendingReview
        ) {
            return Err(EngineError::Conflict(
                "PLAN_LOCKED_CANNOT_DELETE",
                format!(
                    "Cannot delete items from a plan that is {}. Reject it back to DRAFT first",
                    plan.approval_status.as_str()
                ),
            ));
        }

        // Capture before removal; the audit note and the financial
        // adjustment both need values the deleted entity carries.
        let deleted_price = plan.phases[pi].items[ii].price_cents;
        let deleted_name = plan.phases[pi].items[ii].item_name.clone();

        plan.total_price_cents -= deleted_price;
        plan.recompute_final_cost();

        plan.phases[pi].items.remove(ii);
        plan.updated_at = Utc::now();
        self.store.save_plan(&plan).await?;

        let entry = PlanAuditEntry::record(
            &plan,
            AuditAction::ItemDeleted,
            actor_id,
            plan.approval_status,
            Some(format!("Item {item_id} ({deleted_name}): -{deleted_price}")),
        );
        self.store.append_audit(&entry).await?;

        tracing::info!(
            plan_id = %plan.plan_id,
            %item_id,
            %actor_id,
            deleted_price,
            new_total = plan.total_price_cents,
            "plan item deleted"
        );

        Ok(DeletePlanItemResponse {
            item_id,
            item_name: deleted_name,
            price_cents: deleted_price,
            total_price_cents: plan.total_price_cents,
            final_cost_cents: plan.final_cost_cents,
        })
    }
}

/* ============================================================
   Tests
   ============================================================ */
