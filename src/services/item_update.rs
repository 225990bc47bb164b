//! Editing an existing item.
//!
//! Pre-approval edits are plain field updates plus a financial delta.
//! An APPROVED plan may still be edited as long as nothing has been fully
//! paid, but the billing collaborator has to be kept in sync: unpaid
//! invoices are cancelled and reissued, partially-paid ones get a
//! supplemental invoice for the delta.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{InvoiceGateway, InvoiceSummary};
use crate::error::EngineError;
use crate::models::{
    ApprovalStatus, AuditAction, InvoicePaymentStatus, PlanAuditEntry, PlanItem, PlanItemStatus,
    TreatmentPlan,
};
use crate::store::PlanStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePlanItemRequest {
    pub item_name: Option<String>,
    pub price_cents: Option<i64>,
    pub estimated_minutes: Option<i32>,
}

impl UpdatePlanItemRequest {
    pub fn has_any_update(&self) -> bool {
        self.item_name.is_some() || self.price_cents.is_some() || self.estimated_minutes.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePlanItemResponse {
    pub item: PlanItem,
    pub price_change_cents: i64,
    pub total_price_cents: i64,
    pub final_cost_cents: i64,
}

pub struct ItemUpdateService {
    store: Arc<dyn PlanStore>,
    invoices: Arc<dyn InvoiceGateway>,
}

impl ItemUpdateService {
    pub fn new(store: Arc<dyn PlanStore>, invoices: Arc<dyn InvoiceGateway>) -> Self {
        Self { store, invoices }
    }

    pub async fn update_item(
        &self,
        item_id: Uuid,
        actor_id: Uuid,
        request: UpdatePlanItemRequest,
    ) -> Result<UpdatePlanItemResponse, EngineError> {
        if !request.has_any_update() {
            return Err(EngineError::Validation(
                "EMPTY_UPDATE",
                "At least one field must be provided".into(),
            ));
        }

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
                "ITEM_COMMITTED_CANNOT_EDIT",
                format!(
                    "Cannot edit an item that is {}. Cancel the appointment first",
                    status.as_str()
                ),
            ));
        }

        if plan.approval_status == ApprovalStatus::PendingReview {
            return Err(EngineError::Conflict(
                "PLAN_PENDING_REVIEW",
                "Cannot edit items on a plan that is awaiting review. Reject it back to DRAFT first".into(),
            ));
        }

        // An approved plan is editable until money has actually settled.
        let mut invoices = Vec::new();
        if plan.approval_status == ApprovalStatus::Approved {
            invoices = self.invoices.invoices_for_plan(plan.plan_id).await?;
            let fully_paid = invoices.iter().any(|i| i.status == InvoicePaymentStatus::Paid);
            if fully_paid {
                return Err(EngineError::Conflict(
                    "PLAN_PAID_ONLY_ADDITIONS",
                    "A fully-paid invoice exists for this plan; existing items cannot be edited. \
                     Only adding new items is permitted."
                        .into(),
                ));
            }
        }

        let old_price = plan.phases[pi].items[ii].price_cents;

        if let Some(name) = &request.item_name {
            plan.phases[pi].items[ii].item_name = name.clone();
        }
        if let Some(price) = request.price_cents {
            plan.phases[pi].items[ii].price_cents = price;
        }
        if let Some(minutes) = request.estimated_minutes {
            plan.phases[pi].items[ii].estimated_minutes = minutes;
        }

        let new_price = plan.phases[pi].items[ii].price_cents;
        let price_change = new_price - old_price;
        if price_change != 0 {
            plan.total_price_cents += price_change;
            plan.recompute_final_cost();
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(&plan).await?;

        if plan.approval_status == ApprovalStatus::Approved && price_change != 0 {
            self.sync_invoices(&plan, &invoices, price_change).await?;
        }

        let item = plan.phases[pi].items[ii].clone();
        let notes = if price_change != 0 {
            format!(
                "Item {} ({}): price {} -> {}",
                item.item_id, item.item_name, old_price, new_price
            )
        } else {
            format!("Item {} ({}): details updated", item.item_id, item.item_name)
        };
        let entry = PlanAuditEntry::record(
            &plan,
            AuditAction::ItemUpdated,
            actor_id,
            plan.approval_status,
            Some(notes),
        );
        self.store.append_audit(&entry).await?;

        tracing::info!(%item_id, %actor_id, price_change, "plan item updated");

        Ok(UpdatePlanItemResponse {
            item,
            price_change_cents: price_change,
            total_price_cents: plan.total_price_cents,
            final_cost_cents: plan.final_cost_cents,
        })
    }

    /// Keep billing aligned with a price change on an approved plan:
    /// unpaid invoices are cancelled and regenerated, a partially-paid one
    /// stays and the delta goes on a supplemental invoice.
    async fn sync_invoices(
        &self,
        plan: &TreatmentPlan,
        invoices: &[InvoiceSummary],
        price_change: i64,
    ) -> Result<(), EngineError> {
        if invoices.is_empty() {
            tracing::warn!(plan_id = %plan.plan_id, "approved plan has no invoices, nothing to sync");
            return Ok(());
        }

        let mut supplemental_needed = false;
        for invoice in invoices {
            match invoice.status {
                InvoicePaymentStatus::PendingPayment => {
                    self.invoices.cancel_invoice(invoice.invoice_id).await?;
                    tracing::info!(invoice_id = %invoice.invoice_id, "cancelled unpaid invoice after item update");
                }
                InvoicePaymentStatus::PartialPaid => {
                    supplemental_needed = true;
                }
                InvoicePaymentStatus::Paid | InvoicePaymentStatus::Cancelled => {}
            }
        }

        if supplemental_needed {
            self.invoices
                .create_supplemental(plan, price_change, "price change on partially paid treatment plan")
                .await?;
        }

        // When every invoice is now cancelled the plan has no live billing
        // left; reissue from the updated totals.
        let all_cancelled = invoices
            .iter()
            .all(|i| matches!(i.status, InvoicePaymentStatus::PendingPayment | InvoicePaymentStatus::Cancelled));
        if all_cancelled {
            self.invoices.issue_for_approved_plan(plan).await?;
        }

        Ok(())
    }
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::stubs::RecordingInvoiceGateway;
    use crate::collaborators::InvoiceSummary;
    use crate::models::TreatmentPlan;
    use crate::services::fixtures::{item, phase, plan_shell, settle_totals};
    use crate::store::memory::MemoryPlanStore;

    struct Setup {
        service: ItemUpdateService,
        store: Arc<MemoryPlanStore>,
        invoices: Arc<RecordingInvoiceGateway>,
    }

    fn setup(invoices: RecordingInvoiceGateway) -> Setup {
        let store = Arc::new(MemoryPlanStore::new());
        let invoices = Arc::new(invoices);
        Setup {
            service: ItemUpdateService::new(store.clone(), invoices.clone()),
            store,
            invoices,
        }
    }

    fn draft_plan() -> TreatmentPlan {
        let mut plan = plan_shell();
        plan.discount_cents = 5_000;
        let mut ph = phase(1);
        ph.items.push(item(1, 10_000));
        ph.items.push(item(2, 20_000));
        plan.phases.push(ph);
        settle_totals(&mut plan);
        plan
    }

    fn price_update(price: i64) -> UpdatePlanItemRequest {
        UpdatePlanItemRequest { price_cents: Some(price), ..Default::default() }
    }

    #[tokio::test]
    async fn empty_update_is_rejected() {
        let s = setup(RecordingInvoiceGateway::default());
        let plan = draft_plan();
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        let err = s
            .service
            .update_item(item_id, Uuid::new_v4(), UpdatePlanItemRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EMPTY_UPDATE");
    }

    #[tokio::test]
    async fn price_change_moves_both_totals_by_the_delta() {
        let s = setup(RecordingInvoiceGateway::default());
        let plan = draft_plan();
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        let resp = s
            .service
            .update_item(item_id, Uuid::new_v4(), price_update(14_000))
            .await
            .unwrap();
        assert_eq!(resp.price_change_cents, 4_000);
        assert_eq!(resp.total_price_cents, 34_000);
        assert_eq!(resp.final_cost_cents, 29_000);

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.final_cost_cents, stored.total_price_cents - stored.discount_cents);
    }

    #[tokio::test]
    async fn name_only_update_leaves_totals_alone() {
        let s = setup(RecordingInvoiceGateway::default());
        let plan = draft_plan();
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        let resp = s
            .service
            .update_item(
                item_id,
                Uuid::new_v4(),
                UpdatePlanItemRequest { item_name: Some("Composite filling".into()), ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(resp.price_change_cents, 0);
        assert_eq!(resp.item.item_name, "Composite filling");
        assert_eq!(resp.total_price_cents, 30_000);
    }

    #[tokio::test]
    async fn committed_items_and_pending_review_plans_are_guarded() {
        let s = setup(RecordingInvoiceGateway::default());

        let mut plan = draft_plan();
        plan.phases[0].items[0].status = PlanItemStatus::Scheduled;
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();
        let err = s
            .service
            .update_item(item_id, Uuid::new_v4(), price_update(12_000))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ITEM_COMMITTED_CANNOT_EDIT");

        let mut plan = draft_plan();
        plan.approval_status = ApprovalStatus::PendingReview;
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();
        let err = s
            .service
            .update_item(item_id, Uuid::new_v4(), price_update(12_000))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PLAN_PENDING_REVIEW");
    }

    #[tokio::test]
    async fn paid_invoice_blocks_edits_on_approved_plans() {
        let invoices = RecordingInvoiceGateway::default();
        invoices.existing.lock().unwrap().push(InvoiceSummary {
            invoice_id: Uuid::new_v4(),
            status: InvoicePaymentStatus::Paid,
        });
        let s = setup(invoices);

        let mut plan = draft_plan();
        plan.approval_status = ApprovalStatus::Approved;
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        let err = s
            .service
            .update_item(item_id, Uuid::new_v4(), price_update(12_000))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PLAN_PAID_ONLY_ADDITIONS");
        assert!(err.to_string().contains("adding new items"));
    }

    #[tokio::test]
    async fn unpaid_invoice_is_cancelled_and_reissued() {
        let invoice_id = Uuid::new_v4();
        let invoices = RecordingInvoiceGateway::default();
        invoices.existing.lock().unwrap().push(InvoiceSummary {
            invoice_id,
            status: InvoicePaymentStatus::PendingPayment,
        });
        let s = setup(invoices);

        let mut plan = draft_plan();
        plan.approval_status = ApprovalStatus::Approved;
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        s.service
            .update_item(item_id, Uuid::new_v4(), price_update(12_000))
            .await
            .unwrap();

        assert_eq!(s.invoices.cancelled.lock().unwrap().as_slice(), &[invoice_id]);
        assert_eq!(s.invoices.issued_for.lock().unwrap().as_slice(), &[plan.plan_id]);
        assert!(s.invoices.supplementals.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn partially_paid_invoice_gets_a_supplemental_for_the_delta() {
        let invoices = RecordingInvoiceGateway::default();
        invoices.existing.lock().unwrap().push(InvoiceSummary {
            invoice_id: Uuid::new_v4(),
            status: InvoicePaymentStatus::PartialPaid,
        });
        let s = setup(invoices);

        let mut plan = draft_plan();
        plan.approval_status = ApprovalStatus::Approved;
        let item_id = plan.phases[0].items[0].item_id;
        s.store.save_plan(&plan).await.unwrap();

        s.service
            .update_item(item_id, Uuid::new_v4(), price_update(7_000))
            .await
            .unwrap();

        let supplementals = s.invoices.supplementals.lock().unwrap();
        assert_eq!(supplementals.len(), 1);
        assert_eq!(supplementals[0].0, plan.plan_id);
        assert_eq!(supplementals[0].1, -3_000);
        // The partially-paid invoice itself is left untouched.
        assert!(s.invoices.cancelled.lock().unwrap().is_empty());
        assert!(s.invoices.issued_for.lock().unwrap().is_empty());
    }
}
