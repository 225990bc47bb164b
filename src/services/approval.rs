//! The plan-level approval gate.
//!
//! `DRAFT -> PENDING_REVIEW -> {APPROVED | DRAFT}`. Rejection always goes
//! back to DRAFT so the author can revise immediately. Approval is the
//! point where money is committed: items are activated and the billing
//! collaborator is asked to issue invoices.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{ClinicalRules, InvoiceGateway};
use crate::error::EngineError;
use crate::models::{ApprovalStatus, AuditAction, PlanAuditEntry, PlanItemStatus, PlanStatus};
use crate::services::item_status::activation_status;
use crate::store::PlanStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveTreatmentPlanRequest {
    pub decision: ApprovalDecision,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubmitForReviewRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStatusChange {
    pub plan_id: Uuid,
    pub old_approval_status: ApprovalStatus,
    pub new_approval_status: ApprovalStatus,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Items promoted to READY_FOR_BOOKING by an approval.
    pub items_activated: u32,
    /// Items parked in WAITING_FOR_PREREQUISITE by an approval.
    pub items_waiting_for_prerequisite: u32,
}

pub struct ApprovalService {
    store: Arc<dyn PlanStore>,
    clinical_rules: Arc<dyn ClinicalRules>,
    invoices: Arc<dyn InvoiceGateway>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn PlanStore>,
        clinical_rules: Arc<dyn ClinicalRules>,
        invoices: Arc<dyn InvoiceGateway>,
    ) -> Self {
        Self { store, clinical_rules, invoices }
    }

    /// Approve or reject a plan that is pending review.
    pub async fn decide(
        &self,
        plan_id: Uuid,
        actor_id: Uuid,
        request: ApproveTreatmentPlanRequest,
    ) -> Result<ApprovalStatusChange, EngineError> {
        let mut plan = self.store.plan(plan_id).await?;

        if plan.approval_status != ApprovalStatus::PendingReview {
            return Err(EngineError::Conflict(
                "PLAN_NOT_PENDING_REVIEW",
                format!(
                    "Cannot decide on a plan in status '{}'. Only PENDING_REVIEW plans can be approved or rejected.",
                    plan.approval_status.as_str()
                ),
            ));
        }

        let notes = request.notes.filter(|n| !n.trim().is_empty());

        if request.decision == ApprovalDecision::Rejected && notes.is_none() {
            return Err(EngineError::Validation(
                "REJECTION_NOTES_REQUIRED",
                "A reason is required when rejecting a treatment plan".into(),
            ));
        }

        if request.decision == ApprovalDecision::Approved {
            if let Some(unpriced) = plan.items().find(|it| it.price_cents <= 0) {
                return Err(EngineError::Validation(
                    "UNPRICED_ITEM",
                    format!(
                        "Cannot approve while any item is unpriced: item {} ({}) has no price. Update prices first.",
                        unpriced.item_id, unpriced.item_name
                    ),
                ));
            }
        }

        let old_status = plan.approval_status;
        plan.approval_status = match request.decision {
            ApprovalDecision::Approved => ApprovalStatus::Approved,
            ApprovalDecision::Rejected => ApprovalStatus::Draft,
        };
        plan.approved_by = Some(actor_id);
        plan.approved_at = Some(Utc::now());
        plan.review_notes = notes.clone();

        let mut items_activated = 0u32;
        let mut items_waiting = 0u32;

        if plan.approval_status == ApprovalStatus::Approved {
            // Activation cascade: every PENDING item either becomes
            // bookable or waits on its prerequisites.
            for pi in 0..plan.phases.len() {
                for ii in 0..plan.phases[pi].items.len() {
                    if plan.phases[pi].items[ii].status != PlanItemStatus::Pending {
                        continue;
                    }
                    let service_id = plan.phases[pi].items[ii].service_id;
                    let status = activation_status(self.clinical_rules.as_ref(), service_id).await?;
                    plan.phases[pi].items[ii].status = status;
                    match status {
                        PlanItemStatus::WaitingForPrerequisite => items_waiting += 1,
                        _ => items_activated += 1,
                    }
                }
            }
            if plan.status == PlanStatus::Draft {
                plan.status = PlanStatus::Active;
            }
            tracing::info!(
                %plan_id,
                items_activated,
                items_waiting,
                "plan approved, items activated"
            );
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(&plan).await?;

        if plan.approval_status == ApprovalStatus::Approved {
            // Billing failures do not roll the approval back; invoices can
            // be issued again later.
            if let Err(e) = self.invoices.issue_for_approved_plan(&plan).await {
                tracing::warn!(%plan_id, error = %e, "invoice issuance failed after approval");
            }
        }

        let entry = PlanAuditEntry::record(&plan, AuditAction::ApprovalDecision, actor_id, old_status, notes.clone());
        self.store.append_audit(&entry).await?;

        tracing::info!(
            %plan_id,
            %actor_id,
            from = old_status.as_str(),
            to = plan.approval_status.as_str(),
            "approval decision recorded"
        );

        Ok(ApprovalStatusChange {
            plan_id,
            old_approval_status: old_status,
            new_approval_status: plan.approval_status,
            approved_by: plan.approved_by,
            approved_at: plan.approved_at,
            notes,
            items_activated,
            items_waiting_for_prerequisite: items_waiting,
        })
    }

    /// Send a DRAFT plan to the review queue.
    pub async fn submit_for_review(
        &self,
        plan_id: Uuid,
        actor_id: Uuid,
        request: SubmitForReviewRequest,
    ) -> Result<ApprovalStatusChange, EngineError> {
        let mut plan = self.store.plan(plan_id).await?;

        if plan.approval_status != ApprovalStatus::Draft {
            return Err(EngineError::Conflict(
                "PLAN_NOT_DRAFT",
                format!(
                    "Only DRAFT plans can be submitted for review. Current status: {}",
                    plan.approval_status.as_str()
                ),
            ));
        }

        if plan.phases.is_empty() {
            return Err(EngineError::Validation(
                "EMPTY_PLAN",
                "Cannot submit a plan with no phases".into(),
            ));
        }
        if !plan.has_any_item() {
            return Err(EngineError::Validation(
                "NO_ITEMS",
                "Cannot submit a plan with no items".into(),
            ));
        }

        let old_status = plan.approval_status;
        plan.approval_status = ApprovalStatus::PendingReview;
        plan.updated_at = Utc::now();
        self.store.save_plan(&plan).await?;

        let notes = request
            .notes
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Submitted for review".to_string());
        let entry =
            PlanAuditEntry::record(&plan, AuditAction::SubmittedForReview, actor_id, old_status, Some(notes.clone()));
        self.store.append_audit(&entry).await?;

        tracing::info!(%plan_id, %actor_id, "plan submitted for review");

        Ok(ApprovalStatusChange {
            plan_id,
            old_approval_status: old_status,
            new_approval_status: plan.approval_status,
            approved_by: None,
            approved_at: None,
            notes: Some(notes),
            items_activated: 0,
            items_waiting_for_prerequisite: 0,
        })
    }

    /// Notes attached to the most recent submission, for detail views.
    pub async fn submit_notes(&self, plan_id: Uuid) -> Result<Option<String>, EngineError> {
        let entries = self.store.audit_for_plan(plan_id).await?;
        Ok(entries
            .into_iter()
            .find(|e| e.action == AuditAction::SubmittedForReview)
            .and_then(|e| e.notes))
    }
}

/* ============================================================
   Tests
   ============================================================ */
