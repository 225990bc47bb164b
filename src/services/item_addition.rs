//! Adding items to a phase of an existing plan.
//!
//! Any cost change invalidates a previous review, so a successful addition
//! always pushes the plan back to PENDING_REVIEW, whatever the amount.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::ServiceCatalog;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    ApprovalStatus, AuditAction, PhaseStatus, PlanAuditEntry, PlanItem, PlanItemStatus, PlanStatus,
};
use crate::store::PlanStore;

#[derive(Debug, Clone, Deserialize)]
pub struct AddItemLine {
    pub service_code: String,
    /// Requested price per expanded item; must stay within the band around
    /// the catalog default.
    pub price_cents: i64,
    pub quantity: u32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedItem {
    pub item_id: Uuid,
    pub sequence_number: i32,
    pub item_name: String,
    pub service_code: String,
    pub service_id: Uuid,
    pub price_cents: i64,
    pub estimated_minutes: i32,
    pub status: PlanItemStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdditionFinancialImpact {
    pub total_added_cents: i64,
    pub total_price_before_cents: i64,
    pub total_price_after_cents: i64,
    pub final_cost_before_cents: i64,
    pub final_cost_after_cents: i64,
    pub discount_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddItemsResponse {
    pub items: Vec<CreatedItem>,
    pub financial_impact: AdditionFinancialImpact,
    pub old_approval_status: ApprovalStatus,
    pub new_approval_status: ApprovalStatus,
}

pub struct ItemAdditionService {
    store: Arc<dyn PlanStore>,
    catalog: Arc<dyn ServiceCatalog>,
    config: EngineConfig,
}

impl ItemAdditionService {
    pub fn new(store: Arc<dyn PlanStore>, catalog: Arc<dyn ServiceCatalog>, config: EngineConfig) -> Self {
        Self { store, catalog, config }
    }

    pub async fn add_items(
        &self,
        phase_id: Uuid,
        actor_id: Uuid,
        lines: Vec<AddItemLine>,
    ) -> Result<AddItemsResponse, EngineError> {
        if lines.is_empty() {
            return Err(EngineError::Validation(
                "NO_ITEMS_REQUESTED",
                "At least one item line is required".into(),
            ));
        }
        for line in &lines {
            if line.quantity == 0 {
                return Err(EngineError::Validation(
                    "INVALID_QUANTITY",
                    format!("Quantity must be at least 1 for service {}", line.service_code),
                ));
            }
        }

        let mut plan = self.store.plan_for_phase(phase_id).await?;
        let pi = plan
            .phase_index(phase_id)
            .ok_or_else(|| EngineError::phase_not_found(phase_id))?;

        if plan.phases[pi].status == PhaseStatus::Completed {
            return Err(EngineError::Conflict(
                "PHASE_COMPLETED",
                "Cannot add items to a completed phase".into(),
            ));
        }

        if matches!(
            plan.approval_status,
            ApprovalStatus::Approved | ApprovalStatus::PendingReview
        ) {
            return Err(EngineError::Conflict(
                "PLAN_LOCKED_CANNOT_ADD",
                format!(
                    "Cannot add items to a plan that is {}. Reject it back to DRAFT first",
                    plan.approval_status.as_str()
                ),
            ));
        }

        if matches!(plan.status, PlanStatus::Completed | PlanStatus::Cancelled) {
            return Err(EngineError::Conflict(
                "PLAN_CLOSED",
                format!("Cannot add items to a {:?} plan", plan.status),
            ));
        }

        // Resolve and validate every line before touching the plan, so a
        // failed precondition leaves stored totals untouched.
        let mut resolved = Vec::with_capacity(lines.len());
        for line in &lines {
            let service = self
                .catalog
                .service_by_code(&line.service_code)
                .await?
                .ok_or_else(|| EngineError::service_not_found(&line.service_code))?;

            if !service.is_active {
                return Err(EngineError::Validation(
                    "SERVICE_INACTIVE",
                    format!("Service is not active: {}", line.service_code),
                ));
            }

            self.validate_price_band(line.price_cents, &service.service_code, service.price_cents)?;
            resolved.push(service);
        }

        let mut next_sequence = plan.phases[pi].next_sequence_number();
        let mut created = Vec::new();
        let mut total_added: i64 = 0;

        for (line, service) in lines.iter().zip(resolved.iter()) {
            for n in 1..=line.quantity {
                let item_name = if line.quantity > 1 {
                    format!("{} (additional {n})", service.service_name)
                } else {
                    format!("{} (additional)", service.service_name)
                };

                let item = PlanItem {
                    item_id: Uuid::new_v4(),
                    service_id: service.service_id,
                    sequence_number: next_sequence,
                    item_name: item_name.clone(),
                    price_cents: line.price_cents,
                    estimated_minutes: service.default_duration_minutes,
                    status: PlanItemStatus::Pending,
                    completed_at: None,
                };
                next_sequence += 1;
                total_added += line.price_cents;

                created.push(CreatedItem {
                    item_id: item.item_id,
                    sequence_number: item.sequence_number,
                    item_name,
                    service_code: service.service_code.clone(),
                    service_id: service.service_id,
                    price_cents: item.price_cents,
                    estimated_minutes: item.estimated_minutes,
                    status: item.status,
                });
                plan.phases[pi].items.push(item);
            }
        }

        let total_before = plan.total_price_cents;
        let final_before = plan.final_cost_cents;
        plan.total_price_cents += total_added;
        plan.recompute_final_cost();

        let old_approval_status = plan.approval_status;
        plan.approval_status = ApprovalStatus::PendingReview;
        plan.updated_at = Utc::now();

        self.store.save_plan(&plan).await?;

        let entry = PlanAuditEntry::record(
            &plan,
            AuditAction::ItemsAdded,
            actor_id,
            old_approval_status,
            Some(format!(
                "Added {} item(s) to phase {}: +{}",
                created.len(),
                plan.phases[pi].phase_number,
                total_added
            )),
        );
        self.store.append_audit(&entry).await?;

        tracing::info!(
            plan_id = %plan.plan_id,
            %phase_id,
            %actor_id,
            count = created.len(),
            total_added,
            "items added, plan returned to PENDING_REVIEW"
        );

        Ok(AddItemsResponse {
            items: created,
            financial_impact: AdditionFinancialImpact {
                total_added_cents: total_added,
                total_price_before_cents: total_before,
                total_price_after_cents: plan.total_price_cents,
                final_cost_before_cents: final_before,
                final_cost_after_cents: plan.final_cost_cents,
                discount_cents: plan.discount_cents,
            },
            old_approval_status,
            new_approval_status: plan.approval_status,
        })
    }

    /// Requested prices may deviate from the catalog default only within
    /// the configured band; anything outside is treated as a data-entry
    /// error or abuse.
    fn validate_price_band(
        &self,
        requested_cents: i64,
        service_code: &str,
        catalog_cents: i64,
    ) -> Result<(), EngineError> {
        let band = self.config.price_band_percent as i64;
        let min = catalog_cents * (100 - band) / 100;
        let max = catalog_cents * (100 + band) / 100;

        if requested_cents < min || requested_cents > max {
            return Err(EngineError::Validation(
                "PRICE_OUT_OF_BAND",
                format!(
                    "Price {requested_cents} for service {service_code} is outside the allowed range \
                     ({min} - {max}); catalog default is {catalog_cents}"
                ),
            ));
        }
        Ok(())
    }
}

/* ============================================================
   Tests
   ============================================================ */
