//! Item status transitions and their cascading effects.
//!
//! The transition table is pure data; the service wraps it with the
//! appointment guard, the skip/unskip financial adjustment, next-item
//! activation and phase auto-completion, then persists the aggregate once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{BookingLedger, ClinicalRules, LinkedAppointment};
use crate::error::EngineError;
use crate::models::{PhaseStatus, PlanItemStatus, TreatmentPlan};
use crate::store::PlanStore;

/* ============================================================
   State machine
   ============================================================ */

/// Allowed next states per current state. Self-transitions are always
/// accepted (idempotent) and are not listed.
pub fn allowed_transitions(from: PlanItemStatus) -> &'static [PlanItemStatus] {
    use PlanItemStatus::*;
    match from {
        Pending => &[ReadyForBooking, Skipped, Completed],
        WaitingForPrerequisite => &[ReadyForBooking, Skipped],
        ReadyForBooking => &[Scheduled, Skipped, Completed],
        Scheduled => &[InProgress, Completed],
        InProgress => &[Completed],
        Skipped => &[ReadyForBooking, Completed],
        Completed => &[],
    }
}

pub fn is_valid_transition(from: PlanItemStatus, to: PlanItemStatus) -> bool {
    from == to || allowed_transitions(from).contains(&to)
}

/// Activation target for a PENDING item: services with unmet prerequisites
/// wait, everything else becomes bookable.
pub(crate) async fn activation_status(
    rules: &dyn ClinicalRules,
    service_id: Uuid,
) -> Result<PlanItemStatus, EngineError> {
    Ok(if rules.has_prerequisites(service_id).await? {
        PlanItemStatus::WaitingForPrerequisite
    } else {
        PlanItemStatus::ReadyForBooking
    })
}

/* ============================================================
   Requests / responses
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateItemStatusRequest {
    pub status: PlanItemStatus,
    pub notes: Option<String>,
    /// Completion time override; defaults to now when completing.
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialImpact {
    pub change_cents: i64,
    pub total_price_cents: i64,
    pub final_cost_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemStatusResponse {
    pub item_id: Uuid,
    pub sequence_number: i32,
    pub item_name: String,
    pub status: PlanItemStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub phase_id: Uuid,
    pub phase_completed: bool,
    /// Item auto-activated by this completion, if any.
    pub activated_next_item: Option<Uuid>,
    pub linked_appointments: Vec<LinkedAppointment>,
    pub financial_impact: Option<FinancialImpact>,
}

/* ============================================================
   Service
   ============================================================ */

pub struct ItemStatusService {
    store: Arc<dyn PlanStore>,
    ledger: Arc<dyn BookingLedger>,
    clinical_rules: Arc<dyn ClinicalRules>,
}

impl ItemStatusService {
    pub fn new(
        store: Arc<dyn PlanStore>,
        ledger: Arc<dyn BookingLedger>,
        clinical_rules: Arc<dyn ClinicalRules>,
    ) -> Self {
        Self { store, ledger, clinical_rules }
    }

    pub async fn update_item_status(
        &self,
        item_id: Uuid,
        actor_id: Uuid,
        request: UpdateItemStatusRequest,
    ) -> Result<ItemStatusResponse, EngineError> {
        let mut plan = self.store.plan_for_item(item_id).await?;
        let (pi, ii) = plan
            .locate_item(item_id)
            .ok_or_else(|| EngineError::item_not_found(item_id))?;

        let current = plan.phases[pi].items[ii].status;
        let target = request.status;

        tracing::info!(%item_id, from = current.as_str(), to = target.as_str(), "item status change requested");

        let linked = self.ledger.appointments_for_item(item_id).await?;

        // Idempotent self-transition: report current state, change nothing.
        if current == target {
            return Ok(self.build_response(&plan, pi, ii, false, None, None, linked));
        }

        if !is_valid_transition(current, target) {
            let allowed: Vec<&str> = allowed_transitions(current).iter().map(|s| s.as_str()).collect();
            return Err(EngineError::Conflict(
                "INVALID_STATUS_TRANSITION",
                format!(
                    "Invalid status transition: {} -> {}. Allowed transitions from {} are: [{}]",
                    current.as_str(),
                    target.as_str(),
                    current.as_str(),
                    allowed.join(", ")
                ),
            ));
        }

        // An item with a live appointment cannot be skipped; the caller
        // must cancel the appointment first.
        if target == PlanItemStatus::Skipped {
            let active = linked.iter().filter(|a| a.status.is_active()).count();
            if active > 0 {
                return Err(EngineError::Conflict(
                    "ITEM_HAS_ACTIVE_APPOINTMENT",
                    format!(
                        "Cannot skip item: {active} active appointment(s) found. Cancel the appointment(s) first."
                    ),
                ));
            }
        }

        // Financial impact is computed before the status flips.
        let price = plan.phases[pi].items[ii].price_cents;
        let mut financial = None;
        if current != PlanItemStatus::Skipped && target == PlanItemStatus::Skipped {
            plan.total_price_cents -= price;
            plan.recompute_final_cost();
            financial = Some(-price);
            tracing::info!(%item_id, price, "item skipped, plan totals reduced");
        } else if current == PlanItemStatus::Skipped && target == PlanItemStatus::ReadyForBooking {
            plan.total_price_cents += price;
            plan.recompute_final_cost();
            financial = Some(price);
            tracing::info!(%item_id, price, "item re-activated, plan totals restored");
        }

        plan.phases[pi].items[ii].status = target;
        plan.phases[pi].items[ii].completed_at = if target == PlanItemStatus::Completed {
            Some(request.completed_at.unwrap_or_else(Utc::now))
        } else {
            None
        };

        // Completing an item promotes its successor in the phase.
        let mut activated_next = None;
        if target == PlanItemStatus::Completed {
            let done_seq = plan.phases[pi].items[ii].sequence_number;
            let next = plan.phases[pi]
                .items
                .iter()
                .position(|it| it.sequence_number == done_seq + 1 && it.status == PlanItemStatus::Pending);
            if let Some(ni) = next {
                let service_id = plan.phases[pi].items[ni].service_id;
                let status = activation_status(self.clinical_rules.as_ref(), service_id).await?;
                plan.phases[pi].items[ni].status = status;
                activated_next = Some(plan.phases[pi].items[ni].item_id);
                tracing::info!(
                    next_item = %plan.phases[pi].items[ni].item_id,
                    status = status.as_str(),
                    "auto-activated next item in phase"
                );
            }
        }

        // Phase closes once every item is completed or skipped.
        if plan.phases[pi].all_items_settled() && plan.phases[pi].status != PhaseStatus::Completed {
            plan.phases[pi].status = PhaseStatus::Completed;
            plan.phases[pi].completion_date = Some(Utc::now().date_naive());
            tracing::info!(phase_id = %plan.phases[pi].phase_id, "phase auto-completed");
        }

        plan.updated_at = Utc::now();
        self.store.save_plan(&plan).await?;

        tracing::info!(
            %actor_id,
            %item_id,
            from = current.as_str(),
            to = target.as_str(),
            notes = request.notes.as_deref().unwrap_or(""),
            "item status changed"
        );

        Ok(self.build_response(&plan, pi, ii, true, financial, activated_next, linked))
    }

    fn build_response(
        &self,
        plan: &TreatmentPlan,
        pi: usize,
        ii: usize,
        changed: bool,
        financial_change: Option<i64>,
        activated_next_item: Option<Uuid>,
        linked_appointments: Vec<LinkedAppointment>,
    ) -> ItemStatusResponse {
        let phase = &plan.phases[pi];
        let item = &phase.items[ii];
        let financial_impact = if changed {
            financial_change.map(|change_cents| FinancialImpact {
                change_cents,
                total_price_cents: plan.total_price_cents,
                final_cost_cents: plan.final_cost_cents,
            })
        } else {
            None
        };
        ItemStatusResponse {
            item_id: item.item_id,
            sequence_number: item.sequence_number,
            item_name: item.item_name.clone(),
            status: item.status,
            completed_at: item.completed_at,
            phase_id: phase.phase_id,
            phase_completed: phase.status == PhaseStatus::Completed,
            activated_next_item,
            linked_appointments,
            financial_impact,
        }
    }
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::stubs::{StubClinicalRules, StubLedger};
    use crate::models::AppointmentStatus;
    use crate::services::fixtures::{init_tracing, item, phase, plan_shell, settle_totals};
    use crate::store::memory::MemoryPlanStore;

    use PlanItemStatus::*;

    #[test]
    fn transition_table_matches_the_rules() {
        assert!(is_valid_transition(Pending, ReadyForBooking));
        assert!(is_valid_transition(Pending, Skipped));
        assert!(is_valid_transition(Pending, Completed));
        assert!(is_valid_transition(ReadyForBooking, Scheduled));
        assert!(is_valid_transition(Scheduled, InProgress));
        assert!(is_valid_transition(Scheduled, Completed));
        assert!(is_valid_transition(InProgress, Completed));
        assert!(is_valid_transition(Skipped, ReadyForBooking));
        assert!(is_valid_transition(Skipped, Completed));
        assert!(is_valid_transition(WaitingForPrerequisite, ReadyForBooking));

        // Committed items cannot be skipped.
        assert!(!is_valid_transition(Scheduled, Skipped));
        assert!(!is_valid_transition(InProgress, Skipped));
        // Completed is terminal.
        assert!(!is_valid_transition(Completed, ReadyForBooking));
        assert!(!is_valid_transition(Completed, Skipped));
        // Idempotent self-transitions.
        assert!(is_valid_transition(Completed, Completed));
        assert!(is_valid_transition(Scheduled, Scheduled));
    }

    struct Setup {
        service: ItemStatusService,
        store: Arc<MemoryPlanStore>,
    }

    fn setup(ledger: StubLedger, rules: StubClinicalRules) -> Setup {
        let store = Arc::new(MemoryPlanStore::new());
        Setup {
            service: ItemStatusService::new(store.clone(), Arc::new(ledger), Arc::new(rules)),
            store,
        }
    }

    fn request(status: PlanItemStatus) -> UpdateItemStatusRequest {
        UpdateItemStatusRequest { status, notes: None, completed_at: None }
    }

    #[tokio::test]
    async fn skip_then_unskip_round_trips_the_totals() {
        init_tracing();
        let mut plan = plan_shell();
        plan.discount_cents = 5_000;
        let mut ph = phase(1);
        let mut it = item(1, 20_000);
        it.status = ReadyForBooking;
        let item_id = it.item_id;
        ph.items.push(it);
        ph.items.push(item(2, 30_000));
        plan.phases.push(ph);
        settle_totals(&mut plan);
        assert_eq!(plan.total_price_cents, 50_000);
        assert_eq!(plan.final_cost_cents, 45_000);

        let s = setup(StubLedger::default(), StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let actor = Uuid::new_v4();
        let resp = s.service.update_item_status(item_id, actor, request(Skipped)).await.unwrap();
        assert_eq!(resp.status, Skipped);
        let impact = resp.financial_impact.unwrap();
        assert_eq!(impact.change_cents, -20_000);
        assert_eq!(impact.total_price_cents, 30_000);
        assert_eq!(impact.final_cost_cents, 25_000);

        let resp = s.service.update_item_status(item_id, actor, request(ReadyForBooking)).await.unwrap();
        let impact = resp.financial_impact.unwrap();
        assert_eq!(impact.change_cents, 20_000);
        assert_eq!(impact.total_price_cents, 50_000);
        assert_eq!(impact.final_cost_cents, 45_000);

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.total_price_cents, 50_000);
        assert_eq!(stored.final_cost_cents, 45_000);
    }

    #[tokio::test]
    async fn skip_is_blocked_while_an_appointment_is_live() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut it = item(1, 10_000);
        it.status = ReadyForBooking;
        let item_id = it.item_id;
        ph.items.push(it);
        plan.phases.push(ph);
        settle_totals(&mut plan);

        let mut ledger = StubLedger::default();
        ledger.item_appointments.insert(
            item_id,
            vec![LinkedAppointment {
                appointment_id: Uuid::new_v4(),
                scheduled_at: "2026-08-10T09:00:00".parse().unwrap(),
                status: AppointmentStatus::Scheduled,
            }],
        );

        let s = setup(ledger, StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let err = s
            .service
            .update_item_status(item_id, Uuid::new_v4(), request(Skipped))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ITEM_HAS_ACTIVE_APPOINTMENT");
        assert!(err.to_string().contains("Cancel the appointment"));

        // Totals untouched by the failed precondition.
        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.total_price_cents, 10_000);
    }

    #[tokio::test]
    async fn completing_activates_the_next_pending_item() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut first = item(1, 10_000);
        first.status = InProgress;
        let first_id = first.item_id;
        let second = item(2, 15_000);
        let second_id = second.item_id;
        ph.items.push(first);
        ph.items.push(second);
        plan.phases.push(ph);
        settle_totals(&mut plan);

        let s = setup(StubLedger::default(), StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let resp = s
            .service
            .update_item_status(first_id, Uuid::new_v4(), request(Completed))
            .await
            .unwrap();
        assert_eq!(resp.status, Completed);
        assert!(resp.completed_at.is_some());
        assert_eq!(resp.activated_next_item, Some(second_id));

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.item(second_id).unwrap().status, ReadyForBooking);
        // Not every item settled: phase still open.
        assert!(!resp.phase_completed);
    }

    #[tokio::test]
    async fn next_item_with_prerequisites_waits() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut first = item(1, 10_000);
        first.status = Scheduled;
        let first_id = first.item_id;
        let second = item(2, 15_000);
        let gated_service = second.service_id;
        let second_id = second.item_id;
        ph.items.push(first);
        ph.items.push(second);
        plan.phases.push(ph);
        settle_totals(&mut plan);

        let mut rules = StubClinicalRules::default();
        rules.services_with_prerequisites.insert(gated_service);

        let s = setup(StubLedger::default(), rules);
        s.store.save_plan(&plan).await.unwrap();

        s.service
            .update_item_status(first_id, Uuid::new_v4(), request(Completed))
            .await
            .unwrap();

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.item(second_id).unwrap().status, WaitingForPrerequisite);
    }

    #[tokio::test]
    async fn settling_the_last_item_completes_the_phase() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut first = item(1, 10_000);
        first.status = Completed;
        first.completed_at = Some(Utc::now());
        let mut second = item(2, 15_000);
        second.status = ReadyForBooking;
        let second_id = second.item_id;
        ph.items.push(first);
        ph.items.push(second);
        plan.phases.push(ph);
        settle_totals(&mut plan);

        let s = setup(StubLedger::default(), StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let resp = s
            .service
            .update_item_status(second_id, Uuid::new_v4(), request(Skipped))
            .await
            .unwrap();
        assert!(resp.phase_completed);

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.phases[0].status, PhaseStatus::Completed);
        assert!(stored.phases[0].completion_date.is_some());
    }

    #[tokio::test]
    async fn completed_is_terminal_and_self_transition_is_a_no_op() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut it = item(1, 10_000);
        it.status = Completed;
        it.completed_at = Some(Utc::now());
        let item_id = it.item_id;
        ph.items.push(it);
        plan.phases.push(ph);
        settle_totals(&mut plan);

        let s = setup(StubLedger::default(), StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let err = s
            .service
            .update_item_status(item_id, Uuid::new_v4(), request(ReadyForBooking))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATUS_TRANSITION");
        assert!(err.to_string().contains("COMPLETED -> READY_FOR_BOOKING"));

        let resp = s
            .service
            .update_item_status(item_id, Uuid::new_v4(), request(Completed))
            .await
            .unwrap();
        assert_eq!(resp.status, Completed);
        assert!(resp.financial_impact.is_none());
    }

    #[tokio::test]
    async fn completing_a_skipped_item_does_not_restore_totals() {
        let mut plan = plan_shell();
        let mut ph = phase(1);
        let mut it = item(1, 20_000);
        it.status = Skipped;
        let item_id = it.item_id;
        ph.items.push(it);
        plan.phases.push(ph);
        // Skipped items are already out of the totals.
        plan.total_price_cents = 0;
        plan.recompute_final_cost();

        let s = setup(StubLedger::default(), StubClinicalRules::default());
        s.store.save_plan(&plan).await.unwrap();

        let resp = s
            .service
            .update_item_status(item_id, Uuid::new_v4(), request(Completed))
            .await
            .unwrap();
        assert!(resp.financial_impact.is_none());

        let stored = s.store.plan(plan.plan_id).await.unwrap();
        assert_eq!(stored.total_price_cents, 0);
    }
}
