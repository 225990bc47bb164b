use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* -------------------------
   Status enums
--------------------------*/

/// Business lifecycle of a plan, independent from the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum PlanStatus {
    Draft = 0,
    Active = 1,
    Completed = 2,
    Cancelled = 3,
}

/// The approval gate: DRAFT -> PENDING_REVIEW -> {APPROVED | DRAFT}.
/// Rejection returns to DRAFT so the author can revise immediately; there is
/// no terminal REJECTED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum ApprovalStatus {
    Draft = 0,
    PendingReview = 1,
    Approved = 2,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Draft => "DRAFT",
            ApprovalStatus::PendingReview => "PENDING_REVIEW",
            ApprovalStatus::Approved => "APPROVED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum PhaseStatus {
    Active = 0,
    Completed = 1,
}

/// Item state machine states. Transition rules live in
/// `services::item_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum PlanItemStatus {
    Pending = 0,
    WaitingForPrerequisite = 1,
    ReadyForBooking = 2,
    Scheduled = 3,
    InProgress = 4,
    Completed = 5,
    Skipped = 6,
}

impl PlanItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanItemStatus::Pending => "PENDING",
            PlanItemStatus::WaitingForPrerequisite => "WAITING_FOR_PREREQUISITE",
            PlanItemStatus::ReadyForBooking => "READY_FOR_BOOKING",
            PlanItemStatus::Scheduled => "SCHEDULED",
            PlanItemStatus::InProgress => "IN_PROGRESS",
            PlanItemStatus::Completed => "COMPLETED",
            PlanItemStatus::Skipped => "SKIPPED",
        }
    }
}

/// Appointment statuses as the booking ledger reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that occupy the doctor's time and pin the linked item.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::CheckedIn | AppointmentStatus::InProgress
        )
    }
}

/// Payment state of an invoice as reported by the billing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoicePaymentStatus {
    PendingPayment,
    PartialPaid,
    Paid,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
pub enum AuditAction {
    PlanCreated = 0,
    SubmittedForReview = 1,
    ApprovalDecision = 2,
    ItemsAdded = 3,
    ItemUpdated = 4,
    ItemDeleted = 5,
}

/* -------------------------
   Entity graph
--------------------------*/

/// A patient's treatment program: the root of the phase/item tree.
///
/// `final_cost_cents` is derived; always go through
/// [`TreatmentPlan::recompute_final_cost`] after touching
/// `total_price_cents` or `discount_cents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentPlan {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub patient_id: Uuid,
    /// Authoring doctor; also the default doctor for auto-scheduling.
    pub created_by: Uuid,
    pub status: PlanStatus,
    pub approval_status: ApprovalStatus,
    pub total_price_cents: i64,
    /// Fixed currency amount, not a percentage.
    pub discount_cents: i64,
    pub final_cost_cents: i64,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    /// Approval or rejection notes from the most recent decision.
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phases: Vec<PlanPhase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPhase {
    pub phase_id: Uuid,
    pub phase_number: i32,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub completion_date: Option<NaiveDate>,
    pub items: Vec<PlanItem>,
}

/// One billable procedure instance; the unit the auto-scheduler operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub item_id: Uuid,
    pub service_id: Uuid,
    /// Unique increasing order within the phase, assigned at creation and
    /// never reused.
    pub sequence_number: i32,
    pub item_name: String,
    pub price_cents: i64,
    pub estimated_minutes: i32,
    pub status: PlanItemStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Append-only record of a state-changing action on a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAuditEntry {
    pub audit_id: Uuid,
    pub plan_id: Uuid,
    pub action: AuditAction,
    pub performed_by: Uuid,
    pub old_approval_status: ApprovalStatus,
    pub new_approval_status: ApprovalStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PlanAuditEntry {
    pub fn record(
        plan: &TreatmentPlan,
        action: AuditAction,
        performed_by: Uuid,
        old_approval_status: ApprovalStatus,
        notes: Option<String>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            plan_id: plan.plan_id,
            action,
            performed_by,
            old_approval_status,
            new_approval_status: plan.approval_status,
            notes,
            created_at: Utc::now(),
        }
    }
}

impl TreatmentPlan {
    pub fn recompute_final_cost(&mut self) {
        self.final_cost_cents = self.total_price_cents - self.discount_cents;
    }

    pub fn items(&self) -> impl Iterator<Item = &PlanItem> {
        self.phases.iter().flat_map(|p| p.items.iter())
    }

    pub fn has_any_item(&self) -> bool {
        self.phases.iter().any(|p| !p.items.is_empty())
    }

    pub fn phase_index(&self, phase_id: Uuid) -> Option<usize> {
        self.phases.iter().position(|p| p.phase_id == phase_id)
    }

    /// (phase index, item index) of an item anywhere in the tree.
    pub fn locate_item(&self, item_id: Uuid) -> Option<(usize, usize)> {
        for (pi, phase) in self.phases.iter().enumerate() {
            if let Some(ii) = phase.items.iter().position(|it| it.item_id == item_id) {
                return Some((pi, ii));
            }
        }
        None
    }

    pub fn item(&self, item_id: Uuid) -> Option<&PlanItem> {
        self.locate_item(item_id).map(|(pi, ii)| &self.phases[pi].items[ii])
    }
}

impl PlanPhase {
    pub fn next_sequence_number(&self) -> i32 {
        self.items.iter().map(|it| it.sequence_number).max().unwrap_or(0) + 1
    }

    pub fn all_items_settled(&self) -> bool {
        self.items
            .iter()
            .all(|it| matches!(it.status, PlanItemStatus::Completed | PlanItemStatus::Skipped))
    }
}
