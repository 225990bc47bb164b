//! Appointment suggestions for booking-ready items of an approved plan.
//!
//! The scheduler never books anything: for each READY_FOR_BOOKING item it
//! proposes a date and a set of open slots, or reports a per-item failure
//! with a cause the caller can act on. One item failing never aborts the
//! rest of the batch.
//!
//! Per item: estimate a date, move it forward to the first day that is not
//! a weekend/holiday and has a doctor shift (bounded scan), apply spacing
//! rules, then search the shifts of the final date for conflict-free,
//! room-compatible slots.

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{
    BookingLedger, BookingWindow, HolidayCalendar, RoomDirectory, ServiceCatalog, ServiceDefinition,
    ShiftInterval, ShiftSource,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{AppointmentStatus, ApprovalStatus, PlanItem, PlanItemStatus, TreatmentPlan};
use crate::spacing::{SpacingOutcome, SpacingRuleEvaluator};
use crate::store::PlanStore;

/// Appointment statuses that occupy a doctor's calendar.
const BUSY_STATUSES: [AppointmentStatus; 3] = [
    AppointmentStatus::Scheduled,
    AppointmentStatus::CheckedIn,
    AppointmentStatus::InProgress,
];

/* ============================================================
   Estimated-date policy
   ============================================================ */

/// Source of the starting estimate for an item. Pluggable so the
/// position-based heuristic can be replaced by stored target dates.
pub trait EstimatedDatePolicy: Send + Sync {
    fn estimated_date(&self, base: NaiveDate, sequence_number: i32) -> NaiveDate;
}

/// Default heuristic: one interval per position in the sequence.
pub struct SequenceIntervalPolicy {
    pub interval_days: i64,
}

impl SequenceIntervalPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self { interval_days: config.estimate_interval_days }
    }
}

impl EstimatedDatePolicy for SequenceIntervalPolicy {
    fn estimated_date(&self, base: NaiveDate, sequence_number: i32) -> NaiveDate {
        base + Duration::days(self.interval_days * sequence_number as i64)
    }
}

/* ============================================================
   Requests / responses
   ============================================================ */

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutoScheduleRequest {
    /// Doctor to schedule with; defaults to the plan's author.
    pub doctor_id: Option<Uuid>,
    /// Skip the spacing pass entirely.
    pub force_schedule: bool,
    /// Base date for the estimate heuristic; defaults to today.
    pub schedule_from: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleFailure {
    /// No working day with a doctor shift inside the horizon.
    NoShift,
    /// Every candidate slot on the final date clashes with a booking.
    FullyBooked,
    /// No active room is equipped for the service.
    NoCompatibleRoom,
    /// Spacing rules still violated after re-adjustment.
    SpacingUnsatisfiable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppointmentSuggestion {
    pub item_id: Uuid,
    pub service_code: String,
    pub service_name: String,
    pub original_estimated_date: NaiveDate,
    pub suggested_date: Option<NaiveDate>,
    pub holiday_adjusted: bool,
    pub spacing_adjusted: bool,
    pub days_shifted: i64,
    pub adjustment_reason: Option<String>,
    pub available_slots: Vec<TimeSlot>,
    pub success: bool,
    pub failure_cause: Option<ScheduleFailure>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulingSummary {
    pub holiday_adjustments: u32,
    pub spacing_adjustments: u32,
    pub total_days_shifted: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoScheduleResponse {
    pub plan_id: Uuid,
    pub suggestions: Vec<AppointmentSuggestion>,
    pub total_items_processed: usize,
    pub successful_suggestions: usize,
    pub failed_items: usize,
    pub summary: SchedulingSummary,
}

/* ============================================================
   Service
   ============================================================ */

pub struct AutoScheduleService {
    store: Arc<dyn PlanStore>,
    catalog: Arc<dyn ServiceCatalog>,
    calendar: Arc<dyn HolidayCalendar>,
    shifts: Arc<dyn ShiftSource>,
    ledger: Arc<dyn BookingLedger>,
    rooms: Arc<dyn RoomDirectory>,
    spacing: SpacingRuleEvaluator,
    estimates: Arc<dyn EstimatedDatePolicy>,
    config: EngineConfig,
}

impl AutoScheduleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn PlanStore>,
        catalog: Arc<dyn ServiceCatalog>,
        calendar: Arc<dyn HolidayCalendar>,
        shifts: Arc<dyn ShiftSource>,
        ledger: Arc<dyn BookingLedger>,
        rooms: Arc<dyn RoomDirectory>,
        spacing: SpacingRuleEvaluator,
        estimates: Arc<dyn EstimatedDatePolicy>,
        config: EngineConfig,
    ) -> Self {
        Self { store, catalog, calendar, shifts, ledger, rooms, spacing, estimates, config }
    }

    /// Generate suggestions for every booking-ready item of the plan.
    /// Read-only: no item status or plan field is touched.
    pub async fn generate_suggestions(
        &self,
        plan_id: Uuid,
        request: AutoScheduleRequest,
    ) -> Result<AutoScheduleResponse, EngineError> {
        let plan = self.store.plan(plan_id).await?;

        if plan.approval_status != ApprovalStatus::Approved {
            return Err(EngineError::Conflict(
                "PLAN_NOT_APPROVED",
                "Appointment suggestions can only be generated for an APPROVED plan".into(),
            ));
        }

        let doctor_id = request.doctor_id.unwrap_or(plan.created_by);
        let base = request.schedule_from.unwrap_or_else(|| Utc::now().date_naive());

        let ready: Vec<PlanItem> = plan
            .phases
            .iter()
            .flat_map(|p| p.items.iter())
            .filter(|it| it.status == PlanItemStatus::ReadyForBooking)
            .cloned()
            .collect();

        if ready.is_empty() {
            tracing::warn!(%plan_id, "no items ready for booking");
        } else {
            tracing::info!(%plan_id, count = ready.len(), %doctor_id, "generating appointment suggestions");
        }

        let mut summary = SchedulingSummary::default();
        let mut suggestions = Vec::with_capacity(ready.len());

        for item in &ready {
            let original = self.estimates.estimated_date(base, item.sequence_number);
            let suggestion = match self
                .suggest_for_item(&plan, item, doctor_id, original, &request, &mut summary)
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    // A collaborator failure stays scoped to the item.
                    tracing::error!(item_id = %item.item_id, error = %e, "suggestion generation failed");
                    let (code, name) = match self.catalog.service_by_id(item.service_id).await {
                        Ok(Some(s)) => (s.service_code, s.service_name),
                        _ => ("UNKNOWN".to_string(), "Unknown service".to_string()),
                    };
                    AppointmentSuggestion {
                        item_id: item.item_id,
                        service_code: code,
                        service_name: name,
                        original_estimated_date: original,
                        suggested_date: None,
                        holiday_adjusted: false,
                        spacing_adjusted: false,
                        days_shifted: 0,
                        adjustment_reason: None,
                        available_slots: vec![],
                        success: false,
                        failure_cause: None,
                        error_message: Some(e.to_string()),
                    }
                }
            };
            suggestions.push(suggestion);
        }

        let successful = suggestions.iter().filter(|s| s.success).count();
        let failed = suggestions.len() - successful;
        tracing::info!(%plan_id, successful, failed, "auto-schedule completed");

        Ok(AutoScheduleResponse {
            plan_id,
            total_items_processed: ready.len(),
            successful_suggestions: successful,
            failed_items: failed,
            suggestions,
            summary,
        })
    }

    async fn suggest_for_item(
        &self,
        plan: &TreatmentPlan,
        item: &PlanItem,
        doctor_id: Uuid,
        original: NaiveDate,
        request: &AutoScheduleRequest,
        summary: &mut SchedulingSummary,
    ) -> Result<AppointmentSuggestion, EngineError> {
        let service = self
            .catalog
            .service_by_id(item.service_id)
            .await?
            .ok_or_else(|| EngineError::service_not_found(&item.service_id.to_string()))?;

        let mut draft = Draft::new(item, &service, original);

        // Date adjustment pass: first day that is a working day AND has a
        // doctor shift, scanning at most the configured horizon.
        let Some(mut date) = self.first_workable_day(original, doctor_id).await? else {
            let message = format!(
                "No working day with a shift for the doctor within {} days of {}",
                self.config.scheduling_horizon_days, original
            );
            draft.reasons.push(self.blocked_day_reason(original).await?);
            return Ok(draft.fail(ScheduleFailure::NoShift, message, None));
        };

        if date != original {
            draft.holiday_adjusted = true;
            summary.holiday_adjustments += 1;
            draft.reasons.push(self.blocked_day_reason(original).await?);
            tracing::debug!(item_id = %item.item_id, %original, adjusted = %date, "date moved to a workable day");
        }

        // Spacing pass, unless explicitly forced past it.
        if !request.force_schedule {
            if let SpacingOutcome::Violation { rule_name, minimum_legal_date } =
                self.spacing.check(plan.patient_id, &service, date).await?
            {
                draft.spacing_adjusted = true;
                summary.spacing_adjustments += 1;
                draft.reasons.push(format!("spacing rule {rule_name}"));

                let Some(moved) = self.first_workable_day(minimum_legal_date, doctor_id).await? else {
                    let message = format!(
                        "No working day with a shift for the doctor within {} days of {}",
                        self.config.scheduling_horizon_days, minimum_legal_date
                    );
                    return Ok(draft.fail(ScheduleFailure::NoShift, message, None));
                };

                if let SpacingOutcome::Violation { rule_name, .. } =
                    self.spacing.check(plan.patient_id, &service, moved).await?
                {
                    let message =
                        format!("Spacing rule {rule_name} cannot be satisfied at {moved} for this patient");
                    return Ok(draft.fail(ScheduleFailure::SpacingUnsatisfiable, message, Some(moved)));
                }

                tracing::debug!(item_id = %item.item_id, from = %date, to = %moved, "date moved by spacing rules");
                date = moved;
            }
        }

        // A slot only counts if an equipped, active room exists.
        let supporting = self.rooms.rooms_supporting(service.service_id).await?;
        let active_rooms = self.rooms.active_rooms_among(&supporting).await?;
        if active_rooms.is_empty() {
            let message = format!(
                "No active room is equipped for service {} on {date}",
                service.service_code
            );
            return Ok(draft.fail(ScheduleFailure::NoCompatibleRoom, message, Some(date)));
        }

        // Slot search across the doctor's shifts on the final date.
        let shifts = self.shifts.shifts_on(doctor_id, date).await?;
        let mut slots = Vec::new();
        for shift in &shifts {
            let busy = self
                .ledger
                .bookings_in(
                    doctor_id,
                    date.and_time(shift.start),
                    date.and_time(shift.end),
                    &BUSY_STATUSES,
                )
                .await?;
            slots.extend(candidate_slots(
                date,
                *shift,
                service.default_duration_minutes as i64,
                self.config.slot_stride_minutes as i64,
                &busy,
            ));
        }

        if slots.is_empty() {
            let message = format!(
                "All slots within the doctor's shifts on {date} are taken; pick another day or doctor"
            );
            return Ok(draft.fail(ScheduleFailure::FullyBooked, message, Some(date)));
        }

        let days_shifted = (date - original).num_days();
        if days_shifted > 0 {
            summary.total_days_shifted += days_shifted;
        }

        Ok(draft.succeed(date, days_shifted, slots))
    }

    async fn first_workable_day(
        &self,
        from: NaiveDate,
        doctor_id: Uuid,
    ) -> Result<Option<NaiveDate>, EngineError> {
        let mut day = from;
        for _ in 0..self.config.scheduling_horizon_days {
            if !is_weekend(day)
                && !self.calendar.is_holiday(day).await?
                && !self.shifts.shifts_on(doctor_id, day).await?.is_empty()
            {
                return Ok(Some(day));
            }
            day += Duration::days(1);
        }
        Ok(None)
    }

    /// Why the original estimate could not be kept, named from the estimate
    /// itself: weekend, holiday, or a missing shift.
    async fn blocked_day_reason(&self, date: NaiveDate) -> Result<String, EngineError> {
        let mut reasons = Vec::new();
        if is_weekend(date) {
            reasons.push("weekend".to_string());
        }
        if self.calendar.is_holiday(date).await? {
            reasons.push(format!("holiday on {date}"));
        }
        if reasons.is_empty() {
            reasons.push("no doctor shift".to_string());
        }
        Ok(reasons.join("; "))
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Fixed-stride candidate starts across one shift, keeping only windows
/// that fit before the shift ends and clash with no busy booking.
fn candidate_slots(
    date: NaiveDate,
    shift: ShiftInterval,
    duration_minutes: i64,
    stride_minutes: i64,
    busy: &[BookingWindow],
) -> Vec<TimeSlot> {
    let mut slots = Vec::new();
    let shift_end = date.and_time(shift.end);
    let duration = Duration::minutes(duration_minutes);
    let stride = Duration::minutes(stride_minutes.max(1));

    let mut cursor = date.and_time(shift.start);
    while cursor + duration <= shift_end {
        let end = cursor + duration;
        let clash = busy.iter().any(|b| cursor < b.end && end > b.start);
        if !clash {
            slots.push(TimeSlot { start: cursor.time(), end: end.time() });
        }
        cursor += stride;
    }
    slots
}

/// Suggestion under construction; collapses into a success or a failure.
struct Draft {
    item_id: Uuid,
    service_code: String,
    service_name: String,
    original: NaiveDate,
    holiday_adjusted: bool,
    spacing_adjusted: bool,
    reasons: Vec<String>,
}

impl Draft {
    fn new(item: &PlanItem, service: &ServiceDefinition, original: NaiveDate) -> Self {
        Self {
            item_id: item.item_id,
            service_code: service.service_code.clone(),
            service_name: service.service_name.clone(),
            original,
            holiday_adjusted: false,
            spacing_adjusted: false,
            reasons: Vec::new(),
        }
    }

    fn reason(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }

    fn fail(self, cause: ScheduleFailure, message: String, suggested: Option<NaiveDate>) -> AppointmentSuggestion {
        AppointmentSuggestion {
            item_id: self.item_id,
            service_code: self.service_code.clone(),
            service_name: self.service_name.clone(),
            original_estimated_date: self.original,
            suggested_date: suggested,
            holiday_adjusted: self.holiday_adjusted,
            spacing_adjusted: self.spacing_adjusted,
            days_shifted: 0,
            adjustment_reason: self.reason(),
            available_slots: vec![],
            success: false,
            failure_cause: Some(cause),
            error_message: Some(message),
        }
    }

    fn succeed(self, date: NaiveDate, days_shifted: i64, slots: Vec<TimeSlot>) -> AppointmentSuggestion {
        AppointmentSuggestion {
            item_id: self.item_id,
            service_code: self.service_code.clone(),
            service_name: self.service_name.clone(),
            original_estimated_date: self.original,
            suggested_date: Some(date),
            holiday_adjusted: self.holiday_adjusted,
            spacing_adjusted: self.spacing_adjusted,
            days_shifted,
            adjustment_reason: self.reason(),
            available_slots: slots,
            success: true,
            failure_cause: None,
            error_message: None,
        }
    }
}

/* ============================================================
   Tests
   ============================================================ */
