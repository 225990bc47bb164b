//! Narrow synchronous interfaces onto the rest of the clinic system.
//!
//! The engine never talks to the holiday calendar, staffing, booking,
//! room, clinical-rule or billing subsystems directly; it goes through
//! these traits. None of the calls are retried here: a failure surfaces
//! as an item-level or operation-level error at the call site.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{AppointmentStatus, InvoicePaymentStatus, TreatmentPlan};

/* ============================================================
   Carrier types
   ============================================================ */

/// One work interval of a doctor's day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShiftInterval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// An occupied window in a doctor's calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookingWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// An appointment already tied to a plan item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAppointment {
    pub appointment_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub status: AppointmentStatus,
}

/// Catalog entry for a billable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub service_id: Uuid,
    pub service_code: String,
    pub service_name: String,
    /// Catalog default price; item prices may deviate within the band.
    pub price_cents: i64,
    pub default_duration_minutes: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice_id: Uuid,
    pub status: InvoicePaymentStatus,
}

/// Minimum-interval constraint between related procedures for one patient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpacingRule {
    pub rule_name: String,
    /// The rule family: appointments for any of these services count.
    pub related_services: Vec<Uuid>,
    pub min_interval_days: i64,
}

/* ============================================================
   Collaborator traits
   ============================================================ */

#[async_trait]
pub trait HolidayCalendar: Send + Sync {
    async fn is_holiday(&self, date: NaiveDate) -> Result<bool, EngineError>;
    /// The given date, or the next date that is neither weekend nor holiday.
    async fn next_working_day(&self, date: NaiveDate) -> Result<NaiveDate, EngineError>;
}

#[async_trait]
pub trait ShiftSource: Send + Sync {
    async fn shifts_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<ShiftInterval>, EngineError>;
}

#[async_trait]
pub trait BookingLedger: Send + Sync {
    /// Appointments of the doctor overlapping the window, restricted to the
    /// given statuses.
    async fn bookings_in(
        &self,
        doctor_id: Uuid,
        from: NaiveDateTime,
        to: NaiveDateTime,
        statuses: &[AppointmentStatus],
    ) -> Result<Vec<BookingWindow>, EngineError>;

    /// All appointments ever linked to a plan item, newest first.
    async fn appointments_for_item(&self, item_id: Uuid) -> Result<Vec<LinkedAppointment>, EngineError>;

    /// Date of the patient's most recent appointment for any of the given
    /// services, if there is one.
    async fn last_visit_for_services(
        &self,
        patient_id: Uuid,
        service_ids: &[Uuid],
    ) -> Result<Option<NaiveDate>, EngineError>;

    /// How many appointments the patient already has on the date.
    async fn booking_count_for_patient_on(&self, patient_id: Uuid, date: NaiveDate)
        -> Result<u32, EngineError>;
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn rooms_supporting(&self, service_id: Uuid) -> Result<Vec<Uuid>, EngineError>;
    async fn active_rooms_among(&self, room_ids: &[Uuid]) -> Result<Vec<Uuid>, EngineError>;
}

#[async_trait]
pub trait ClinicalRules: Send + Sync {
    async fn has_prerequisites(&self, service_id: Uuid) -> Result<bool, EngineError>;
}

#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn service_by_code(&self, service_code: &str) -> Result<Option<ServiceDefinition>, EngineError>;
    async fn service_by_id(&self, service_id: Uuid) -> Result<Option<ServiceDefinition>, EngineError>;
}

#[async_trait]
pub trait SpacingRuleSource: Send + Sync {
    async fn rules_for_service(&self, service_id: Uuid) -> Result<Vec<SpacingRule>, EngineError>;
}

#[async_trait]
pub trait InvoiceGateway: Send + Sync {
    async fn issue_for_approved_plan(&self, plan: &TreatmentPlan) -> Result<(), EngineError>;
    async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<(), EngineError>;
    /// Supplemental invoice for a price delta on an already-billed plan.
    /// Negative deltas represent reductions.
    async fn create_supplemental(
        &self,
        plan: &TreatmentPlan,
        amount_delta_cents: i64,
        reason: &str,
    ) -> Result<(), EngineError>;
    async fn invoices_for_plan(&self, plan_id: Uuid) -> Result<Vec<InvoiceSummary>, EngineError>;
}

/* ============================================================
   Test stubs
   ============================================================ */

#[cfg(test)]
pub(crate) mod stubs {
    use super::*;
    use chrono::{Datelike, Weekday};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// Calendar with a fixed holiday set; weekends are Saturday/Sunday.
    #[derive(Default)]
    pub struct FixedCalendar {
        pub holidays: HashSet<NaiveDate>,
    }

    #[async_trait]
    impl HolidayCalendar for FixedCalendar {
        async fn is_holiday(&self, date: NaiveDate) -> Result<bool, EngineError> {
            Ok(self.holidays.contains(&date))
        }

        async fn next_working_day(&self, date: NaiveDate) -> Result<NaiveDate, EngineError> {
            let mut d = date;
            while matches!(d.weekday(), Weekday::Sat | Weekday::Sun) || self.holidays.contains(&d) {
                d = d.succ_opt().expect("date overflow");
            }
            Ok(d)
        }
    }

    #[derive(Default)]
    pub struct StaticShifts {
        pub shifts: HashMap<(Uuid, NaiveDate), Vec<ShiftInterval>>,
    }

    impl StaticShifts {
        pub fn with_shift(mut self, doctor_id: Uuid, date: NaiveDate, start: &str, end: &str) -> Self {
            self.shifts.entry((doctor_id, date)).or_default().push(ShiftInterval {
                start: start.parse().unwrap(),
                end: end.parse().unwrap(),
            });
            self
        }
    }

    #[async_trait]
    impl ShiftSource for StaticShifts {
        async fn shifts_on(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Vec<ShiftInterval>, EngineError> {
            Ok(self.shifts.get(&(doctor_id, date)).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    pub struct StubLedger {
        pub doctor_bookings: Vec<(Uuid, BookingWindow, AppointmentStatus)>,
        pub item_appointments: HashMap<Uuid, Vec<LinkedAppointment>>,
        /// (patient, service, date) visit history for spacing checks.
        pub visits: Vec<(Uuid, Uuid, NaiveDate)>,
        pub daily_counts: HashMap<(Uuid, NaiveDate), u32>,
    }

    #[async_trait]
    impl BookingLedger for StubLedger {
        async fn bookings_in(
            &self,
            doctor_id: Uuid,
            from: NaiveDateTime,
            to: NaiveDateTime,
            statuses: &[AppointmentStatus],
        ) -> Result<Vec<BookingWindow>, EngineError> {
            Ok(self
                .doctor_bookings
                .iter()
                .filter(|(d, w, s)| *d == doctor_id && w.start < to && w.end > from && statuses.contains(s))
                .map(|(_, w, _)| *w)
                .collect())
        }

        async fn appointments_for_item(&self, item_id: Uuid) -> Result<Vec<LinkedAppointment>, EngineError> {
            Ok(self.item_appointments.get(&item_id).cloned().unwrap_or_default())
        }

        async fn last_visit_for_services(
            &self,
            patient_id: Uuid,
            service_ids: &[Uuid],
        ) -> Result<Option<NaiveDate>, EngineError> {
            Ok(self
                .visits
                .iter()
                .filter(|(p, s, _)| *p == patient_id && service_ids.contains(s))
                .map(|(_, _, d)| *d)
                .max())
        }

        async fn booking_count_for_patient_on(
            &self,
            patient_id: Uuid,
            date: NaiveDate,
        ) -> Result<u32, EngineError> {
            Ok(self.daily_counts.get(&(patient_id, date)).copied().unwrap_or(0))
        }
    }

    #[derive(Default)]
    pub struct StubRooms {
        pub supporting: HashMap<Uuid, Vec<Uuid>>,
        pub active: HashSet<Uuid>,
    }

    #[async_trait]
    impl RoomDirectory for StubRooms {
        async fn rooms_supporting(&self, service_id: Uuid) -> Result<Vec<Uuid>, EngineError> {
            Ok(self.supporting.get(&service_id).cloned().unwrap_or_default())
        }

        async fn active_rooms_among(&self, room_ids: &[Uuid]) -> Result<Vec<Uuid>, EngineError> {
            Ok(room_ids.iter().copied().filter(|r| self.active.contains(r)).collect())
        }
    }

    #[derive(Default)]
    pub struct StubClinicalRules {
        pub services_with_prerequisites: HashSet<Uuid>,
    }

    #[async_trait]
    impl ClinicalRules for StubClinicalRules {
        async fn has_prerequisites(&self, service_id: Uuid) -> Result<bool, EngineError> {
            Ok(self.services_with_prerequisites.contains(&service_id))
        }
    }

    #[derive(Default)]
    pub struct StubCatalog {
        pub services: Vec<ServiceDefinition>,
    }

    impl StubCatalog {
        pub fn with_service(mut self, service: ServiceDefinition) -> Self {
            self.services.push(service);
            self
        }
    }

    #[async_trait]
    impl ServiceCatalog for StubCatalog {
        async fn service_by_code(&self, service_code: &str) -> Result<Option<ServiceDefinition>, EngineError> {
            Ok(self.services.iter().find(|s| s.service_code == service_code).cloned())
        }

        async fn service_by_id(&self, service_id: Uuid) -> Result<Option<ServiceDefinition>, EngineError> {
            Ok(self.services.iter().find(|s| s.service_id == service_id).cloned())
        }
    }

    #[derive(Default)]
    pub struct StubSpacingRules {
        pub rules: HashMap<Uuid, Vec<SpacingRule>>,
    }

    #[async_trait]
    impl SpacingRuleSource for StubSpacingRules {
        async fn rules_for_service(&self, service_id: Uuid) -> Result<Vec<SpacingRule>, EngineError> {
            Ok(self.rules.get(&service_id).cloned().unwrap_or_default())
        }
    }

    /// Records every billing call so tests can assert on the traffic.
    #[derive(Default)]
    pub struct RecordingInvoiceGateway {
        pub existing: Mutex<Vec<InvoiceSummary>>,
        pub issued_for: Mutex<Vec<Uuid>>,
        pub cancelled: Mutex<Vec<Uuid>>,
        pub supplementals: Mutex<Vec<(Uuid, i64, String)>>,
        pub fail_issuance: bool,
    }

    #[async_trait]
    impl InvoiceGateway for RecordingInvoiceGateway {
        async fn issue_for_approved_plan(&self, plan: &TreatmentPlan) -> Result<(), EngineError> {
            if self.fail_issuance {
                return Err(EngineError::Collaborator("billing unavailable".into()));
            }
            self.issued_for.lock().unwrap().push(plan.plan_id);
            Ok(())
        }

        async fn cancel_invoice(&self, invoice_id: Uuid) -> Result<(), EngineError> {
            self.cancelled.lock().unwrap().push(invoice_id);
            let mut existing = self.existing.lock().unwrap();
            for inv in existing.iter_mut() {
                if inv.invoice_id == invoice_id {
                    inv.status = InvoicePaymentStatus::Cancelled;
                }
            }
            Ok(())
        }

        async fn create_supplemental(
            &self,
            plan: &TreatmentPlan,
            amount_delta_cents: i64,
            reason: &str,
        ) -> Result<(), EngineError> {
            self.supplementals
                .lock()
                .unwrap()
                .push((plan.plan_id, amount_delta_cents, reason.to_string()));
            Ok(())
        }

        async fn invoices_for_plan(&self, _plan_id: Uuid) -> Result<Vec<InvoiceSummary>, EngineError> {
            Ok(self.existing.lock().unwrap().clone())
        }
    }
}
