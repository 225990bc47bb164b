//! Minimum-spacing validation between related procedures.
//!
//! Rules come from the clinical configuration (`SpacingRuleSource`) and are
//! checked against the patient's appointment history in the booking ledger.
//! When a service has no rule of its own, a default per-patient daily
//! booking cap applies instead.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use crate::collaborators::{BookingLedger, ServiceDefinition, SpacingRuleSource};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Result of a spacing check for one candidate date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpacingOutcome {
    Clear,
    Violation {
        /// Name of the violated rule, or `DAILY_LIMIT` for the default cap.
        rule_name: String,
        /// Earliest date the evaluator considers possibly legal.
        minimum_legal_date: NaiveDate,
    },
}

pub struct SpacingRuleEvaluator {
    rules: Arc<dyn SpacingRuleSource>,
    ledger: Arc<dyn BookingLedger>,
    patient_daily_limit: u32,
}

pub const DAILY_LIMIT_RULE: &str = "DAILY_LIMIT";

impl SpacingRuleEvaluator {
    pub fn new(rules: Arc<dyn SpacingRuleSource>, ledger: Arc<dyn BookingLedger>, config: &EngineConfig) -> Self {
        Self {
            rules,
            ledger,
            patient_daily_limit: config.patient_daily_limit,
        }
    }

    /// Validate `candidate` for the patient and service.
    ///
    /// Service-specific rules win over the daily cap: the cap is only
    /// consulted when the service has no rules at all.
    pub async fn check(
        &self,
        patient_id: uuid::Uuid,
        service: &ServiceDefinition,
        candidate: NaiveDate,
    ) -> Result<SpacingOutcome, EngineError> {
        let rules = self.rules.rules_for_service(service.service_id).await?;

        if rules.is_empty() {
            let booked = self.ledger.booking_count_for_patient_on(patient_id, candidate).await?;
            if booked >= self.patient_daily_limit {
                tracing::debug!(
                    %patient_id,
                    %candidate,
                    booked,
                    limit = self.patient_daily_limit,
                    "daily booking cap reached"
                );
                // The cap is per day, so the next day is the earliest date
                // that can possibly clear it.
                return Ok(SpacingOutcome::Violation {
                    rule_name: DAILY_LIMIT_RULE.to_string(),
                    minimum_legal_date: candidate + Duration::days(1),
                });
            }
            return Ok(SpacingOutcome::Clear);
        }

        for rule in rules {
            let last_visit = self
                .ledger
                .last_visit_for_services(patient_id, &rule.related_services)
                .await?;

            if let Some(last) = last_visit {
                let minimum = last + Duration::days(rule.min_interval_days);
                if candidate < minimum {
                    tracing::debug!(
                        %patient_id,
                        service = %service.service_code,
                        rule = %rule.rule_name,
                        %candidate,
                        %minimum,
                        "spacing rule violated"
                    );
                    return Ok(SpacingOutcome::Violation {
                        rule_name: rule.rule_name,
                        minimum_legal_date: minimum,
                    });
                }
            }
        }

        Ok(SpacingOutcome::Clear)
    }
}
