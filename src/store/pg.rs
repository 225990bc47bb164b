//! Postgres-backed `PlanStore`.
//!
//! Tables: `treatment_plan`, `plan_phase`, `plan_item`, `plan_audit_log`.
//! Schema creation is owned by the wider system's migrations; this module
//! only reads and writes. `save_plan` runs in one transaction so a plan's
//! financial totals can never be observed half-updated.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    ApprovalStatus, AuditAction, PhaseStatus, PlanAuditEntry, PlanItem, PlanItemStatus, PlanPhase,
    PlanStatus, TreatmentPlan,
};
use crate::store::PlanStore;

pub async fn connect_pg(database_url: &str) -> Result<PgPool, EngineError> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(db_err)
}

pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/* -------------------------
   Row models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    plan_id: Uuid,
    plan_name: String,
    patient_id: Uuid,
    created_by: Uuid,
    status: PlanStatus,
    approval_status: ApprovalStatus,
    total_price_cents: i64,
    discount_cents: i64,
    final_cost_cents: i64,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    review_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PhaseRow {
    phase_id: Uuid,
    phase_number: i32,
    phase_name: String,
    status: PhaseStatus,
    completion_date: Option<NaiveDate>,
}

#[derive(Debug, sqlx::FromRow)]
struct ItemRow {
    item_id: Uuid,
    phase_id: Uuid,
    service_id: Uuid,
    sequence_number: i32,
    item_name: String,
    price_cents: i64,
    estimated_minutes: i32,
    status: PlanItemStatus,
    completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    audit_id: Uuid,
    plan_id: Uuid,
    action: AuditAction,
    performed_by: Uuid,
    old_approval_status: ApprovalStatus,
    new_approval_status: ApprovalStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for PlanAuditEntry {
    fn from(r: AuditRow) -> Self {
        PlanAuditEntry {
            audit_id: r.audit_id,
            plan_id: r.plan_id,
            action: r.action,
            performed_by: r.performed_by,
            old_approval_status: r.old_approval_status,
            new_approval_status: r.new_approval_status,
            notes: r.notes,
            created_at: r.created_at,
        }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn plan(&self, plan_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT
              plan_id, plan_name, patient_id, created_by,
              status, approval_status,
              total_price_cents, discount_cents, final_cost_cents,
              approved_by, approved_at, review_notes,
              created_at, updated_at
            FROM treatment_plan
            WHERE plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Err(EngineError::plan_not_found(plan_id));
        };

        let phase_rows = sqlx::query_as::<_, PhaseRow>(
            r#"
            SELECT phase_id, phase_number, phase_name, status, completion_date
            FROM plan_phase
            WHERE plan_id = $1
            ORDER BY phase_number ASC
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let item_rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT
              i.item_id, i.phase_id, i.service_id, i.sequence_number,
              i.item_name, i.price_cents, i.estimated_minutes,
              i.status, i.completed_at
            FROM plan_item i
            JOIN plan_phase p ON p.phase_id = i.phase_id
            WHERE p.plan_id = $1
            ORDER BY i.sequence_number ASC
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let phases = phase_rows
            .into_iter()
            .map(|p| {
                let items = item_rows
                    .iter()
                    .filter(|i| i.phase_id == p.phase_id)
                    .map(|i| PlanItem {
                        item_id: i.item_id,
                        service_id: i.service_id,
                        sequence_number: i.sequence_number,
                        item_name: i.item_name.clone(),
                        price_cents: i.price_cents,
                        estimated_minutes: i.estimated_minutes,
                        status: i.status,
                        completed_at: i.completed_at,
                    })
                    .collect();
                PlanPhase {
                    phase_id: p.phase_id,
                    phase_number: p.phase_number,
                    phase_name: p.phase_name,
                    status: p.status,
                    completion_date: p.completion_date,
                    items,
                }
            })
            .collect();

        Ok(TreatmentPlan {
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            patient_id: row.patient_id,
            created_by: row.created_by,
            status: row.status,
            approval_status: row.approval_status,
            total_price_cents: row.total_price_cents,
            discount_cents: row.discount_cents,
            final_cost_cents: row.final_cost_cents,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            review_notes: row.review_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
            phases,
        })
    }

    async fn plan_for_phase(&self, phase_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        let plan_id: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT plan_id FROM plan_phase WHERE phase_id = $1"#)
                .bind(phase_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        let Some((plan_id,)) = plan_id else {
            return Err(EngineError::phase_not_found(phase_id));
        };
        self.plan(plan_id).await
    }

    async fn plan_for_item(&self, item_id: Uuid) -> Result<TreatmentPlan, EngineError> {
        let plan_id: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT p.plan_id
            FROM plan_item i
            JOIN plan_phase p ON p.phase_id = i.phase_id
            WHERE i.item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((plan_id,)) = plan_id else {
            return Err(EngineError::item_not_found(item_id));
        };
        self.plan(plan_id).await
    }

    async fn save_plan(&self, plan: &TreatmentPlan) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO treatment_plan (
              plan_id, plan_name, patient_id, created_by,
              status, approval_status,
              total_price_cents, discount_cents, final_cost_cents,
              approved_by, approved_at, review_notes,
              created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (plan_id) DO UPDATE SET
              plan_name = EXCLUDED.plan_name,
              status = EXCLUDED.status,
              approval_status = EXCLUDED.approval_status,
              total_price_cents = EXCLUDED.total_price_cents,
              discount_cents = EXCLUDED.discount_cents,
              final_cost_cents = EXCLUDED.final_cost_cents,
              approved_by = EXCLUDED.approved_by,
              approved_at = EXCLUDED.approved_at,
              review_notes = EXCLUDED.review_notes,
              updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(plan.plan_id)
        .bind(&plan.plan_name)
        .bind(plan.patient_id)
        .bind(plan.created_by)
        .bind(plan.status)
        .bind(plan.approval_status)
        .bind(plan.total_price_cents)
        .bind(plan.discount_cents)
        .bind(plan.final_cost_cents)
        .bind(plan.approved_by)
        .bind(plan.approved_at)
        .bind(&plan.review_notes)
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let phase_ids: Vec<Uuid> = plan.phases.iter().map(|p| p.phase_id).collect();
        let item_ids: Vec<Uuid> = plan.items().map(|i| i.item_id).collect();

        for phase in &plan.phases {
            sqlx::query(
                r#"
                INSERT INTO plan_phase (phase_id, plan_id, phase_number, phase_name, status, completion_date)
                VALUES ($1,$2,$3,$4,$5,$6)
                ON CONFLICT (phase_id) DO UPDATE SET
                  phase_number = EXCLUDED.phase_number,
                  phase_name = EXCLUDED.phase_name,
                  status = EXCLUDED.status,
                  completion_date = EXCLUDED.completion_date
                "#,
            )
            .bind(phase.phase_id)
            .bind(plan.plan_id)
            .bind(phase.phase_number)
            .bind(&phase.phase_name)
            .bind(phase.status)
            .bind(phase.completion_date)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            for item in &phase.items {
                sqlx::query(
                    r#"
                    INSERT INTO plan_item (
                      item_id, phase_id, service_id, sequence_number,
                      item_name, price_cents, estimated_minutes, status, completed_at
                    )
                    VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                    ON CONFLICT (item_id) DO UPDATE SET
                      sequence_number = EXCLUDED.sequence_number,
                      item_name = EXCLUDED.item_name,
                      price_cents = EXCLUDED.price_cents,
                      estimated_minutes = EXCLUDED.estimated_minutes,
                      status = EXCLUDED.status,
                      completed_at = EXCLUDED.completed_at
                    "#,
                )
                .bind(item.item_id)
                .bind(phase.phase_id)
                .bind(item.service_id)
                .bind(item.sequence_number)
                .bind(&item.item_name)
                .bind(item.price_cents)
                .bind(item.estimated_minutes)
                .bind(item.status)
                .bind(item.completed_at)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        // Prune rows dropped from the aggregate (item deletion flow).
        sqlx::query(
            r#"
            DELETE FROM plan_item
            WHERE phase_id IN (SELECT phase_id FROM plan_phase WHERE plan_id = $1)
              AND item_id <> ALL($2)
            "#,
        )
        .bind(plan.plan_id)
        .bind(&item_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            DELETE FROM plan_phase
            WHERE plan_id = $1
              AND phase_id <> ALL($2)
            "#,
        )
        .bind(plan.plan_id)
        .bind(&phase_ids)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn append_audit(&self, entry: &PlanAuditEntry) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO plan_audit_log (
              audit_id, plan_id, action, performed_by,
              old_approval_status, new_approval_status, notes, created_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(entry.audit_id)
        .bind(entry.plan_id)
        .bind(entry.action)
        .bind(entry.performed_by)
        .bind(entry.old_approval_status)
        .bind(entry.new_approval_status)
        .bind(&entry.notes)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn audit_for_plan(&self, plan_id: Uuid) -> Result<Vec<PlanAuditEntry>, EngineError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT
              audit_id, plan_id, action, performed_by,
              old_approval_status, new_approval_status, notes, created_at
            FROM plan_audit_log
            WHERE plan_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(PlanAuditEntry::from).collect())
    }
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::Storage(format!("db error: {e}"))
}
