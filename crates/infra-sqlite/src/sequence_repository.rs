// SQLite SequenceRepository Implementation

use crate::map_sqlx_error;
use async_trait::async_trait;
use outreach_core::domain::{LeadType, SequenceState, SequenceStatus, TemplateSet};
use outreach_core::error::{AppError, Result};
use outreach_core::port::SequenceRepository;
use sqlx::SqlitePool;
use tracing::debug;

const SELECT_COLUMNS: &str = r#"
    SELECT contact_id, email, lead_type, template_set, current_step, total_steps,
           next_send_at, emails_sent, status, last_error, enrolled_at, updated_at
    FROM sequences
"#;

pub struct SqliteSequenceRepository {
    pool: SqlitePool,
}

impl SqliteSequenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceRepository for SqliteSequenceRepository {
    async fn insert(&self, state: &SequenceState) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sequences (
                contact_id, email, lead_type, template_set,
                current_step, total_steps, next_send_at, emails_sent,
                status, last_error, enrolled_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(contact_id) DO NOTHING
            "#,
        )
        .bind(&state.contact_id)
        .bind(&state.email)
        .bind(state.lead_type.to_string())
        .bind(state.template_set.as_str())
        .bind(state.current_step as i64)
        .bind(state.total_steps as i64)
        .bind(state.next_send_at)
        .bind(state.emails_sent as i64)
        .bind(state.status.to_string())
        .bind(&state.last_error)
        .bind(state.enrolled_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidState(format!(
                "Contact {} already enrolled",
                state.contact_id
            )));
        }
        debug!(contact_id = %state.contact_id, "Sequence inserted");
        Ok(())
    }

    async fn find_by_contact(&self, contact_id: &str) -> Result<Option<SequenceState>> {
        let row: Option<SequenceRow> =
            sqlx::query_as(&format!("{} WHERE contact_id = ?", SELECT_COLUMNS))
                .bind(contact_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        row.map(SequenceRow::into_state).transpose()
    }

    async fn update(&self, state: &SequenceState) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sequences SET
                email = ?, lead_type = ?, template_set = ?,
                current_step = ?, total_steps = ?, next_send_at = ?, emails_sent = ?,
                status = ?, last_error = ?, updated_at = ?
            WHERE contact_id = ?
            "#,
        )
        .bind(&state.email)
        .bind(state.lead_type.to_string())
        .bind(state.template_set.as_str())
        .bind(state.current_step as i64)
        .bind(state.total_steps as i64)
        .bind(state.next_send_at)
        .bind(state.emails_sent as i64)
        .bind(state.status.to_string())
        .bind(&state.last_error)
        .bind(state.updated_at)
        .bind(&state.contact_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Sequence for contact {} not found",
                state.contact_id
            )));
        }
        Ok(())
    }

    async fn find_due(&self, now_millis: i64, limit: usize) -> Result<Vec<SequenceState>> {
        let rows: Vec<SequenceRow> = sqlx::query_as(&format!(
            "{} WHERE status = ? AND next_send_at <= ? ORDER BY next_send_at ASC, contact_id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(SequenceStatus::Active.to_string())
        .bind(now_millis)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(SequenceRow::into_state).collect()
    }

    async fn find_by_status(
        &self,
        status: SequenceStatus,
        limit: usize,
    ) -> Result<Vec<SequenceState>> {
        let rows: Vec<SequenceRow> = sqlx::query_as(&format!(
            "{} WHERE status = ? ORDER BY next_send_at ASC, contact_id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(status.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(SequenceRow::into_state).collect()
    }

    async fn count_by_status(&self, status: SequenceStatus) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM sequences WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn list(&self, limit: usize) -> Result<Vec<SequenceState>> {
        let rows: Vec<SequenceRow> = sqlx::query_as(&format!(
            "{} ORDER BY enrolled_at DESC, contact_id ASC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(SequenceRow::into_state).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct SequenceRow {
    contact_id: String,
    email: String,
    lead_type: String,
    template_set: String,
    current_step: i64,
    total_steps: i64,
    next_send_at: i64,
    emails_sent: i64,
    status: String,
    last_error: Option<String>,
    enrolled_at: i64,
    updated_at: i64,
}

impl SequenceRow {
    fn into_state(self) -> Result<SequenceState> {
        let lead_type: LeadType = self
            .lead_type
            .parse()
            .map_err(|e: String| AppError::Database(format!("Corrupt row {}: {}", self.contact_id, e)))?;
        let status: SequenceStatus = self.status.parse()?;

        Ok(SequenceState {
            contact_id: self.contact_id,
            email: self.email,
            lead_type,
            template_set: TemplateSet::new(self.template_set),
            current_step: self.current_step as u32,
            total_steps: self.total_steps as u32,
            next_send_at: self.next_send_at,
            emails_sent: self.emails_sent as u32,
            status,
            last_error: self.last_error,
            enrolled_at: self.enrolled_at,
            updated_at: self.updated_at,
        })
    }
}
