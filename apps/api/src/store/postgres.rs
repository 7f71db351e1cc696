use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use crate::models::agent::{AgentConfigRow, AgentConfigUpdate};
use crate::models::job::{
    AttemptStatus, CalloutAttemptRow, CalloutJobRow, CalloutOutcomeRow, JobStatus,
};
use crate::models::schedule::{CalloutScheduleRow, ScheduleUpdate};
use crate::store::{
    AttemptProgress, CalloutStore, DialRecord, JobFilter, JobPage, JobRefresh, NewAttempt, NewJob,
    OutcomeUpsert,
};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgCalloutStore {
    pool: PgPool,
}

impl PgCalloutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn open_statuses() -> Vec<String> {
    AttemptStatus::OPEN
        .iter()
        .map(|s| s.as_str().to_string())
        .collect()
}

fn push_job_filters(qb: &mut QueryBuilder<'_, Postgres>, agent_id: Uuid, filter: &JobFilter) {
    qb.push(" WHERE voice_agent_id = ").push_bind(agent_id);
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(from) = filter.from {
        qb.push(" AND created_at::date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND created_at::date <= ").push_bind(to);
    }
    if let Some(company) = filter.company.as_deref().filter(|c| !c.trim().is_empty()) {
        qb.push(" AND employee_company ILIKE ")
            .push_bind(format!("%{}%", company.trim()));
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        qb.push(" AND (employee_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR employee_phone ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR employee_external_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

#[async_trait]
impl CalloutStore for PgCalloutStore {
    async fn agent_config(&self, agent_id: Uuid) -> Result<Option<AgentConfigRow>> {
        Ok(sqlx::query_as::<_, AgentConfigRow>(
            "SELECT * FROM callout_agent_configs WHERE voice_agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_agent_config(
        &self,
        agent_id: Uuid,
        update: &AgentConfigUpdate,
        now: DateTime<Utc>,
    ) -> Result<AgentConfigRow> {
        let field_map = update.field_map.as_ref().map(serde_json::to_value).transpose()?;
        let status_node_map = update
            .status_node_map
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        Ok(sqlx::query_as::<_, AgentConfigRow>(
            r#"
            INSERT INTO callout_agent_configs
                (voice_agent_id, auth_url, add_lead_url, username, password, list_id, source,
                 add_to_hopper, comments_template, source_url, source_update_url_template,
                 source_api_key, field_map, status_node_map, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (voice_agent_id) DO UPDATE SET
                auth_url = EXCLUDED.auth_url,
                add_lead_url = EXCLUDED.add_lead_url,
                username = EXCLUDED.username,
                password = COALESCE(EXCLUDED.password, callout_agent_configs.password),
                list_id = EXCLUDED.list_id,
                source = EXCLUDED.source,
                add_to_hopper = EXCLUDED.add_to_hopper,
                comments_template = EXCLUDED.comments_template,
                source_url = EXCLUDED.source_url,
                source_update_url_template = EXCLUDED.source_update_url_template,
                source_api_key = COALESCE(EXCLUDED.source_api_key, callout_agent_configs.source_api_key),
                field_map = EXCLUDED.field_map,
                status_node_map = EXCLUDED.status_node_map,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(&update.auth_url)
        .bind(&update.add_lead_url)
        .bind(&update.username)
        .bind(&update.password)
        .bind(&update.list_id)
        .bind(&update.source)
        .bind(update.add_to_hopper)
        .bind(&update.comments_template)
        .bind(&update.source_url)
        .bind(&update.source_update_url_template)
        .bind(&update.source_api_key)
        .bind(field_map)
        .bind(status_node_map)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn save_status_tree(&self, agent_id: Uuid, tree: &Value) -> Result<()> {
        sqlx::query("UPDATE callout_agent_configs SET status_tree = $2 WHERE voice_agent_id = $1")
            .bind(agent_id)
            .bind(tree)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn schedule(&self, agent_id: Uuid) -> Result<Option<CalloutScheduleRow>> {
        Ok(sqlx::query_as::<_, CalloutScheduleRow>(
            "SELECT * FROM callout_schedules WHERE voice_agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn upsert_schedule(
        &self,
        agent_id: Uuid,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<CalloutScheduleRow> {
        Ok(sqlx::query_as::<_, CalloutScheduleRow>(
            r#"
            INSERT INTO callout_schedules
                (id, voice_agent_id, is_active, run_at_local_time, timezone,
                 attempts_per_day, max_days, escalation_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (voice_agent_id) DO UPDATE SET
                is_active = EXCLUDED.is_active,
                run_at_local_time = EXCLUDED.run_at_local_time,
                timezone = EXCLUDED.timezone,
                attempts_per_day = EXCLUDED.attempts_per_day,
                max_days = EXCLUDED.max_days,
                escalation_enabled = EXCLUDED.escalation_enabled,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(agent_id)
        .bind(update.is_active)
        .bind(&update.run_at_local_time)
        .bind(&update.timezone)
        .bind(update.attempts_per_day)
        .bind(update.max_days)
        .bind(update.escalation_enabled)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn active_schedules(&self) -> Result<Vec<CalloutScheduleRow>> {
        Ok(sqlx::query_as::<_, CalloutScheduleRow>(
            "SELECT * FROM callout_schedules WHERE is_active ORDER BY voice_agent_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn mark_schedule_run(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE callout_schedules SET last_run_at = $2 WHERE id = $1")
            .bind(schedule_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_job_by_external_id(
        &self,
        agent_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CalloutJobRow>> {
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            "SELECT * FROM callout_jobs WHERE voice_agent_id = $1 AND employee_external_id = $2",
        )
        .bind(agent_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_job_by_phone(&self, agent_id: Uuid, phone: &str) -> Result<Option<CalloutJobRow>> {
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            r#"
            SELECT * FROM callout_jobs
            WHERE voice_agent_id = $1 AND employee_phone = $2 AND employee_external_id IS NULL
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_job(&self, job: NewJob) -> Result<CalloutJobRow> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            r#"
            INSERT INTO callout_jobs
                (id, voice_agent_id, employee_external_id, employee_phone, employee_name,
                 employee_company, employee_json, status, total_attempts, pulled_at,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9, $10, $10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.voice_agent_id)
        .bind(&job.external_id)
        .bind(&job.phone)
        .bind(&job.name)
        .bind(&job.company)
        .bind(&job.raw)
        .bind(JobStatus::Pending.as_str())
        .bind(job.pulled_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn refresh_job(&self, job_id: Uuid, refresh: JobRefresh) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE callout_jobs
            SET employee_phone = $2, employee_name = $3, employee_company = $4,
                employee_json = $5, pulled_at = $6, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(&refresh.phone)
        .bind(&refresh.name)
        .bind(&refresh.company)
        .bind(&refresh.raw)
        .bind(refresh.pulled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<CalloutJobRow>> {
        Ok(
            sqlx::query_as::<_, CalloutJobRow>("SELECT * FROM callout_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn dialable_jobs(&self, agent_id: Uuid) -> Result<Vec<CalloutJobRow>> {
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            r#"
            SELECT * FROM callout_jobs
            WHERE voice_agent_id = $1 AND status = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent_id)
        .bind(vec![
            JobStatus::Pending.as_str().to_string(),
            JobStatus::InProgress.as_str().to_string(),
        ])
        .fetch_all(&self.pool)
        .await?)
    }

    async fn jobs_by_ids(&self, agent_id: Uuid, job_ids: &[Uuid]) -> Result<Vec<CalloutJobRow>> {
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            r#"
            SELECT * FROM callout_jobs
            WHERE voice_agent_id = $1 AND id = ANY($2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent_id)
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn jobs_by_phone_digits(&self, agent_id: Uuid, digits: &str) -> Result<Vec<CalloutJobRow>> {
        // Mirrors normalize_phone: digits only, last ten.
        Ok(sqlx::query_as::<_, CalloutJobRow>(
            r#"
            SELECT * FROM callout_jobs
            WHERE voice_agent_id = $1
              AND right(regexp_replace(employee_phone, '[^0-9]', '', 'g'), 10) = $2
            "#,
        )
        .bind(agent_id)
        .bind(digits)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn list_jobs(&self, agent_id: Uuid, filter: &JobFilter) -> Result<JobPage> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM callout_jobs");
        push_job_filters(&mut count_qb, agent_id, filter);
        let total = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM callout_jobs");
        push_job_filters(&mut qb, agent_id, filter);
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(filter.page_size()))
            .push(" OFFSET ")
            .push_bind(filter.offset());
        let jobs = qb
            .build_query_as::<CalloutJobRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(JobPage { jobs, total })
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE callout_jobs SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(job_id)
            .bind(status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM callout_attempts WHERE callout_job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM callout_outcomes WHERE callout_job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let updated = sqlx::query(
            r#"
            UPDATE callout_jobs
            SET status = $2, total_attempts = 0, last_attempt_at = NULL, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn count_attempts_on(&self, job_id: Uuid, local_date: NaiveDate) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM callout_attempts WHERE callout_job_id = $1 AND local_date = $2",
        )
        .bind(job_id)
        .bind(local_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<CalloutAttemptRow> {
        Ok(sqlx::query_as::<_, CalloutAttemptRow>(
            r#"
            INSERT INTO callout_attempts
                (id, callout_job_id, attempt_number, local_date, status, requested_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt.job_id)
        .bind(attempt.attempt_number)
        .bind(attempt.local_date)
        .bind(AttemptStatus::Queued.as_str())
        .bind(attempt.requested_at)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn record_dial(&self, record: DialRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let dialed_at = (record.attempt_status == AttemptStatus::Triggered).then_some(record.at);
        sqlx::query(
            r#"
            UPDATE callout_attempts
            SET status = $2, call_sid = COALESCE($3, call_sid), response_json = $4,
                error_message = $5, dialed_at = $6
            WHERE id = $1
            "#,
        )
        .bind(record.attempt_id)
        .bind(record.attempt_status.as_str())
        .bind(&record.call_sid)
        .bind(&record.response_json)
        .bind(&record.error_message)
        .bind(dialed_at)
        .execute(&mut *tx)
        .await?;

        // Incremented in SQL so concurrent runs cannot lose a budget slot.
        sqlx::query(
            r#"
            UPDATE callout_jobs
            SET total_attempts = total_attempts + 1, last_attempt_at = $2,
                status = $3, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(record.job_id)
        .bind(record.at)
        .bind(record.job_status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            "Recorded dial for job {} attempt {} as {}",
            record.job_id, record.attempt_id, record.attempt_status
        );
        Ok(())
    }

    async fn attempts_for_job(&self, job_id: Uuid) -> Result<Vec<CalloutAttemptRow>> {
        Ok(sqlx::query_as::<_, CalloutAttemptRow>(
            "SELECT * FROM callout_attempts WHERE callout_job_id = $1 ORDER BY attempt_number ASC, created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_attempt_by_call_sid(
        &self,
        agent_id: Uuid,
        call_sid: &str,
    ) -> Result<Option<CalloutAttemptRow>> {
        Ok(sqlx::query_as::<_, CalloutAttemptRow>(
            r#"
            SELECT a.* FROM callout_attempts a
            JOIN callout_jobs j ON j.id = a.callout_job_id
            WHERE j.voice_agent_id = $1 AND a.call_sid = $2
            ORDER BY a.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id)
        .bind(call_sid)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn latest_open_attempt(&self, job_ids: &[Uuid]) -> Result<Option<CalloutAttemptRow>> {
        Ok(sqlx::query_as::<_, CalloutAttemptRow>(
            r#"
            SELECT * FROM callout_attempts
            WHERE callout_job_id = ANY($1) AND status = ANY($2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_ids)
        .bind(open_statuses())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_attempt(&self, attempt_id: Uuid, progress: AttemptProgress) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE callout_attempts
            SET status = COALESCE($2, status),
                call_sid = COALESCE($3, call_sid),
                call_duration_sec = COALESCE($4, call_duration_sec),
                dialed_at = COALESCE($5, dialed_at),
                answered_at = COALESCE($6, answered_at),
                completed_at = COALESCE($7, completed_at)
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(progress.status.map(|s| s.as_str()))
        .bind(&progress.call_sid)
        .bind(progress.duration_sec)
        .bind(progress.dialed_at)
        .bind(progress.answered_at)
        .bind(progress.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_outcome(&self, outcome: OutcomeUpsert, now: DateTime<Utc>) -> Result<CalloutOutcomeRow> {
        // A fresh outcome has not been relayed yet, so posted_at is cleared.
        Ok(sqlx::query_as::<_, CalloutOutcomeRow>(
            r#"
            INSERT INTO callout_outcomes
                (id, callout_job_id, outcome, callback_date, callback_time, sentiment,
                 cooperation_level, notes, candidate_concerns, candidate_queries,
                 language_preference, analysis_json, non_contactable_status_node_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            ON CONFLICT (callout_job_id) DO UPDATE SET
                outcome = EXCLUDED.outcome,
                callback_date = EXCLUDED.callback_date,
                callback_time = EXCLUDED.callback_time,
                sentiment = EXCLUDED.sentiment,
                cooperation_level = EXCLUDED.cooperation_level,
                notes = EXCLUDED.notes,
                candidate_concerns = EXCLUDED.candidate_concerns,
                candidate_queries = EXCLUDED.candidate_queries,
                language_preference = EXCLUDED.language_preference,
                analysis_json = EXCLUDED.analysis_json,
                non_contactable_status_node_id = EXCLUDED.non_contactable_status_node_id,
                posted_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(outcome.job_id)
        .bind(&outcome.outcome)
        .bind(outcome.callback_date)
        .bind(&outcome.callback_time)
        .bind(&outcome.sentiment)
        .bind(&outcome.cooperation_level)
        .bind(&outcome.notes)
        .bind(&outcome.candidate_concerns)
        .bind(&outcome.candidate_queries)
        .bind(&outcome.language_preference)
        .bind(&outcome.analysis_json)
        .bind(outcome.non_contactable_status_node_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn outcome_for_job(&self, job_id: Uuid) -> Result<Option<CalloutOutcomeRow>> {
        Ok(sqlx::query_as::<_, CalloutOutcomeRow>(
            "SELECT * FROM callout_outcomes WHERE callout_job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn mark_outcome_posted(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE callout_outcomes SET posted_at = $2 WHERE callout_job_id = $1")
            .bind(job_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
