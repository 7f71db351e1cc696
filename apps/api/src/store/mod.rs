//! Persistence seam for the callout orchestrator.
//!
//! `AppState` carries an `Arc<dyn CalloutStore>`; production uses
//! [`postgres::PgCalloutStore`], tests use the in-memory store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::agent::{AgentConfigRow, AgentConfigUpdate};
use crate::models::job::{
    AttemptStatus, CalloutAttemptRow, CalloutJobRow, CalloutOutcomeRow, JobStatus,
};
use crate::models::schedule::{CalloutScheduleRow, ScheduleUpdate};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct NewJob {
    pub voice_agent_id: Uuid,
    pub external_id: Option<String>,
    pub phone: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub raw: Option<Value>,
    pub pulled_at: Option<DateTime<Utc>>,
}

/// Display fields refreshed by a sync. Status and counters are never part of it.
#[derive(Debug, Clone)]
pub struct JobRefresh {
    pub phone: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub raw: Value,
    pub pulled_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub job_id: Uuid,
    pub attempt_number: i32,
    pub local_date: NaiveDate,
    pub requested_at: DateTime<Utc>,
}

/// Closes out a dial: the attempt row and the job's counters/status are
/// written together.
#[derive(Debug, Clone)]
pub struct DialRecord {
    pub attempt_id: Uuid,
    pub job_id: Uuid,
    pub attempt_status: AttemptStatus,
    pub call_sid: Option<String>,
    pub response_json: Option<Value>,
    pub error_message: Option<String>,
    pub job_status: JobStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AttemptProgress {
    pub status: Option<AttemptStatus>,
    pub call_sid: Option<String>,
    pub duration_sec: Option<i32>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct OutcomeUpsert {
    pub job_id: Uuid,
    pub outcome: String,
    pub callback_date: Option<NaiveDate>,
    pub callback_time: Option<String>,
    pub sentiment: Option<String>,
    pub cooperation_level: Option<String>,
    pub notes: Option<String>,
    pub candidate_concerns: Option<Value>,
    pub candidate_queries: Option<Value>,
    pub language_preference: Option<String>,
    pub analysis_json: Option<Value>,
    pub non_contactable_status_node_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    /// Inclusive creation-date bounds (UTC dates).
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub company: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl JobFilter {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(25).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * i64::from(self.page_size())
    }
}

#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<CalloutJobRow>,
    pub total: i64,
}

#[async_trait]
pub trait CalloutStore: Send + Sync {
    // Agent configuration and schedules
    async fn agent_config(&self, agent_id: Uuid) -> Result<Option<AgentConfigRow>>;
    async fn upsert_agent_config(
        &self,
        agent_id: Uuid,
        update: &AgentConfigUpdate,
        now: DateTime<Utc>,
    ) -> Result<AgentConfigRow>;
    async fn save_status_tree(&self, agent_id: Uuid, tree: &Value) -> Result<()>;
    async fn schedule(&self, agent_id: Uuid) -> Result<Option<CalloutScheduleRow>>;
    async fn upsert_schedule(
        &self,
        agent_id: Uuid,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<CalloutScheduleRow>;
    async fn active_schedules(&self) -> Result<Vec<CalloutScheduleRow>>;
    async fn mark_schedule_run(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    // Jobs
    async fn find_job_by_external_id(
        &self,
        agent_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CalloutJobRow>>;
    /// Only matches jobs that have no external id of their own.
    async fn find_job_by_phone(&self, agent_id: Uuid, phone: &str) -> Result<Option<CalloutJobRow>>;
    async fn insert_job(&self, job: NewJob) -> Result<CalloutJobRow>;
    async fn refresh_job(&self, job_id: Uuid, refresh: JobRefresh) -> Result<()>;
    async fn get_job(&self, job_id: Uuid) -> Result<Option<CalloutJobRow>>;
    async fn dialable_jobs(&self, agent_id: Uuid) -> Result<Vec<CalloutJobRow>>;
    async fn jobs_by_ids(&self, agent_id: Uuid, job_ids: &[Uuid]) -> Result<Vec<CalloutJobRow>>;
    /// Jobs whose stored phone normalizes to `digits` (see `normalize_phone`).
    async fn jobs_by_phone_digits(&self, agent_id: Uuid, digits: &str) -> Result<Vec<CalloutJobRow>>;
    async fn list_jobs(&self, agent_id: Uuid, filter: &JobFilter) -> Result<JobPage>;
    async fn set_job_status(&self, job_id: Uuid, status: JobStatus, now: DateTime<Utc>) -> Result<()>;
    /// Deletes attempts and outcome, zeroes counters, returns to PENDING.
    /// Returns false when the job does not exist.
    async fn reset_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    // Attempts
    async fn count_attempts_on(&self, job_id: Uuid, local_date: NaiveDate) -> Result<i64>;
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<CalloutAttemptRow>;
    async fn record_dial(&self, record: DialRecord) -> Result<()>;
    async fn attempts_for_job(&self, job_id: Uuid) -> Result<Vec<CalloutAttemptRow>>;
    async fn find_attempt_by_call_sid(
        &self,
        agent_id: Uuid,
        call_sid: &str,
    ) -> Result<Option<CalloutAttemptRow>>;
    /// Most recently created non-terminal attempt across `job_ids`.
    async fn latest_open_attempt(&self, job_ids: &[Uuid]) -> Result<Option<CalloutAttemptRow>>;
    async fn update_attempt(&self, attempt_id: Uuid, progress: AttemptProgress) -> Result<()>;

    // Outcomes
    async fn upsert_outcome(&self, outcome: OutcomeUpsert, now: DateTime<Utc>) -> Result<CalloutOutcomeRow>;
    async fn outcome_for_job(&self, job_id: Uuid) -> Result<Option<CalloutOutcomeRow>>;
    async fn mark_outcome_posted(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}
