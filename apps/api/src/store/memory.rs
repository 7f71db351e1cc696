//! In-memory `CalloutStore` used by unit tests. Mirrors the SQL semantics of
//! `PgCalloutStore` closely enough for engine, ingest and sync tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::extraction::normalize_phone;
use crate::models::agent::{AgentConfigRow, AgentConfigUpdate};
use crate::models::job::{
    AttemptStatus, CalloutAttemptRow, CalloutJobRow, CalloutOutcomeRow, JobStatus,
};
use crate::models::schedule::{CalloutScheduleRow, ScheduleUpdate};
use crate::store::{
    AttemptProgress, CalloutStore, DialRecord, JobFilter, JobPage, JobRefresh, NewAttempt, NewJob,
    OutcomeUpsert,
};

#[derive(Default)]
struct State {
    configs: HashMap<Uuid, AgentConfigRow>,
    schedules: HashMap<Uuid, CalloutScheduleRow>,
    jobs: Vec<CalloutJobRow>,
    attempts: Vec<CalloutAttemptRow>,
    outcomes: Vec<CalloutOutcomeRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("memory store poisoned");
        f(&mut state)
    }

    pub fn put_config(&self, config: AgentConfigRow) {
        self.with(|s| s.configs.insert(config.voice_agent_id, config));
    }

    pub fn put_schedule(&self, schedule: CalloutScheduleRow) {
        self.with(|s| s.schedules.insert(schedule.id, schedule));
    }

    pub fn put_job(&self, job: CalloutJobRow) {
        self.with(|s| s.jobs.push(job));
    }

    pub fn job(&self, job_id: Uuid) -> CalloutJobRow {
        self.with(|s| s.jobs.iter().find(|j| j.id == job_id).cloned())
            .expect("job exists")
    }

    pub fn with_job(&self, job_id: Uuid, f: impl FnOnce(&mut CalloutJobRow)) {
        self.with(|s| {
            if let Some(job) = s.jobs.iter_mut().find(|j| j.id == job_id) {
                f(job);
            }
        });
    }

    pub fn job_count(&self) -> usize {
        self.with(|s| s.jobs.len())
    }

    pub fn attempts(&self, job_id: Uuid) -> Vec<CalloutAttemptRow> {
        self.with(|s| {
            s.attempts
                .iter()
                .filter(|a| a.callout_job_id == job_id)
                .cloned()
                .collect()
        })
    }

    pub fn outcome(&self, job_id: Uuid) -> Option<CalloutOutcomeRow> {
        self.with(|s| s.outcomes.iter().find(|o| o.callout_job_id == job_id).cloned())
    }

    pub fn schedule_row(&self, schedule_id: Uuid) -> CalloutScheduleRow {
        self.with(|s| s.schedules.get(&schedule_id).cloned())
            .expect("schedule exists")
    }
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

#[async_trait]
impl CalloutStore for MemoryStore {
    async fn agent_config(&self, agent_id: Uuid) -> Result<Option<AgentConfigRow>> {
        Ok(self.with(|s| s.configs.get(&agent_id).cloned()))
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
        Ok(self.with(|s| {
            let existing = s.configs.get(&agent_id).cloned();
            let row = AgentConfigRow {
                voice_agent_id: agent_id,
                auth_url: update.auth_url.clone(),
                add_lead_url: update.add_lead_url.clone(),
                username: update.username.clone(),
                password: update
                    .password
                    .clone()
                    .or_else(|| existing.as_ref().and_then(|e| e.password.clone())),
                list_id: update.list_id.clone(),
                source: update.source.clone(),
                add_to_hopper: update.add_to_hopper,
                comments_template: update.comments_template.clone(),
                source_url: update.source_url.clone(),
                source_update_url_template: update.source_update_url_template.clone(),
                source_api_key: update
                    .source_api_key
                    .clone()
                    .or_else(|| existing.as_ref().and_then(|e| e.source_api_key.clone())),
                field_map,
                status_node_map,
                status_tree: existing.and_then(|e| e.status_tree),
                updated_at: now,
            };
            s.configs.insert(agent_id, row.clone());
            row
        }))
    }

    async fn save_status_tree(&self, agent_id: Uuid, tree: &Value) -> Result<()> {
        self.with(|s| {
            if let Some(config) = s.configs.get_mut(&agent_id) {
                config.status_tree = Some(tree.clone());
            }
        });
        Ok(())
    }

    async fn schedule(&self, agent_id: Uuid) -> Result<Option<CalloutScheduleRow>> {
        Ok(self.with(|s| {
            s.schedules
                .values()
                .find(|sc| sc.voice_agent_id == agent_id)
                .cloned()
        }))
    }

    async fn upsert_schedule(
        &self,
        agent_id: Uuid,
        update: &ScheduleUpdate,
        now: DateTime<Utc>,
    ) -> Result<CalloutScheduleRow> {
        Ok(self.with(|s| {
            let existing = s
                .schedules
                .values()
                .find(|sc| sc.voice_agent_id == agent_id)
                .cloned();
            let row = CalloutScheduleRow {
                id: existing.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
                voice_agent_id: agent_id,
                is_active: update.is_active,
                run_at_local_time: update.run_at_local_time.clone(),
                timezone: update.timezone.clone(),
                attempts_per_day: update.attempts_per_day,
                max_days: update.max_days,
                escalation_enabled: update.escalation_enabled,
                last_run_at: existing.as_ref().and_then(|e| e.last_run_at),
                created_at: existing.as_ref().map(|e| e.created_at).unwrap_or(now),
                updated_at: now,
            };
            s.schedules.insert(row.id, row.clone());
            row
        }))
    }

    async fn active_schedules(&self) -> Result<Vec<CalloutScheduleRow>> {
        Ok(self.with(|s| s.schedules.values().filter(|sc| sc.is_active).cloned().collect()))
    }

    async fn mark_schedule_run(&self, schedule_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with(|s| {
            if let Some(schedule) = s.schedules.get_mut(&schedule_id) {
                schedule.last_run_at = Some(at);
            }
        });
        Ok(())
    }

    async fn find_job_by_external_id(
        &self,
        agent_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CalloutJobRow>> {
        Ok(self.with(|s| {
            s.jobs
                .iter()
                .find(|j| {
                    j.voice_agent_id == agent_id
                        && j.employee_external_id.as_deref() == Some(external_id)
                })
                .cloned()
        }))
    }

    async fn find_job_by_phone(&self, agent_id: Uuid, phone: &str) -> Result<Option<CalloutJobRow>> {
        Ok(self.with(|s| {
            s.jobs
                .iter()
                .find(|j| {
                    j.voice_agent_id == agent_id
                        && j.employee_phone == phone
                        && j.employee_external_id.is_none()
                })
                .cloned()
        }))
    }

    async fn insert_job(&self, job: NewJob) -> Result<CalloutJobRow> {
        let now = Utc::now();
        let row = CalloutJobRow {
            id: Uuid::new_v4(),
            voice_agent_id: job.voice_agent_id,
            employee_external_id: job.external_id,
            employee_phone: job.phone,
            employee_name: job.name,
            employee_company: job.company,
            employee_json: job.raw,
            status: JobStatus::Pending,
            total_attempts: 0,
            last_attempt_at: None,
            pulled_at: job.pulled_at,
            created_at: now,
            updated_at: now,
        };
        self.with(|s| {
            let duplicate = row.employee_external_id.is_some()
                && s.jobs.iter().any(|j| {
                    j.voice_agent_id == row.voice_agent_id
                        && j.employee_external_id == row.employee_external_id
                });
            if duplicate {
                return Err(anyhow!("duplicate key value violates unique constraint"));
            }
            s.jobs.push(row.clone());
            Ok(row)
        })
    }

    async fn refresh_job(&self, job_id: Uuid, refresh: JobRefresh) -> Result<()> {
        self.with(|s| {
            if let Some(job) = s.jobs.iter_mut().find(|j| j.id == job_id) {
                job.employee_phone = refresh.phone;
                job.employee_name = refresh.name;
                job.employee_company = refresh.company;
                job.employee_json = Some(refresh.raw);
                job.pulled_at = Some(refresh.pulled_at);
                job.updated_at = refresh.pulled_at;
            }
        });
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<CalloutJobRow>> {
        Ok(self.with(|s| s.jobs.iter().find(|j| j.id == job_id).cloned()))
    }

    async fn dialable_jobs(&self, agent_id: Uuid) -> Result<Vec<CalloutJobRow>> {
        Ok(self.with(|s| {
            s.jobs
                .iter()
                .filter(|j| j.voice_agent_id == agent_id && j.status.is_dialable())
                .cloned()
                .collect()
        }))
    }

    async fn jobs_by_ids(&self, agent_id: Uuid, job_ids: &[Uuid]) -> Result<Vec<CalloutJobRow>> {
        Ok(self.with(|s| {
            s.jobs
                .iter()
                .filter(|j| j.voice_agent_id == agent_id && job_ids.contains(&j.id))
                .cloned()
                .collect()
        }))
    }

    async fn jobs_by_phone_digits(&self, agent_id: Uuid, digits: &str) -> Result<Vec<CalloutJobRow>> {
        Ok(self.with(|s| {
            s.jobs
                .iter()
                .filter(|j| j.voice_agent_id == agent_id && normalize_phone(&j.employee_phone) == digits)
                .cloned()
                .collect()
        }))
    }

    async fn list_jobs(&self, agent_id: Uuid, filter: &JobFilter) -> Result<JobPage> {
        Ok(self.with(|s| {
            let mut matching: Vec<CalloutJobRow> = s
                .jobs
                .iter()
                .filter(|j| j.voice_agent_id == agent_id)
                .filter(|j| filter.status.map_or(true, |st| j.status == st))
                .filter(|j| filter.from.map_or(true, |d| j.created_at.date_naive() >= d))
                .filter(|j| filter.to.map_or(true, |d| j.created_at.date_naive() <= d))
                .filter(|j| {
                    filter
                        .company
                        .as_deref()
                        .map_or(true, |c| contains_ci(j.employee_company.as_deref(), c.trim()))
                })
                .filter(|j| {
                    filter.search.as_deref().map_or(true, |q| {
                        let q = q.trim();
                        contains_ci(j.employee_name.as_deref(), q)
                            || contains_ci(Some(&j.employee_phone), q)
                            || contains_ci(j.employee_external_id.as_deref(), q)
                    })
                })
                .cloned()
                .collect();
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let total = matching.len() as i64;
            let jobs = matching
                .into_iter()
                .skip(filter.offset() as usize)
                .take(filter.page_size() as usize)
                .collect();
            JobPage { jobs, total }
        }))
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus, now: DateTime<Utc>) -> Result<()> {
        self.with(|s| {
            if let Some(job) = s.jobs.iter_mut().find(|j| j.id == job_id) {
                job.status = status;
                job.updated_at = now;
            }
        });
        Ok(())
    }

    async fn reset_job(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.with(|s| {
            s.attempts.retain(|a| a.callout_job_id != job_id);
            s.outcomes.retain(|o| o.callout_job_id != job_id);
            match s.jobs.iter_mut().find(|j| j.id == job_id) {
                Some(job) => {
                    job.status = JobStatus::Pending;
                    job.total_attempts = 0;
                    job.last_attempt_at = None;
                    job.updated_at = now;
                    true
                }
                None => false,
            }
        }))
    }

    async fn count_attempts_on(&self, job_id: Uuid, local_date: NaiveDate) -> Result<i64> {
        Ok(self.with(|s| {
            s.attempts
                .iter()
                .filter(|a| a.callout_job_id == job_id && a.local_date == local_date)
                .count() as i64
        }))
    }

    async fn create_attempt(&self, attempt: NewAttempt) -> Result<CalloutAttemptRow> {
        let row = CalloutAttemptRow {
            id: Uuid::new_v4(),
            callout_job_id: attempt.job_id,
            attempt_number: attempt.attempt_number,
            local_date: attempt.local_date,
            status: AttemptStatus::Queued,
            call_sid: None,
            requested_at: attempt.requested_at,
            dialed_at: None,
            answered_at: None,
            completed_at: None,
            call_duration_sec: None,
            error_message: None,
            response_json: None,
            created_at: attempt.requested_at,
        };
        self.with(|s| s.attempts.push(row.clone()));
        Ok(row)
    }

    async fn record_dial(&self, record: DialRecord) -> Result<()> {
        self.with(|s| {
            if let Some(attempt) = s.attempts.iter_mut().find(|a| a.id == record.attempt_id) {
                attempt.status = record.attempt_status;
                if record.call_sid.is_some() {
                    attempt.call_sid = record.call_sid.clone();
                }
                attempt.response_json = record.response_json.clone();
                attempt.error_message = record.error_message.clone();
                attempt.dialed_at =
                    (record.attempt_status == AttemptStatus::Triggered).then_some(record.at);
            }
            if let Some(job) = s.jobs.iter_mut().find(|j| j.id == record.job_id) {
                job.total_attempts += 1;
                job.last_attempt_at = Some(record.at);
                job.status = record.job_status;
                job.updated_at = record.at;
            }
        });
        Ok(())
    }

    async fn attempts_for_job(&self, job_id: Uuid) -> Result<Vec<CalloutAttemptRow>> {
        let mut attempts = self.attempts(job_id);
        attempts.sort_by_key(|a| (a.attempt_number, a.created_at));
        Ok(attempts)
    }

    async fn find_attempt_by_call_sid(
        &self,
        agent_id: Uuid,
        call_sid: &str,
    ) -> Result<Option<CalloutAttemptRow>> {
        Ok(self.with(|s| {
            s.attempts
                .iter()
                .filter(|a| a.call_sid.as_deref() == Some(call_sid))
                .filter(|a| {
                    s.jobs
                        .iter()
                        .any(|j| j.id == a.callout_job_id && j.voice_agent_id == agent_id)
                })
                .max_by_key(|a| a.created_at)
                .cloned()
        }))
    }

    async fn latest_open_attempt(&self, job_ids: &[Uuid]) -> Result<Option<CalloutAttemptRow>> {
        Ok(self.with(|s| {
            s.attempts
                .iter()
                .filter(|a| job_ids.contains(&a.callout_job_id) && !a.status.is_terminal())
                .max_by_key(|a| a.created_at)
                .cloned()
        }))
    }

    async fn update_attempt(&self, attempt_id: Uuid, progress: AttemptProgress) -> Result<()> {
        self.with(|s| {
            if let Some(a) = s.attempts.iter_mut().find(|a| a.id == attempt_id) {
                if let Some(status) = progress.status {
                    a.status = status;
                }
                a.call_sid = progress.call_sid.or(a.call_sid.take());
                a.call_duration_sec = progress.duration_sec.or(a.call_duration_sec);
                a.dialed_at = progress.dialed_at.or(a.dialed_at);
                a.answered_at = progress.answered_at.or(a.answered_at);
                a.completed_at = progress.completed_at.or(a.completed_at);
            }
        });
        Ok(())
    }

    async fn upsert_outcome(&self, outcome: OutcomeUpsert, now: DateTime<Utc>) -> Result<CalloutOutcomeRow> {
        Ok(self.with(|s| {
            let existing = s
                .outcomes
                .iter()
                .position(|o| o.callout_job_id == outcome.job_id);
            let (id, created_at) = match existing {
                Some(i) => (s.outcomes[i].id, s.outcomes[i].created_at),
                None => (Uuid::new_v4(), now),
            };
            let row = CalloutOutcomeRow {
                id,
                callout_job_id: outcome.job_id,
                outcome: outcome.outcome,
                callback_date: outcome.callback_date,
                callback_time: outcome.callback_time,
                sentiment: outcome.sentiment,
                cooperation_level: outcome.cooperation_level,
                notes: outcome.notes,
                candidate_concerns: outcome.candidate_concerns,
                candidate_queries: outcome.candidate_queries,
                language_preference: outcome.language_preference,
                analysis_json: outcome.analysis_json,
                non_contactable_status_node_id: outcome.non_contactable_status_node_id,
                posted_at: None,
                created_at,
                updated_at: now,
            };
            match existing {
                Some(i) => s.outcomes[i] = row.clone(),
                None => s.outcomes.push(row.clone()),
            }
            row
        }))
    }

    async fn outcome_for_job(&self, job_id: Uuid) -> Result<Option<CalloutOutcomeRow>> {
        Ok(self.outcome(job_id))
    }

    async fn mark_outcome_posted(&self, job_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with(|s| {
            if let Some(o) = s.outcomes.iter_mut().find(|o| o.callout_job_id == job_id) {
                o.posted_at = Some(at);
            }
        });
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fixtures
// ────────────────────────────────────────────────────────────────────────────

/// A fully configured agent: telephony credentials and record source set.
pub fn agent_config(agent_id: Uuid) -> AgentConfigRow {
    AgentConfigRow {
        voice_agent_id: agent_id,
        auth_url: Some("https://vendor.test/auth".into()),
        add_lead_url: Some("https://vendor.test/lead".into()),
        username: Some("agent".into()),
        password: Some("secret".into()),
        list_id: Some("101".into()),
        source: None,
        add_to_hopper: true,
        comments_template: Some("wss://agent.test/ws?job={jobId}&attempt={attemptId}".into()),
        source_url: Some("https://hr.test/employees".into()),
        source_update_url_template: Some("https://hr.test/employees/{employee_id}".into()),
        source_api_key: None,
        field_map: None,
        status_node_map: None,
        status_tree: None,
        updated_at: Utc::now(),
    }
}

pub fn job_row(agent_id: Uuid, external_id: &str, phone: &str) -> CalloutJobRow {
    let now = Utc::now();
    CalloutJobRow {
        id: Uuid::new_v4(),
        voice_agent_id: agent_id,
        employee_external_id: Some(external_id.to_string()),
        employee_phone: phone.to_string(),
        employee_name: None,
        employee_company: None,
        employee_json: None,
        status: JobStatus::Pending,
        total_attempts: 0,
        last_attempt_at: None,
        pulled_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn schedule(agent_id: Uuid, run_at: &str, attempts_per_day: i32, max_days: i32) -> CalloutScheduleRow {
    let now = Utc::now();
    CalloutScheduleRow {
        id: Uuid::new_v4(),
        voice_agent_id: agent_id,
        is_active: true,
        run_at_local_time: run_at.to_string(),
        timezone: "Asia/Kolkata".to_string(),
        attempts_per_day,
        max_days,
        escalation_enabled: true,
        last_run_at: None,
        created_at: now,
        updated_at: now,
    }
}
