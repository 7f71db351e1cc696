//! Callout trigger engine.
//!
//! One run resolves the agent's credentials and budget, fetches a single
//! vendor token and walks the candidate jobs sequentially. Budget accounting
//! is written with the attempt outcome in one store call, so a dial that the
//! vendor rejects still consumes a slot.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::CalloutError;
use crate::jobs::extraction::normalize_phone;
use crate::models::job::{AttemptStatus, CalloutJobRow, JobEvent};
use crate::models::schedule::BudgetSettings;
use crate::store::{CalloutStore, DialRecord, NewAttempt};
use crate::telephony::{DialRequest, Telephony, TelephonyCredentials, TelephonyError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub job_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSummary {
    pub triggered: usize,
    pub failed: usize,
    pub skipped: usize,
    pub attempt_ids: Vec<Uuid>,
    pub failures: Vec<JobFailure>,
    /// Set when the run aborted before dialing; counts are then zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TriggerSummary {
    pub fn aborted(err: &CalloutError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
enum JobResult {
    Triggered(Uuid),
    DialFailed { attempt_id: Uuid, reason: String },
    Skipped(&'static str),
}

/// Per-run values shared by every job in the run.
struct RunContext<'a> {
    credentials: &'a TelephonyCredentials,
    token: &'a str,
    budget: &'a BudgetSettings,
    today: NaiveDate,
    now: DateTime<Utc>,
}

/// Fills `{phone}`, `{jobId}`, `{attemptId}`, `{employeeId}`, `{name}` and
/// `{voiceAgentId}` in the comments template.
pub fn render_comments(template: &str, job: &CalloutJobRow, attempt_id: Uuid, phone: &str) -> String {
    template
        .replace("{phone}", phone)
        .replace("{jobId}", &job.id.to_string())
        .replace("{attemptId}", &attempt_id.to_string())
        .replace("{employeeId}", job.employee_external_id.as_deref().unwrap_or_default())
        .replace("{name}", job.employee_name.as_deref().unwrap_or_default())
        .replace("{voiceAgentId}", &job.voice_agent_id.to_string())
}

pub struct CalloutEngine {
    store: Arc<dyn CalloutStore>,
    telephony: Arc<dyn Telephony>,
    default_timezone: Tz,
}

impl CalloutEngine {
    pub fn new(store: Arc<dyn CalloutStore>, telephony: Arc<dyn Telephony>, default_timezone: Tz) -> Self {
        Self {
            store,
            telephony,
            default_timezone,
        }
    }

    /// Budget settings for an agent; agents without a schedule row get defaults.
    pub async fn budget_settings(&self, agent_id: Uuid) -> Result<BudgetSettings, CalloutError> {
        let Some(schedule) = self.store.schedule(agent_id).await? else {
            return Ok(BudgetSettings::defaults(self.default_timezone));
        };
        let timezone: Tz = schedule
            .timezone
            .parse()
            .map_err(|_| CalloutError::Configuration(format!("invalid timezone '{}'", schedule.timezone)))?;
        Ok(BudgetSettings {
            attempts_per_day: schedule.attempts_per_day,
            max_days: schedule.max_days,
            escalation_enabled: schedule.escalation_enabled,
            timezone,
        })
    }

    pub async fn trigger_callouts(
        &self,
        agent_id: Uuid,
        job_ids: Option<&[Uuid]>,
    ) -> Result<TriggerSummary, CalloutError> {
        self.trigger_callouts_at(agent_id, job_ids, Utc::now()).await
    }

    pub async fn trigger_callouts_at(
        &self,
        agent_id: Uuid,
        job_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
    ) -> Result<TriggerSummary, CalloutError> {
        let config = self
            .store
            .agent_config(agent_id)
            .await?
            .ok_or_else(|| CalloutError::Configuration(format!("no callout configuration for agent {agent_id}")))?;
        let credentials = TelephonyCredentials::from_config(&config).map_err(|missing| {
            CalloutError::Configuration(format!("missing required callout settings: {}", missing.join(", ")))
        })?;
        let budget = self.budget_settings(agent_id).await?;

        let jobs = match job_ids {
            Some(ids) => self.store.jobs_by_ids(agent_id, ids).await?,
            None => self.store.dialable_jobs(agent_id).await?,
        };

        let mut summary = TriggerSummary::default();
        if let Some(ids) = job_ids {
            // Requested ids that do not belong to this agent.
            summary.skipped += ids.len().saturating_sub(jobs.len());
        }
        if jobs.is_empty() {
            info!("No callout candidates for agent {agent_id}");
            return Ok(summary);
        }

        let token = self
            .telephony
            .authenticate(&credentials.auth_url, &credentials.username, &credentials.password)
            .await
            .map_err(CalloutError::VendorAuth)?;

        let ctx = RunContext {
            credentials: &credentials,
            token: &token,
            budget: &budget,
            today: now.with_timezone(&budget.timezone).date_naive(),
            now,
        };

        for job in &jobs {
            match self.process_job(job, &ctx).await {
                Ok(JobResult::Triggered(attempt_id)) => {
                    summary.triggered += 1;
                    summary.attempt_ids.push(attempt_id);
                }
                Ok(JobResult::DialFailed { attempt_id, reason }) => {
                    summary.failed += 1;
                    summary.attempt_ids.push(attempt_id);
                    summary.failures.push(JobFailure { job_id: job.id, reason });
                }
                Ok(JobResult::Skipped(reason)) => {
                    debug!("Skipped job {}: {reason}", job.id);
                    summary.skipped += 1;
                }
                Err(e) => {
                    error!("Callout for job {} failed: {e:#}", job.id);
                    summary.failed += 1;
                    summary.failures.push(JobFailure {
                        job_id: job.id,
                        reason: format!("{e:#}"),
                    });
                }
            }
        }

        info!(
            "Callout run for agent {agent_id}: {} triggered, {} failed, {} skipped",
            summary.triggered, summary.failed, summary.skipped
        );
        Ok(summary)
    }

    async fn process_job(&self, job: &CalloutJobRow, ctx: &RunContext<'_>) -> Result<JobResult> {
        let budget = ctx.budget;

        if !job.status.is_dialable() {
            return Ok(JobResult::Skipped("job is not pending or in progress"));
        }
        let phone = normalize_phone(&job.employee_phone);
        if phone.is_empty() {
            return Ok(JobResult::Skipped("job has no phone number"));
        }
        if job.total_attempts >= budget.lifetime_budget() {
            let next = job.status.transition(JobEvent::BudgetExhausted {
                escalation_enabled: budget.escalation_enabled,
            })?;
            self.store.set_job_status(job.id, next, ctx.now).await?;
            info!("Job {} exhausted its attempt budget, now {next}", job.id);
            return Ok(JobResult::Skipped("lifetime attempt budget exhausted"));
        }
        let today_count = self.store.count_attempts_on(job.id, ctx.today).await?;
        if today_count >= i64::from(budget.attempts_per_day) {
            return Ok(JobResult::Skipped("daily attempt cap reached"));
        }

        let attempt_number = job.total_attempts + 1;
        let job_status = job.status.transition(JobEvent::AttemptRecorded {
            budget_reached: attempt_number >= budget.lifetime_budget(),
            escalation_enabled: budget.escalation_enabled,
        })?;

        let attempt = self
            .store
            .create_attempt(NewAttempt {
                job_id: job.id,
                attempt_number,
                local_date: ctx.today,
                requested_at: ctx.now,
            })
            .await?;

        let credentials = ctx.credentials;
        let request = DialRequest {
            add_lead_url: credentials.add_lead_url.clone(),
            phone_number: phone.clone(),
            list_id: credentials.list_id.clone(),
            source: credentials.source.clone(),
            add_to_hopper: credentials.add_to_hopper,
            comments: credentials
                .comments_template
                .as_deref()
                .map(|t| render_comments(t, job, attempt.id, &phone))
                .unwrap_or_default(),
        };

        let dialed = self.telephony.dial(ctx.token, &request).await;
        let (record, result) = match dialed {
            Ok(response) => (
                DialRecord {
                    attempt_id: attempt.id,
                    job_id: job.id,
                    attempt_status: AttemptStatus::Triggered,
                    call_sid: response.call_id(),
                    response_json: Some(response.body),
                    error_message: None,
                    job_status,
                    at: ctx.now,
                },
                JobResult::Triggered(attempt.id),
            ),
            Err(e) => {
                warn!("Dial for job {} (attempt {attempt_number}) failed: {e}", job.id);
                let response_json = match &e {
                    TelephonyError::Dial { body, .. } => Some(serde_json::Value::String(body.clone())),
                    _ => None,
                };
                (
                    DialRecord {
                        attempt_id: attempt.id,
                        job_id: job.id,
                        attempt_status: AttemptStatus::Failed,
                        call_sid: None,
                        response_json,
                        error_message: Some(e.to_string()),
                        job_status,
                        at: ctx.now,
                    },
                    JobResult::DialFailed {
                        attempt_id: attempt.id,
                        reason: e.to_string(),
                    },
                )
            }
        };

        self.store.record_dial(record).await?;
        Ok(result)
    }
}
