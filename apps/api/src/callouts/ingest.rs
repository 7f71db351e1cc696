//! Completion ingest: reconciles call status/outcome reports from the
//! conversation layer with stored attempts, then relays captured callbacks
//! to the record source.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::CalloutError;
use crate::jobs::extraction::normalize_phone;
use crate::models::agent::AgentConfigRow;
use crate::models::job::{
    AttemptStatus, CalloutAttemptRow, CalloutJobRow, CalloutOutcomeRow, JobEvent, JobStatus,
    OutcomeClass,
};
use crate::source::{resolve_status_node, OutcomeRelay, RecordSource, SourceConfig};
use crate::store::{AttemptProgress, CalloutStore, OutcomeUpsert};

/// Category recorded when a report carries outcome details but no category.
const UNCATEGORIZED: &str = "unknown";

/// Inbound status/outcome report for one call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub phone_number: Option<String>,
    pub call_sid: Option<String>,
    pub status: Option<String>,
    #[serde(alias = "duration")]
    pub duration_sec: Option<i32>,
    /// RFC 3339, or a naive ISO datetime in the tenant's zone.
    pub answered_at: Option<String>,
    pub completed_at: Option<String>,
    /// Outcome category, e.g. `scheduled`, `busy`, `wrong_number`. Falls back
    /// to `analysisJson.outcome`.
    pub outcome: Option<String>,
    /// "YYYY-MM-DD"
    pub callback_date: Option<String>,
    pub callback_time: Option<String>,
    pub sentiment: Option<String>,
    pub cooperation_level: Option<String>,
    pub notes: Option<String>,
    pub special_notes: Option<String>,
    pub candidate_concerns: Option<Value>,
    pub candidate_queries: Option<Value>,
    pub language_preference: Option<String>,
    pub analysis_json: Option<Value>,
}

impl CompletionReport {
    /// Explicit category, else the analysed one, else `scheduled` when a
    /// callback date was captured.
    fn category(&self, has_callback: bool) -> Option<String> {
        non_empty(&self.outcome)
            .map(String::from)
            .or_else(|| {
                self.analysis_json
                    .as_ref()
                    .and_then(|a| a.get("outcome"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
            })
            .or_else(|| has_callback.then(|| "scheduled".to_string()))
    }

    fn has_outcome_details(&self) -> bool {
        [
            &self.callback_time,
            &self.sentiment,
            &self.cooperation_level,
            &self.notes,
            &self.special_notes,
        ]
        .iter()
        .any(|v| non_empty(v).is_some())
            || self.analysis_json.is_some()
    }
}

/// Body of `POST /callouts/jobs/:job_id/outcome`, sent by the conversation
/// layer once a callback or a non-contactable status is known.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSubmission {
    pub outcome: Option<String>,
    pub callback_date: Option<String>,
    pub callback_time: Option<String>,
    pub non_contactable_status_node_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub job_id: Uuid,
    pub attempt_id: Uuid,
    pub attempt_status: AttemptStatus,
    pub job_status: JobStatus,
    pub outcome_recorded: bool,
    /// `None` when nothing needed relaying.
    pub relayed: Option<bool>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn merge_notes(notes: Option<&str>, special: Option<&str>) -> Option<String> {
    match (notes, special) {
        (Some(n), Some(s)) => Some(format!("{n}\n{s}")),
        (Some(n), None) => Some(n.to_string()),
        (None, Some(s)) => Some(s.to_string()),
        (None, None) => None,
    }
}

fn parse_callback_date(raw: &Option<String>) -> Result<Option<NaiveDate>, CalloutError> {
    match non_empty(raw) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| CalloutError::Validation(format!("callbackDate '{raw}' is not YYYY-MM-DD"))),
        None => Ok(None),
    }
}

/// Parses a report timestamp. Offset-less values are wall-clock time in `tz`.
pub fn parse_report_timestamp(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// A supplied timestamp that cannot be read is taken as `now`.
fn report_timestamp(raw: &Option<String>, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = non_empty(raw)?;
    Some(parse_report_timestamp(raw, tz).unwrap_or_else(|| {
        warn!("Unreadable report timestamp '{raw}', using receive time");
        now
    }))
}

pub struct CompletionIngest {
    store: Arc<dyn CalloutStore>,
    source: Arc<dyn RecordSource>,
    default_timezone: Tz,
}

impl CompletionIngest {
    pub fn new(store: Arc<dyn CalloutStore>, source: Arc<dyn RecordSource>, default_timezone: Tz) -> Self {
        Self {
            store,
            source,
            default_timezone,
        }
    }

    pub async fn ingest(&self, agent_id: Uuid, report: CompletionReport) -> Result<IngestResult, CalloutError> {
        self.ingest_at(agent_id, report, Utc::now()).await
    }

    pub async fn ingest_at(
        &self,
        agent_id: Uuid,
        report: CompletionReport,
        now: DateTime<Utc>,
    ) -> Result<IngestResult, CalloutError> {
        let status = match non_empty(&report.status) {
            Some(raw) => Some(
                AttemptStatus::from_report(raw)
                    .ok_or_else(|| CalloutError::Validation(format!("unknown call status '{raw}'")))?,
            ),
            None => None,
        };
        let callback_date = parse_callback_date(&report.callback_date)?;

        let attempt = self.match_attempt(agent_id, &report).await?;
        let job = self
            .store
            .get_job(attempt.callout_job_id)
            .await?
            .ok_or_else(|| CalloutError::NotFound(format!("job {}", attempt.callout_job_id)))?;

        let tz = self.tenant_zone(agent_id).await?;
        let attempt_status = status.unwrap_or(attempt.status);
        let learned_sid = non_empty(&report.call_sid)
            .filter(|_| attempt.call_sid.is_none())
            .map(String::from);
        self.store
            .update_attempt(
                attempt.id,
                AttemptProgress {
                    status,
                    call_sid: learned_sid,
                    duration_sec: report.duration_sec,
                    dialed_at: None,
                    answered_at: report_timestamp(&report.answered_at, tz, now)
                        .or_else(|| (attempt_status == AttemptStatus::Answered).then_some(now)),
                    completed_at: report_timestamp(&report.completed_at, tz, now)
                        .or_else(|| attempt_status.is_terminal().then_some(now)),
                },
            )
            .await?;

        let mut result = IngestResult {
            job_id: job.id,
            attempt_id: attempt.id,
            attempt_status,
            job_status: job.status,
            outcome_recorded: false,
            relayed: None,
        };

        let category = report.category(callback_date.is_some());
        if category.is_none() && !report.has_outcome_details() {
            return Ok(result);
        }

        let existing = self.store.outcome_for_job(job.id).await?;
        let recorded_category = category
            .clone()
            .or_else(|| existing.as_ref().map(|o| o.outcome.clone()))
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        let outcome = self
            .store
            .upsert_outcome(
                OutcomeUpsert {
                    job_id: job.id,
                    outcome: recorded_category.clone(),
                    callback_date,
                    callback_time: non_empty(&report.callback_time).map(String::from),
                    sentiment: report.sentiment.clone(),
                    cooperation_level: report.cooperation_level.clone(),
                    notes: merge_notes(non_empty(&report.notes), non_empty(&report.special_notes)),
                    candidate_concerns: report.candidate_concerns.clone(),
                    candidate_queries: report.candidate_queries.clone(),
                    language_preference: report.language_preference.clone(),
                    analysis_json: report.analysis_json.clone(),
                    non_contactable_status_node_id: existing
                        .as_ref()
                        .and_then(|o| o.non_contactable_status_node_id),
                },
                now,
            )
            .await?;
        result.outcome_recorded = true;

        if let Some(category) = &category {
            result.job_status = self.apply_outcome(&job, category, now).await?;
        }
        info!(
            "Recorded outcome '{recorded_category}' for job {} (attempt {}), job now {}",
            job.id, attempt.id, result.job_status
        );

        if outcome.callback_date.is_some() {
            result.relayed = Some(self.try_relay(&job, &outcome, now).await);
        }

        Ok(result)
    }

    /// Records an outcome posted directly for a job and relays it.
    ///
    /// Unset fields keep their stored values. A relay failure is returned
    /// after the local outcome has been saved.
    pub async fn submit_outcome(
        &self,
        agent_id: Uuid,
        job_id: Uuid,
        submission: OutcomeSubmission,
    ) -> Result<CalloutOutcomeRow, CalloutError> {
        self.submit_outcome_at(agent_id, job_id, submission, Utc::now()).await
    }

    pub async fn submit_outcome_at(
        &self,
        agent_id: Uuid,
        job_id: Uuid,
        submission: OutcomeSubmission,
        now: DateTime<Utc>,
    ) -> Result<CalloutOutcomeRow, CalloutError> {
        let job = self.load_job(agent_id, job_id).await?;
        let callback_date = parse_callback_date(&submission.callback_date)?;
        let existing = self.store.outcome_for_job(job_id).await?;

        let category = non_empty(&submission.outcome)
            .map(String::from)
            .or_else(|| callback_date.map(|_| "scheduled".to_string()));
        let recorded_category = category
            .clone()
            .or_else(|| existing.as_ref().map(|o| o.outcome.clone()))
            .unwrap_or_else(|| UNCATEGORIZED.to_string());

        let upsert = match existing {
            Some(prev) => OutcomeUpsert {
                job_id,
                outcome: recorded_category,
                callback_date: callback_date.or(prev.callback_date),
                callback_time: non_empty(&submission.callback_time)
                    .map(String::from)
                    .or(prev.callback_time),
                sentiment: prev.sentiment,
                cooperation_level: prev.cooperation_level,
                notes: non_empty(&submission.notes).map(String::from).or(prev.notes),
                candidate_concerns: prev.candidate_concerns,
                candidate_queries: prev.candidate_queries,
                language_preference: prev.language_preference,
                analysis_json: prev.analysis_json,
                non_contactable_status_node_id: submission
                    .non_contactable_status_node_id
                    .or(prev.non_contactable_status_node_id),
            },
            None => OutcomeUpsert {
                job_id,
                outcome: recorded_category,
                callback_date,
                callback_time: non_empty(&submission.callback_time).map(String::from),
                sentiment: None,
                cooperation_level: None,
                notes: non_empty(&submission.notes).map(String::from),
                candidate_concerns: None,
                candidate_queries: None,
                language_preference: None,
                analysis_json: None,
                non_contactable_status_node_id: submission.non_contactable_status_node_id,
            },
        };
        let outcome = self.store.upsert_outcome(upsert, now).await?;

        if let Some(category) = &category {
            self.apply_outcome(&job, category, now).await?;
        }

        self.post_relay(&job, &outcome, now).await?;
        Ok(CalloutOutcomeRow {
            posted_at: Some(now),
            ..outcome
        })
    }

    /// Operator retry of an outcome that has not been relayed yet.
    pub async fn relay_outcome(&self, agent_id: Uuid, job_id: Uuid) -> Result<CalloutOutcomeRow, CalloutError> {
        let job = self.load_job(agent_id, job_id).await?;
        let outcome = self
            .store
            .outcome_for_job(job_id)
            .await?
            .ok_or_else(|| CalloutError::NotFound(format!("outcome for job {job_id}")))?;

        let now = Utc::now();
        self.post_relay(&job, &outcome, now).await?;
        Ok(CalloutOutcomeRow {
            posted_at: Some(now),
            ..outcome
        })
    }

    async fn load_job(&self, agent_id: Uuid, job_id: Uuid) -> Result<CalloutJobRow, CalloutError> {
        self.store
            .get_job(job_id)
            .await?
            .filter(|j| j.voice_agent_id == agent_id)
            .ok_or_else(|| CalloutError::NotFound(format!("job {job_id}")))
    }

    async fn tenant_zone(&self, agent_id: Uuid) -> Result<Tz, CalloutError> {
        let Some(schedule) = self.store.schedule(agent_id).await? else {
            return Ok(self.default_timezone);
        };
        Ok(schedule.timezone.parse().unwrap_or_else(|_| {
            warn!(
                "Invalid timezone '{}' for agent {agent_id}, reading report times in {}",
                schedule.timezone, self.default_timezone
            );
            self.default_timezone
        }))
    }

    /// Applies the job transition for an outcome category and returns the
    /// resulting status. Invalid transitions keep the current status.
    async fn apply_outcome(
        &self,
        job: &CalloutJobRow,
        category: &str,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, CalloutError> {
        match job.status.transition(JobEvent::Outcome(OutcomeClass::from_category(category))) {
            Ok(next) if next != job.status => {
                self.store.set_job_status(job.id, next, now).await?;
                Ok(next)
            }
            Ok(_) => Ok(job.status),
            Err(e) => {
                warn!("Ignoring outcome '{category}' for job {}: {e}", job.id);
                Ok(job.status)
            }
        }
    }

    async fn try_relay(&self, job: &CalloutJobRow, outcome: &CalloutOutcomeRow, now: DateTime<Utc>) -> bool {
        match self.post_relay(job, outcome, now).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Outcome relay for job {} failed: {e}", job.id);
                false
            }
        }
    }

    async fn match_attempt(
        &self,
        agent_id: Uuid,
        report: &CompletionReport,
    ) -> Result<CalloutAttemptRow, CalloutError> {
        if let Some(call_sid) = non_empty(&report.call_sid) {
            if let Some(attempt) = self.store.find_attempt_by_call_sid(agent_id, call_sid).await? {
                return Ok(attempt);
            }
        }

        let digits = report.phone_number.as_deref().map(normalize_phone).unwrap_or_default();
        if !digits.is_empty() {
            let job_ids: Vec<Uuid> = self
                .store
                .jobs_by_phone_digits(agent_id, &digits)
                .await?
                .into_iter()
                .map(|j| j.id)
                .collect();
            if let Some(attempt) = self.store.latest_open_attempt(&job_ids).await? {
                return Ok(attempt);
            }
        }

        warn!(
            "Dropping completion report for agent {agent_id}: no attempt matches callSid {:?} / phone {:?}",
            report.call_sid, report.phone_number
        );
        Err(CalloutError::NotFound(
            "no callout attempt matches the reported call".to_string(),
        ))
    }

    async fn post_relay(
        &self,
        job: &CalloutJobRow,
        outcome: &CalloutOutcomeRow,
        now: DateTime<Utc>,
    ) -> Result<(), CalloutError> {
        let config: AgentConfigRow = self
            .store
            .agent_config(job.voice_agent_id)
            .await?
            .ok_or_else(|| CalloutError::Configuration("no callout configuration for agent".to_string()))?;
        let source_config =
            SourceConfig::from_config(&config).map_err(|e| CalloutError::Configuration(e.to_string()))?;
        let employee_id = job
            .employee_external_id
            .as_deref()
            .ok_or_else(|| CalloutError::Validation(format!("job {} has no employee id to relay to", job.id)))?;

        let relay = OutcomeRelay {
            callback_date: outcome.callback_date.map(|d| d.format("%Y-%m-%d").to_string()),
            callback_time: outcome.callback_time.clone(),
            non_contactable_status_node_id: outcome.non_contactable_status_node_id.or_else(|| {
                resolve_status_node(&config.status_nodes(), config.status_tree.as_ref(), &outcome.outcome)
            }),
            notes: outcome.notes.clone(),
        };

        self.source
            .post_outcome(&source_config, employee_id, &relay)
            .await
            .map_err(CalloutError::Relay)?;
        self.store.mark_outcome_posted(job.id, now).await?;
        info!("Relayed outcome for job {} to record source", job.id);
        Ok(())
    }
}
