//! Contact job, attempt and outcome rows plus the status state machines.
//!
//! Statuses are persisted as TEXT and decoded through `TryFrom<String>` so a
//! row with an unknown status fails loudly instead of flowing through as a
//! free-form string.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid job transition from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub event: JobEvent,
}

// ────────────────────────────────────────────────────────────────────────────
// Job status
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Escalated,
    Failed,
}

/// How a conversation outcome category affects the job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// Callback scheduled or explicit refusal; the job is done.
    Resolved,
    /// Busy, no response, voicemail and anything unrecognised; dial again within budget.
    Retriable,
    /// Never retried, regardless of remaining budget.
    WrongNumber,
}

impl OutcomeClass {
    pub fn from_category(category: &str) -> Self {
        let normalized = category.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "scheduled" | "not_interested" => OutcomeClass::Resolved,
            "wrong_number" => OutcomeClass::WrongNumber,
            _ => OutcomeClass::Retriable,
        }
    }
}

/// Events that drive the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A dial attempt was recorded (successful or not).
    AttemptRecorded {
        budget_reached: bool,
        escalation_enabled: bool,
    },
    /// The eligibility check found the lifetime budget already spent.
    BudgetExhausted { escalation_enabled: bool },
    Outcome(OutcomeClass),
    Reset,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Escalated => "ESCALATED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Statuses the trigger engine may dial.
    pub fn is_dialable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    /// Applies `event` according to the job transition table.
    pub fn transition(self, event: JobEvent) -> Result<JobStatus, InvalidTransition> {
        use JobStatus::*;

        let invalid = || InvalidTransition { from: self, event };

        match event {
            JobEvent::Reset => Ok(Pending),
            JobEvent::AttemptRecorded {
                budget_reached,
                escalation_enabled,
            } => {
                if !self.is_dialable() {
                    return Err(invalid());
                }
                if budget_reached && escalation_enabled {
                    Ok(Escalated)
                } else {
                    Ok(InProgress)
                }
            }
            JobEvent::BudgetExhausted { escalation_enabled } => {
                if !self.is_dialable() {
                    return Err(invalid());
                }
                Ok(if escalation_enabled { Escalated } else { Completed })
            }
            JobEvent::Outcome(OutcomeClass::Resolved) => match self {
                Pending | InProgress | Escalated | Completed => Ok(Completed),
                Failed => Err(invalid()),
            },
            JobEvent::Outcome(OutcomeClass::WrongNumber) => match self {
                Pending | InProgress | Escalated | Failed => Ok(Failed),
                Completed => Err(invalid()),
            },
            // Terminal jobs stay where they are; a late retriable report never reopens them.
            JobEvent::Outcome(OutcomeClass::Retriable) => match self {
                Pending | InProgress => Ok(Pending),
                terminal => Ok(terminal),
            },
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "ESCALATED" => Ok(JobStatus::Escalated),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Attempt status
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Queued,
    Triggered,
    Dialing,
    Ringing,
    Answered,
    Completed,
    NoAnswer,
    Busy,
    Failed,
    Voicemail,
}

impl AttemptStatus {
    pub const OPEN: [AttemptStatus; 5] = [
        AttemptStatus::Queued,
        AttemptStatus::Triggered,
        AttemptStatus::Dialing,
        AttemptStatus::Ringing,
        AttemptStatus::Answered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Queued => "QUEUED",
            AttemptStatus::Triggered => "TRIGGERED",
            AttemptStatus::Dialing => "DIALING",
            AttemptStatus::Ringing => "RINGING",
            AttemptStatus::Answered => "ANSWERED",
            AttemptStatus::Completed => "COMPLETED",
            AttemptStatus::NoAnswer => "NO_ANSWER",
            AttemptStatus::Busy => "BUSY",
            AttemptStatus::Failed => "FAILED",
            AttemptStatus::Voicemail => "VOICEMAIL",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !Self::OPEN.contains(self)
    }

    /// Maps the status vocabulary used by completion reports.
    pub fn from_report(status: &str) -> Option<Self> {
        let normalized = status.trim().to_ascii_lowercase().replace('-', "_");
        let mapped = match normalized.as_str() {
            "queued" => AttemptStatus::Queued,
            "triggered" | "initiated" => AttemptStatus::Triggered,
            "dialing" => AttemptStatus::Dialing,
            "ringing" => AttemptStatus::Ringing,
            "answered" | "in_progress" => AttemptStatus::Answered,
            "completed" => AttemptStatus::Completed,
            "no_answer" => AttemptStatus::NoAnswer,
            "busy" => AttemptStatus::Busy,
            "failed" | "canceled" | "cancelled" => AttemptStatus::Failed,
            "voicemail" => AttemptStatus::Voicemail,
            _ => return None,
        };
        Some(mapped)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(AttemptStatus::Queued),
            "TRIGGERED" => Ok(AttemptStatus::Triggered),
            "DIALING" => Ok(AttemptStatus::Dialing),
            "RINGING" => Ok(AttemptStatus::Ringing),
            "ANSWERED" => Ok(AttemptStatus::Answered),
            "COMPLETED" => Ok(AttemptStatus::Completed),
            "NO_ANSWER" => Ok(AttemptStatus::NoAnswer),
            "BUSY" => Ok(AttemptStatus::Busy),
            "FAILED" => Ok(AttemptStatus::Failed),
            "VOICEMAIL" => Ok(AttemptStatus::Voicemail),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for AttemptStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CalloutJobRow {
    pub id: Uuid,
    pub voice_agent_id: Uuid,
    pub employee_external_id: Option<String>,
    pub employee_phone: String,
    pub employee_name: Option<String>,
    pub employee_company: Option<String>,
    pub employee_json: Option<Value>,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub total_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub pulled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CalloutAttemptRow {
    pub id: Uuid,
    pub callout_job_id: Uuid,
    pub attempt_number: i32,
    pub local_date: NaiveDate,
    #[sqlx(try_from = "String")]
    pub status: AttemptStatus,
    pub call_sid: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub call_duration_sec: Option<i32>,
    pub error_message: Option<String>,
    pub response_json: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CalloutOutcomeRow {
    pub id: Uuid,
    pub callout_job_id: Uuid,
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
    /// Explicit status node; wins over the category lookup when relaying.
    pub non_contactable_status_node_id: Option<i64>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_moves_pending_to_in_progress() {
        let next = JobStatus::Pending.transition(JobEvent::AttemptRecorded {
            budget_reached: false,
            escalation_enabled: true,
        });
        assert_eq!(next, Ok(JobStatus::InProgress));
    }

    #[test]
    fn test_last_attempt_escalates_only_when_enabled() {
        let escalated = JobStatus::InProgress.transition(JobEvent::AttemptRecorded {
            budget_reached: true,
            escalation_enabled: true,
        });
        assert_eq!(escalated, Ok(JobStatus::Escalated));

        let stays = JobStatus::InProgress.transition(JobEvent::AttemptRecorded {
            budget_reached: true,
            escalation_enabled: false,
        });
        assert_eq!(stays, Ok(JobStatus::InProgress));
    }

    #[test]
    fn test_budget_exhausted_without_escalation_completes() {
        let next = JobStatus::InProgress.transition(JobEvent::BudgetExhausted {
            escalation_enabled: false,
        });
        assert_eq!(next, Ok(JobStatus::Completed));
    }

    #[test]
    fn test_terminal_jobs_reject_attempts() {
        for status in [JobStatus::Completed, JobStatus::Escalated, JobStatus::Failed] {
            let result = status.transition(JobEvent::AttemptRecorded {
                budget_reached: false,
                escalation_enabled: false,
            });
            assert!(result.is_err(), "{status} accepted an attempt");
        }
    }

    #[test]
    fn test_retriable_outcome_never_reopens_terminal_job() {
        let event = JobEvent::Outcome(OutcomeClass::Retriable);
        assert_eq!(JobStatus::InProgress.transition(event), Ok(JobStatus::Pending));
        assert_eq!(JobStatus::Escalated.transition(event), Ok(JobStatus::Escalated));
        assert_eq!(JobStatus::Completed.transition(event), Ok(JobStatus::Completed));
    }

    #[test]
    fn test_wrong_number_fails_job_but_not_completed_one() {
        let event = JobEvent::Outcome(OutcomeClass::WrongNumber);
        assert_eq!(JobStatus::InProgress.transition(event), Ok(JobStatus::Failed));
        assert!(JobStatus::Completed.transition(event).is_err());
    }

    #[test]
    fn test_reset_from_any_state() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Escalated,
            JobStatus::Failed,
        ] {
            assert_eq!(status.transition(JobEvent::Reset), Ok(JobStatus::Pending));
        }
    }

    #[test]
    fn test_outcome_categories() {
        assert_eq!(OutcomeClass::from_category("scheduled"), OutcomeClass::Resolved);
        assert_eq!(OutcomeClass::from_category("Not Interested"), OutcomeClass::Resolved);
        assert_eq!(OutcomeClass::from_category("wrong-number"), OutcomeClass::WrongNumber);
        assert_eq!(OutcomeClass::from_category("busy"), OutcomeClass::Retriable);
        assert_eq!(OutcomeClass::from_category("callback_later"), OutcomeClass::Retriable);
        assert_eq!(OutcomeClass::from_category("whatever"), OutcomeClass::Retriable);
    }

    #[test]
    fn test_report_status_vocabulary() {
        assert_eq!(AttemptStatus::from_report("no-answer"), Some(AttemptStatus::NoAnswer));
        assert_eq!(AttemptStatus::from_report("In-Progress"), Some(AttemptStatus::Answered));
        assert_eq!(AttemptStatus::from_report("cancelled"), Some(AttemptStatus::Failed));
        assert_eq!(AttemptStatus::from_report("exploded"), None);
        assert!(AttemptStatus::Voicemail.is_terminal());
        assert!(!AttemptStatus::Ringing.is_terminal());
    }

    #[test]
    fn test_status_text_round_trip() {
        assert_eq!("IN_PROGRESS".parse::<JobStatus>(), Ok(JobStatus::InProgress));
        assert_eq!(JobStatus::try_from("nope".to_string()), Err(UnknownStatus("nope".into())));
        assert_eq!("NO_ANSWER".parse::<AttemptStatus>(), Ok(AttemptStatus::NoAnswer));
    }
}
