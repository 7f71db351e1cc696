//! Axum route handlers for the contact job API.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::callouts::ingest::OutcomeSubmission;
use crate::errors::AppError;
use crate::jobs::extraction::{normalize_phone, NormalizedRecord};
use crate::jobs::sync::upsert_record;
use crate::models::job::{CalloutAttemptRow, CalloutJobRow, CalloutOutcomeRow};
use crate::state::AppState;
use crate::store::JobFilter;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<CalloutJobRow>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub employee_id: Option<String>,
    pub phone_number: String,
    pub name: Option<String>,
    pub company: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: Uuid,
    pub created: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetailResponse {
    pub job: CalloutJobRow,
    pub attempts: Vec<CalloutAttemptRow>,
    pub outcome: Option<CalloutOutcomeRow>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Loads a job, treating jobs of another agent as absent.
async fn load_job(state: &AppState, agent_id: Uuid, job_id: Uuid) -> Result<CalloutJobRow, AppError> {
    state
        .store
        .get_job(job_id)
        .await?
        .filter(|job| job.voice_agent_id == agent_id)
        .ok_or_else(|| AppError::NotFound(format!("Callout job {job_id} not found")))
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/voiceagents/:agent_id/callouts/jobs
///
/// Filters: `status`, `from`, `to` (creation date), `company`, `search`
/// (name/phone/employee id), paginated by `page` and `pageSize`.
pub async fn handle_list_jobs(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<JobListResponse>, AppError> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(AppError::Validation("'from' must not be after 'to'".to_string()));
        }
    }
    let page = state.store.list_jobs(agent_id, &filter).await?;
    Ok(Json(JobListResponse {
        jobs: page.jobs,
        total: page.total,
        page: filter.page(),
        page_size: filter.page_size(),
    }))
}

/// POST /api/voiceagents/:agent_id/callouts/jobs
///
/// Manual job entry. Upserts on employee id exactly as a pull would.
pub async fn handle_create_job(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), AppError> {
    let phone = request.phone_number.trim().to_string();
    if normalize_phone(&phone).is_empty() {
        return Err(AppError::Validation("phoneNumber must contain digits".to_string()));
    }

    let employee_id = trimmed(request.employee_id);
    let name = trimmed(request.name);
    let company = trimmed(request.company);
    let record = NormalizedRecord {
        raw: json!({
            "employee_id": employee_id,
            "phone_number": phone,
            "name": name,
            "company": company,
            "source": "manual",
        }),
        external_id: employee_id,
        phone,
        name,
        company,
    };

    let outcome = upsert_record(state.store.as_ref(), agent_id, record, Utc::now()).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(CreateJobResponse {
            job_id: outcome.job_id,
            created: outcome.created,
        }),
    ))
}

/// GET /api/voiceagents/:agent_id/callouts/jobs/:job_id
///
/// Job with its attempt timeline and outcome.
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path((agent_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let job = load_job(&state, agent_id, job_id).await?;
    let attempts = state.store.attempts_for_job(job_id).await?;
    let outcome = state.store.outcome_for_job(job_id).await?;
    Ok(Json(JobDetailResponse {
        job,
        attempts,
        outcome,
    }))
}

/// POST /api/voiceagents/:agent_id/callouts/jobs/:job_id/reset
///
/// Clears attempts and outcome and returns the job to PENDING with a fresh
/// budget.
pub async fn handle_reset_job(
    State(state): State<AppState>,
    Path((agent_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CalloutJobRow>, AppError> {
    load_job(&state, agent_id, job_id).await?;
    if !state.store.reset_job(job_id, Utc::now()).await? {
        return Err(AppError::NotFound(format!("Callout job {job_id} not found")));
    }
    tracing::info!("Reset callout job {job_id} to PENDING");
    Ok(Json(load_job(&state, agent_id, job_id).await?))
}

/// POST /api/voiceagents/:agent_id/callouts/jobs/:job_id/outcome
///
/// Outcome posted by the conversation layer (`callbackDate`, `callbackTime`,
/// `nonContactableStatusNodeId`, `notes`). Saved locally, then relayed.
pub async fn handle_submit_outcome(
    State(state): State<AppState>,
    Path((agent_id, job_id)): Path<(Uuid, Uuid)>,
    Json(submission): Json<OutcomeSubmission>,
) -> Result<Json<CalloutOutcomeRow>, AppError> {
    let outcome = state.ingest.submit_outcome(agent_id, job_id, submission).await?;
    Ok(Json(outcome))
}

/// POST /api/voiceagents/:agent_id/callouts/jobs/:job_id/outcome/relay
///
/// Re-posts the job's outcome to the record source.
pub async fn handle_relay_outcome(
    State(state): State<AppState>,
    Path((agent_id, job_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CalloutOutcomeRow>, AppError> {
    let outcome = state.ingest.relay_outcome(agent_id, job_id).await?;
    Ok(Json(outcome))
}
