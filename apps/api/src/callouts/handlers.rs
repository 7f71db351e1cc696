//! Axum route handlers for the callout run, schedule and configuration API.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use uuid::Uuid;

use crate::callouts::engine::TriggerSummary;
use crate::callouts::ingest::{CompletionReport, IngestResult};
use crate::callouts::scheduler::{parse_run_at, pull_and_trigger, PullAndTriggerReport};
use crate::errors::AppError;
use crate::jobs::sync::PullSummary;
use crate::models::agent::{AgentConfigRow, AgentConfigUpdate};
use crate::models::schedule::{CalloutScheduleRow, ScheduleUpdate};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub job_ids: Option<Vec<Uuid>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

pub fn validate_schedule(update: &ScheduleUpdate) -> Result<(), AppError> {
    if parse_run_at(&update.run_at_local_time).is_none() {
        return Err(AppError::Validation(format!(
            "runAtLocalTime '{}' must be HH:mm",
            update.run_at_local_time
        )));
    }
    if update.timezone.parse::<Tz>().is_err() {
        return Err(AppError::Validation(format!(
            "timezone '{}' is not a valid IANA timezone",
            update.timezone
        )));
    }
    if update.attempts_per_day < 1 {
        return Err(AppError::Validation("attemptsPerDay must be at least 1".to_string()));
    }
    if update.max_days < 1 {
        return Err(AppError::Validation("maxDays must be at least 1".to_string()));
    }
    Ok(())
}

fn validate_config(update: &AgentConfigUpdate) -> Result<(), AppError> {
    let urls = [
        ("authUrl", &update.auth_url),
        ("addLeadUrl", &update.add_lead_url),
        ("sourceUrl", &update.source_url),
    ];
    for (name, value) in urls {
        if let Some(url) = value.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::Validation(format!("{name} must be an http(s) URL")));
            }
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/voiceagents/:agent_id/callouts/trigger
///
/// Dials the given jobs, or every pending/in-progress job when `jobIds` is
/// omitted.
pub async fn handle_trigger(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    body: Option<Json<TriggerRequest>>,
) -> Result<Json<TriggerSummary>, AppError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let summary = state
        .engine
        .trigger_callouts(agent_id, request.job_ids.as_deref())
        .await?;
    Ok(Json(summary))
}

/// POST /api/voiceagents/:agent_id/callouts/pull
pub async fn handle_pull(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<PullSummary>, AppError> {
    Ok(Json(state.sync.pull_and_upsert(agent_id).await?))
}

/// POST /api/voiceagents/:agent_id/callouts/pull-and-trigger
///
/// Pulls records, then dials exactly the jobs that pull saved.
pub async fn handle_pull_and_trigger(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<PullAndTriggerReport>, AppError> {
    let report = pull_and_trigger(&state.sync, &state.engine, agent_id, Utc::now()).await?;
    Ok(Json(report))
}

/// POST /api/voiceagents/:agent_id/callouts/complete
///
/// Call status / outcome report from the conversation layer.
pub async fn handle_complete(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(report): Json<CompletionReport>,
) -> Result<Json<IngestResult>, AppError> {
    Ok(Json(state.ingest.ingest(agent_id, report).await?))
}

/// GET /api/voiceagents/:agent_id/callouts/schedule
pub async fn handle_get_schedule(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<CalloutScheduleRow>, AppError> {
    let schedule = state
        .store
        .schedule(agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No callout schedule for agent {agent_id}")))?;
    Ok(Json(schedule))
}

/// PUT /api/voiceagents/:agent_id/callouts/schedule
pub async fn handle_put_schedule(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(update): Json<ScheduleUpdate>,
) -> Result<Json<CalloutScheduleRow>, AppError> {
    validate_schedule(&update)?;
    let schedule = state.store.upsert_schedule(agent_id, &update, Utc::now()).await?;
    Ok(Json(schedule))
}

/// GET /api/voiceagents/:agent_id/callouts/config
///
/// Secrets (password, source API key) are never returned.
pub async fn handle_get_config(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> Result<Json<AgentConfigRow>, AppError> {
    let config = state
        .store
        .agent_config(agent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No callout configuration for agent {agent_id}")))?;
    Ok(Json(config))
}

/// PUT /api/voiceagents/:agent_id/callouts/config
pub async fn handle_put_config(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(update): Json<AgentConfigUpdate>,
) -> Result<Json<AgentConfigRow>, AppError> {
    validate_config(&update)?;
    let config = state
        .store
        .upsert_agent_config(agent_id, &update, Utc::now())
        .await?;
    Ok(Json(config))
}
