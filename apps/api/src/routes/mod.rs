pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::callouts::handlers as callouts;
use crate::jobs::handlers as jobs;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Callout runs
        .route(
            "/api/voiceagents/:agent_id/callouts/trigger",
            post(callouts::handle_trigger),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/pull",
            post(callouts::handle_pull),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/pull-and-trigger",
            post(callouts::handle_pull_and_trigger),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/complete",
            post(callouts::handle_complete),
        )
        // Jobs
        .route(
            "/api/voiceagents/:agent_id/callouts/jobs",
            get(jobs::handle_list_jobs).post(jobs::handle_create_job),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/jobs/:job_id",
            get(jobs::handle_get_job),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/jobs/:job_id/reset",
            post(jobs::handle_reset_job),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/jobs/:job_id/outcome",
            post(jobs::handle_submit_outcome),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/jobs/:job_id/outcome/relay",
            post(jobs::handle_relay_outcome),
        )
        // Agent settings
        .route(
            "/api/voiceagents/:agent_id/callouts/schedule",
            get(callouts::handle_get_schedule).put(callouts::handle_put_schedule),
        )
        .route(
            "/api/voiceagents/:agent_id/callouts/config",
            get(callouts::handle_get_config).put(callouts::handle_put_config),
        )
        .with_state(state)
}
