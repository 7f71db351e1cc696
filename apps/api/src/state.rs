use std::sync::Arc;

use crate::callouts::engine::CalloutEngine;
use crate::callouts::ingest::CompletionIngest;
use crate::callouts::scheduler::ScheduleRunner;
use crate::config::Config;
use crate::jobs::sync::RecordSync;
use crate::store::CalloutStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Pluggable persistence. Default: PgCalloutStore.
    pub store: Arc<dyn CalloutStore>,
    pub engine: Arc<CalloutEngine>,
    pub sync: Arc<RecordSync>,
    pub ingest: Arc<CompletionIngest>,
    /// Owned by the state so shutdown can stop it; started from `main`.
    pub scheduler: Arc<ScheduleRunner>,
    pub config: Config,
}
