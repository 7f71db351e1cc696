//! Daily schedule runner.
//!
//! Polls active schedules and fires each at most once per tenant-local day,
//! once local time has passed `run_at_local_time`. A fire stamps
//! `last_run_at` before any work starts, then pulls records and triggers
//! callouts over the pulled jobs in a detached task.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::callouts::engine::{CalloutEngine, TriggerSummary};
use crate::errors::CalloutError;
use crate::jobs::sync::{PullSummary, RecordSync};
use crate::store::CalloutStore;

/// Parses a "HH:mm" wall-clock time.
pub fn parse_run_at(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// True when local time has reached `run_at` and the schedule has not yet
/// fired on the current local date.
pub fn should_fire(
    run_at: NaiveTime,
    timezone: Tz,
    last_run_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let local_now = now.with_timezone(&timezone);
    if local_now.time() < run_at {
        return false;
    }
    match last_run_at {
        None => true,
        Some(last) => last.with_timezone(&timezone).date_naive() != local_now.date_naive(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullAndTriggerReport {
    pub pull: PullSummary,
    pub trigger: TriggerSummary,
}

/// Pulls records, then triggers callouts over exactly the pulled jobs. A
/// trigger run that aborts is reported in `trigger.error`; a failed pull
/// aborts the cycle.
pub async fn pull_and_trigger(
    sync: &RecordSync,
    engine: &CalloutEngine,
    agent_id: Uuid,
    now: DateTime<Utc>,
) -> Result<PullAndTriggerReport, CalloutError> {
    let pull = sync.pull_and_upsert_at(agent_id, now).await?;
    let trigger = match engine
        .trigger_callouts_at(agent_id, Some(pull.job_ids.as_slice()), now)
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            warn!("Callout run for agent {agent_id} aborted: {e}");
            TriggerSummary::aborted(&e)
        }
    };
    Ok(PullAndTriggerReport { pull, trigger })
}

struct Worker {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

pub struct ScheduleRunner {
    store: Arc<dyn CalloutStore>,
    sync: Arc<RecordSync>,
    engine: Arc<CalloutEngine>,
    poll_interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl ScheduleRunner {
    pub fn new(
        store: Arc<dyn CalloutStore>,
        sync: Arc<RecordSync>,
        engine: Arc<CalloutEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            sync,
            engine,
            poll_interval,
            worker: Mutex::new(None),
        }
    }

    /// Starts the polling loop. A second call while running is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move { runner.poll_loop(token).await });

        info!("Schedule runner started (poll every {:?})", self.poll_interval);
        *worker = Some(Worker { handle, cancel_token });
    }

    /// Stops the polling loop and waits for it to exit. Fires already spawned
    /// keep running to completion.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };
        worker.cancel_token.cancel();
        if let Err(e) = worker.handle.await {
            error!("Schedule runner task failed to join: {e}");
        }
        info!("Schedule runner stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    async fn poll_loop(&self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        error!("Schedule poll failed: {e:#}");
                    }
                }
                _ = cancel_token.cancelled() => {
                    info!("Schedule runner loop shutting down");
                    break;
                }
            }
        }
    }

    /// Evaluates every active schedule once. Returns the agents fired.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let mut fired = Vec::new();

        for schedule in self.store.active_schedules().await? {
            let agent_id = schedule.voice_agent_id;
            let Some(run_at) = parse_run_at(&schedule.run_at_local_time) else {
                warn!(
                    "Schedule {} has invalid run time '{}'",
                    schedule.id, schedule.run_at_local_time
                );
                continue;
            };
            let Ok(timezone) = schedule.timezone.parse::<Tz>() else {
                warn!("Schedule {} has invalid timezone '{}'", schedule.id, schedule.timezone);
                continue;
            };
            if !should_fire(run_at, timezone, schedule.last_run_at, now) {
                continue;
            }

            // Stamped before the work starts so a slow cycle cannot fire twice.
            if let Err(e) = self.store.mark_schedule_run(schedule.id, now).await {
                error!("Could not stamp schedule {}: {e:#}", schedule.id);
                continue;
            }
            info!("Firing callout schedule for agent {agent_id}");
            fired.push(agent_id);

            let sync = Arc::clone(&self.sync);
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                match pull_and_trigger(&sync, &engine, agent_id, Utc::now()).await {
                    Ok(report) => info!(
                        "Scheduled cycle for agent {agent_id}: {} pulled, {} triggered, {} failed",
                        report.pull.saved_count, report.trigger.triggered, report.trigger.failed
                    ),
                    Err(e) => error!("Scheduled cycle for agent {agent_id} failed: {e}"),
                }
            });
        }

        Ok(fired)
    }
}
