//! Record pull and job upsert.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::CalloutError;
use crate::jobs::extraction::{normalize_record, NormalizedRecord};
use crate::models::job::CalloutJobRow;
use crate::source::{RecordSource, SourceConfig};
use crate::store::{CalloutStore, JobRefresh, NewJob};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpsertOutcome {
    pub job_id: Uuid,
    pub created: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullSummary {
    pub saved_count: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub job_ids: Vec<Uuid>,
}

async fn find_existing(
    store: &dyn CalloutStore,
    agent_id: Uuid,
    record: &NormalizedRecord,
) -> Result<Option<CalloutJobRow>> {
    match &record.external_id {
        Some(external_id) => store.find_job_by_external_id(agent_id, external_id).await,
        None => store.find_job_by_phone(agent_id, &record.phone).await,
    }
}

fn refresh_of(record: &NormalizedRecord, now: DateTime<Utc>) -> JobRefresh {
    JobRefresh {
        phone: record.phone.clone(),
        name: record.name.clone(),
        company: record.company.clone(),
        raw: record.raw.clone(),
        pulled_at: now,
    }
}

/// Creates or refreshes the job for one record. Status and attempt counters
/// of an existing job are never touched.
pub async fn upsert_record(
    store: &dyn CalloutStore,
    agent_id: Uuid,
    record: NormalizedRecord,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    if let Some(existing) = find_existing(store, agent_id, &record).await? {
        store.refresh_job(existing.id, refresh_of(&record, now)).await?;
        return Ok(UpsertOutcome {
            job_id: existing.id,
            created: false,
        });
    }

    let inserted = store
        .insert_job(NewJob {
            voice_agent_id: agent_id,
            external_id: record.external_id.clone(),
            phone: record.phone.clone(),
            name: record.name.clone(),
            company: record.company.clone(),
            raw: Some(record.raw.clone()),
            pulled_at: Some(now),
        })
        .await;

    match inserted {
        Ok(job) => Ok(UpsertOutcome {
            job_id: job.id,
            created: true,
        }),
        // A concurrent pull inserted the same key between lookup and insert.
        Err(e) => match find_existing(store, agent_id, &record).await? {
            Some(existing) => {
                store.refresh_job(existing.id, refresh_of(&record, now)).await?;
                Ok(UpsertOutcome {
                    job_id: existing.id,
                    created: false,
                })
            }
            None => Err(e),
        },
    }
}

#[derive(Clone)]
pub struct RecordSync {
    store: Arc<dyn CalloutStore>,
    source: Arc<dyn RecordSource>,
}

impl RecordSync {
    pub fn new(store: Arc<dyn CalloutStore>, source: Arc<dyn RecordSource>) -> Self {
        Self { store, source }
    }

    pub async fn pull_and_upsert(&self, agent_id: Uuid) -> Result<PullSummary, CalloutError> {
        self.pull_and_upsert_at(agent_id, Utc::now()).await
    }

    pub async fn pull_and_upsert_at(
        &self,
        agent_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<PullSummary, CalloutError> {
        let config = self
            .store
            .agent_config(agent_id)
            .await?
            .ok_or_else(|| CalloutError::Configuration(format!("no callout configuration for agent {agent_id}")))?;
        let source_config =
            SourceConfig::from_config(&config).map_err(|e| CalloutError::Configuration(e.to_string()))?;
        let mapping = config.field_mapping();

        let pull = self
            .source
            .fetch_records(&source_config)
            .await
            .map_err(CalloutError::RecordSource)?;

        if let Some(tree) = &pull.status_tree {
            self.store.save_status_tree(agent_id, tree).await?;
        }

        let mut summary = PullSummary::default();
        for raw in &pull.records {
            let Some(record) = normalize_record(raw, &mapping) else {
                summary.skipped_count += 1;
                continue;
            };
            match upsert_record(self.store.as_ref(), agent_id, record, now).await {
                Ok(outcome) => {
                    if outcome.created {
                        summary.new_count += 1;
                    } else {
                        summary.updated_count += 1;
                    }
                    if !summary.job_ids.contains(&outcome.job_id) {
                        summary.job_ids.push(outcome.job_id);
                    }
                }
                Err(e) => {
                    warn!("Failed to upsert record for agent {agent_id}: {e:#}");
                    summary.skipped_count += 1;
                }
            }
        }
        summary.saved_count = summary.new_count + summary.updated_count;

        info!(
            "Pulled {} records for agent {agent_id}: {} new, {} updated, {} skipped",
            pull.records.len(),
            summary.new_count,
            summary.updated_count,
            summary.skipped_count
        );
        Ok(summary)
    }
}
