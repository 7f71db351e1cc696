//! Scripted `RecordSource` used by sync, ingest and scheduler tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{OutcomeRelay, RecordSource, SourceConfig, SourceError, SourcePull};

#[derive(Default)]
pub struct FakeSource {
    records: Mutex<Vec<Map<String, Value>>>,
    status_tree: Mutex<Option<Value>>,
    fail_fetch: bool,
    fail_post: bool,
    posted: Mutex<Vec<(String, OutcomeRelay)>>,
}

impl FakeSource {
    pub fn with_records(records: Vec<Value>) -> Self {
        let source = Self::default();
        source.set_records(records);
        source
    }

    pub fn failing_fetch() -> Self {
        Self {
            fail_fetch: true,
            ..Self::default()
        }
    }

    pub fn failing_posts() -> Self {
        Self {
            fail_post: true,
            ..Self::default()
        }
    }

    pub fn set_records(&self, records: Vec<Value>) {
        *self.records.lock().unwrap() = records
            .into_iter()
            .filter_map(|r| match r {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
    }

    pub fn set_status_tree(&self, tree: Value) {
        *self.status_tree.lock().unwrap() = Some(tree);
    }

    pub fn posted(&self) -> Vec<(String, OutcomeRelay)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSource for FakeSource {
    async fn fetch_records(&self, _: &SourceConfig) -> Result<SourcePull, SourceError> {
        if self.fail_fetch {
            return Err(SourceError::Status {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(SourcePull {
            records: self.records.lock().unwrap().clone(),
            status_tree: self.status_tree.lock().unwrap().clone(),
        })
    }

    async fn post_outcome(
        &self,
        _: &SourceConfig,
        employee_id: &str,
        relay: &OutcomeRelay,
    ) -> Result<(), SourceError> {
        if self.fail_post {
            return Err(SourceError::Status {
                status: 500,
                body: "update failed".into(),
            });
        }
        self.posted
            .lock()
            .unwrap()
            .push((employee_id.to_string(), relay.clone()));
        Ok(())
    }
}
