//! External record source (HR system) client.
//!
//! Pulls contact records from a per-agent URL and relays callout outcomes back
//! to a per-employee update endpoint. Response shapes vary by integration, so
//! records and the status taxonomy are located by probing known keys.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::agent::AgentConfigRow;

#[cfg(test)]
pub mod fake;

const RECORD_KEYS: &[&str] = &["employees", "data", "records", "results"];
const STATUS_TREE_KEYS: &[&str] = &["status_tree", "statusTree", "status_taxonomy", "statuses"];
const EMPLOYEE_PLACEHOLDERS: &[&str] = &["{employee_id}", "{employeeId}", ":employee_id", "{id}"];

/// Everything but RFC 3986 unreserved characters is escaped in a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("record source returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unrecognised record source document: {0}")]
    Parse(String),

    #[error("record source is not configured: {0}")]
    NotConfigured(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub url: String,
    pub update_url_template: Option<String>,
    pub api_key: Option<String>,
}

impl SourceConfig {
    pub fn from_config(config: &AgentConfigRow) -> Result<Self, SourceError> {
        let url = config
            .source_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(SourceError::NotConfigured("sourceUrl"))?;
        Ok(Self {
            url: url.to_string(),
            update_url_template: config
                .source_update_url_template
                .clone()
                .filter(|t| !t.trim().is_empty()),
            api_key: config.source_api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourcePull {
    pub records: Vec<Map<String, Value>>,
    pub status_tree: Option<Value>,
}

/// Body posted to the source system's per-employee update endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeRelay {
    pub callback_date: Option<String>,
    pub callback_time: Option<String>,
    pub non_contactable_status_node_id: Option<i64>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, config: &SourceConfig) -> Result<SourcePull, SourceError>;

    async fn post_outcome(
        &self,
        config: &SourceConfig,
        employee_id: &str,
        relay: &OutcomeRelay,
    ) -> Result<(), SourceError>;
}

/// Locates the record array and the optional status tree in a pull response.
pub fn parse_document(doc: Value) -> Result<SourcePull, SourceError> {
    match doc {
        Value::Array(items) => Ok(SourcePull {
            records: into_records(items),
            status_tree: None,
        }),
        Value::Object(mut map) => {
            let status_tree = find_status_tree(&map);
            for key in RECORD_KEYS {
                match map.remove(*key) {
                    Some(Value::Array(items)) => {
                        return Ok(SourcePull {
                            records: into_records(items),
                            status_tree,
                        });
                    }
                    // `{"data": {"employees": [...], "status_tree": ...}}`
                    Some(nested @ Value::Object(_)) if *key == "data" => {
                        let mut inner = parse_document(nested)?;
                        inner.status_tree = inner.status_tree.or(status_tree);
                        return Ok(inner);
                    }
                    _ => {}
                }
            }
            Err(SourceError::Parse(format!(
                "no record array under any of {RECORD_KEYS:?}"
            )))
        }
        other => Err(SourceError::Parse(format!("expected object or array, got {other}"))),
    }
}

fn into_records(items: Vec<Value>) -> Vec<Map<String, Value>> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

fn find_status_tree(map: &Map<String, Value>) -> Option<Value> {
    STATUS_TREE_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|v| !v.is_null())
        .cloned()
}

/// Substitutes the employee id into the update URL template, or appends it as
/// a path segment when the template has no placeholder.
pub fn build_update_url(template: &str, employee_id: &str) -> String {
    let template = template.trim();
    let segment = utf8_percent_encode(employee_id.trim(), PATH_SEGMENT).to_string();
    match EMPLOYEE_PLACEHOLDERS.iter().find(|p| template.contains(*p)) {
        Some(placeholder) => template.replace(placeholder, &segment),
        None => format!("{}/{}", template.trim_end_matches('/'), segment),
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Resolves the vendor status-taxonomy node for an outcome category: the
/// configured mapping wins, otherwise the pulled status tree is searched for a
/// node whose label matches the category.
pub fn resolve_status_node(
    configured: &HashMap<String, i64>,
    status_tree: Option<&Value>,
    category: &str,
) -> Option<i64> {
    let wanted = normalize_label(category);
    configured
        .iter()
        .find(|(k, _)| normalize_label(k) == wanted)
        .map(|(_, v)| *v)
        .or_else(|| status_tree.and_then(|tree| find_node(tree, &wanted)))
}

fn find_node(value: &Value, wanted: &str) -> Option<i64> {
    match value {
        Value::Object(map) => {
            let label = ["name", "label", "title", "status"]
                .iter()
                .filter_map(|k| map.get(*k).and_then(Value::as_str))
                .next();
            let id = ["id", "node_id", "nodeId"]
                .iter()
                .filter_map(|k| map.get(*k))
                .find_map(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())));
            if let (Some(label), Some(id)) = (label, id) {
                if normalize_label(label) == wanted {
                    return Some(id);
                }
            }
            map.values().find_map(|child| find_node(child, wanted))
        }
        Value::Array(items) => items.iter().find_map(|child| find_node(child, wanted)),
        _ => None,
    }
}

#[derive(Clone)]
pub struct SourceClient {
    client: Client,
}

impl SourceClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder, config: &SourceConfig) -> reqwest::RequestBuilder {
        match &config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl RecordSource for SourceClient {
    async fn fetch_records(&self, config: &SourceConfig) -> Result<SourcePull, SourceError> {
        let response = self
            .authorize(self.client.get(&config.url), config)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Record source returned {status}: {body}");
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let doc: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(e.to_string()))?;
        let pull = parse_document(doc)?;
        debug!("Pulled {} records from record source", pull.records.len());
        Ok(pull)
    }

    async fn post_outcome(
        &self,
        config: &SourceConfig,
        employee_id: &str,
        relay: &OutcomeRelay,
    ) -> Result<(), SourceError> {
        let template = config
            .update_url_template
            .as_deref()
            .ok_or(SourceError::NotConfigured("sourceUpdateUrlTemplate"))?;
        let url = build_update_url(template, employee_id);

        let response = self
            .authorize(self.client.post(&url), config)
            .json(relay)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> SourceConfig {
        SourceConfig {
            url: format!("{}/employees", server.uri()),
            update_url_template: Some(format!("{}/employees/{{employee_id}}/status", server.uri())),
            api_key: Some("key-1".into()),
        }
    }

    #[test]
    fn test_records_under_each_known_key() {
        for key in RECORD_KEYS {
            let pull = parse_document(json!({ *key: [{ "phone": "1" }, "junk"] })).unwrap();
            assert_eq!(pull.records.len(), 1, "key {key}");
        }
    }

    #[test]
    fn test_bare_array_and_nested_data() {
        assert_eq!(parse_document(json!([{ "a": 1 }])).unwrap().records.len(), 1);

        let pull = parse_document(json!({
            "data": { "employees": [{ "a": 1 }, { "b": 2 }], "statusTree": [{ "id": 7, "name": "Busy" }] }
        }))
        .unwrap();
        assert_eq!(pull.records.len(), 2);
        assert!(pull.status_tree.is_some());
    }

    #[test]
    fn test_unrecognised_document() {
        assert!(matches!(
            parse_document(json!({ "items": [] })),
            Err(SourceError::Parse(_))
        ));
        assert!(parse_document(json!("nope")).is_err());
    }

    #[test]
    fn test_update_url_placeholder_and_append() {
        assert_eq!(
            build_update_url("https://hr/api/employees/{employee_id}/callback", "E7"),
            "https://hr/api/employees/E7/callback"
        );
        assert_eq!(
            build_update_url("https://hr/api/employees/:employee_id", "E7"),
            "https://hr/api/employees/E7"
        );
        assert_eq!(build_update_url("https://hr/api/employees/", "E7"), "https://hr/api/employees/E7");
    }

    #[test]
    fn test_update_url_escapes_employee_id() {
        assert_eq!(
            build_update_url("https://hr/api/employees/{employeeId}/callback", "HR/22 A?x"),
            "https://hr/api/employees/HR%2F22%20A%3Fx/callback"
        );
        assert_eq!(
            build_update_url("https://hr/api/employees", "emp_7-b.c~"),
            "https://hr/api/employees/emp_7-b.c~"
        );
    }

    #[test]
    fn test_status_node_resolution() {
        let configured = HashMap::from([("not_interested".to_string(), 12)]);
        let tree = json!([
            { "id": 1, "name": "Contactable", "children": [ { "id": 31, "name": "Wrong Number" } ] }
        ]);
        assert_eq!(resolve_status_node(&configured, Some(&tree), "not_interested"), Some(12));
        assert_eq!(resolve_status_node(&configured, Some(&tree), "wrong_number"), Some(31));
        assert_eq!(resolve_status_node(&configured, Some(&tree), "scheduled"), None);
        assert_eq!(resolve_status_node(&HashMap::new(), None, "busy"), None);
    }

    #[tokio::test]
    async fn test_fetch_records_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/employees"))
            .and(header("authorization", "Bearer key-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "employee_id": "E1", "mobile": "9876543210" }],
                "status_tree": { "id": 1, "name": "root" }
            })))
            .mount(&server)
            .await;

        let client = SourceClient::new(Duration::from_secs(5)).unwrap();
        let pull = client.fetch_records(&config(&server)).await.unwrap();
        assert_eq!(pull.records.len(), 1);
        assert_eq!(pull.status_tree, Some(json!({ "id": 1, "name": "root" })));
    }

    #[tokio::test]
    async fn test_fetch_records_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = SourceClient::new(Duration::from_secs(5)).unwrap();
        let err = client.fetch_records(&config(&server)).await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_post_outcome_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/employees/E1/status"))
            .and(body_json(json!({
                "callback_date": "2026-01-30",
                "callback_time": "17:00",
                "non_contactable_status_node_id": null,
                "notes": "prefers Hindi"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = SourceClient::new(Duration::from_secs(5)).unwrap();
        let relay = OutcomeRelay {
            callback_date: Some("2026-01-30".into()),
            callback_time: Some("17:00".into()),
            non_contactable_status_node_id: None,
            notes: Some("prefers Hindi".into()),
        };
        client.post_outcome(&config(&server), "E1", &relay).await.unwrap();
    }

    #[tokio::test]
    async fn test_post_outcome_requires_template() {
        let client = SourceClient::new(Duration::from_secs(5)).unwrap();
        let cfg = SourceConfig {
            url: "http://localhost/x".into(),
            update_url_template: None,
            api_key: None,
        };
        let relay = OutcomeRelay {
            callback_date: None,
            callback_time: None,
            non_contactable_status_node_id: None,
            notes: None,
        };
        let err = client.post_outcome(&cfg, "E1", &relay).await.unwrap_err();
        assert!(matches!(err, SourceError::NotConfigured(_)));
    }
}
