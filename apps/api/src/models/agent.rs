use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Per-agent callout configuration: telephony credentials, record source
/// endpoints and the field/status mappings for that integration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigRow {
    pub voice_agent_id: Uuid,
    pub auth_url: Option<String>,
    pub add_lead_url: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub list_id: Option<String>,
    pub source: Option<String>,
    pub add_to_hopper: bool,
    pub comments_template: Option<String>,
    pub source_url: Option<String>,
    pub source_update_url_template: Option<String>,
    #[serde(skip_serializing)]
    pub source_api_key: Option<String>,
    pub field_map: Option<Value>,
    pub status_node_map: Option<Value>,
    pub status_tree: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `PUT /callouts/config`. Absent secrets keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigUpdate {
    pub auth_url: Option<String>,
    pub add_lead_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub list_id: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub add_to_hopper: bool,
    pub comments_template: Option<String>,
    pub source_url: Option<String>,
    pub source_update_url_template: Option<String>,
    pub source_api_key: Option<String>,
    pub field_map: Option<FieldMapping>,
    pub status_node_map: Option<HashMap<String, i64>>,
}

/// Primary upstream field name for each extracted job field. Fallback names
/// are always tried after the primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMapping {
    pub id_field: String,
    pub phone_field: String,
    pub name_field: String,
    pub company_field: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            id_field: "employee_id".to_string(),
            phone_field: "phone_number".to_string(),
            name_field: "name".to_string(),
            company_field: "company".to_string(),
        }
    }
}

impl AgentConfigRow {
    pub fn field_mapping(&self) -> FieldMapping {
        self.field_map
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Outcome category → vendor status-taxonomy node id, as configured.
    pub fn status_nodes(&self) -> HashMap<String, i64> {
        self.status_node_map
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}
