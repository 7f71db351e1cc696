//! Vendor telephony client: authenticate, then dial.
//!
//! Both calls are single form-encoded POSTs with no retry here; the trigger
//! engine owns budget and retry policy. One token is fetched per trigger run.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::agent::AgentConfigRow;

#[cfg(test)]
pub mod fake;

/// Response paths the vendor has used for the bearer token over time.
const TOKEN_PATHS: &[&str] = &[
    "/token",
    "/access_token",
    "/accessToken",
    "/data/token",
    "/data/access_token",
    "/data/accessToken",
    "/result/token",
    "/auth_token",
    "/jwt",
];

/// Response paths that may carry the vendor's identifier for the placed call.
const CALL_ID_PATHS: &[&str] = &[
    "/call_sid",
    "/callSid",
    "/call_id",
    "/callId",
    "/lead_id",
    "/data/call_sid",
    "/data/callSid",
    "/data/lead_id",
    "/data/id",
];

#[derive(Debug, Error)]
pub enum TelephonyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication rejected (status {status}): {body}")]
    Auth { status: u16, body: String },

    #[error("authentication response contained no token")]
    MissingToken,

    #[error("dial rejected (status {status}): {body}")]
    Dial { status: u16, body: String },
}

/// Validated credentials for one agent's telephony account.
#[derive(Debug, Clone, PartialEq)]
pub struct TelephonyCredentials {
    pub auth_url: String,
    pub add_lead_url: String,
    pub username: String,
    pub password: String,
    pub list_id: String,
    pub source: String,
    pub add_to_hopper: bool,
    pub comments_template: Option<String>,
}

impl TelephonyCredentials {
    /// Returns the names of the missing fields when the config cannot dial.
    pub fn from_config(config: &AgentConfigRow) -> Result<Self, Vec<&'static str>> {
        fn present(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        }

        let mut missing = Vec::new();
        let mut require = |name: &'static str, value: &Option<String>| {
            let found = present(value);
            if found.is_none() {
                missing.push(name);
            }
            found.unwrap_or_default()
        };

        let auth_url = require("authUrl", &config.auth_url);
        let add_lead_url = require("addLeadUrl", &config.add_lead_url);
        let username = require("username", &config.username);
        let password = require("password", &config.password);
        let list_id = require("listId", &config.list_id);

        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(Self {
            auth_url,
            add_lead_url,
            username,
            password,
            list_id,
            source: present(&config.source).unwrap_or_else(|| "voiceagent".to_string()),
            add_to_hopper: config.add_to_hopper,
            comments_template: present(&config.comments_template),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DialRequest {
    pub add_lead_url: String,
    pub phone_number: String,
    pub list_id: String,
    pub source: String,
    pub add_to_hopper: bool,
    /// Carries the WebSocket URL the agent conversation connects back over.
    pub comments: String,
}

#[derive(Debug, Clone)]
pub struct VendorResponse {
    pub status: u16,
    pub body: Value,
}

impl VendorResponse {
    pub fn call_id(&self) -> Option<String> {
        CALL_ID_PATHS
            .iter()
            .filter_map(|path| self.body.pointer(path))
            .find_map(scalar_string)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Probes the known token locations in an authentication response.
pub fn extract_token(body: &Value) -> Option<String> {
    TOKEN_PATHS
        .iter()
        .filter_map(|path| body.pointer(path))
        .find_map(|v| v.as_str().map(str::trim).filter(|t| !t.is_empty()))
        .map(String::from)
}

#[async_trait]
pub trait Telephony: Send + Sync {
    async fn authenticate(
        &self,
        auth_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String, TelephonyError>;

    async fn dial(&self, token: &str, request: &DialRequest) -> Result<VendorResponse, TelephonyError>;
}

/// reqwest-backed vendor client. Timeouts are the only time bound on a dial.
#[derive(Clone)]
pub struct VendorClient {
    client: Client,
}

impl VendorClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10).min(timeout))
                .timeout(timeout)
                .build()?,
        })
    }
}

#[async_trait]
impl Telephony for VendorClient {
    async fn authenticate(
        &self,
        auth_url: &str,
        username: &str,
        password: &str,
    ) -> Result<String, TelephonyError> {
        let response = self
            .client
            .post(auth_url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            warn!("Vendor auth returned {status}");
            return Err(TelephonyError::Auth {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        extract_token(&body).ok_or(TelephonyError::MissingToken)
    }

    async fn dial(&self, token: &str, request: &DialRequest) -> Result<VendorResponse, TelephonyError> {
        let add_to_hopper = if request.add_to_hopper { "Y" } else { "N" };
        let response = self
            .client
            .post(&request.add_lead_url)
            .bearer_auth(token)
            .form(&[
                ("phone_number", request.phone_number.as_str()),
                ("list_id", request.list_id.as_str()),
                ("source", request.source.as_str()),
                ("add_to_hopper", add_to_hopper),
                ("comments", request.comments.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(TelephonyError::Dial {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!("Vendor accepted dial to {} ({status})", request.phone_number);
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(VendorResponse {
            status: status.as_u16(),
            body,
        })
    }
}
