//! Scripted `Telephony` used by engine and scheduler tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use super::{DialRequest, Telephony, TelephonyError, VendorResponse};

#[derive(Default)]
pub struct FakeTelephony {
    pub reject_auth: bool,
    /// Phones the vendor refuses with a 422.
    pub reject_phones: Vec<String>,
    auth_calls: Mutex<usize>,
    dials: Mutex<Vec<DialRequest>>,
}

impl FakeTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_auth() -> Self {
        Self {
            reject_auth: true,
            ..Self::default()
        }
    }

    pub fn rejecting(phones: &[&str]) -> Self {
        Self {
            reject_phones: phones.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn auth_calls(&self) -> usize {
        *self.auth_calls.lock().unwrap()
    }

    pub fn dials(&self) -> Vec<DialRequest> {
        self.dials.lock().unwrap().clone()
    }
}

#[async_trait]
impl Telephony for FakeTelephony {
    async fn authenticate(&self, _: &str, _: &str, _: &str) -> Result<String, TelephonyError> {
        *self.auth_calls.lock().unwrap() += 1;
        if self.reject_auth {
            return Err(TelephonyError::Auth {
                status: 401,
                body: "bad credentials".into(),
            });
        }
        Ok("fake-token".into())
    }

    async fn dial(&self, _token: &str, request: &DialRequest) -> Result<VendorResponse, TelephonyError> {
        self.dials.lock().unwrap().push(request.clone());
        if self.reject_phones.contains(&request.phone_number) {
            return Err(TelephonyError::Dial {
                status: 422,
                body: "invalid phone".into(),
            });
        }
        let n = self.dials.lock().unwrap().len();
        Ok(VendorResponse {
            status: 200,
            body: json!({ "call_sid": format!("CA{n}") }),
        })
    }
}
