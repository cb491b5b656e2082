//! Wire types for the identify service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::ConsolidatedContact;

/// Phone numbers arrive either as JSON strings or as bare numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhoneValue {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneValue {
    pub fn into_string(self) -> String {
        match self {
            PhoneValue::Text(s) => s,
            PhoneValue::Number(n) => n.to_string(),
        }
    }
}

/// Body of `POST /identify`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(
        default,
        rename = "phoneNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub phone_number: Option<PhoneValue>,
}

impl IdentifyBody {
    pub fn into_parts(self) -> (Option<String>, Option<String>) {
        (self.email, self.phone_number.map(PhoneValue::into_string))
    }
}

/// Successful `POST /identify` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedContact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Response for `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub endpoints: BTreeMap<String, String>,
}
