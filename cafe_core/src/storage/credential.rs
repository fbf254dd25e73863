use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::permissions::PermissionSet;

/// Wire name of the remaining-lifetime variant of the expiry marker.
const EXPIRES_IN: &str = "expiresIn";

/// The authenticated identity of the logged-in user.
///
/// `exp` is the absolute expiry in milliseconds since the Unix epoch. Fields
/// the server sends that this client doesn't know about are kept in `extra`
/// so they survive persistence and token refreshes.
///
/// JSON looks like:
/// `{ "name":"Ali", "username":"ali", "token":"abc", "exp":1700000000000, "permissions":"bd" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Value>,
    pub token: String,
    pub exp: i64,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(rename = "oldToken", default, skip_serializing_if = "Option::is_none")]
    pub old_token: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credential {
    /// Build a credential from a login reply (or any other server object).
    ///
    /// Accepts either `exp` or `expiresIn`; see [`normalize_expiry`].
    pub fn from_wire(value: Value, now_ms: i64) -> Result<Self, serde_json::Error> {
        let value = match value {
            Value::Object(mut fields) => {
                normalize_expiry(&mut fields, now_ms);
                Value::Object(fields)
            }
            other => other,
        };
        serde_json::from_value(value)
    }

    /// Time left before expiry, `None` once elapsed.
    pub fn remaining(&self, now_ms: i64) -> Option<Duration> {
        let left = self.exp.checked_sub(now_ms)?;
        (left > 0).then(|| Duration::from_millis(left as u64))
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.remaining(now_ms).is_none()
    }
}

/// Rewrite a relative `expiresIn` (milliseconds) into the canonical absolute
/// `exp`. An `exp` already present wins. `expiresIn` never survives, since a
/// stored relative lifetime would be wrong on the next read.
pub fn normalize_expiry(fields: &mut Map<String, Value>, now_ms: i64) {
    if let Some(expires_in) = fields.remove(EXPIRES_IN) {
        if fields.contains_key("exp") {
            return;
        }
        // Fractional milliseconds are truncated.
        let ms = expires_in
            .as_i64()
            .or_else(|| expires_in.as_f64().map(|ms| ms as i64));
        match ms {
            Some(ms) => {
                fields.insert("exp".into(), Value::from(now_ms.saturating_add(ms)));
            }
            None => warn!("Ignoring non-numeric {}: {}", EXPIRES_IN, expires_in),
        }
    }
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
