mod rotator;

pub use rotator::{CredentialRotator, RotatorCandidate, RotatorEntry};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::{ProviderError, ProviderResult};

/// Tokens are treated as expired this long before their stated expiry.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

pub const KIRO_TYPE_TAG: &str = "kiro";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Credential {
    Kiro(KiroCredential),
}

/// On-disk Kiro token file. camelCase on the wire; snake_case accepted on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiroCredential {
    #[serde(default, alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token")]
    pub refresh_token: String,
    #[serde(default, alias = "profile_arn")]
    pub profile_arn: String,
    /// Unix seconds. Accepts RFC3339 strings or epoch seconds; written as RFC3339.
    #[serde(
        default,
        alias = "expires_at",
        deserialize_with = "deserialize_expires_at",
        serialize_with = "serialize_expires_at"
    )]
    pub expires_at: i64,
    #[serde(default, alias = "auth_method")]
    pub auth_method: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl KiroCredential {
    /// Social logins carry a profile ARN that must accompany every request.
    pub fn is_social(&self) -> bool {
        self.auth_method.trim().eq_ignore_ascii_case("social")
    }

    pub fn validate(&self) -> ProviderResult<()> {
        if self.access_token.trim().is_empty() {
            return Err(ProviderError::MissingCredentialField("accessToken"));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(ProviderError::MissingCredentialField("refreshToken"));
        }
        if self.expires_at == 0 {
            return Err(ProviderError::MissingCredentialField("expiresAt"));
        }
        Ok(())
    }

    /// True once no more than [`EXPIRY_BUFFER_SECS`] remain (boundary inclusive).
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.expires_at.saturating_sub(now_unix) <= EXPIRY_BUFFER_SECS
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Forces the type tag to `kiro`; returns the previous value when it differed.
    pub fn normalize_type(&mut self) -> Option<String> {
        let previous = std::mem::replace(&mut self.kind, KIRO_TYPE_TAG.to_string());
        let trimmed = previous.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(KIRO_TYPE_TAG) {
            None
        } else {
            Some(previous)
        }
    }
}

fn deserialize_expires_at<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_expires_at(&value).unwrap_or(0))
}

/// Reads an expiry given as RFC3339 text, epoch seconds, or numeric text.
pub fn parse_expires_at(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
                return Some(ts.unix_timestamp());
            }
            s.parse::<i64>().ok()
        }
        _ => None,
    }
}

fn serialize_expires_at<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match OffsetDateTime::from_unix_timestamp(*value)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
    {
        Some(text) => serializer.serialize_str(&text),
        None => serializer.serialize_i64(*value),
    }
}
