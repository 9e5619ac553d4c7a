use std::fs;
use std::sync::OnceLock;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use kgate_provider_core::Headers;

use crate::auth_extractor;

pub const DEFAULT_REGION: &str = "us-east-1";

const KIRO_VERSION: &str = "0.1.25";
const SDK_VERSION: &str = "1.0.7";
const FALLBACK_FINGERPRINT: &str = "0000000000000000";
const STREAMING_MODEL_PREFIX: &str = "amazonq-";

/// Picks the upstream region: a non-empty override, else the profile ARN's
/// region segment, else [`DEFAULT_REGION`].
pub fn resolve_region(override_region: Option<&str>, profile_arn: &str) -> String {
    if let Some(region) = override_region.map(str::trim).filter(|r| !r.is_empty()) {
        return region.to_string();
    }
    // arn:aws:codewhisperer:<region>:<account>:profile/<id>
    if let Some(region) = profile_arn.split(':').nth(3).map(str::trim)
        && ["us", "eu", "ap"].iter().any(|p| region.starts_with(p))
    {
        return region.to_string();
    }
    DEFAULT_REGION.to_string()
}

pub fn endpoint_url(region: &str, model: &str) -> String {
    let path = if model.trim().starts_with(STREAMING_MODEL_PREFIX) {
        "SendMessageStreaming"
    } else {
        "generateAssistantResponse"
    };
    format!("https://codewhisperer.{region}.amazonaws.com/{path}")
}

/// Stable per-host identifier: sha256 of the first usable hardware address.
pub fn device_fingerprint() -> &'static str {
    static FINGERPRINT: OnceLock<String> = OnceLock::new();
    FINGERPRINT.get_or_init(|| match first_hardware_address() {
        Some(mac) => hex(&Sha256::digest(mac.as_bytes())),
        None => FALLBACK_FINGERPRINT.to_string(),
    })
}

fn first_hardware_address() -> Option<String> {
    let mut names: Vec<_> = fs::read_dir("/sys/class/net")
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect();
    names.sort();
    names.into_iter().find_map(|name| {
        let raw = fs::read_to_string(format!("/sys/class/net/{name}/address")).ok()?;
        let mac = raw.trim().to_ascii_lowercase();
        let zero = mac.chars().all(|c| c == '0' || c == ':');
        (!mac.is_empty() && !zero).then_some(mac)
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Full header set for one generation call.
pub fn build_headers(access_token: &str) -> Headers {
    let fp = device_fingerprint();
    let mut headers = Headers::new();
    auth_extractor::set_json(&mut headers);
    auth_extractor::set_bearer(&mut headers, access_token);
    auth_extractor::set_header(
        &mut headers,
        "x-amz-user-agent",
        &format!("aws-sdk-js/{SDK_VERSION} KiroIDE-{KIRO_VERSION}-{fp}"),
    );
    auth_extractor::set_user_agent(
        &mut headers,
        &format!(
            "aws-sdk-js/{SDK_VERSION} ua/2.1 os/{} lang/rust api/codewhispererstreaming#{SDK_VERSION} m/E KiroIDE-{KIRO_VERSION}-{fp}",
            std::env::consts::OS
        ),
    );
    auth_extractor::set_header(&mut headers, "amz-sdk-request", "attempt=1; max=1");
    auth_extractor::set_header(&mut headers, "x-amzn-kiro-agent-mode", "vibe");
    auth_extractor::set_header(
        &mut headers,
        "amz-sdk-invocation-id",
        &Uuid::new_v4().to_string(),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgate_provider_core::header_get;

    #[test]
    fn region_resolution_order() {
        let arn = "arn:aws:codewhisperer:eu-central-1:123:profile/abc";
        assert_eq!(resolve_region(Some("ap-south-1"), arn), "ap-south-1");
        assert_eq!(resolve_region(Some("  "), arn), "eu-central-1");
        assert_eq!(resolve_region(None, "arn:aws:x:cn-north-1:1:p"), DEFAULT_REGION);
        assert_eq!(resolve_region(None, ""), DEFAULT_REGION);
    }

    #[test]
    fn streaming_models_use_send_message_endpoint() {
        assert_eq!(
            endpoint_url("us-east-1", "amazonq-claude-sonnet-4-20250514"),
            "https://codewhisperer.us-east-1.amazonaws.com/SendMessageStreaming"
        );
        assert_eq!(
            endpoint_url("eu-west-1", "claude-sonnet-4-5"),
            "https://codewhisperer.eu-west-1.amazonaws.com/generateAssistantResponse"
        );
    }

    #[test]
    fn headers_carry_fingerprint_and_token() {
        let headers = build_headers("tok");
        let fp = device_fingerprint();
        assert_eq!(fp, device_fingerprint());
        assert_eq!(header_get(&headers, "authorization"), Some("Bearer tok"));
        assert!(
            header_get(&headers, "x-amz-user-agent")
                .is_some_and(|ua| ua.ends_with(&format!("KiroIDE-0.1.25-{fp}")))
        );
        assert_eq!(header_get(&headers, "x-amzn-kiro-agent-mode"), Some("vibe"));
        assert!(header_get(&headers, "amz-sdk-invocation-id").is_some());
    }
}
