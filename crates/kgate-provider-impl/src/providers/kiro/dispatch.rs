//! The primary -> flattened -> minimal request ladder.

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, warn};

use kgate_provider_core::{
    AttemptStage, HttpMethod, ProviderError, ProviderResult, UpstreamClient, UpstreamCtx,
    UpstreamFailure, UpstreamHttpRequest,
};

use super::fallback::{build_flattened, build_minimal};
use super::headers::build_headers;
use super::response::{DecodedResponse, decode};
use crate::upstream::{send_with_logging, truncate};

pub const DEFAULT_MALFORMED_MARKERS: &[&str] = &["Improperly formed request"];

const MAX_ERROR_MESSAGE_CHARS: usize = 512;

/// Top-level fields a rejection document carries its reason in.
const ERROR_FIELDS: &[&str] = &["message", "Message", "__type", "reason"];

/// Recognises the upstream's "malformed request" rejection by
/// case-insensitive substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMatcher {
    markers: Vec<String>,
}

impl Default for MalformedMatcher {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

impl MalformedMatcher {
    /// The default markers plus `extra`. Blank entries are ignored.
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut markers: Vec<String> = Vec::new();
        let defaults = DEFAULT_MALFORMED_MARKERS.iter().map(|m| m.to_string());
        for marker in defaults.chain(extra.into_iter().map(|m| m.as_ref().to_string())) {
            let marker = marker.trim().to_lowercase();
            if !marker.is_empty() && !markers.contains(&marker) {
                markers.push(marker);
            }
        }
        Self { markers }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.markers.iter().any(|marker| text.contains(marker.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub decoded: DecodedResponse,
    /// Stage whose response was decoded.
    pub stage: AttemptStage,
    /// Number of fallback steps taken before that stage.
    pub transitions: usize,
}

/// Error text of a 2xx body that is a bare error document. Assistant
/// content is never inspected.
fn success_error_text(body: &[u8]) -> Option<String> {
    let root: Value = serde_json::from_slice(body).ok()?;
    let text = ERROR_FIELDS
        .iter()
        .filter_map(|field| root.get(*field)?.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn stage_body(stage: AttemptStage, primary: &[u8]) -> ProviderResult<Vec<u8>> {
    match stage {
        AttemptStage::Primary => Ok(primary.to_vec()),
        AttemptStage::Flattened => build_flattened(primary),
        AttemptStage::Minimal => build_minimal(primary),
    }
}

/// Sends `primary` to `url`, stepping down the ladder on malformed-request
/// rejections. Any other failure ends the call at the stage it happened.
pub async fn dispatch(
    client: &dyn UpstreamClient,
    ctx: &UpstreamCtx,
    matcher: &MalformedMatcher,
    url: &str,
    access_token: &str,
    primary: &[u8],
) -> ProviderResult<DispatchOutcome> {
    let mut stage = AttemptStage::Primary;
    let mut transitions = 0;
    loop {
        let req = UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: url.to_string(),
            headers: build_headers(access_token),
            body: Some(Bytes::from(stage_body(stage, primary)?)),
        };

        let rejection = match send_with_logging(client, ctx, stage.as_str(), req).await {
            Ok(resp) => {
                let status = resp.status;
                let body = resp.body;
                let rejected =
                    success_error_text(&body).is_some_and(|text| matcher.matches(&text));
                if !rejected {
                    let decoded = decode(&body);
                    debug!(
                        event = "upstream_decoded",
                        trace_id = %ctx.trace_id(),
                        stage = %stage,
                        text_chars = decoded.text.chars().count(),
                        tool_calls = decoded.tool_calls.len()
                    );
                    return Ok(DispatchOutcome {
                        decoded,
                        stage,
                        transitions,
                    });
                }
                ProviderError::Upstream {
                    stage,
                    status,
                    message: truncate(&String::from_utf8_lossy(&body), MAX_ERROR_MESSAGE_CHARS),
                }
            }
            Err(UpstreamFailure::Http { status, body, .. }) => {
                let text = String::from_utf8_lossy(&body);
                let err = ProviderError::Upstream {
                    stage,
                    status,
                    message: truncate(&text, MAX_ERROR_MESSAGE_CHARS),
                };
                if !(400..500).contains(&status) || !matcher.matches(&text) {
                    return Err(err);
                }
                err
            }
            Err(UpstreamFailure::Transport { message, .. }) => {
                return Err(ProviderError::Transport { stage, message });
            }
        };

        let Some(next) = stage.next() else {
            return Err(rejection);
        };
        warn!(
            event = "fallback_transition",
            trace_id = %ctx.trace_id(),
            provider = %ctx.provider,
            from = %stage,
            to = %next,
            error = %rejection
        );
        stage = next;
        transitions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matcher_is_case_insensitive_and_extensible() {
        let matcher = MalformedMatcher::default();
        assert!(matcher.matches("{\"message\":\"Improperly formed request.\"}"));
        assert!(matcher.matches("IMPROPERLY FORMED REQUEST"));
        assert!(!matcher.matches("the server saw a malformed request"));
        assert!(!matcher.matches("Too many requests"));

        let matcher =
            MalformedMatcher::new(["Input is too long", " ", "improperly formed request"]);
        assert_eq!(matcher.markers().len(), 2);
        assert!(matcher.matches("input is too long for requested model"));
    }

    #[test]
    fn success_bodies_are_read_through_error_fields_only() {
        assert_eq!(
            success_error_text(br#"{"message":"Improperly formed request."}"#).as_deref(),
            Some("Improperly formed request.")
        );
        assert_eq!(
            success_error_text(br#"{"__type":"ValidationException","message":"bad"}"#)
                .as_deref(),
            Some("bad ValidationException")
        );
        assert!(success_error_text(br#"{"content":"Improperly formed request"}"#).is_none());
        assert!(success_error_text(b"{\"content\":\"a\"}\n{\"content\":\"b\"}").is_none());
    }
}
