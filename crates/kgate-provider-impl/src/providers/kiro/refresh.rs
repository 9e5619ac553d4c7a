use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use kgate_provider_core::{
    Headers, HttpMethod, KiroCredential, ProviderError, ProviderResult, UpstreamClient,
    UpstreamCtx, UpstreamFailure, UpstreamHttpRequest,
};

use crate::auth_extractor;
use crate::upstream::{send_with_logging, truncate};

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const REFRESH_USER_AGENT: &str = "KiroIDE";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    profile_arn: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn refresh_url(cred: &KiroCredential, region: &str) -> String {
    if cred.is_social() {
        format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken")
    } else {
        format!("https://oidc.{region}.amazonaws.com/token")
    }
}

fn refresh_body(cred: &KiroCredential) -> serde_json::Value {
    if cred.is_social() {
        json!({ "refreshToken": cred.refresh_token })
    } else {
        json!({ "refreshToken": cred.refresh_token, "grantType": "refresh_token" })
    }
}

/// Exchanges the refresh token for a new access token.
pub async fn refresh_access_token(
    client: &dyn UpstreamClient,
    ctx: &UpstreamCtx,
    cred: &KiroCredential,
    region: &str,
) -> ProviderResult<KiroCredential> {
    if cred.refresh_token.trim().is_empty() {
        return Err(ProviderError::Refresh("no refresh token available".to_string()));
    }

    let mut headers = Headers::new();
    auth_extractor::set_json(&mut headers);
    auth_extractor::set_user_agent(&mut headers, REFRESH_USER_AGENT);
    let body = serde_json::to_vec(&refresh_body(cred))
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    let req = UpstreamHttpRequest {
        method: HttpMethod::Post,
        url: refresh_url(cred, region),
        headers,
        body: Some(Bytes::from(body)),
    };

    let resp = match send_with_logging(client, ctx, "refresh", req).await {
        Ok(resp) => resp,
        Err(UpstreamFailure::Http { status, body, .. }) => {
            return Err(ProviderError::Refresh(format!(
                "token refresh failed with status {status}: {}",
                truncate(&String::from_utf8_lossy(&body), 200)
            )));
        }
        Err(UpstreamFailure::Transport { message, .. }) => {
            return Err(ProviderError::Refresh(message));
        }
    };
    let body = resp.body;
    let parsed: RefreshResponse = serde_json::from_slice(&body)
        .map_err(|err| ProviderError::Refresh(format!("invalid refresh response: {err}")))?;
    let access_token = parsed
        .access_token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::Refresh("invalid refresh response: missing accessToken".to_string())
        })?;

    let mut updated = cred.clone();
    updated.access_token = access_token;
    if let Some(refresh_token) = parsed.refresh_token.filter(|t| !t.trim().is_empty()) {
        updated.refresh_token = refresh_token;
    }
    if let Some(profile_arn) = parsed.profile_arn.filter(|arn| !arn.trim().is_empty()) {
        updated.profile_arn = profile_arn;
    }
    let lifetime = parsed
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    updated.expires_at = OffsetDateTime::now_utc()
        .unix_timestamp()
        .saturating_add(lifetime);
    Ok(updated)
}

/// Refreshes `cred` in place when it is inside the expiry buffer. Returns
/// whether a refresh happened.
pub async fn ensure_fresh(
    client: &dyn UpstreamClient,
    ctx: &UpstreamCtx,
    cred: &mut KiroCredential,
    region: &str,
) -> ProviderResult<bool> {
    if !cred.is_expired() {
        return Ok(false);
    }
    *cred = refresh_access_token(client, ctx, cred, region).await?;
    info!(
        event = "credential_refreshed",
        trace_id = %ctx.trace_id(),
        provider = %ctx.provider,
        region = %region,
        social = cred.is_social()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(auth_method: &str) -> KiroCredential {
        serde_json::from_value(json!({
            "accessToken": "a",
            "refreshToken": "r",
            "expiresAt": 1,
            "authMethod": auth_method
        }))
        .expect("credential")
    }

    #[test]
    fn endpoint_and_payload_follow_auth_method() {
        let social = cred("social");
        assert_eq!(
            refresh_url(&social, "us-east-1"),
            "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
        );
        assert_eq!(refresh_body(&social), json!({"refreshToken": "r"}));

        let idc = cred("IdC");
        assert_eq!(
            refresh_url(&idc, "eu-west-1"),
            "https://oidc.eu-west-1.amazonaws.com/token"
        );
        assert_eq!(
            refresh_body(&idc),
            json!({"refreshToken": "r", "grantType": "refresh_token"})
        );
    }
}
