//! Kiro (CodeWhisperer `conversationState`) upstream.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use kgate_protocol::chat::ChatRequest;
use kgate_protocol::claude::{MessageResponse, StreamEvent};
use kgate_protocol::openai::{ChatCompletion, ChatCompletionChunk};
use kgate_provider_core::{
    Credential, CredentialRotator, KiroCredential, ProviderError, ProviderResult, RotatorEntry,
    UpstreamClient, UpstreamCtx, UpstreamProvider,
};

pub mod dispatch;
pub mod fallback;
mod headers;
mod models;
mod output;
mod plan;
pub mod refresh;
pub mod request;
pub mod response;
pub mod store;

pub use dispatch::{DEFAULT_MALFORMED_MARKERS, DispatchOutcome, MalformedMatcher};
pub use headers::{DEFAULT_REGION, endpoint_url, resolve_region};
pub use models::{DEFAULT_MODEL_ID, map_model, public_models};
pub use output::estimate_tokens;

pub const PROVIDER_NAME: &str = "kiro";

/// Metadata key naming one configured credential file to use instead of
/// rotating.
pub const PIN_METADATA_KEY: &str = "credential_path";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KiroSettings {
    /// Region used when neither the token file entry nor the credential
    /// names one.
    pub region: Option<String>,
    /// Extra "malformed request" markers on top of the defaults.
    pub malformed_markers: Vec<String>,
}

pub struct KiroProvider {
    settings: KiroSettings,
    rotator: CredentialRotator,
    client: Arc<dyn UpstreamClient>,
    matcher: MalformedMatcher,
}

impl KiroProvider {
    pub fn new(
        settings: KiroSettings,
        rotator: CredentialRotator,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        let matcher = MalformedMatcher::new(&settings.malformed_markers);
        Self {
            settings,
            rotator,
            client,
            matcher,
        }
    }

    pub fn rotator(&self) -> &CredentialRotator {
        &self.rotator
    }

    pub fn matcher(&self) -> &MalformedMatcher {
        &self.matcher
    }

    fn region_for(&self, cred: &KiroCredential) -> String {
        let override_region = cred.region.as_deref().or(self.settings.region.as_deref());
        resolve_region(override_region, &cred.profile_arn)
    }

    /// The configured entry a request pins. Paths outside the configured set
    /// are refused.
    async fn pinned_entry(&self, req: &ChatRequest) -> ProviderResult<Option<RotatorEntry>> {
        let Some(raw) = req.metadata_str(PIN_METADATA_KEY) else {
            return Ok(None);
        };
        let wanted = Path::new(raw);
        let entries = self.rotator.entries();
        if let Some(entry) = entries.iter().find(|entry| entry.path == wanted) {
            return Ok(Some(entry.clone()));
        }
        if let Ok(wanted) = tokio::fs::canonicalize(wanted).await {
            for entry in entries {
                if tokio::fs::canonicalize(&entry.path)
                    .await
                    .is_ok_and(|path| path == wanted)
                {
                    return Ok(Some(entry.clone()));
                }
            }
        }
        Err(ProviderError::InvalidRequest(format!(
            "{PIN_METADATA_KEY} does not name a configured credential"
        )))
    }

    async fn persist(&self, ctx: &UpstreamCtx, entry: &RotatorEntry, cred: &KiroCredential) {
        if let Err(err) = store::save_credential(&entry.path, cred).await {
            warn!(
                event = "credential_persist_failed",
                trace_id = %ctx.trace_id(),
                credential = %entry.display_name(),
                error = %err
            );
        }
    }

    /// Loads and freshens the next usable credential, then runs the request
    /// ladder with it. Credential problems move on to the next candidate;
    /// upstream failures end the call.
    pub async fn dispatch(
        &self,
        ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<DispatchOutcome> {
        if req.messages.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "messages must not be empty".to_string(),
            ));
        }
        let ctx = with_provider(ctx);
        let model = public_model(&req.model);
        let pinned = self.pinned_entry(req).await?;
        let candidates = self.rotator.select(pinned.as_ref());
        if candidates.is_empty() {
            return Err(ProviderError::InvalidConfig(
                "no kiro credentials configured".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for candidate in candidates {
            let entry = &candidate.entry;
            let prepared = async {
                let mut cred = store::load_credential(entry).await?;
                let region = self.region_for(&cred);
                if refresh::ensure_fresh(self.client.as_ref(), &ctx, &mut cred, &region).await? {
                    self.persist(&ctx, entry, &cred).await;
                }
                Ok::<_, ProviderError>((cred, region))
            }
            .await;
            if let Some(index) = candidate.index {
                self.rotator.advance(index);
            }
            let (cred, region) = match prepared {
                Ok(prepared) => prepared,
                Err(err) => {
                    warn!(
                        event = "credential_unusable",
                        trace_id = %ctx.trace_id(),
                        credential = %entry.display_name(),
                        error = %err
                    );
                    failures.push((entry.display_name(), err));
                    continue;
                }
            };

            let primary = request::build(model, req, &cred, &req.metadata)?;
            let url = endpoint_url(&region, model);
            let outcome = dispatch::dispatch(
                self.client.as_ref(),
                &ctx,
                &self.matcher,
                &url,
                &cred.access_token,
                &primary,
            )
            .await?;
            info!(
                event = "kiro_dispatch_done",
                trace_id = %ctx.trace_id(),
                credential = %entry.display_name(),
                region = %region,
                stage = %outcome.stage,
                transitions = outcome.transitions,
                tool_calls = outcome.decoded.tool_calls.len()
            );
            self.persist(&ctx, entry, &cred).await;
            return Ok(outcome);
        }

        if failures.len() == 1
            && let Some((_, err)) = failures.pop()
        {
            return Err(err);
        }
        let joined = failures
            .iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        Err(ProviderError::Credential(format!(
            "all kiro credentials failed: {joined}"
        )))
    }
}

fn with_provider(ctx: &UpstreamCtx) -> UpstreamCtx {
    let mut ctx = ctx.clone();
    if ctx.provider.is_empty() {
        ctx.provider = PROVIDER_NAME.to_string();
    }
    ctx
}

/// Model id without a `kiro/` routing prefix.
fn public_model(model: &str) -> &str {
    let model = model.trim();
    model
        .strip_prefix(PROVIDER_NAME)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(model)
}

fn prompt_tokens(req: &ChatRequest) -> i64 {
    let mut text = req.system_text().unwrap_or_default();
    for message in &req.messages {
        if let Some(content) = &message.content {
            text.push_str(&content.joined_text());
        }
    }
    estimate_tokens(&text)
}

/// The request as an Anthropic Messages caller sent it, after transcript
/// coalescing.
fn messages_request(req: &ChatRequest) -> ChatRequest {
    ChatRequest {
        messages: request::coalesce_messages(&req.messages),
        ..req.clone()
    }
}

#[async_trait]
impl UpstreamProvider for KiroProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn models(&self) -> Vec<String> {
        public_models()
    }

    async fn execute(&self, ctx: &UpstreamCtx, req: &ChatRequest) -> ProviderResult<ChatCompletion> {
        let outcome = self.dispatch(ctx, req).await?;
        Ok(output::build_completion(
            public_model(&req.model),
            prompt_tokens(req),
            &outcome.decoded,
        ))
    }

    async fn execute_stream(
        &self,
        ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<Vec<ChatCompletionChunk>> {
        let outcome = self.dispatch(ctx, req).await?;
        Ok(output::build_chunks(public_model(&req.model), &outcome.decoded))
    }

    async fn execute_messages(
        &self,
        ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<MessageResponse> {
        let req = messages_request(req);
        let outcome = self.dispatch(ctx, &req).await?;
        Ok(output::build_message(
            public_model(&req.model),
            prompt_tokens(&req),
            &outcome.decoded,
        ))
    }

    async fn execute_messages_stream(
        &self,
        ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<Vec<StreamEvent>> {
        let req = messages_request(req);
        let outcome = self.dispatch(ctx, &req).await?;
        Ok(output::build_message_events(
            public_model(&req.model),
            prompt_tokens(&req),
            &outcome.decoded,
        ))
    }

    async fn refresh(&self, ctx: &UpstreamCtx, credential: Credential) -> ProviderResult<Credential> {
        let Credential::Kiro(cred) = credential;
        let ctx = with_provider(ctx);
        let region = self.region_for(&cred);
        let updated =
            refresh::refresh_access_token(self.client.as_ref(), &ctx, &cred, &region).await?;
        Ok(Credential::Kiro(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_prefix_is_stripped() {
        assert_eq!(public_model("kiro/claude-opus-4-5"), "claude-opus-4-5");
        assert_eq!(public_model(" claude-haiku-4-5 "), "claude-haiku-4-5");
        assert_eq!(public_model("kirox/model"), "kirox/model");
    }
}
