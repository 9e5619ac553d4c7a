use async_trait::async_trait;
use bytes::Bytes;

use kgate_protocol::chat::ChatRequest;
use kgate_protocol::claude::{MessageResponse, StreamEvent};
use kgate_protocol::openai::{ChatCompletion, ChatCompletionChunk};

use crate::headers::Headers;
use crate::{Credential, ProviderError, ProviderResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// A fully read upstream answer. Event-stream bodies are drained before
/// decoding so fragmented tool-call arguments can be paired.
#[derive(Debug)]
pub struct UpstreamHttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl UpstreamHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamHttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

/// Per-call context handed down from the gateway.
#[derive(Debug, Clone, Default)]
pub struct UpstreamCtx {
    pub trace_id: Option<String>,
    pub user_agent: Option<String>,
    pub provider: String,
}

impl UpstreamCtx {
    pub fn trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or("-")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamTransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    /// Transport-level failures (no HTTP response).
    Transport {
        kind: UpstreamTransportErrorKind,
        message: String,
    },
    /// HTTP error response captured as bytes (usually non-2xx).
    Http {
        status: u16,
        headers: Headers,
        body: Bytes,
    },
}

impl UpstreamFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            UpstreamFailure::Transport { .. } => None,
        }
    }

    /// Human readable failure text (the error body for HTTP failures).
    pub fn message(&self) -> String {
        match self {
            UpstreamFailure::Transport { message, .. } => message.clone(),
            UpstreamFailure::Http { body, .. } => String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// One upstream adapter. The gateway resolves a provider by name and hands it
/// generic chat requests; the provider owns credential selection, wire
/// translation and response normalization.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Public model ids this provider answers for.
    fn models(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, ctx: &UpstreamCtx, req: &ChatRequest) -> ProviderResult<ChatCompletion>;

    /// Same call as [`execute`](Self::execute), re-chunked for incremental delivery.
    async fn execute_stream(
        &self,
        _ctx: &UpstreamCtx,
        _req: &ChatRequest,
    ) -> ProviderResult<Vec<ChatCompletionChunk>> {
        Err(ProviderError::Unsupported("execute_stream"))
    }

    /// Anthropic Messages answer for the same request.
    async fn execute_messages(
        &self,
        _ctx: &UpstreamCtx,
        _req: &ChatRequest,
    ) -> ProviderResult<MessageResponse> {
        Err(ProviderError::Unsupported("execute_messages"))
    }

    async fn execute_messages_stream(
        &self,
        _ctx: &UpstreamCtx,
        _req: &ChatRequest,
    ) -> ProviderResult<Vec<StreamEvent>> {
        Err(ProviderError::Unsupported("execute_messages_stream"))
    }

    async fn refresh(&self, _ctx: &UpstreamCtx, _credential: Credential) -> ProviderResult<Credential> {
        Err(ProviderError::Unsupported("refresh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_failure_message_is_body_text() {
        let failure = UpstreamFailure::Http {
            status: 400,
            headers: Headers::new(),
            body: Bytes::from_static(b"Improperly formed request."),
        };
        assert_eq!(failure.status(), Some(400));
        assert_eq!(failure.message(), "Improperly formed request.");
    }
}
