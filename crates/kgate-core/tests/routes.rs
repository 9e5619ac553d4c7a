use std::sync::Arc;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;
use serde_json::{Value, json};

use kgate_core::Core;
use kgate_core::handler::{
    REQUEST_ID_HEADER, chat_completions_handler, messages_handler, models_handler,
};
use kgate_protocol::chat::ChatRequest;
use kgate_protocol::claude::{
    ContentBlock, ContentBlockDelta, MessageDeltaBody, MessageResponse, MessageType, StopReason,
    StreamEvent, Usage,
};
use kgate_protocol::openai::{
    AssistantMessage, ChatCompletion, ChatCompletionChoice, ChatCompletionChunk,
    ChatCompletionChunkObjectType, ChatCompletionObjectType, ChunkChoice, ChunkDelta,
    CompletionUsage, FinishReason,
};
use kgate_provider_core::{
    AttemptStage, ProviderError, ProviderRegistry, ProviderResult, UpstreamCtx, UpstreamProvider,
};

/// Replies with the last message text; model `boom` fails upstream.
struct EchoProvider;

fn last_text(req: &ChatRequest) -> String {
    req.messages
        .last()
        .and_then(|message| message.content.as_ref())
        .map(|content| content.joined_text())
        .unwrap_or_default()
}

fn reject_boom(req: &ChatRequest) -> ProviderResult<()> {
    if req.model == "boom" {
        return Err(ProviderError::Upstream {
            stage: AttemptStage::Minimal,
            status: 400,
            message: "Improperly formed request.".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl UpstreamProvider for EchoProvider {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn models(&self) -> Vec<String> {
        vec!["echo-1".to_string()]
    }

    async fn execute(&self, ctx: &UpstreamCtx, req: &ChatRequest) -> ProviderResult<ChatCompletion> {
        reject_boom(req)?;
        assert_eq!(ctx.provider, "echo");
        assert!(ctx.trace_id.is_some());
        Ok(ChatCompletion {
            id: "chatcmpl-test".to_string(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: 0,
            model: req.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content: last_text(req),
                    tool_calls: Vec::new(),
                },
                finish_reason: FinishReason::Stop,
            }],
            usage: CompletionUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
            },
        })
    }

    async fn execute_stream(
        &self,
        _ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<Vec<ChatCompletionChunk>> {
        reject_boom(req)?;
        let chunk = |delta: ChunkDelta, finish_reason| ChatCompletionChunk {
            id: "chatcmpl-test".to_string(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: 0,
            model: req.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        };
        Ok(vec![
            chunk(
                ChunkDelta {
                    content: Some(last_text(req)),
                    ..Default::default()
                },
                None,
            ),
            chunk(ChunkDelta::default(), Some(FinishReason::Stop)),
        ])
    }

    async fn execute_messages(
        &self,
        _ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<MessageResponse> {
        reject_boom(req)?;
        Ok(echo_message(req, last_text(req)))
    }

    async fn execute_messages_stream(
        &self,
        _ctx: &UpstreamCtx,
        req: &ChatRequest,
    ) -> ProviderResult<Vec<StreamEvent>> {
        reject_boom(req)?;
        Ok(vec![
            StreamEvent::MessageStart {
                message: echo_message(req, String::new()),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: ContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: ContentBlockDelta::TextDelta {
                    text: last_text(req),
                },
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(StopReason::EndTurn),
                    stop_sequence: None,
                },
                usage: Usage::default(),
            },
            StreamEvent::MessageStop,
        ])
    }
}

fn echo_message(req: &ChatRequest, text: String) -> MessageResponse {
    MessageResponse {
        id: "msg_test".to_string(),
        r#type: MessageType::Message,
        role: "assistant".to_string(),
        model: req.model.clone(),
        content: vec![ContentBlock::Text { text }],
        stop_reason: Some(StopReason::EndTurn),
        stop_sequence: None,
        usage: Usage::default(),
    }
}

fn core() -> Core {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(EchoProvider));
    Core::new(Arc::new(registry))
}

async fn chat(body: Value) -> Response {
    chat_completions_handler(
        State(core().state()),
        HeaderMap::new(),
        Bytes::from(body.to_string()),
    )
    .await
}

async fn messages(body: Value) -> Response {
    messages_handler(
        State(core().state()),
        HeaderMap::new(),
        Bytes::from(body.to_string()),
    )
    .await
}

async fn body_text(resp: Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn chat_completion_returns_json() {
    let resp = chat(json!({
        "model": "echo-1",
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["object"], "chat.completion");
    assert_eq!(value["choices"][0]["message"]["content"], "Hi");
    assert_eq!(value["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn streaming_ends_with_done_marker() {
    let resp = chat(json!({
        "model": "echo-1",
        "stream": true,
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let text = body_text(resp).await;
    let events: Vec<&str> = text.split("\n\n").filter(|e| !e.is_empty()).collect();
    assert_eq!(events.len(), 3);
    assert!(events[0].starts_with("data: {"));
    assert!(events[0].contains("\"content\":\"Hi\""));
    assert_eq!(events[2], "data: [DONE]");
}

#[tokio::test]
async fn provider_errors_keep_upstream_status() {
    let resp = chat(json!({
        "model": "boom",
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .await;
    assert_eq!(resp.status(), 400);
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["error"]["type"], "upstream_error");
    assert_eq!(value["error"]["code"], "minimal");
}

#[tokio::test]
async fn unparseable_body_is_bad_request() {
    let resp = chat_completions_handler(
        State(core().state()),
        HeaderMap::new(),
        Bytes::from_static(b"{not json"),
    )
    .await;
    assert_eq!(resp.status(), 400);
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn empty_registry_reports_unknown_model() {
    let core = Core::new(Arc::new(ProviderRegistry::new()));
    let resp = chat_completions_handler(
        State(core.state()),
        HeaderMap::new(),
        Bytes::from(json!({"model": "x", "messages": []}).to_string()),
    )
    .await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn models_lists_provider_ids() {
    let resp = models_handler(State(core().state())).await;
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["object"], "list");
    assert_eq!(value["data"][0]["id"], "echo-1");
    assert_eq!(value["data"][0]["owned_by"], "echo");
}

#[tokio::test]
async fn messages_returns_anthropic_body() {
    let resp = messages(json!({
        "model": "echo-1",
        "system": "be brief",
        "messages": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}]
    }))
    .await;
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key(REQUEST_ID_HEADER));
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["content"][0]["type"], "text");
    assert_eq!(value["content"][0]["text"], "Hi");
    assert_eq!(value["stop_reason"], "end_turn");
}

#[tokio::test]
async fn messages_stream_names_each_event() {
    let resp = messages(json!({
        "model": "echo-1",
        "stream": true,
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .await;
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let text = body_text(resp).await;
    let events: Vec<&str> = text.split("\n\n").filter(|e| !e.is_empty()).collect();
    assert_eq!(events.len(), 6);
    assert!(events[0].starts_with("event: message_start\ndata: {"));
    assert!(events[2].starts_with("event: content_block_delta\n"));
    assert!(events[2].contains("\"text_delta\""));
    assert_eq!(events[5], "event: message_stop\ndata: {\"type\":\"message_stop\"}");
    assert!(!text.contains("[DONE]"));
}

#[tokio::test]
async fn messages_errors_use_anthropic_envelope() {
    let resp = messages(json!({
        "model": "boom",
        "messages": [{"role": "user", "content": "Hi"}]
    }))
    .await;
    assert_eq!(resp.status(), 400);
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["error"]["type"], "invalid_request_error");
    assert!(value["error"]["message"].as_str().unwrap().contains("Improperly formed"));

    let resp = messages(json!({"model": "nope", "messages": []})).await;
    assert_eq!(resp.status(), 404);
    let value: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(value["error"]["type"], "not_found_error");
}
