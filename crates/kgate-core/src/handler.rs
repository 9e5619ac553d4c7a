use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use kgate_protocol::chat::ChatRequest;
use kgate_protocol::claude::StreamEvent;
use kgate_protocol::openai::{ChatCompletionChunk, Model, ModelList};
use kgate_provider_core::{UpstreamCtx, UpstreamProvider};

use crate::core::CoreState;
use crate::error::{ErrorFlavor, ProxyError};

pub const REQUEST_ID_HEADER: &str = "x-kgate-request-id";

pub async fn chat_completions_handler(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, &body, ErrorFlavor::OpenAi).await
}

/// Anthropic Messages surface over the same providers.
pub async fn messages_handler(
    State(state): State<Arc<CoreState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle(&state, &headers, &body, ErrorFlavor::Anthropic).await
}

async fn handle(state: &CoreState, headers: &HeaderMap, body: &[u8], flavor: ErrorFlavor) -> Response {
    let trace_id = Uuid::new_v4().to_string();
    let req: ChatRequest = match serde_json::from_slice(body) {
        Ok(req) => req,
        Err(err) => {
            return with_request_id(
                ProxyError::bad_request(format!("invalid request body: {err}"))
                    .into_response(flavor),
                &trace_id,
            );
        }
    };
    let Some(provider) = state.registry.for_model(&req.model) else {
        return with_request_id(
            ProxyError::not_found(format!("no provider serves model {:?}", req.model))
                .into_response(flavor),
            &trace_id,
        );
    };

    let started_at = Instant::now();
    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        provider = %provider.name(),
        model = %req.model,
        messages = req.messages.len(),
        is_stream = req.stream,
        surface = flavor.as_str()
    );
    let ctx = UpstreamCtx {
        trace_id: Some(trace_id.clone()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string()),
        provider: provider.name().to_string(),
    };

    let response = match call(provider.as_ref(), &ctx, &req, flavor).await {
        Ok(response) => {
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                provider = %provider.name(),
                status = response.status().as_u16(),
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = req.stream
            );
            response
        }
        Err(proxy) => {
            warn!(
                event = "downstream_responded",
                trace_id = %trace_id,
                provider = %provider.name(),
                status = proxy.status.as_u16(),
                error = %proxy.body.error.message,
                elapsed_ms = started_at.elapsed().as_millis(),
                is_stream = req.stream
            );
            proxy.into_response(flavor)
        }
    };
    with_request_id(response, &trace_id)
}

async fn call(
    provider: &dyn UpstreamProvider,
    ctx: &UpstreamCtx,
    req: &ChatRequest,
    flavor: ErrorFlavor,
) -> Result<Response, ProxyError> {
    match (flavor, req.stream) {
        (ErrorFlavor::OpenAi, false) => json_response(&provider.execute(ctx, req).await?),
        (ErrorFlavor::OpenAi, true) => Ok(sse_response(provider.execute_stream(ctx, req).await?)),
        (ErrorFlavor::Anthropic, false) => {
            json_response(&provider.execute_messages(ctx, req).await?)
        }
        (ErrorFlavor::Anthropic, true) => Ok(message_sse_response(
            provider.execute_messages_stream(ctx, req).await?,
        )),
    }
}

pub async fn models_handler(State(state): State<Arc<CoreState>>) -> Response {
    let created = OffsetDateTime::now_utc().unix_timestamp();
    let list = ModelList {
        object: "list".to_string(),
        data: state
            .registry
            .models()
            .into_iter()
            .map(|(provider, id)| Model {
                id,
                object: "model".to_string(),
                created,
                owned_by: provider,
            })
            .collect(),
    };
    json_response(&list).unwrap_or_else(|err| err.into_response(ErrorFlavor::OpenAi))
}

fn json_response<T: Serialize>(value: &T) -> Result<Response, ProxyError> {
    let body = serde_json::to_vec(value)
        .map_err(|err| ProxyError::internal(format!("response serialization failed: {err}")))?;
    let mut resp = Response::new(Body::from(body));
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(resp)
}

fn event_stream(events: Vec<Bytes>) -> Response {
    let events = events.into_iter().map(Ok::<_, Infallible>).collect::<Vec<_>>();
    let mut resp = Response::new(Body::from_stream(futures_util::stream::iter(events)));
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    resp.headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

/// `data: <chunk>` events followed by `data: [DONE]`.
fn sse_response(chunks: Vec<ChatCompletionChunk>) -> Response {
    let events = chunks
        .iter()
        .filter_map(|chunk| serde_json::to_string(chunk).ok())
        .map(|json| Bytes::from(format!("data: {json}\n\n")))
        .chain(std::iter::once(Bytes::from_static(b"data: [DONE]\n\n")))
        .collect();
    event_stream(events)
}

/// `event: <type>` / `data: <json>` pairs.
fn message_sse_response(events: Vec<StreamEvent>) -> Response {
    let events = events
        .iter()
        .filter_map(|event| {
            let json = serde_json::to_string(event).ok()?;
            Some(Bytes::from(format!(
                "event: {}\ndata: {json}\n\n",
                event.event_name()
            )))
        })
        .collect();
    event_stream(events)
}

fn with_request_id(mut resp: Response, trace_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    resp
}
