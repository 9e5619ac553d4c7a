use std::time::Instant;

use tracing::{info, warn};

use kgate_provider_core::{
    UpstreamClient, UpstreamCtx, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
};

fn log_upstream_request(ctx: &UpstreamCtx, op: &str, req: &UpstreamHttpRequest) -> Instant {
    info!(
        event = "upstream_request",
        trace_id = %ctx.trace_id(),
        provider = %ctx.provider,
        op = %op,
        method = %req.method.as_str(),
        url = %req.url
    );
    Instant::now()
}

fn log_upstream_response_ok(ctx: &UpstreamCtx, op: &str, status: u16, elapsed_ms: u128) {
    info!(
        event = "upstream_response",
        trace_id = %ctx.trace_id(),
        provider = %ctx.provider,
        op = %op,
        status = status,
        elapsed_ms = elapsed_ms
    );
}

fn log_upstream_response_err(ctx: &UpstreamCtx, op: &str, elapsed_ms: u128, err: &UpstreamFailure) {
    let status = err
        .status()
        .map(|status| status.to_string())
        .unwrap_or_else(|| "error".to_string());
    warn!(
        event = "upstream_response",
        trace_id = %ctx.trace_id(),
        provider = %ctx.provider,
        op = %op,
        status = %status,
        elapsed_ms = elapsed_ms,
        error = %truncate(&err.message(), 256)
    );
}

/// Sends through `client`, logging the exchange. Non-2xx answers are turned
/// into [`UpstreamFailure::Http`].
pub(crate) async fn send_with_logging(
    client: &dyn UpstreamClient,
    ctx: &UpstreamCtx,
    op: &str,
    req: UpstreamHttpRequest,
) -> Result<UpstreamHttpResponse, UpstreamFailure> {
    let started_at = log_upstream_request(ctx, op, &req);
    let result = match client.send(req).await {
        Ok(resp) if resp.is_success() => Ok(resp),
        Ok(resp) => {
            let status = resp.status;
            let headers = resp.headers;
            Err(UpstreamFailure::Http {
                status,
                headers,
                body: resp.body,
            })
        }
        Err(err) => Err(err),
    };
    let elapsed_ms = started_at.elapsed().as_millis();
    match &result {
        Ok(resp) => log_upstream_response_ok(ctx, op, resp.status, elapsed_ms),
        Err(err) => log_upstream_response_err(ctx, op, elapsed_ms, err),
    }
    result
}

/// Cuts `text` to at most `max` characters, marking the cut.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo", 2), "hé...");
    }
}
