use std::future::Future;
use std::pin::Pin;

use crate::provider::{UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse};

/// Transport seam: performs one HTTP exchange. Implementations own proxying,
/// timeouts and connection reuse; they never retry on their own.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>;
}
