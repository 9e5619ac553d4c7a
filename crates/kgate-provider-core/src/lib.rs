//! Core provider abstractions for kgate.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP client.
//! Providers build `UpstreamHttpRequest` values and hand them to an
//! [`UpstreamClient`], which a higher layer implements over real IO.

pub mod credential;
pub mod errors;
pub mod headers;
pub mod provider;
pub mod registry;
pub mod upstream_client;

pub use credential::{Credential, CredentialRotator, KiroCredential, RotatorCandidate, RotatorEntry};
pub use errors::{AttemptStage, ProviderError, ProviderResult};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    HttpMethod, UpstreamCtx, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamProvider, UpstreamTransportErrorKind,
};
pub use registry::ProviderRegistry;
pub use upstream_client::UpstreamClient;
