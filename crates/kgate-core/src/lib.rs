pub mod core;
pub mod error;
pub mod handler;
pub mod upstream_client;

pub use crate::core::{Core, CoreState};
pub use error::ProxyError;
pub use upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
