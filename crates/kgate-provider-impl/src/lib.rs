//! Built-in upstream provider implementations.
//!
//! This crate does not own a network stack. Providers build
//! `UpstreamHttpRequest` values and send them through the
//! `UpstreamClient` handed to them at construction.

mod auth_extractor;
pub mod json_path;
pub mod providers;
mod registry;
mod upstream;

pub use providers::kiro::{KiroProvider, KiroSettings};
pub use registry::register_builtin_providers;
