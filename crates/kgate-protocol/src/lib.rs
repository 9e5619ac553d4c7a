//! Wire models shared across kgate crates.
//!
//! `chat` is the caller-facing request shape (accepting both OpenAI and
//! Anthropic flavoured messages), `kiro` is the upstream conversation
//! envelope, and `openai` and `claude` hold the outbound payloads.

pub mod chat;
pub mod claude;
pub mod kiro;
pub mod openai;
