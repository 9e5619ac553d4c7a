use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use kgate_provider_core::ProviderRegistry;

use crate::handler::{chat_completions_handler, messages_handler, models_handler};

pub struct CoreState {
    pub registry: Arc<ProviderRegistry>,
}

pub struct Core {
    state: Arc<CoreState>,
}

impl Core {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            state: Arc::new(CoreState { registry }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .route("/v1/messages", post(messages_handler))
            .route("/v1/models", get(models_handler))
            .with_state(self.state.clone())
    }

    pub fn state(&self) -> Arc<CoreState> {
        self.state.clone()
    }
}
