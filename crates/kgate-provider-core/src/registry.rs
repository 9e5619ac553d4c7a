use std::collections::BTreeMap;
use std::sync::Arc;

use crate::UpstreamProvider;

/// Providers by name. The first registered provider answers for model ids
/// nobody claims.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn UpstreamProvider>>,
    fallback: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn UpstreamProvider>) {
        let name = provider.name().to_string();
        if self.fallback.is_none() {
            self.fallback = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn UpstreamProvider>> {
        self.providers.get(name).cloned()
    }

    /// `provider/model` picks by prefix; otherwise the provider listing the
    /// model, then the fallback.
    pub fn for_model(&self, model: &str) -> Option<Arc<dyn UpstreamProvider>> {
        if let Some((prefix, _)) = model.split_once('/')
            && let Some(provider) = self.get(prefix)
        {
            return Some(provider);
        }
        self.providers
            .values()
            .find(|provider| provider.models().iter().any(|id| id == model))
            .cloned()
            .or_else(|| self.fallback.as_deref().and_then(|name| self.get(name)))
    }

    /// `(provider, model)` pairs across all providers.
    pub fn models(&self) -> Vec<(String, String)> {
        self.providers
            .iter()
            .flat_map(|(name, provider)| {
                provider
                    .models()
                    .into_iter()
                    .map(move |model| (name.clone(), model))
            })
            .collect()
    }
}
