use std::sync::Arc;

use kgate_provider_core::ProviderRegistry;

use crate::KiroProvider;

/// Registers the built-in providers. Kiro becomes the fallback for model ids
/// no provider claims.
pub fn register_builtin_providers(registry: &mut ProviderRegistry, kiro: KiroProvider) -> Arc<KiroProvider> {
    let kiro = Arc::new(kiro);
    registry.register(kiro.clone());
    kiro
}
