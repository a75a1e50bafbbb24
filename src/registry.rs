//! src/registry.rs
//!
//! Holds the adapter collection and unifies static/dynamic model
//! resolution. Static catalogs are cached once at construction; dynamic
//! models are fetched per call and never cached.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ImageError, Result};
use crate::provider::{
    ConnectionConfig, DashScopeAdapter, GeminiAdapter, ImageAdapter, Model, ModelScopeAdapter,
    OllamaAdapter, OpenAIAdapter, OpenRouterAdapter, Provider, SeedreamAdapter,
    SiliconFlowAdapter,
};

pub struct AdapterRegistry {
    /// Keyed by lowercased provider id.
    adapters: HashMap<String, Arc<dyn ImageAdapter>>,
    static_models: RwLock<HashMap<String, Vec<Model>>>,
}

impl AdapterRegistry {
    /// Registry over an explicit adapter set. Adapters are keyed by their
    /// own provider id, lowercased.
    pub fn new(adapters: Vec<Arc<dyn ImageAdapter>>) -> Self {
        let mut map: HashMap<String, Arc<dyn ImageAdapter>> = HashMap::new();
        for adapter in adapters {
            let key = adapter.provider().id.to_lowercase();
            map.insert(key, adapter);
        }
        let registry = Self {
            adapters: map,
            static_models: RwLock::new(HashMap::new()),
        };
        registry.preload_static_models();
        registry
    }

    /// All built-in provider adapters.
    pub fn with_builtin_adapters() -> Self {
        Self::new(vec![
            Arc::new(OpenAIAdapter::new()),
            Arc::new(GeminiAdapter::new()),
            Arc::new(DashScopeAdapter::new()),
            Arc::new(ModelScopeAdapter::new()),
            Arc::new(OllamaAdapter::new()),
            Arc::new(SeedreamAdapter::new()),
            Arc::new(SiliconFlowAdapter::new()),
            Arc::new(OpenRouterAdapter::new()),
        ])
    }

    /// Registers under an explicit key. Mostly useful in tests; the cache
    /// preload guard below ignores keys that do not match the adapter's own
    /// provider id.
    pub fn register_as(&mut self, key: &str, adapter: Arc<dyn ImageAdapter>) {
        self.adapters.insert(key.to_lowercase(), adapter);
        self.preload_static_models();
    }

    fn preload_static_models(&self) {
        let mut cache = self.static_models.write();
        cache.clear();
        for (key, adapter) in &self.adapters {
            // Guard against misconfigured duplicate registrations: only
            // cache when the adapter really answers for this key.
            if adapter.provider().id.to_lowercase() == *key {
                cache.insert(key.clone(), adapter.models());
            }
        }
    }

    /// Case-insensitive adapter lookup.
    pub fn adapter(&self, provider_id: &str) -> Result<Arc<dyn ImageAdapter>> {
        self.adapters
            .get(&provider_id.to_lowercase())
            .cloned()
            .ok_or_else(|| ImageError::ProviderNotFound {
                provider_id: provider_id.to_string(),
            })
    }

    /// Cached static catalog; repopulates the cache on a miss.
    pub fn static_models(&self, provider_id: &str) -> Result<Vec<Model>> {
        let key = provider_id.to_lowercase();
        if let Some(models) = self.static_models.read().get(&key) {
            return Ok(models.clone());
        }
        let models = self.adapter(provider_id)?.models();
        self.static_models.write().insert(key, models.clone());
        Ok(models)
    }

    /// Live model list. Errors when the provider does not support dynamic
    /// listing, and propagates adapter failures (after logging them) —
    /// unlike [`AdapterRegistry::models`], which falls back.
    pub async fn dynamic_models(
        &self,
        provider_id: &str,
        connection: &ConnectionConfig,
    ) -> Result<Vec<Model>> {
        let adapter = self.adapter(provider_id)?;
        if !adapter.provider().supports_dynamic_models {
            return Err(ImageError::DynamicModelsUnsupported {
                provider_id: provider_id.to_string(),
            });
        }
        adapter.models_async(connection).await.map_err(|e| {
            log::error!("dynamic model fetch failed for {}: {}", provider_id, e);
            e
        })
    }

    /// Unified resolution: when the provider supports dynamic models and a
    /// connection is available, merge dynamic over static by id — dynamic
    /// entries first, then static entries whose id did not collide. A
    /// dynamic fetch failure degrades to the static catalog; this method
    /// never fails because of one.
    pub async fn models(
        &self,
        provider_id: &str,
        connection: Option<&ConnectionConfig>,
    ) -> Result<Vec<Model>> {
        let adapter = self.adapter(provider_id)?;
        let static_models = self.static_models(provider_id)?;

        let connection = match connection {
            Some(c) if adapter.provider().supports_dynamic_models => c,
            _ => return Ok(static_models),
        };

        match adapter.models_async(connection).await {
            Ok(dynamic) => {
                let mut merged = dynamic.clone();
                merged.extend(
                    static_models
                        .into_iter()
                        .filter(|s| !dynamic.iter().any(|d| d.id == s.id)),
                );
                Ok(merged)
            }
            Err(e) => {
                log::warn!(
                    "dynamic model fetch failed for {}, falling back to static catalog: {}",
                    provider_id,
                    e
                );
                Ok(static_models)
            }
        }
    }

    /// All registered providers, de-duplicated by provider id (alias
    /// registrations would otherwise show up twice).
    pub fn all_providers(&self) -> Vec<Provider> {
        let mut seen = HashMap::new();
        for adapter in self.adapters.values() {
            let provider = adapter.provider();
            seen.entry(provider.id.clone()).or_insert(provider);
        }
        let mut providers: Vec<Provider> = seen.into_values().collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    /// True iff the model id appears in the provider's static catalog.
    /// Never errors: an unknown provider simply yields false.
    pub fn validate_provider_model(&self, provider_id: &str, model_id: &str) -> bool {
        match self.static_models(provider_id) {
            Ok(models) => models.iter().any(|m| m.id == model_id),
            Err(_) => false,
        }
    }

    /// Clears and re-preloads the static cache. Used for provider
    /// hot-reload and test isolation.
    pub fn clear_cache(&self) {
        self.preload_static_models();
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtin_adapters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ImageError;
    use crate::manager::ModelConfig;
    use crate::provider::{
        ConnectionSchema, ImageRequest, ImageResult, ModelCapabilities,
    };
    use serde_json::Map;

    #[derive(Debug)]
    struct StubAdapter {
        id: &'static str,
        /// What provider() reports; differs from the registration key in
        /// the alias tests.
        advertised_id: &'static str,
        supports_dynamic: bool,
        static_ids: Vec<&'static str>,
        dynamic_ids: Option<Vec<&'static str>>, // None = fetch fails
    }

    impl StubAdapter {
        fn model(&self, id: &str) -> Model {
            Model {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                provider_id: self.advertised_id.to_string(),
                capabilities: ModelCapabilities::text2image_only(),
                parameter_definitions: vec![],
                default_parameter_values: Map::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ImageAdapter for StubAdapter {
        fn provider(&self) -> Provider {
            Provider {
                id: self.advertised_id.to_string(),
                name: self.advertised_id.to_string(),
                description: String::new(),
                requires_api_key: false,
                default_base_url: "http://localhost".to_string(),
                supports_dynamic_models: self.supports_dynamic,
                cors_restricted: None,
                api_key_url: None,
                connection_schema: ConnectionSchema::default(),
            }
        }

        fn models(&self) -> Vec<Model> {
            self.static_ids.iter().map(|id| self.model(id)).collect()
        }

        async fn models_async(&self, _connection: &ConnectionConfig) -> Result<Vec<Model>> {
            match &self.dynamic_ids {
                Some(ids) => Ok(ids.iter().map(|id| self.model(id)).collect()),
                None => Err(ImageError::generation_failed(self.id, "connection refused")),
            }
        }

        fn build_default_model(&self, model_id: &str) -> Model {
            self.model(model_id)
        }

        async fn generate(
            &self,
            _request: &ImageRequest,
            _config: &ModelConfig,
        ) -> Result<ImageResult> {
            unimplemented!("stub adapter does not generate")
        }
    }

    fn stub_registry(dynamic_ids: Option<Vec<&'static str>>) -> AdapterRegistry {
        AdapterRegistry::new(vec![Arc::new(StubAdapter {
            id: "stub",
            advertised_id: "stub",
            supports_dynamic: true,
            static_ids: vec!["a", "b"],
            dynamic_ids,
        })])
    }

    #[tokio::test]
    async fn dynamic_models_win_over_static_by_id() {
        let registry = stub_registry(Some(vec!["b", "c"]));
        let models = registry
            .models("stub", Some(&ConnectionConfig::default()))
            .await
            .unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn dynamic_failure_falls_back_to_static() {
        let registry = stub_registry(None);
        let models = registry
            .models("stub", Some(&ConnectionConfig::default()))
            .await
            .unwrap();
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        // dynamic_models, by contrast, propagates the failure.
        let err = registry
            .dynamic_models("stub", &ConnectionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GENERATION_FAILED");
    }

    #[tokio::test]
    async fn no_connection_means_static_only() {
        let registry = stub_registry(Some(vec!["c"]));
        let models = registry.models("stub", None).await.unwrap();
        assert_eq!(models.len(), 2);
    }

    #[tokio::test]
    async fn dynamic_listing_requires_provider_support() {
        let registry = AdapterRegistry::new(vec![Arc::new(StubAdapter {
            id: "fixed",
            advertised_id: "fixed",
            supports_dynamic: false,
            static_ids: vec!["a"],
            dynamic_ids: None,
        })]);
        let err = registry
            .dynamic_models("fixed", &ConnectionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DYNAMIC_MODELS_UNSUPPORTED");
    }

    #[test]
    fn lookup_is_case_insensitive_and_unknown_provider_fails() {
        let registry = stub_registry(None);
        assert!(registry.adapter("STUB").is_ok());

        let err = registry.adapter("not-a-provider").unwrap_err();
        assert_eq!(err.code(), "PROVIDER_NOT_FOUND");
        assert_eq!(err.params()["providerId"], "not-a-provider");

        // validate_provider_model never errors.
        assert!(!registry.validate_provider_model("not-a-provider", "x"));
        assert!(registry.validate_provider_model("stub", "a"));
        assert!(!registry.validate_provider_model("stub", "zzz"));
    }

    #[test]
    fn alias_registrations_are_not_cached_and_providers_deduplicate() {
        let mut registry = stub_registry(None);
        registry.register_as(
            "stub-alias",
            Arc::new(StubAdapter {
                id: "stub",
                advertised_id: "stub",
                supports_dynamic: true,
                static_ids: vec!["a", "b"],
                dynamic_ids: None,
            }),
        );

        // The alias resolves to the adapter, but its static models are not
        // preloaded under the alias key...
        assert!(registry.adapter("stub-alias").is_ok());
        assert!(registry
            .static_models
            .read()
            .get("stub-alias")
            .is_none());
        // ...until a lookup self-heals the cache.
        assert_eq!(registry.static_models("stub-alias").unwrap().len(), 2);

        // all_providers de-duplicates by provider id.
        assert_eq!(registry.all_providers().len(), 1);
    }

    #[test]
    fn clear_cache_repreloads() {
        let registry = stub_registry(None);
        assert_eq!(registry.static_models("stub").unwrap().len(), 2);
        registry.clear_cache();
        assert_eq!(registry.static_models.read().len(), 1);
        assert_eq!(registry.static_models("stub").unwrap().len(), 2);
    }

    #[test]
    fn builtin_registry_knows_all_providers() {
        let registry = AdapterRegistry::with_builtin_adapters();
        let ids: Vec<String> = registry
            .all_providers()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "dashscope",
                "gemini",
                "modelscope",
                "ollama",
                "openai",
                "openrouter",
                "seedream",
                "siliconflow"
            ]
        );
        // Ollama's catalog is install-dependent, hence empty statically.
        assert!(registry.static_models("ollama").unwrap().is_empty());
        assert!(registry.validate_provider_model("openai", "dall-e-3"));
    }
}
