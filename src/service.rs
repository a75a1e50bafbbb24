//! src/service.rs
//!
//! Generation orchestration: validates the request, resolves the config,
//! gates on capabilities, dispatches to the provider adapter, and archives
//! the produced images. Every provider difference ends here; callers only
//! ever see [`ImageResult`] or a typed [`ImageError`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;

use crate::errors::{ImageError, Result};
use crate::manager::{ImageModelManager, ModelConfig};
use crate::provider::{ImageRequest, ImageResult, Model};
use crate::registry::AdapterRegistry;
use crate::storage::{ImageStorageService, NewImage};

/// Outcome of a connectivity probe against a configured model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestReport {
    pub provider_id: String,
    /// Visible model count: live listing when the provider supports it,
    /// static catalog size otherwise.
    pub model_count: usize,
    pub dynamic: bool,
}

pub struct ImageService {
    registry: Arc<AdapterRegistry>,
    manager: Arc<ImageModelManager>,
    storage: Option<Arc<ImageStorageService>>,
}

impl ImageService {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        manager: Arc<ImageModelManager>,
        storage: Option<Arc<ImageStorageService>>,
    ) -> Self {
        Self {
            registry,
            manager,
            storage,
        }
    }

    /// The one entry point for image generation.
    pub async fn generate(&self, config_id: &str, request: &ImageRequest) -> Result<ImageResult> {
        validate_request(request)?;

        let config = self.manager.get_config(config_id).await?;
        if !config.enabled {
            return Err(ImageError::ConfigDisabled {
                config_id: config_id.to_string(),
            });
        }
        check_capabilities(&config, request)?;

        let adapter = self.registry.adapter(&config.provider_id)?;
        let result = adapter.generate(request, &config).await?;

        // Archival is best-effort: a full cache must never turn a successful
        // generation into an error.
        if let Some(storage) = &self.storage {
            for image in &result.images {
                let Some(b64) = &image.b64 else { continue };
                let record = NewImage {
                    id: None,
                    metadata: json!({
                        "prompt": request.prompt,
                        "providerId": config.provider_id,
                        "modelId": config.model_id,
                        "configId": config.id,
                        "mimeType": image.mime_type,
                    }),
                    data_b64: b64.clone(),
                    source: "generated".to_string(),
                };
                if let Err(e) = storage.save_image(record) {
                    log::warn!("failed to archive generated image: {}", e);
                }
            }
        }

        Ok(result)
    }

    /// Probes a config's provider: a live model listing where supported, the
    /// static catalog otherwise. Surfaces auth/endpoint failures as-is.
    pub async fn test_connection(&self, config_id: &str) -> Result<ConnectionTestReport> {
        let config = self.manager.get_config(config_id).await?;
        let adapter = self.registry.adapter(&config.provider_id)?;
        let provider = adapter.provider();

        if provider.supports_dynamic_models {
            let models = adapter.models_async(&config.connection_config).await?;
            return Ok(ConnectionTestReport {
                provider_id: provider.id,
                model_count: models.len(),
                dynamic: true,
            });
        }

        Ok(ConnectionTestReport {
            provider_id: provider.id,
            model_count: adapter.models().len(),
            dynamic: false,
        })
    }

    /// Unified model listing for a provider, using the credentials of the
    /// given config when one is supplied.
    pub async fn list_models(
        &self,
        provider_id: &str,
        config_id: Option<&str>,
    ) -> Result<Vec<Model>> {
        let connection = match config_id {
            Some(id) => Some(self.manager.get_config(id).await?.connection_config),
            None => None,
        };
        self.registry.models(provider_id, connection.as_ref()).await
    }
}

fn validate_request(request: &ImageRequest) -> Result<()> {
    if request.prompt.trim().is_empty() {
        return Err(ImageError::InvalidRequest {
            message: "prompt must not be empty".to_string(),
        });
    }
    if request.count == Some(0) {
        return Err(ImageError::InvalidRequest {
            message: "count must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Capability gating against the config's model snapshot. Configs returned
/// by the manager always carry one; a missing snapshot gates conservatively.
fn check_capabilities(config: &ModelConfig, request: &ImageRequest) -> Result<()> {
    let caps = config
        .model
        .as_ref()
        .map(|m| m.capabilities)
        .unwrap_or_default();

    if !request.input_images.is_empty() && !caps.image2image {
        return Err(ImageError::UnsupportedCapability {
            model_id: config.model_id.clone(),
            capability: "image2image".to_string(),
        });
    }
    if request.count.unwrap_or(1) > 1 && !caps.multi_image {
        return Err(ImageError::UnsupportedCapability {
            model_id: config.model_id.clone(),
            capability: "multiImage".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{InputImage, ModelCapabilities};
    use serde_json::Map;

    fn request(prompt: &str) -> ImageRequest {
        ImageRequest {
            prompt: prompt.to_string(),
            input_images: Vec::new(),
            count: None,
            param_overrides: Map::new(),
        }
    }

    fn config_with_caps(caps: ModelCapabilities) -> ModelConfig {
        let mut config = ModelConfig::bare("c1", "openai", "gpt-image-1");
        config.model = Some(Model {
            id: "gpt-image-1".to_string(),
            name: "GPT Image 1".to_string(),
            description: String::new(),
            provider_id: "openai".to_string(),
            capabilities: caps,
            parameter_definitions: Vec::new(),
            default_parameter_values: Map::new(),
        });
        config
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let err = validate_request(&request("   ")).unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[test]
    fn zero_count_is_rejected() {
        let mut req = request("a cat");
        req.count = Some(0);
        assert_eq!(validate_request(&req).unwrap_err().code(), "INVALID_REQUEST");
    }

    #[test]
    fn input_images_require_image2image() {
        let config = config_with_caps(ModelCapabilities::text2image_only());
        let mut req = request("a cat");
        req.input_images.push(InputImage {
            b64: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        });

        let err = check_capabilities(&config, &req).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_CAPABILITY");
        assert_eq!(err.params()["capability"], "image2image");
    }

    #[test]
    fn multi_image_requires_capability() {
        let config = config_with_caps(ModelCapabilities::text2image_only());
        let mut req = request("a cat");
        req.count = Some(2);

        let err = check_capabilities(&config, &req).unwrap_err();
        assert_eq!(err.params()["capability"], "multiImage");

        let permissive = config_with_caps(ModelCapabilities {
            text2image: true,
            image2image: true,
            multi_image: true,
        });
        assert!(check_capabilities(&permissive, &req).is_ok());
    }

    #[test]
    fn missing_snapshot_gates_conservatively() {
        let config = ModelConfig::bare("c1", "openai", "some-model");
        let mut req = request("a cat");
        req.count = Some(2);
        assert!(check_capabilities(&config, &req).is_err());
    }
}
