//! src/provider/ollama.rs
use super::{
    ensure_suffix, http_client, read_json_response, ConnectionConfig, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities, Provider,
    ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::json;

const PROVIDER_ID: &str = "ollama";
const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

/// Local Ollama endpoint. There is no static catalog: which models exist
/// depends entirely on what the user has pulled locally.
#[derive(Debug)]
pub struct OllamaAdapter {
    client: reqwest::Client,
}

impl OllamaAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for OllamaAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "Ollama".to_string(),
            description: "Locally hosted models via the Ollama server".to_string(),
            requires_api_key: false,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: true,
            // Local endpoint, never restricted.
            cors_restricted: Some(false),
            api_key_url: None,
            connection_schema: ConnectionSchema::base_url_only(),
        }
    }

    fn models(&self) -> Vec<Model> {
        // Intentionally empty: discovery happens through models_async.
        vec![]
    }

    async fn models_async(&self, connection: &ConnectionConfig) -> Result<Vec<Model>> {
        let base = ensure_suffix(connection.base_url_or(DEFAULT_BASE_URL), "/v1");
        let mut req = self.client.get(format!("{}/models", base));
        if let Some(key) = connection.api_key() {
            req = req.bearer_auth(key);
        }

        // A missing or empty local install is normal, not an error.
        let res = match req.send().await {
            Ok(res) => res,
            Err(e) => {
                log::warn!("ollama model discovery failed: {}", e);
                return Ok(vec![]);
            }
        };
        let list: ModelListResponse = match read_json_response(PROVIDER_ID, res).await {
            Ok(list) => list,
            Err(e) => {
                log::warn!("ollama model discovery failed: {}", e);
                return Ok(vec![]);
            }
        };

        Ok(list
            .data
            .into_iter()
            .map(|entry| self.build_default_model(&entry.id))
            .collect())
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Locally installed Ollama model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities::text2image_only(),
            parameter_definitions: vec![],
            default_parameter_values: Default::default(),
        }
    }

    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult> {
        let base = ensure_suffix(
            config.connection_config.base_url_or(DEFAULT_BASE_URL),
            "/v1",
        );
        let body = json!({
            "model": config.model_id,
            "prompt": request.prompt,
            "response_format": "b64_json",
        });

        // No Authorization header at all when no key is configured.
        let mut req = self.client.post(format!("{}/images/generations", base));
        if let Some(key) = config.connection_config.api_key() {
            req = req.bearer_auth(key);
        }
        let res = req
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let response: ImagesResponse = read_json_response(PROVIDER_ID, res).await?;

        if response.data.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no images",
            ));
        }

        let images = response
            .data
            .into_iter()
            .map(|d| GeneratedImage {
                url: d.url,
                b64: d.b64_json,
                mime_type: "image/png".to_string(),
            })
            .collect();

        Ok(ImageResult {
            images,
            text: None,
            metadata: ResultMetadata {
                provider_id: PROVIDER_ID.to_string(),
                model_id: config.model_id.clone(),
                config_id: config.id.clone(),
                usage: None,
                task_id: None,
            },
        })
    }
}
