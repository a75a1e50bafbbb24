//! src/provider/openrouter.rs
use super::{
    ensure_suffix, http_client, read_json_response, ConnectionConfig, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities, Provider,
    ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER_ID: &str = "openrouter";
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    architecture: Option<Architecture>,
}

#[derive(Deserialize)]
struct Architecture {
    #[serde(default)]
    output_modalities: Vec<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    images: Vec<MessageImage>,
}

#[derive(Deserialize)]
struct MessageImage {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

/// Splits a `data:<mime>;base64,<payload>` URL. Plain URLs pass through.
fn split_data_url(url: &str) -> (Option<String>, Option<String>, String) {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((mime, b64)) = rest.split_once(";base64,") {
            return (None, Some(b64.to_string()), mime.to_string());
        }
    }
    (Some(url.to_string()), None, "image/png".to_string())
}

/// OpenRouter routes image generation through chat completions with an
/// image output modality.
#[derive(Debug)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
}

impl OpenRouterAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for OpenRouterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for OpenRouterAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "OpenRouter".to_string(),
            description: "Aggregated access to image-capable models".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: true,
            cors_restricted: None,
            api_key_url: Some("https://openrouter.ai/settings/keys".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![Model {
            id: "google/gemini-2.5-flash-image-preview".to_string(),
            name: "Gemini 2.5 Flash Image (via OpenRouter)".to_string(),
            description: "Image generation and editing".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities {
                text2image: true,
                image2image: true,
                multi_image: false,
            },
            parameter_definitions: vec![],
            default_parameter_values: Default::default(),
        }]
    }

    async fn models_async(&self, connection: &ConnectionConfig) -> Result<Vec<Model>> {
        let base = ensure_suffix(connection.base_url_or(DEFAULT_BASE_URL), "/v1");
        let mut req = self.client.get(format!("{}/models", base));
        if let Some(key) = connection.api_key() {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let list: ModelListResponse = read_json_response(PROVIDER_ID, res).await?;

        // Only models that can actually output images are interesting here.
        Ok(list
            .data
            .into_iter()
            .filter(|entry| {
                entry
                    .architecture
                    .as_ref()
                    .map(|a| a.output_modalities.iter().any(|m| m == "image"))
                    .unwrap_or(false)
            })
            .map(|entry| {
                let mut model = self.build_default_model(&entry.id);
                if let Some(name) = entry.name {
                    model.name = name;
                }
                model
            })
            .collect())
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "OpenRouter image-capable model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities::text2image_only(),
            parameter_definitions: vec![],
            default_parameter_values: Default::default(),
        }
    }

    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult> {
        let api_key = config.connection_config.api_key().ok_or_else(|| {
            ImageError::generation_failed(PROVIDER_ID, "API key is not configured")
        })?;
        let base = ensure_suffix(
            config.connection_config.base_url_or(DEFAULT_BASE_URL),
            "/v1",
        );

        let mut content: Vec<Value> = vec![json!({ "type": "text", "text": request.prompt })];
        for image in &request.input_images {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": image.to_data_url() }
            }));
        }

        let body = json!({
            "model": config.model_id,
            "messages": [{ "role": "user", "content": content }],
            "modalities": ["image", "text"],
        });

        let res = self
            .client
            .post(format!("{}/chat/completions", base))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let response: ChatResponse = read_json_response(PROVIDER_ID, res).await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ImageError::invalid_response(PROVIDER_ID, "response contained no choices")
        })?;

        let images: Vec<GeneratedImage> = choice
            .message
            .images
            .into_iter()
            .map(|img| {
                let (url, b64, mime_type) = split_data_url(&img.image_url.url);
                GeneratedImage {
                    url,
                    b64,
                    mime_type,
                }
            })
            .collect();

        if images.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no images",
            ));
        }

        Ok(ImageResult {
            images,
            text: choice.message.content.filter(|t| !t.is_empty()),
            metadata: ResultMetadata {
                provider_id: PROVIDER_ID.to_string(),
                model_id: config.model_id.clone(),
                config_id: config.id.clone(),
                usage: response.usage,
                task_id: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_urls_are_split_into_b64_and_mime() {
        let (url, b64, mime) = split_data_url("data:image/webp;base64,aGVsbG8=");
        assert_eq!(url, None);
        assert_eq!(b64.as_deref(), Some("aGVsbG8="));
        assert_eq!(mime, "image/webp");

        let (url, b64, mime) = split_data_url("https://example.com/x.png");
        assert_eq!(url.as_deref(), Some("https://example.com/x.png"));
        assert_eq!(b64, None);
        assert_eq!(mime, "image/png");
    }
}
