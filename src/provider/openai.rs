//! src/provider/openai.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, read_json_response, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities,
    ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const PROVIDER_ID: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
    #[serde(default)]
    usage: Option<Value>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Debug)]
pub struct OpenAIAdapter {
    client: reqwest::Client,
}

impl OpenAIAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn endpoint(config: &ModelConfig, path: &str) -> String {
        let base = ensure_suffix(
            config.connection_config.base_url_or(DEFAULT_BASE_URL),
            "/v1",
        );
        format!("{}/{}", base, path)
    }

    fn api_key(config: &ModelConfig) -> Result<String> {
        config
            .connection_config
            .api_key()
            .map(str::to_string)
            .ok_or_else(|| ImageError::generation_failed(PROVIDER_ID, "API key is not configured"))
    }

    /// Text-to-image via `images/generations`.
    async fn generate_text2image(
        &self,
        request: &ImageRequest,
        config: &ModelConfig,
        params: &Map<String, Value>,
    ) -> Result<ImagesResponse> {
        let mut body = json!({
            "model": config.model_id,
            "prompt": request.prompt,
        });
        if let Some(size) = param_str(params, "size") {
            body["size"] = json!(size);
        }
        if let Some(quality) = param_str(params, "quality") {
            body["quality"] = json!(quality);
        }
        // gpt-image-1 always returns base64 and rejects response_format.
        if config.model_id.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }

        let res = self
            .client
            .post(Self::endpoint(config, "images/generations"))
            .bearer_auth(Self::api_key(config)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        read_json_response(PROVIDER_ID, res).await
    }

    /// Image editing via `images/edits`. OpenAI only accepts multipart here,
    /// so the base64 input has to be decoded back into binary.
    async fn generate_image2image(
        &self,
        request: &ImageRequest,
        config: &ModelConfig,
        params: &Map<String, Value>,
    ) -> Result<ImagesResponse> {
        let input = request.input_images.first().ok_or_else(|| {
            ImageError::generation_failed(PROVIDER_ID, "image edit requires an input image")
        })?;
        let bytes = BASE64.decode(input.b64.as_bytes()).map_err(|e| {
            ImageError::generation_failed(PROVIDER_ID, format!("invalid base64 input image: {e}"))
        })?;
        let part = multipart::Part::bytes(bytes)
            .file_name("image.png")
            .mime_str(&input.mime_type)
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;

        let mut form = multipart::Form::new()
            .text("model", config.model_id.clone())
            .text("prompt", request.prompt.clone())
            .part("image", part);
        if let Some(size) = param_str(params, "size") {
            form = form.text("size", size.to_string());
        }

        let res = self
            .client
            .post(Self::endpoint(config, "images/edits"))
            .bearer_auth(Self::api_key(config)?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        read_json_response(PROVIDER_ID, res).await
    }
}

impl Default for OpenAIAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for OpenAIAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "OpenAI".to_string(),
            description: "OpenAI image generation (gpt-image-1, DALL·E)".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: None,
            api_key_url: Some("https://platform.openai.com/api-keys".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![
            Model {
                id: "gpt-image-1".to_string(),
                name: "GPT Image 1".to_string(),
                description: "Natively multimodal image generation and editing".to_string(),
                provider_id: PROVIDER_ID.to_string(),
                capabilities: ModelCapabilities {
                    text2image: true,
                    image2image: true,
                    multi_image: false,
                },
                parameter_definitions: vec![
                    ParameterDefinition::string(
                        "size",
                        "1024x1024",
                        &["1024x1024", "1536x1024", "1024x1536", "auto"],
                    ),
                    ParameterDefinition::string("quality", "auto", &["low", "medium", "high", "auto"]),
                ],
                default_parameter_values: Map::new(),
            },
            Model {
                id: "dall-e-3".to_string(),
                name: "DALL·E 3".to_string(),
                description: "Text-to-image generation".to_string(),
                provider_id: PROVIDER_ID.to_string(),
                capabilities: ModelCapabilities::text2image_only(),
                parameter_definitions: vec![
                    ParameterDefinition::string(
                        "size",
                        "1024x1024",
                        &["1024x1024", "1792x1024", "1024x1792"],
                    ),
                    ParameterDefinition::string("quality", "standard", &["standard", "hd"]),
                ],
                default_parameter_values: Map::new(),
            },
        ]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        // Unknown ids are assumed text2image-only, except the gpt-image
        // family which is known to support editing.
        let capabilities = if model_id.starts_with("gpt-image") {
            ModelCapabilities {
                text2image: true,
                image2image: true,
                multi_image: false,
            }
        } else {
            ModelCapabilities::text2image_only()
        };
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom OpenAI image model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities,
            parameter_definitions: vec![],
            default_parameter_values: Map::new(),
        }
    }

    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult> {
        let mut params = merged_params(request, config);
        // OpenAI 不支持批量出图参数，始终按单图请求。
        params.remove("n");
        params.remove("batch_size");

        let response = if request.input_images.is_empty() {
            self.generate_text2image(request, config, &params).await?
        } else {
            self.generate_image2image(request, config, &params).await?
        };

        if response.data.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no images",
            ));
        }

        // 单图输出：只取第一张。
        let datum = &response.data[0];
        let images = vec![GeneratedImage {
            url: datum.url.clone(),
            b64: datum.b64_json.clone(),
            mime_type: "image/png".to_string(),
        }];

        Ok(ImageResult {
            images,
            text: None,
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
