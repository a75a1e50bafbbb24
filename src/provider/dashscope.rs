//! src/provider/dashscope.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, read_json_response, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities,
    ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER_ID: &str = "dashscope";
const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";
/// Model ids with this prefix go through the edit flow and take input images.
const EDIT_MODEL_PREFIX: &str = "qwen-image-edit";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct DashScopeResponse {
    output: Option<DashScopeOutput>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    request_id: Option<String>,
}

#[derive(Deserialize)]
struct DashScopeOutput {
    #[serde(default)]
    choices: Vec<DashScopeChoice>,
}

#[derive(Deserialize)]
struct DashScopeChoice {
    message: DashScopeMessage,
}

#[derive(Deserialize)]
struct DashScopeMessage {
    // Content items are heterogenous ({"image": url} / {"text": ...}).
    #[serde(default)]
    content: Vec<Value>,
}

#[derive(Debug)]
pub struct DashScopeAdapter {
    client: reqwest::Client,
}

impl DashScopeAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }

    fn is_edit_model(model_id: &str) -> bool {
        model_id.starts_with(EDIT_MODEL_PREFIX)
    }
}

impl Default for DashScopeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for DashScopeAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "DashScope".to_string(),
            description: "Alibaba Cloud DashScope (Qwen image models)".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: Some(true),
            api_key_url: Some("https://bailian.console.aliyun.com/?apiKey=1".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![
            Model {
                id: "qwen-image".to_string(),
                name: "Qwen Image".to_string(),
                description: "Text-to-image generation".to_string(),
                provider_id: PROVIDER_ID.to_string(),
                capabilities: ModelCapabilities::text2image_only(),
                parameter_definitions: vec![
                    ParameterDefinition::string(
                        "size",
                        "1328*1328",
                        &["1664*928", "1472*1140", "1328*1328", "1140*1472", "928*1664"],
                    ),
                    ParameterDefinition::boolean("prompt_extend", true),
                    ParameterDefinition::boolean("watermark", false),
                ],
                default_parameter_values: Default::default(),
            },
            Model {
                id: "qwen-image-edit".to_string(),
                name: "Qwen Image Edit".to_string(),
                description: "Instruction-based image editing".to_string(),
                provider_id: PROVIDER_ID.to_string(),
                capabilities: ModelCapabilities {
                    text2image: false,
                    image2image: true,
                    multi_image: false,
                },
                // The edit model ignores size; it follows the input image.
                parameter_definitions: vec![ParameterDefinition::boolean("watermark", false)],
                default_parameter_values: Default::default(),
            },
        ]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        let capabilities = if Self::is_edit_model(model_id) {
            ModelCapabilities {
                text2image: false,
                image2image: true,
                multi_image: false,
            }
        } else {
            ModelCapabilities::text2image_only()
        };
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom DashScope model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities,
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
            "/api/v1",
        );
        let api_url = format!("{}/services/aigc/multimodal-generation/generation", base);

        // DashScope rejects external image URLs, so inputs are embedded as
        // data: URLs in the message content.
        let mut content = Vec::new();
        if Self::is_edit_model(&config.model_id) {
            for image in &request.input_images {
                content.push(json!({ "image": image.to_data_url() }));
            }
        }
        content.push(json!({ "text": request.prompt }));

        let params = merged_params(request, config);
        let mut parameters = json!({});
        if !Self::is_edit_model(&config.model_id) {
            if let Some(size) = param_str(&params, "size") {
                parameters["size"] = json!(size);
            }
            if let Some(extend) = params.get("prompt_extend").and_then(Value::as_bool) {
                parameters["prompt_extend"] = json!(extend);
            }
        }
        if let Some(watermark) = params.get("watermark").and_then(Value::as_bool) {
            parameters["watermark"] = json!(watermark);
        }

        let body = json!({
            "model": config.model_id,
            "input": { "messages": [{ "role": "user", "content": content }] },
            "parameters": parameters,
        });

        let res = self
            .client
            .post(&api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let response: DashScopeResponse = read_json_response(PROVIDER_ID, res).await?;

        let mut images = Vec::new();
        let mut texts = Vec::new();
        for choice in response.output.map(|o| o.choices).unwrap_or_default() {
            for item in choice.message.content {
                if let Some(url) = item.get("image").and_then(Value::as_str) {
                    images.push(GeneratedImage {
                        url: Some(url.to_string()),
                        b64: None,
                        mime_type: "image/png".to_string(),
                    });
                } else if let Some(text) = item.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                }
            }
        }

        if images.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no images",
            ));
        }

        Ok(ImageResult {
            images,
            text: if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            },
            metadata: ResultMetadata {
                provider_id: PROVIDER_ID.to_string(),
                model_id: config.model_id.clone(),
                config_id: config.id.clone(),
                usage: response.usage,
                task_id: response.request_id,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_models_are_detected_by_prefix() {
        assert!(DashScopeAdapter::is_edit_model("qwen-image-edit"));
        assert!(DashScopeAdapter::is_edit_model("qwen-image-edit-plus"));
        assert!(!DashScopeAdapter::is_edit_model("qwen-image"));
    }
}
