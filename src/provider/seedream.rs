//! src/provider/seedream.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, read_json_response, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities,
    ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER_ID: &str = "seedream";
const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
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

/// Volcengine Ark hosting of the Seedream family.
#[derive(Debug)]
pub struct SeedreamAdapter {
    client: reqwest::Client,
}

impl SeedreamAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for SeedreamAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for SeedreamAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "Seedream".to_string(),
            description: "ByteDance Seedream on Volcengine Ark".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: Some(true),
            api_key_url: Some("https://console.volcengine.com/ark".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![Model {
            id: "doubao-seedream-4-0-250828".to_string(),
            name: "Seedream 4.0".to_string(),
            description: "Unified text-to-image generation and editing".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities {
                text2image: true,
                image2image: true,
                multi_image: true,
            },
            parameter_definitions: vec![
                ParameterDefinition::string("size", "2K", &["1K", "2K", "4K"]),
                ParameterDefinition::boolean("watermark", false),
            ],
            default_parameter_values: Default::default(),
        }]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom Seedream model".to_string(),
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
            "/api/v3",
        );

        let params = merged_params(request, config);
        let mut body = json!({
            "model": config.model_id,
            "prompt": request.prompt,
            "response_format": "b64_json",
        });
        if let Some(size) = param_str(&params, "size") {
            body["size"] = json!(size);
        }
        if let Some(watermark) = params.get("watermark").and_then(Value::as_bool) {
            body["watermark"] = json!(watermark);
        }
        if let Some(count) = request.count.filter(|c| *c > 1) {
            body["sequential_image_generation"] = json!("auto");
            body["sequential_image_generation_options"] = json!({ "max_images": count });
        }
        if !request.input_images.is_empty() {
            // Ark accepts input images inline as data URLs.
            let urls: Vec<String> = request
                .input_images
                .iter()
                .map(|img| img.to_data_url())
                .collect();
            body["image"] = json!(urls);
        }

        let res = self
            .client
            .post(format!("{}/images/generations", base))
            .bearer_auth(api_key)
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
                usage: response.usage,
                task_id: None,
            },
        })
    }
}
