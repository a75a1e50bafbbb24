//! src/provider/siliconflow.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, param_u32, read_json_response,
    ConnectionSchema, GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model,
    ModelCapabilities, ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::{json, Value};

const PROVIDER_ID: &str = "siliconflow";
const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    images: Vec<ImageDatum>,
    #[serde(default)]
    seed: Option<Value>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: String,
}

#[derive(Debug)]
pub struct SiliconFlowAdapter {
    client: reqwest::Client,
}

impl SiliconFlowAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for SiliconFlowAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for SiliconFlowAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "SiliconFlow".to_string(),
            description: "SiliconFlow hosted open image models".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: None,
            api_key_url: Some("https://cloud.siliconflow.cn/account/ak".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![Model {
            id: "Kwai-Kolors/Kolors".to_string(),
            name: "Kolors".to_string(),
            description: "Open text-to-image model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities {
                text2image: true,
                image2image: true,
                multi_image: true,
            },
            parameter_definitions: vec![
                ParameterDefinition::string(
                    "image_size",
                    "1024x1024",
                    &["1024x1024", "960x1280", "768x1024", "720x1440", "720x1280"],
                ),
                ParameterDefinition::integer("batch_size", 1, 1.0, 4.0),
                ParameterDefinition::integer("num_inference_steps", 20, 1.0, 100.0),
            ],
            default_parameter_values: Default::default(),
        }]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom SiliconFlow model".to_string(),
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

        let params = merged_params(request, config);
        let mut body = json!({
            "model": config.model_id,
            "prompt": request.prompt,
        });
        if let Some(size) = param_str(&params, "image_size") {
            body["image_size"] = json!(size);
        }
        let batch = request
            .count
            .or_else(|| param_u32(&params, "batch_size"))
            .unwrap_or(1);
        body["batch_size"] = json!(batch);
        if let Some(steps) = param_u32(&params, "num_inference_steps") {
            body["num_inference_steps"] = json!(steps);
        }
        if let Some(image) = request.input_images.first() {
            body["image"] = json!(image.to_data_url());
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

        if response.images.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no images",
            ));
        }

        let images = response
            .images
            .into_iter()
            .map(|d| GeneratedImage {
                url: Some(d.url),
                b64: None,
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
                usage: response.seed.map(|seed| json!({ "seed": seed })),
                task_id: None,
            },
        })
    }
}
