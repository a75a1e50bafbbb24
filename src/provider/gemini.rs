//! src/provider/gemini.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, read_json_response, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities,
    ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::{json, Map, Value};

const PROVIDER_ID: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<Value>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug)]
pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            client: http_client(),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "Gemini".to_string(),
            description: "Google Gemini native image generation".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: None,
            api_key_url: Some("https://aistudio.google.com/apikey".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![Model {
            id: "gemini-2.0-flash-preview-image-generation".to_string(),
            name: "Gemini 2.0 Flash (Image Generation)".to_string(),
            description: "Conversational image generation and editing".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities {
                text2image: true,
                image2image: true,
                multi_image: false,
            },
            parameter_definitions: vec![ParameterDefinition::string(
                "aspectRatio",
                "1:1",
                &["1:1", "16:9", "9:16", "4:3", "3:4"],
            )],
            default_parameter_values: Map::new(),
        }]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        // Gemini image models can all take input images alongside text.
        let image2image = model_id.contains("image");
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom Gemini model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities {
                text2image: true,
                image2image,
                multi_image: false,
            },
            parameter_definitions: vec![],
            default_parameter_values: Map::new(),
        }
    }

    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult> {
        let api_key = config.connection_config.api_key().ok_or_else(|| {
            ImageError::generation_failed(PROVIDER_ID, "API key is not configured")
        })?;
        let base = ensure_suffix(
            config.connection_config.base_url_or(DEFAULT_BASE_URL),
            "/v1beta",
        );
        let api_url = format!(
            "{}/models/{}:generateContent?key={}",
            base, config.model_id, api_key
        );

        // Prompt text first, then any input images as inlineData parts.
        let mut parts = vec![json!({ "text": request.prompt })];
        for image in &request.input_images {
            parts.push(json!({
                "inlineData": { "mimeType": image.mime_type, "data": image.b64 }
            }));
        }

        let params = merged_params(request, config);
        let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
        if let Some(ratio) = param_str(&params, "aspectRatio") {
            generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
        }

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": generation_config,
        });

        let res = self
            .client
            .post(&api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let response: GeminiResponse = read_json_response(PROVIDER_ID, res).await?;

        let mut images = Vec::new();
        let mut text_parts = Vec::new();
        for part in response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
        {
            if let Some(inline) = &part.inline_data {
                images.push(GeneratedImage {
                    url: None,
                    b64: Some(inline.data.clone()),
                    mime_type: inline.mime_type.clone(),
                });
            }
            if let Some(text) = &part.text {
                text_parts.push(text.clone());
            }
        }

        if images.is_empty() {
            return Err(ImageError::invalid_response(
                PROVIDER_ID,
                "response contained no image parts",
            ));
        }

        Ok(ImageResult {
            images,
            text: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join("\n"))
            },
            metadata: ResultMetadata {
                provider_id: PROVIDER_ID.to_string(),
                model_id: config.model_id.clone(),
                config_id: config.id.clone(),
                usage: response.usage_metadata,
                task_id: None,
            },
        })
    }
}
