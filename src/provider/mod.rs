//! src/provider/mod.rs
//!
//! Shared types and the adapter trait for image generation providers.
//! One adapter per provider; each encapsulates the provider's HTTP API,
//! static model catalog and parameter schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;

use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;

pub mod dashscope;
pub mod gemini;
pub mod modelscope;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod seedream;
pub mod siliconflow;

pub use dashscope::DashScopeAdapter;
pub use gemini::GeminiAdapter;
pub use modelscope::ModelScopeAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;
pub use openrouter::OpenRouterAdapter;
pub use seedream::SeedreamAdapter;
pub use siliconflow::SiliconFlowAdapter;

// --- 数据结构定义 ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
}

/// Which connection fields a provider accepts, for UI form generation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSchema {
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub field_types: HashMap<String, FieldType>,
}

impl ConnectionSchema {
    /// The common `apiKey` + `baseURL` schema used by most providers.
    pub fn api_key_and_base_url() -> Self {
        let mut field_types = HashMap::new();
        field_types.insert("apiKey".to_string(), FieldType::String);
        field_types.insert("baseURL".to_string(), FieldType::String);
        ConnectionSchema {
            required: vec!["apiKey".to_string()],
            optional: vec!["baseURL".to_string()],
            field_types,
        }
    }

    pub fn base_url_only() -> Self {
        let mut field_types = HashMap::new();
        field_types.insert("baseURL".to_string(), FieldType::String);
        field_types.insert("apiKey".to_string(), FieldType::String);
        ConnectionSchema {
            required: vec![],
            optional: vec!["baseURL".to_string(), "apiKey".to_string()],
            field_types,
        }
    }
}

/// Static provider descriptor. Immutable per adapter version and only ever
/// persisted as part of a config snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub description: String,
    pub requires_api_key: bool,
    #[serde(rename = "defaultBaseURL")]
    pub default_base_url: String,
    pub supports_dynamic_models: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_restricted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_url: Option<String>,
    #[serde(default)]
    pub connection_schema: ConnectionSchema,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelCapabilities {
    pub text2image: bool,
    pub image2image: bool,
    pub multi_image: bool,
}

impl ModelCapabilities {
    pub fn text2image_only() -> Self {
        ModelCapabilities {
            text2image: true,
            image2image: false,
            multi_image: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

/// One tunable generation parameter of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParameterDefinition {
    pub fn string(name: &str, default: &str, allowed: &[&str]) -> Self {
        ParameterDefinition {
            name: name.to_string(),
            param_type: ParamType::String,
            default_value: Some(Value::String(default.to_string())),
            allowed_values: if allowed.is_empty() {
                None
            } else {
                Some(allowed.iter().map(|v| Value::String(v.to_string())).collect())
            },
            min: None,
            max: None,
        }
    }

    pub fn integer(name: &str, default: i64, min: f64, max: f64) -> Self {
        ParameterDefinition {
            name: name.to_string(),
            param_type: ParamType::Integer,
            default_value: Some(Value::from(default)),
            allowed_values: None,
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        ParameterDefinition {
            name: name.to_string(),
            param_type: ParamType::Boolean,
            default_value: Some(Value::Bool(default)),
            allowed_values: None,
            min: None,
            max: None,
        }
    }
}

/// Model descriptor. Static models come from adapter code; dynamic models
/// are fetched at runtime and never cached beyond the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub provider_id: String,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub parameter_definitions: Vec<ParameterDefinition>,
    #[serde(default)]
    pub default_parameter_values: Map<String, Value>,
}

/// Credentials + endpoint overrides for one configured model instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "baseURL", skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionConfig {
    /// Returns the API key if one is configured and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputImage {
    pub b64: String,
    pub mime_type: String,
}

impl InputImage {
    /// `data:` URL form, required by providers that reject external URLs.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.b64)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRequest {
    pub prompt: String,
    pub input_images: Vec<InputImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    pub param_overrides: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratedImage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultMetadata {
    pub provider_id: String,
    pub model_id: String,
    pub config_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Uniform outward result of a generation, regardless of provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageResult {
    pub images: Vec<GeneratedImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub metadata: ResultMetadata,
}

// --- Adapter trait ---

/// The interface every provider adapter implements.
#[async_trait]
pub trait ImageAdapter: Send + Sync + std::fmt::Debug {
    /// Static provider metadata. Pure.
    fn provider(&self) -> Provider;

    /// Static model catalog. Pure; empty is allowed (e.g. Ollama, whose
    /// models depend on the local installation).
    fn models(&self) -> Vec<Model>;

    /// Fetches the live model list for providers with
    /// `supports_dynamic_models`. Callers decide whether a failure is fatal;
    /// the registry's unified `models()` falls back to the static catalog.
    async fn models_async(&self, connection: &ConnectionConfig) -> Result<Vec<Model>> {
        let _ = connection;
        Err(ImageError::DynamicModelsUnsupported {
            provider_id: self.provider().id,
        })
    }

    /// Synthesizes a minimal descriptor for an arbitrary model id that is
    /// not in the static catalog. Deterministic and capability-conservative.
    fn build_default_model(&self, model_id: &str) -> Model;

    /// Performs the provider-specific HTTP call(s) and translates the
    /// provider envelope into an [`ImageResult`] or a typed error.
    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult>;
}

// --- 共享辅助函数 ---

const FAKE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Builds a reqwest client, honoring ALL_PROXY / HTTPS_PROXY like the rest
/// of our tooling. Falls back to a default client if the builder fails.
pub(crate) fn http_client() -> reqwest::Client {
    let proxy_url = env::var("ALL_PROXY").or_else(|_| env::var("HTTPS_PROXY")).ok();
    let builder = reqwest::Client::builder().user_agent(FAKE_USER_AGENT);
    let builder = match proxy_url.and_then(|url| reqwest::Proxy::all(&url).ok()) {
        Some(proxy) => builder.proxy(proxy),
        None => builder,
    };
    builder.build().unwrap_or_default()
}

/// Merge order: model defaults < config overrides < request overrides.
/// The request always wins on conflict.
pub fn merged_params(request: &ImageRequest, config: &ModelConfig) -> Map<String, Value> {
    let mut merged = Map::new();
    if let Some(model) = &config.model {
        for (k, v) in &model.default_parameter_values {
            merged.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in &config.param_overrides {
        merged.insert(k.clone(), v.clone());
    }
    for (k, v) in &request.param_overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

pub fn param_str<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str)
}

pub fn param_u32(params: &Map<String, Value>, name: &str) -> Option<u32> {
    params.get(name).and_then(Value::as_u64).map(|v| v as u32)
}

/// Ensures a base URL ends with the given suffix (e.g. "/v1").
/// Idempotent: normalize(normalize(x)) == normalize(x).
pub fn ensure_suffix(base_url: &str, suffix: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with(suffix) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, suffix)
    }
}

/// Best-effort extraction of a provider error message from a non-2xx body:
/// JSON `error.message`, then `message`, then "status statusText".
pub fn parse_provider_error(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(msg) = json
            .pointer("/error/message")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
        {
            return msg.to_string();
        }
    }
    format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

/// Reads a response, mapping non-2xx statuses to GENERATION_FAILED and
/// body-parse failures to INVALID_RESPONSE_FORMAT.
pub(crate) async fn read_json_response<T: serde::de::DeserializeOwned>(
    provider_id: &str,
    res: reqwest::Response,
) -> Result<T> {
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| ImageError::generation_failed(provider_id, e.to_string()))?;
    if !status.is_success() {
        return Err(ImageError::generation_failed(
            provider_id,
            parse_provider_error(status, &body),
        ));
    }
    serde_json::from_str(&body).map_err(|e| {
        ImageError::invalid_response(provider_id, format!("{} (body: {:.200})", e, body))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_suffix_is_idempotent() {
        let once = ensure_suffix("https://api.openai.com", "/v1");
        assert_eq!(once, "https://api.openai.com/v1");
        assert_eq!(ensure_suffix(&once, "/v1"), once);
        assert_eq!(ensure_suffix("https://api.openai.com/v1/", "/v1"), once);
    }

    #[test]
    fn provider_error_parsing_prefers_nested_message() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            parse_provider_error(status, r#"{"error":{"message":"bad prompt"}}"#),
            "bad prompt"
        );
        assert_eq!(
            parse_provider_error(status, r#"{"message":"flat"}"#),
            "flat"
        );
        assert_eq!(parse_provider_error(status, "not json"), "400 Bad Request");
    }

    #[test]
    fn request_overrides_win_over_config() {
        let mut config = ModelConfig::bare("c1", "openai", "gpt-image-1");
        config
            .param_overrides
            .insert("size".to_string(), Value::String("512x512".to_string()));
        config
            .param_overrides
            .insert("quality".to_string(), Value::String("standard".to_string()));

        let mut request = ImageRequest {
            prompt: "a cat".to_string(),
            ..Default::default()
        };
        request
            .param_overrides
            .insert("size".to_string(), Value::String("1024x1024".to_string()));

        let merged = merged_params(&request, &config);
        assert_eq!(param_str(&merged, "size"), Some("1024x1024"));
        assert_eq!(param_str(&merged, "quality"), Some("standard"));
    }
}
