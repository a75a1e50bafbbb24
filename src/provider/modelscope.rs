//! src/provider/modelscope.rs
use super::{
    ensure_suffix, http_client, merged_params, param_str, read_json_response, ConnectionSchema,
    GeneratedImage, ImageAdapter, ImageRequest, ImageResult, Model, ModelCapabilities,
    ParameterDefinition, Provider, ResultMetadata,
};
use crate::errors::{ImageError, Result};
use crate::manager::ModelConfig;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const PROVIDER_ID: &str = "modelscope";
const DEFAULT_BASE_URL: &str = "https://api-inference.modelscope.cn/v1";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_ATTEMPTS: u32 = 60;

// --- 响应数据结构 ---
#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct TaskResponse {
    task_status: String,
    #[serde(default)]
    output_images: Vec<String>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// ModelScope submits an asynchronous job and polls a task endpoint until a
/// terminal status or the attempt budget runs out.
#[derive(Debug)]
pub struct ModelScopeAdapter {
    client: reqwest::Client,
    poll_interval: Duration,
    max_attempts: u32,
}

impl ModelScopeAdapter {
    pub fn new() -> Self {
        Self::with_polling(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_ATTEMPTS)
    }

    /// Tunable polling, used by tests with millisecond intervals.
    pub fn with_polling(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            client: http_client(),
            poll_interval,
            max_attempts,
        }
    }

    fn is_terminal_failure(status: &str) -> bool {
        matches!(status, "FAILED" | "ERROR" | "CANCELLED" | "CANCELED")
    }

    async fn poll_task(&self, base: &str, api_key: &str, task_id: &str) -> Result<Vec<String>> {
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.poll_interval).await;
            }

            let res = self
                .client
                .get(format!("{}/tasks/{}", base, task_id))
                .bearer_auth(api_key)
                .header("X-ModelScope-Task-Type", "image_generation")
                .send()
                .await
                .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
            let task: TaskResponse = read_json_response(PROVIDER_ID, res).await?;

            match task.task_status.as_str() {
                "SUCCEED" => {
                    if task.output_images.is_empty() {
                        return Err(ImageError::invalid_response(
                            PROVIDER_ID,
                            "task succeeded but returned no images",
                        ));
                    }
                    return Ok(task.output_images);
                }
                status if Self::is_terminal_failure(status) => {
                    return Err(ImageError::generation_failed(
                        PROVIDER_ID,
                        format!(
                            "task {} ended with status {}{}",
                            task_id,
                            status,
                            task.errors
                                .map(|e| format!(": {}", e))
                                .unwrap_or_default()
                        ),
                    ));
                }
                // PENDING / RUNNING / anything unknown is transient.
                other => {
                    log::debug!("modelscope task {} still {} (attempt {})", task_id, other, attempt);
                }
            }
        }

        Err(ImageError::GenerationTimeout {
            provider_id: PROVIDER_ID.to_string(),
            attempts: self.max_attempts,
        })
    }
}

impl Default for ModelScopeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ImageAdapter for ModelScopeAdapter {
    fn provider(&self) -> Provider {
        Provider {
            id: PROVIDER_ID.to_string(),
            name: "ModelScope".to_string(),
            description: "ModelScope inference API (asynchronous image tasks)".to_string(),
            requires_api_key: true,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            supports_dynamic_models: false,
            cors_restricted: Some(true),
            api_key_url: Some("https://modelscope.cn/my/myaccesstoken".to_string()),
            connection_schema: ConnectionSchema::api_key_and_base_url(),
        }
    }

    fn models(&self) -> Vec<Model> {
        vec![Model {
            id: "Qwen/Qwen-Image".to_string(),
            name: "Qwen Image (ModelScope)".to_string(),
            description: "Community-hosted text-to-image model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities::text2image_only(),
            parameter_definitions: vec![ParameterDefinition::string(
                "size",
                "1024x1024",
                &["1024x1024", "1280x720", "720x1280"],
            )],
            default_parameter_values: Default::default(),
        }]
    }

    fn build_default_model(&self, model_id: &str) -> Model {
        Model {
            id: model_id.to_string(),
            name: model_id.to_string(),
            description: "Custom ModelScope model".to_string(),
            provider_id: PROVIDER_ID.to_string(),
            capabilities: ModelCapabilities::text2image_only(),
            parameter_definitions: vec![],
            default_parameter_values: Default::default(),
        }
    }

    async fn generate(&self, request: &ImageRequest, config: &ModelConfig) -> Result<ImageResult> {
        let api_key = config
            .connection_config
            .api_key()
            .map(str::to_string)
            .ok_or_else(|| {
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
        if let Some(size) = param_str(&params, "size") {
            body["size"] = json!(size);
        }

        let res = self
            .client
            .post(format!("{}/images/generations", base))
            .bearer_auth(&api_key)
            .header("X-ModelScope-Async-Mode", "true")
            .json(&body)
            .send()
            .await
            .map_err(|e| ImageError::generation_failed(PROVIDER_ID, e.to_string()))?;
        let submit: SubmitResponse = read_json_response(PROVIDER_ID, res).await?;

        let urls = self.poll_task(&base, &api_key, &submit.task_id).await?;
        let images = urls
            .into_iter()
            .map(|url| GeneratedImage {
                url: Some(url),
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
                usage: None,
                task_id: Some(submit.task_id),
            },
        })
    }
}
