// tests/adapter_test.rs
//
// 适配器的 HTTP 行为测试，全部打在 mockito 假服务器上：成功映射、
// 错误信封解析、ModelScope 轮询以及 Ollama 的容错式模型发现。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use imagemate::manager::ModelConfig;
use imagemate::provider::{
    ConnectionConfig, ImageAdapter, ImageRequest, ModelScopeAdapter, OllamaAdapter, OpenAIAdapter,
};

fn config_for(server_url: &str, provider: &str, model: &str) -> ModelConfig {
    let mut config = ModelConfig::bare("test-config", provider, model);
    config.connection_config = ConnectionConfig {
        api_key: Some("test-key".to_string()),
        base_url: Some(server_url.to_string()),
        ..Default::default()
    };
    config
}

fn request(prompt: &str) -> ImageRequest {
    ImageRequest {
        prompt: prompt.to_string(),
        input_images: Vec::new(),
        count: None,
        param_overrides: Map::new(),
    }
}

#[tokio::test]
async fn openai_success_maps_to_uniform_result() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/images/generations")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data":[{"b64_json":"aGVsbG8="}],"usage":{"total_tokens":42}}"#)
        .create_async()
        .await;

    let adapter = OpenAIAdapter::new();
    let config = config_for(&server.url(), "openai", "gpt-image-1");
    let result = adapter.generate(&request("一只戴帽子的猫"), &config).await.unwrap();

    assert_eq!(result.images.len(), 1);
    assert_eq!(result.images[0].b64.as_deref(), Some("aGVsbG8="));
    assert_eq!(result.metadata.provider_id, "openai");
    assert_eq!(result.metadata.config_id, "test-config");
    assert!(result.metadata.usage.is_some());
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_error_envelope_surfaces_the_provider_message() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v1/images/generations")
        .with_status(401)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":{"message":"Incorrect API key provided"}}"#)
        .create_async()
        .await;

    let adapter = OpenAIAdapter::new();
    let config = config_for(&server.url(), "openai", "dall-e-3");
    let err = adapter.generate(&request("a cat"), &config).await.unwrap_err();

    assert_eq!(err.code(), "GENERATION_FAILED");
    assert!(err.to_string().contains("Incorrect API key provided"));
}

#[tokio::test]
async fn modelscope_polls_through_pending_and_running_to_success() {
    let mut server = mockito::Server::new_async().await;
    let submit = server
        .mock("POST", "/v1/images/generations")
        .match_header("x-modelscope-async-mode", "true")
        .with_status(200)
        .with_body(r#"{"task_id":"t1"}"#)
        .create_async()
        .await;

    // 同一个端点按轮询次数吐出 PENDING → RUNNING → SUCCEED。
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_in_mock = hits.clone();
    let poll = server
        .mock("GET", "/v1/tasks/t1")
        .match_header("x-modelscope-task-type", "image_generation")
        .with_status(200)
        .with_body_from_request(move |_| {
            match hits_in_mock.fetch_add(1, Ordering::SeqCst) {
                0 => r#"{"task_status":"PENDING"}"#.as_bytes().to_vec(),
                1 => r#"{"task_status":"RUNNING"}"#.as_bytes().to_vec(),
                _ => r#"{"task_status":"SUCCEED","output_images":["https://img.example/1.png"]}"#
                    .as_bytes()
                    .to_vec(),
            }
        })
        .expect(3)
        .create_async()
        .await;

    let adapter = ModelScopeAdapter::with_polling(Duration::from_millis(1), 10);
    let config = config_for(&server.url(), "modelscope", "Qwen/Qwen-Image");
    let result = adapter.generate(&request("山水画"), &config).await.unwrap();

    assert_eq!(result.images.len(), 1);
    assert_eq!(
        result.images[0].url.as_deref(),
        Some("https://img.example/1.png")
    );
    assert_eq!(result.metadata.task_id.as_deref(), Some("t1"));
    submit.assert_async().await;
    poll.assert_async().await;
}

#[tokio::test]
async fn modelscope_gives_up_after_the_attempt_budget() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/v1/images/generations")
        .with_status(200)
        .with_body(r#"{"task_id":"t2"}"#)
        .create_async()
        .await;
    let _poll = server
        .mock("GET", "/v1/tasks/t2")
        .with_status(200)
        .with_body(r#"{"task_status":"PENDING"}"#)
        .expect(3)
        .create_async()
        .await;

    let adapter = ModelScopeAdapter::with_polling(Duration::from_millis(1), 3);
    let config = config_for(&server.url(), "modelscope", "Qwen/Qwen-Image");
    let err = adapter.generate(&request("a cat"), &config).await.unwrap_err();

    assert_eq!(err.code(), "GENERATION_TIMEOUT");
    assert_eq!(err.params()["attempts"], 3);
}

#[tokio::test]
async fn modelscope_terminal_failure_stops_polling() {
    let mut server = mockito::Server::new_async().await;
    let _submit = server
        .mock("POST", "/v1/images/generations")
        .with_status(200)
        .with_body(r#"{"task_id":"t3"}"#)
        .create_async()
        .await;
    let poll = server
        .mock("GET", "/v1/tasks/t3")
        .with_status(200)
        .with_body(r#"{"task_status":"FAILED","errors":{"message":"content policy"}}"#)
        .expect(1)
        .create_async()
        .await;

    let adapter = ModelScopeAdapter::with_polling(Duration::from_millis(1), 10);
    let config = config_for(&server.url(), "modelscope", "Qwen/Qwen-Image");
    let err = adapter.generate(&request("a cat"), &config).await.unwrap_err();

    assert_eq!(err.code(), "GENERATION_FAILED");
    assert!(err.to_string().contains("FAILED"));
    poll.assert_async().await;
}

#[tokio::test]
async fn ollama_discovery_lists_local_models() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_body(r#"{"data":[{"id":"x/sdxl"},{"id":"llava:13b"}]}"#)
        .create_async()
        .await;

    let adapter = OllamaAdapter::new();
    let connection = ConnectionConfig {
        base_url: Some(server.url()),
        ..Default::default()
    };
    let models = adapter.models_async(&connection).await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].id, "x/sdxl");
    assert!(models.iter().all(|m| m.provider_id == "ollama"));
}

#[tokio::test]
async fn ollama_discovery_failure_degrades_to_empty() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v1/models")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let adapter = OllamaAdapter::new();
    let connection = ConnectionConfig {
        base_url: Some(server.url()),
        ..Default::default()
    };
    // 本地服务不可达不是错误，只是没有模型。
    let models = adapter.models_async(&connection).await.unwrap();
    assert!(models.is_empty());
}
