// tests/manager_test.rs
//
// 针对模型配置管理器的端到端测试：种子化、自修复、增删改查与导入导出，
// 全部运行在 tempfile 沙箱里的 JSON 存储文件上。

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use imagemate::manager::{ImageModelManager, ModelConfig};
use imagemate::registry::AdapterRegistry;

fn sandbox() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("image-models.json");
    (dir, path)
}

fn manager(store_path: PathBuf) -> ImageModelManager {
    ImageModelManager::new(Arc::new(AdapterRegistry::with_builtin_adapters()), store_path)
}

#[tokio::test]
async fn fresh_store_is_seeded_with_self_contained_builtins() {
    let (_dir, path) = sandbox();
    let manager = manager(path.clone());

    let configs = manager.get_all_configs().await.unwrap();
    assert!(!configs.is_empty());
    assert!(configs.iter().any(|c| c.id == "image-openai"));

    // 不变式：管理器交出的每条配置都带完整快照。
    for config in &configs {
        assert!(config.provider.is_some(), "{} missing provider snapshot", config.id);
        assert!(config.model.is_some(), "{} missing model snapshot", config.id);
        assert!(config.custom_param_overrides.is_none());
    }

    assert!(path.exists(), "seed should be persisted to disk");
}

#[tokio::test]
async fn duplicate_add_reports_config_already_exists() {
    let (_dir, path) = sandbox();
    let manager = manager(path);

    let config = ModelConfig::bare("c1", "openai", "dall-e-3");
    manager.add_config(config.clone()).await.unwrap();

    let err = manager.add_config(config).await.unwrap_err();
    assert_eq!(err.code(), "CONFIG_ALREADY_EXISTS");
    assert_eq!(err.params()["configId"], "c1");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_dir, path) = sandbox();
    let manager = manager(path);

    manager
        .add_config(ModelConfig::bare("doomed", "openai", "dall-e-3"))
        .await
        .unwrap();
    manager.delete_config("doomed").await.unwrap();
    assert!(manager.get_config("doomed").await.is_err());

    // 再删一次也不报错。
    manager.delete_config("doomed").await.unwrap();
    manager.delete_config("never-existed").await.unwrap();
}

#[tokio::test]
async fn unknown_provider_record_becomes_disabled_placeholder() {
    let (_dir, path) = sandbox();
    // 直接伪造一份带着已下线服务商的存量存储。
    let store = json!({
        "orphan": {
            "id": "orphan",
            "name": "Legacy config",
            "providerId": "legacy-provider",
            "modelId": "legacy-model",
            "enabled": true,
            "connectionConfig": {},
            "paramOverrides": {}
        }
    });
    std::fs::write(&path, store.to_string()).unwrap();

    let manager = manager(path);
    let config = manager.get_config("orphan").await.unwrap();

    assert!(!config.enabled, "unknown provider must come back disabled");
    let provider = config.provider.expect("placeholder provider expected");
    assert!(provider.name.contains("legacy-provider"));
    assert!(config.model.is_some());
}

#[tokio::test]
async fn bare_legacy_records_get_their_id_backfilled() {
    let (_dir, path) = sandbox();
    let store = json!({
        "my-config": {
            "name": "No id field",
            "providerId": "openai",
            "modelId": "dall-e-3",
            "enabled": true
        }
    });
    std::fs::write(&path, store.to_string()).unwrap();

    let manager = manager(path);
    let config = manager.get_config("my-config").await.unwrap();
    assert_eq!(config.id, "my-config");
}

#[tokio::test]
async fn legacy_custom_overrides_merge_and_clear_through_an_update() {
    let (_dir, path) = sandbox();
    let store = json!({
        "c1": {
            "id": "c1",
            "name": "With legacy overrides",
            "providerId": "openai",
            "modelId": "dall-e-3",
            "enabled": true,
            "paramOverrides": { "size": "512x512" },
            "customParamOverrides": { "size": "1024x1024", "steps": 30 }
        }
    });
    std::fs::write(&path, store.to_string()).unwrap();

    let manager = manager(path.clone());
    let config = manager.get_config("c1").await.unwrap();

    // 旧字段按键覆盖新字段，然后被清空。
    assert_eq!(config.param_overrides["size"], "1024x1024");
    assert_eq!(config.param_overrides["steps"], 30);
    assert!(config.custom_param_overrides.is_none());

    // 写回之后，持久化文件里不应再出现旧字段。
    manager.update_config("c1", config).await.unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("customParamOverrides"));
    assert!(raw.contains("1024x1024"));
}

#[tokio::test]
async fn update_cannot_change_the_id() {
    let (_dir, path) = sandbox();
    let manager = manager(path);

    manager
        .add_config(ModelConfig::bare("stable", "openai", "dall-e-3"))
        .await
        .unwrap();

    let mut payload = ModelConfig::bare("sneaky-rename", "openai", "gpt-image-1");
    payload.name = "renamed".to_string();
    let updated = manager.update_config("stable", payload).await.unwrap();

    assert_eq!(updated.id, "stable");
    assert_eq!(updated.model_id, "gpt-image-1");
    assert!(manager.get_config("sneaky-rename").await.is_err());
}

#[tokio::test]
async fn import_applies_valid_records_and_collects_failures() {
    let (_dir, path) = sandbox();
    let manager = manager(path);

    let records = vec![
        json!({
            "id": "good",
            "name": "Importable",
            "providerId": "openai",
            "modelId": "dall-e-3",
            "enabled": true
        }),
        json!({
            "id": "bad",
            "name": "Unknown provider",
            "providerId": "nope",
            "modelId": "whatever",
            "enabled": true
        }),
    ];

    let report = manager.import_data(records).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 1);
    assert_eq!(report.failures[0].config_id.as_deref(), Some("bad"));

    assert!(manager.get_config("good").await.is_ok());
    assert!(manager.get_config("bad").await.is_err());
}

#[tokio::test]
async fn export_round_trips_through_import() {
    let (_dir, path) = sandbox();
    let manager = manager(path);
    manager
        .add_config(ModelConfig::bare("mine", "siliconflow", "Kwai-Kolors/Kolors"))
        .await
        .unwrap();

    let exported = manager.export_data().await.unwrap();
    let as_json = serde_json::to_value(&exported).unwrap();
    assert!(manager.validate_data(&as_json));

    // 导回同一个管理器：全部按更新处理，不应产生失败。
    let report = manager
        .import_data(as_json.as_array().unwrap().clone())
        .await
        .unwrap();
    assert_eq!(report.imported, exported.len());
    assert!(report.failures.is_empty());
}
