//! src/manager.rs
//!
//! CRUD store for user-configured image model instances. Every config
//! handed out is self-contained: it embeds full Provider/Model snapshots so
//! the UI can render it even when the adapter is gone. Repair never fails —
//! corrupted records degrade to disabled placeholders instead of erroring,
//! so they stay visible and deletable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};

use crate::errors::{ImageError, Result, StorageOp};
use crate::provider::{
    ConnectionConfig, ConnectionSchema, Model, ModelCapabilities, Provider,
};
use crate::registry::AdapterRegistry;

/// A persisted, user-owned model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Storage key; immutable once created.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub provider_id: String,
    pub model_id: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub connection_config: ConnectionConfig,
    #[serde(default)]
    pub param_overrides: Map<String, Value>,
    /// Legacy field: merged into `param_overrides` on read, cleared on
    /// every write path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_param_overrides: Option<Map<String, Value>>,
    /// Self-contained snapshots, guaranteed `Some` on every value the
    /// manager returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Model>,
}

impl ModelConfig {
    /// Minimal config without snapshots; repair fills in the rest.
    pub fn bare(id: &str, provider_id: &str, model_id: &str) -> Self {
        ModelConfig {
            id: id.to_string(),
            name: id.to_string(),
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            enabled: true,
            connection_config: ConnectionConfig::default(),
            param_overrides: Map::new(),
            custom_param_overrides: None,
            provider: None,
            model: None,
        }
    }
}

/// One-way merge of the legacy `custom_param_overrides` field into
/// `param_overrides` (legacy values win per key). Pure; applied at the
/// storage-read boundary, never inside business logic.
pub fn migrate_config(mut config: ModelConfig) -> ModelConfig {
    if let Some(custom) = config.custom_param_overrides.take() {
        for (k, v) in custom {
            config.param_overrides.insert(k, v);
        }
    }
    config
}

fn placeholder_provider(provider_id: &str) -> Provider {
    Provider {
        id: provider_id.to_string(),
        name: format!("Unknown provider ({})", provider_id),
        description: "This configuration references a provider that is not available; \
                      the record is kept so it can be inspected or deleted."
            .to_string(),
        requires_api_key: false,
        default_base_url: String::new(),
        supports_dynamic_models: false,
        cors_restricted: None,
        api_key_url: None,
        connection_schema: ConnectionSchema::default(),
    }
}

fn placeholder_model(provider_id: &str, model_id: &str) -> Model {
    Model {
        id: model_id.to_string(),
        name: format!("Unknown model ({})", model_id),
        description: "Corrupted or orphaned configuration".to_string(),
        provider_id: provider_id.to_string(),
        capabilities: ModelCapabilities::default(),
        parameter_definitions: vec![],
        default_parameter_values: Map::new(),
    }
}

/// Env var carrying the API key for a built-in provider, if any.
fn env_api_key(provider_id: &str) -> Option<String> {
    let value = match provider_id {
        "openai" => env::var("OPENAI_API_KEY").ok(),
        "gemini" => env::var("GEMINI_API_KEY").ok(),
        "dashscope" => env::var("DASHSCOPE_API_KEY").ok(),
        "modelscope" => env::var("MODELSCOPE_API_KEY").ok(),
        "seedream" => env::var("SEEDREAM_API_KEY")
            .or_else(|_| env::var("ARK_API_KEY"))
            .ok(),
        "siliconflow" => env::var("SILICONFLOW_API_KEY").ok(),
        "openrouter" => env::var("OPENROUTER_API_KEY").ok(),
        _ => None,
    };
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_base_url(provider_id: &str) -> Option<String> {
    env::var(format!("{}_BASE_URL", provider_id.to_uppercase()))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn builtin_config_id(provider_id: &str) -> String {
    format!("image-{}", provider_id)
}

/// Computes the built-in default configs from the registry and the current
/// environment. Explicit factory, invoked at init — no module-level state.
/// Providers without a static catalog (Ollama) get no built-in entry since
/// there is no model id to point at.
pub fn default_image_configs(registry: &AdapterRegistry) -> Vec<ModelConfig> {
    let mut defaults = Vec::new();
    for provider in registry.all_providers() {
        let models = registry.static_models(&provider.id).unwrap_or_default();
        let Some(model) = models.first() else {
            continue;
        };
        let api_key = env_api_key(&provider.id);
        let enabled = api_key.is_some() || !provider.requires_api_key;
        defaults.push(ModelConfig {
            id: builtin_config_id(&provider.id),
            name: format!("{} - {}", provider.name, model.name),
            provider_id: provider.id.clone(),
            model_id: model.id.clone(),
            enabled,
            connection_config: ConnectionConfig {
                api_key,
                base_url: env_base_url(&provider.id),
                extra: Map::new(),
            },
            param_overrides: Map::new(),
            custom_param_overrides: None,
            provider: Some(provider.clone()),
            model: Some(model.clone()),
        });
    }
    defaults
}

/// A disabled built-in entry with no stored key is silently re-enabled when
/// its env var shows up later. Env presence is taken as user intent.
fn should_auto_enable_builtin(existing: &ModelConfig, fresh_default: &ModelConfig) -> bool {
    !existing.enabled
        && existing.connection_config.api_key().is_none()
        && fresh_default.connection_config.api_key().is_some()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFailure {
    pub index: usize,
    pub config_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub failures: Vec<ImportFailure>,
}

pub struct ImageModelManager {
    registry: Arc<AdapterRegistry>,
    store_path: PathBuf,
    configs: Mutex<HashMap<String, ModelConfig>>,
    init: OnceCell<()>,
}

impl ImageModelManager {
    pub fn new(registry: Arc<AdapterRegistry>, store_path: PathBuf) -> Self {
        Self {
            registry,
            store_path,
            configs: Mutex::new(HashMap::new()),
            init: OnceCell::new(),
        }
    }

    /// Idempotent initialization: concurrent callers share one in-flight
    /// future instead of racing independent seed-writes.
    pub async fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                let mut map = self.load_store().await?;
                let mut dirty = false;

                if map.is_empty() {
                    for config in default_image_configs(&self.registry) {
                        map.insert(config.id.clone(), config);
                    }
                    dirty = !map.is_empty();
                    log::info!("seeded {} built-in image model configs", map.len());
                } else {
                    // Backfill ids for bare legacy records keyed only by
                    // their storage key.
                    for (key, config) in map.iter_mut() {
                        if config.id.is_empty() {
                            config.id = key.clone();
                            dirty = true;
                        }
                    }

                    for fresh in default_image_configs(&self.registry) {
                        match map.get_mut(&fresh.id) {
                            None => {
                                map.insert(fresh.id.clone(), fresh);
                                dirty = true;
                            }
                            Some(existing) => {
                                if should_auto_enable_builtin(existing, &fresh) {
                                    existing.enabled = true;
                                    existing.connection_config.api_key =
                                        fresh.connection_config.api_key.clone();
                                    log::info!(
                                        "auto-enabled built-in config {} from environment",
                                        existing.id
                                    );
                                    dirty = true;
                                }
                            }
                        }
                    }
                }

                if dirty {
                    self.persist(&map).await?;
                }
                *self.configs.lock().await = map;
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn load_store(&self) -> Result<HashMap<String, ModelConfig>> {
        if !self.store_path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.store_path)
            .await
            .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        serde_json::from_str(&raw).map_err(|e| ImageError::storage(StorageOp::Read, e))
    }

    /// Write-temp-then-rename so a crash never truncates the store.
    async fn persist(&self, map: &HashMap<String, ModelConfig>) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        }
        let payload = serde_json::to_string_pretty(map)
            .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        let tmp = self.store_path.with_extension("json.tmp");
        fs::write(&tmp, payload)
            .await
            .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        fs::rename(&tmp, &self.store_path)
            .await
            .map_err(|e| ImageError::storage(StorageOp::Write, e))
    }

    /// Repair algorithm. Never fails: if the provider is unknown, the
    /// record comes back disabled with placeholder snapshots.
    pub fn ensure_self_contained(&self, mut config: ModelConfig) -> ModelConfig {
        let provider_id = config.provider_id.clone();

        if config.provider.is_some() && config.model.is_some() {
            let snapshot = config.provider.as_mut().unwrap();
            if provider_id == "ollama" {
                // Historical metadata bug: stored Ollama snapshots may carry
                // corsRestricted=true. Always local, always unrestricted.
                snapshot.cors_restricted = Some(false);
            } else if snapshot.cors_restricted.is_none() {
                // Best-effort backfill from the live adapter.
                if let Ok(adapter) = self.registry.adapter(&provider_id) {
                    snapshot.cors_restricted = adapter.provider().cors_restricted;
                }
            }
            return config;
        }

        match self.registry.adapter(&provider_id) {
            Ok(adapter) => {
                let mut provider = adapter.provider();
                if provider_id == "ollama" {
                    provider.cors_restricted = Some(false);
                }
                let model = adapter
                    .models()
                    .into_iter()
                    .find(|m| m.id == config.model_id)
                    .unwrap_or_else(|| adapter.build_default_model(&config.model_id));
                config.provider = Some(provider);
                config.model = Some(model);
                config
            }
            Err(_) => {
                log::warn!(
                    "config {} references unknown provider {}; keeping as disabled placeholder",
                    config.id,
                    provider_id
                );
                config.enabled = false;
                config.provider = Some(placeholder_provider(&provider_id));
                config.model = Some(placeholder_model(&provider_id, &config.model_id));
                config
            }
        }
    }

    /// Structural validation. Collects every problem instead of failing on
    /// the first one.
    pub fn validate_config(&self, config: &ModelConfig) -> Result<()> {
        let mut problems = Vec::new();
        if config.id.trim().is_empty() {
            problems.push("id must be a non-empty string".to_string());
        }
        if config.name.trim().is_empty() {
            problems.push("name must be a non-empty string".to_string());
        }
        if config.provider_id.trim().is_empty() {
            problems.push("providerId must be a non-empty string".to_string());
        }
        if config.model_id.trim().is_empty() {
            problems.push("modelId must be a non-empty string".to_string());
        }
        if config.provider.is_none() {
            problems.push("provider snapshot is missing".to_string());
        }
        if config.model.is_none() {
            problems.push("model snapshot is missing".to_string());
        }
        if !config.provider_id.trim().is_empty()
            && self.registry.adapter(&config.provider_id).is_err()
        {
            problems.push(format!("unknown provider: {}", config.provider_id));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ImageError::InvalidConfig { problems })
        }
    }

    fn repaired(&self, config: ModelConfig) -> ModelConfig {
        self.ensure_self_contained(migrate_config(config))
    }

    pub async fn get_config(&self, config_id: &str) -> Result<ModelConfig> {
        self.ensure_initialized().await?;
        let configs = self.configs.lock().await;
        configs
            .get(config_id)
            .cloned()
            .map(|c| self.repaired(c))
            .ok_or_else(|| ImageError::ConfigNotFound {
                config_id: config_id.to_string(),
            })
    }

    pub async fn get_all_configs(&self) -> Result<Vec<ModelConfig>> {
        self.ensure_initialized().await?;
        let configs = self.configs.lock().await;
        let mut all: Vec<ModelConfig> = configs
            .values()
            .cloned()
            .map(|c| self.repaired(c))
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    pub async fn get_enabled_configs(&self) -> Result<Vec<ModelConfig>> {
        Ok(self
            .get_all_configs()
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect())
    }

    pub async fn add_config(&self, config: ModelConfig) -> Result<ModelConfig> {
        self.ensure_initialized().await?;
        let config = self.repaired(config);
        self.validate_config(&config)?;

        let mut configs = self.configs.lock().await;
        if configs.contains_key(&config.id) {
            return Err(ImageError::ConfigAlreadyExists {
                config_id: config.id.clone(),
            });
        }
        configs.insert(config.id.clone(), config.clone());
        self.persist(&configs).await?;
        Ok(config)
    }

    /// Updates an existing config. The id is immutable: whatever the update
    /// payload carries, the stored id wins.
    pub async fn update_config(&self, config_id: &str, mut updated: ModelConfig) -> Result<ModelConfig> {
        self.ensure_initialized().await?;

        let mut configs = self.configs.lock().await;
        if !configs.contains_key(config_id) {
            return Err(ImageError::ConfigNotFound {
                config_id: config_id.to_string(),
            });
        }
        updated.id = config_id.to_string();
        let updated = self.repaired(updated);
        self.validate_config(&updated)?;
        configs.insert(config_id.to_string(), updated.clone());
        self.persist(&configs).await?;
        Ok(updated)
    }

    /// Idempotent: deleting a missing id is a logged no-op, never an error,
    /// so broken records can always be removed.
    pub async fn delete_config(&self, config_id: &str) -> Result<()> {
        self.ensure_initialized().await?;
        let mut configs = self.configs.lock().await;
        if configs.remove(config_id).is_none() {
            log::info!("delete_config: {} not present, nothing to do", config_id);
            return Ok(());
        }
        self.persist(&configs).await
    }

    // --- Import/export boundary (plain JSON data only) ---

    pub fn get_data_type(&self) -> &'static str {
        "image-models"
    }

    pub async fn export_data(&self) -> Result<Vec<ModelConfig>> {
        self.get_all_configs().await
    }

    /// True iff the value looks like an exported config list.
    pub fn validate_data(&self, value: &Value) -> bool {
        match value.as_array() {
            Some(items) => items.iter().all(|item| {
                item.get("providerId").map(Value::is_string).unwrap_or(false)
                    && item.get("modelId").map(Value::is_string).unwrap_or(false)
            }),
            None => false,
        }
    }

    /// Partial-success import: each record is tried independently
    /// (update-if-exists, else add); failures are collected, not fatal.
    pub async fn import_data(&self, records: Vec<Value>) -> Result<ImportReport> {
        self.ensure_initialized().await?;
        let mut report = ImportReport::default();

        for (index, value) in records.into_iter().enumerate() {
            let config_id = value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
            let parsed: std::result::Result<ModelConfig, _> = serde_json::from_value(value);
            let outcome = match parsed {
                Ok(config) => {
                    let exists = {
                        let configs = self.configs.lock().await;
                        configs.contains_key(&config.id)
                    };
                    if exists {
                        let id = config.id.clone();
                        self.update_config(&id, config).await.map(|_| ())
                    } else {
                        self.add_config(config).await.map(|_| ())
                    }
                }
                Err(e) => Err(ImageError::InvalidConfig {
                    problems: vec![format!("record does not parse: {e}")],
                }),
            };

            match outcome {
                Ok(()) => report.imported += 1,
                Err(e) => report.failures.push(ImportFailure {
                    index,
                    config_id: config_id.clone(),
                    message: e.to_string(),
                }),
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_overrides_win_on_collision_and_field_is_cleared() {
        let mut config = ModelConfig::bare("c1", "openai", "dall-e-3");
        config
            .param_overrides
            .insert("x".to_string(), Value::from(0));
        let mut custom = Map::new();
        custom.insert("x".to_string(), Value::from(1));
        custom.insert("y".to_string(), Value::from(2));
        config.custom_param_overrides = Some(custom);

        let migrated = migrate_config(config);
        assert_eq!(migrated.param_overrides["x"], Value::from(1));
        assert_eq!(migrated.param_overrides["y"], Value::from(2));
        assert!(migrated.custom_param_overrides.is_none());
    }

    #[test]
    fn auto_enable_requires_missing_key_and_fresh_env_key() {
        let mut existing = ModelConfig::bare("image-openai", "openai", "dall-e-3");
        existing.enabled = false;

        let mut fresh = existing.clone();
        fresh.connection_config.api_key = Some("sk-new".to_string());
        assert!(should_auto_enable_builtin(&existing, &fresh));

        // A stored key means the user configured this by hand; leave it be.
        existing.connection_config.api_key = Some("sk-old".to_string());
        assert!(!should_auto_enable_builtin(&existing, &fresh));

        existing.connection_config.api_key = None;
        existing.enabled = true;
        assert!(!should_auto_enable_builtin(&existing, &fresh));
    }
}
