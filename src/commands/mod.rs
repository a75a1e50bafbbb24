pub mod cache;
pub mod configs;
pub mod generate;
pub mod init;
pub mod models;
pub mod providers;
pub mod transfer;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::manager::ImageModelManager;
use crate::registry::AdapterRegistry;
use crate::service::ImageService;
use crate::storage::{ImageStorageService, StorageQuotaUpdate};

/// 各个子命令共享的运行时：注册表、配置管理器、缓存与编排服务。
pub struct AppContext {
    pub registry: Arc<AdapterRegistry>,
    pub manager: Arc<ImageModelManager>,
    pub storage: Arc<ImageStorageService>,
    pub service: ImageService,
    pub app_config: config::Config,
}

pub async fn build_context() -> Result<AppContext> {
    let app_config = config::load_config().await?;

    let registry = Arc::new(AdapterRegistry::with_builtin_adapters());

    let store_path = config::get_model_store_path().await?;
    let manager = Arc::new(ImageModelManager::new(registry.clone(), store_path));
    manager
        .ensure_initialized()
        .await
        .context("无法初始化模型配置存储。")?;

    let db_path = config::get_image_db_path().await?;
    let storage =
        Arc::new(ImageStorageService::open(&db_path).context("无法打开图像缓存数据库。")?);
    storage
        .update_quota_config(StorageQuotaUpdate {
            max_cache_bytes: Some(app_config.storage.max_cache_bytes),
            max_age_secs: Some(app_config.storage.max_age_secs),
            max_count: Some(app_config.storage.max_count),
            auto_cleanup_threshold: Some(app_config.storage.auto_cleanup_threshold),
        })
        .context("无法应用缓存配额设置。")?;

    let service = ImageService::new(registry.clone(), manager.clone(), Some(storage.clone()));

    Ok(AppContext {
        registry,
        manager,
        storage,
        service,
        app_config,
    })
}
