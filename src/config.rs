//! src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::storage::StorageQuotaConfig;

/// Returns the configuration directory path (~/.config/imagemate).
pub async fn get_config_dir() -> Result<PathBuf> {
    let config_dir = if cfg!(windows) {
        // Windows: %APPDATA%\imagemate
        dirs::data_dir()
            .map(|p| p.join("imagemate"))
            .context("Could not get data directory")?
    } else {
        // Linux/macOS: ~/.config/imagemate
        dirs::config_dir()
            .map(|p| p.join("imagemate"))
            .context("Could not get config directory")?
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .await
            .context("Could not create config directory")?;
    }
    Ok(config_dir)
}

/// 模型配置存储文件（JSON，由 manager 维护）。
pub async fn get_model_store_path() -> Result<PathBuf> {
    Ok(get_config_dir().await?.join("image-models.json"))
}

/// 图像缓存数据库文件（SQLite，由 storage 维护）。
pub async fn get_image_db_path() -> Result<PathBuf> {
    Ok(get_config_dir().await?.join("images.db"))
}

/// Represents the main configuration for the application.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Default config id used by `generate` when none is given.
    pub default_config: Option<String>,
    /// Image cache quota settings.
    #[serde(default)]
    pub storage: StorageQuotaConfig,
}

/// Creates a default configuration file if one does not exist.
pub async fn create_default_config() -> Result<()> {
    let config_dir = get_config_dir().await?;
    let config_path = config_dir.join("config.toml");
    let default_config = Config::default();

    let config_content = toml::to_string(&default_config)?;
    let mut file = fs::File::create(&config_path).await?;
    file.write_all(config_content.as_bytes()).await?;

    println!("Created default config file at {:?}", config_path);
    Ok(())
}

pub async fn load_config() -> Result<Config> {
    let config_dir = get_config_dir().await?;
    let config_path = config_dir.join("config.toml");

    if !config_path.exists() {
        create_default_config().await?;
    }

    let config_content = fs::read_to_string(config_path)
        .await
        .context("Could not read config file")?;
    let config: Config =
        toml::from_str(&config_content).context("Could not parse config file")?;

    Ok(config)
}
