//! src/errors.rs
//!
//! Typed errors for the image subsystem. Every variant carries a stable,
//! language-neutral code plus structured params so downstream consumers can
//! localize messages without parsing English text.

use serde_json::{json, Value};
use thiserror::Error;

/// Which storage operation failed. One code per operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Read,
    Write,
    Delete,
    Clear,
    Config,
}

impl StorageOp {
    pub fn code(self) -> &'static str {
        match self {
            StorageOp::Read => "STORAGE_READ_FAILED",
            StorageOp::Write => "STORAGE_WRITE_FAILED",
            StorageOp::Delete => "STORAGE_DELETE_FAILED",
            StorageOp::Clear => "STORAGE_CLEAR_FAILED",
            StorageOp::Config => "STORAGE_CONFIG_FAILED",
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// All structural problems of a config, reported at once.
    #[error("invalid image model config: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },

    #[error("image model config not found: {config_id}")]
    ConfigNotFound { config_id: String },

    #[error("image model config already exists: {config_id}")]
    ConfigAlreadyExists { config_id: String },

    #[error("image model config is disabled: {config_id}")]
    ConfigDisabled { config_id: String },

    #[error("unknown image provider: {provider_id}")]
    ProviderNotFound { provider_id: String },

    #[error("provider {provider_id} does not support dynamic model listing")]
    DynamicModelsUnsupported { provider_id: String },

    #[error("image generation failed ({provider_id}): {message}")]
    GenerationFailed {
        provider_id: String,
        message: String,
    },

    #[error("image generation timed out after {attempts} polling attempts")]
    GenerationTimeout { provider_id: String, attempts: u32 },

    #[error("unexpected response from {provider_id}: {message}")]
    InvalidResponseFormat {
        provider_id: String,
        message: String,
    },

    #[error("model {model_id} does not support {capability}")]
    UnsupportedCapability {
        model_id: String,
        capability: String,
    },

    #[error("image storage {op:?} failed: {message}")]
    Storage { op: StorageOp, message: String },
}

impl ImageError {
    pub fn generation_failed(provider_id: &str, message: impl Into<String>) -> Self {
        ImageError::GenerationFailed {
            provider_id: provider_id.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_response(provider_id: &str, message: impl Into<String>) -> Self {
        ImageError::InvalidResponseFormat {
            provider_id: provider_id.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(op: StorageOp, err: impl std::fmt::Display) -> Self {
        ImageError::Storage {
            op,
            message: err.to_string(),
        }
    }

    /// Stable error code, safe to match on across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ImageError::InvalidRequest { .. } => "INVALID_REQUEST",
            ImageError::InvalidConfig { .. } => "INVALID_CONFIG",
            ImageError::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            ImageError::ConfigAlreadyExists { .. } => "CONFIG_ALREADY_EXISTS",
            ImageError::ConfigDisabled { .. } => "CONFIG_DISABLED",
            ImageError::ProviderNotFound { .. } => "PROVIDER_NOT_FOUND",
            ImageError::DynamicModelsUnsupported { .. } => "DYNAMIC_MODELS_UNSUPPORTED",
            ImageError::GenerationFailed { .. } => "GENERATION_FAILED",
            ImageError::GenerationTimeout { .. } => "GENERATION_TIMEOUT",
            ImageError::InvalidResponseFormat { .. } => "INVALID_RESPONSE_FORMAT",
            ImageError::UnsupportedCapability { .. } => "UNSUPPORTED_CAPABILITY",
            ImageError::Storage { op, .. } => op.code(),
        }
    }

    /// Structured params for i18n. Keys are camelCase to stay compatible
    /// with what the UI side of the boundary already persists.
    pub fn params(&self) -> Value {
        match self {
            ImageError::InvalidRequest { message } => json!({ "message": message }),
            ImageError::InvalidConfig { problems } => json!({ "problems": problems }),
            ImageError::ConfigNotFound { config_id }
            | ImageError::ConfigAlreadyExists { config_id }
            | ImageError::ConfigDisabled { config_id } => json!({ "configId": config_id }),
            ImageError::ProviderNotFound { provider_id }
            | ImageError::DynamicModelsUnsupported { provider_id } => {
                json!({ "providerId": provider_id })
            }
            ImageError::GenerationFailed {
                provider_id,
                message,
            } => json!({ "providerId": provider_id, "message": message }),
            ImageError::GenerationTimeout {
                provider_id,
                attempts,
            } => json!({ "providerId": provider_id, "attempts": attempts }),
            ImageError::InvalidResponseFormat {
                provider_id,
                message,
            } => json!({ "providerId": provider_id, "message": message }),
            ImageError::UnsupportedCapability {
                model_id,
                capability,
            } => json!({ "modelId": model_id, "capability": capability }),
            ImageError::Storage { message, .. } => json!({ "message": message }),
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_params_are_stable() {
        let err = ImageError::ConfigAlreadyExists {
            config_id: "c1".to_string(),
        };
        assert_eq!(err.code(), "CONFIG_ALREADY_EXISTS");
        assert_eq!(err.params()["configId"], "c1");

        let err = ImageError::storage(StorageOp::Write, "disk full");
        assert_eq!(err.code(), "STORAGE_WRITE_FAILED");
    }
}
