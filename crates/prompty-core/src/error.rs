//! Error taxonomy for the prompt-pipeline engine.
//!
//! Three axes, matching the three failure classes the executor distinguishes:
//! configuration-time (expansion), hook-script runtime, and best-effort I/O.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("wildcard error: {0}")]
    Wildcard(String),

    #[error("extension error: {0}")]
    Extension(String),

    #[error("lora error: {0}")]
    Lora(String),

    #[error("job configuration error: {0}")]
    Config(String),

    #[error("hook '{hook}' failed: {message} ({code})")]
    Hook {
        hook: String,
        code: String,
        message: String,
    },

    #[error("block tree error: {0}")]
    BlockTree(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn wildcard(msg: impl Into<String>) -> Self {
        Error::Wildcard(msg.into())
    }

    pub fn extension(msg: impl Into<String>) -> Self {
        Error::Extension(msg.into())
    }

    pub fn lora(msg: impl Into<String>) -> Self {
        Error::Lora(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn hook(hook: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Hook {
            hook: hook.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
