//! Runtime configuration.
//!
//! ```toml
//! log_filter = "dynffi=debug"
//! default_open_flags = ["lazy", "local"]
//! callback_failure = "zero-return"
//! ```

use crate::ffi::callback::CallbackFailurePolicy;
use crate::ffi::loader::OpenFlag;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown open flag `{0}`")]
    UnknownFlag(String),
    #[error("default_open_flags needs exactly one of `lazy` or `now`, found {0}")]
    BindingMode(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FfiConfig {
    /// `EnvFilter` directives used when `DYNFFI_LOG` is unset.
    pub log_filter: String,
    /// Flags applied when a library is opened without explicit flags.
    pub default_open_flags: Vec<String>,
    pub callback_failure: CallbackFailurePolicy,
}

impl Default for FfiConfig {
    fn default() -> Self {
        FfiConfig {
            log_filter: "dynffi=info".to_string(),
            default_open_flags: vec!["lazy".to_string(), "local".to_string()],
            callback_failure: CallbackFailurePolicy::default(),
        }
    }
}

impl FfiConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FfiConfig = toml::from_str(text)?;
        config.open_flags()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parsed `default_open_flags`. `dlopen` requires exactly one binding
    /// mode, so the list must name one of `lazy` or `now`.
    pub fn open_flags(&self) -> Result<Vec<OpenFlag>, ConfigError> {
        let flags = self
            .default_open_flags
            .iter()
            .map(|name| {
                name.parse::<OpenFlag>()
                    .map_err(|_| ConfigError::UnknownFlag(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let modes = flags
            .iter()
            .filter(|flag| matches!(flag, OpenFlag::Lazy | OpenFlag::Now))
            .count();
        if modes != 1 {
            return Err(ConfigError::BindingMode(modes));
        }
        Ok(flags)
    }
}
