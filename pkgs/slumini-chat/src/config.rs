//! Chat configuration

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use slumini_store::StoreConfig;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which repository serves conversations
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Primary message store with summaries and live subscriptions
    #[default]
    Remote,
    /// Client-local fallback store
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Remote => f.write_str("remote"),
            Backend::Local => f.write_str("local"),
        }
    }
}

impl FromStr for Backend {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "remote" => Ok(Backend::Remote),
            "local" => Ok(Backend::Local),
            other => Err(ChatError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Repository selected at startup
    pub backend: Backend,

    /// Database paths and tuning for both repositories
    pub store: StoreConfig,
}

impl ChatConfig {
    /// Keep both databases under `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            backend: Backend::default(),
            store: StoreConfig {
                db_path: data_dir.join("slumini.db"),
                local_db_path: data_dir.join("slumini-local.db"),
                ..Default::default()
            },
        }
    }

    /// Default data directory, `~/.slumini`
    pub fn default_data_dir() -> PathBuf {
        let mut home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home_dir.push(".slumini");
        home_dir
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::with_data_dir(Self::default_data_dir())
    }
}
