//! Layered settings: built-in defaults, an optional file, then
//! `SCHEMADOM__SECTION__KEY` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;
use crate::persist::PersistenceMode;

#[derive(Debug, Clone, Deserialize)]
pub struct HistorySettings {
    /// Window within which consecutive changes of one attribute merge.
    pub merge_window_ms: u64,
    /// Most commands kept; 0 keeps everything.
    pub max_depth: usize,
    pub require_transactions: bool,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { merge_window_ms: 500, max_depth: 1000, require_transactions: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSettings {
    /// `memory` or `file`
    pub mode: String,
    pub path: Option<String>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self { mode: "memory".to_string(), path: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    pub history: HistorySettings,
    pub persistence: PersistenceSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Reads settings, with `path` naming an optional config file (any format
    /// the `config` crate recognizes by extension).
    pub fn load(path: Option<&str>) -> Result<Settings> {
        let mut builder = Config::builder()
            .set_default("history.merge_window_ms", 500_i64)?
            .set_default("history.max_depth", 1000_i64)?
            .set_default("history.require_transactions", false)?
            .set_default("persistence.mode", "memory")?
            .set_default("log.filter", "info")?;
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("SCHEMADOM").separator("__").try_parsing(true));
        let settings = builder.build()?.try_deserialize::<Settings>()?;
        Ok(settings)
    }
    pub fn persistence_mode(&self) -> PersistenceMode {
        match (self.persistence.mode.as_str(), &self.persistence.path) {
            ("file", Some(path)) => PersistenceMode::File(path.clone()),
            _ => PersistenceMode::InMemory,
        }
    }
}
