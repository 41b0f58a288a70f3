use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{LabelMode, PanelId};
use crate::error::SyncError;

/// Raw on-disk configuration; every field optional, defaults applied by
/// [`ConfigLoader::resolve_file`].
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub catalog_page_limit: Option<u32>,
    #[serde(default)]
    pub gene_page_limit: Option<u32>,
    #[serde(default)]
    pub genelist_namespace: Option<String>,
    #[serde(default)]
    pub label_mode: Option<LabelMode>,
}

/// Resolved process-wide configuration, built once at startup and passed
/// into each stage. Never re-read mid-run.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    pub catalog_page_limit: u32,
    pub gene_page_limit: u32,
    pub genelist_namespace: String,
    pub label_mode: LabelMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://panelapp-aus.org/api".to_string(),
            api_version: "v1".to_string(),
            request_timeout_secs: 30,
            catalog_page_limit: 1000,
            gene_page_limit: 100,
            genelist_namespace: "Paus".to_string(),
            label_mode: LabelMode::Namespaced,
        }
    }
}

impl Config {
    pub fn panels_url(&self) -> String {
        format!("{}/{}/panels/", self.base_url, self.api_version)
    }

    pub fn panel_genes_url(&self, panel: PanelId) -> String {
        format!("{}/{}/panels/{}/genes/", self.base_url, self.api_version, panel)
    }

    pub fn swagger_url(&self) -> String {
        format!("{}/docs/?format=openapi", self.base_url)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves configuration from an optional JSON file. A missing default
    /// file is fine; an explicitly named file must exist. The
    /// `PANELAPP_BASE_URL` environment variable overrides the base URL last.
    pub fn resolve(path: Option<&str>) -> Result<Config, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("panel-sync.json"),
        };

        let file = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        } else if path.is_some() {
            return Err(SyncError::ConfigRead(config_path));
        } else {
            ConfigFile::default()
        };

        let mut config = Self::resolve_file(file);
        if let Ok(base_url) = std::env::var("PANELAPP_BASE_URL") {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().trim_end_matches('/').to_string();
            }
        }
        Ok(config)
    }

    pub fn resolve_file(file: ConfigFile) -> Config {
        let defaults = Config::default();
        Config {
            base_url: file
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            api_version: file.api_version.unwrap_or(defaults.api_version),
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            catalog_page_limit: file.catalog_page_limit.unwrap_or(defaults.catalog_page_limit),
            gene_page_limit: file.gene_page_limit.unwrap_or(defaults.gene_page_limit),
            genelist_namespace: file
                .genelist_namespace
                .unwrap_or(defaults.genelist_namespace),
            label_mode: file.label_mode.unwrap_or(defaults.label_mode),
        }
    }
}
