use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid panel id: {0}")]
    InvalidPanelId(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("PanelApp request failed: {0}")]
    ApiHttp(String),

    #[error("PanelApp returned status {status}: {message}")]
    ApiStatus { status: u16, message: String },

    #[error("invalid JSON in API response: {0}")]
    ApiJson(String),

    #[error("panel catalog not found at {0} (run the catalog stage first)")]
    CatalogMissing(String),

    #[error("panel table not found: {0}")]
    PanelTableMissing(String),

    #[error("merge validation failed: {0}")]
    MergeValidation(String),

    #[error("merge marker missing at {0} (run the merge stage first)")]
    MergeMarkerMissing(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
