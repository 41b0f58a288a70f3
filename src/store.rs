use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::domain::{EntityKind, PanelId};
use crate::error::SyncError;

/// On-disk layout of one data root. All persisted paths of the pipeline are
/// derived here so stage code never builds paths by hand.
#[derive(Debug, Clone)]
pub struct Store {
    data_root: Utf8PathBuf,
}

impl Store {
    pub fn new(data_root: Utf8PathBuf) -> Self {
        Self { data_root }
    }

    pub fn data_root(&self) -> &Utf8Path {
        &self.data_root
    }

    pub fn ensure_data_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.data_root.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    pub fn panel_list_json_dir(&self) -> Utf8PathBuf {
        self.data_root.join("panel_list").join("json")
    }

    pub fn panel_list_page_path(&self, page: u32) -> Utf8PathBuf {
        self.panel_list_json_dir()
            .join(format!("panels_page_{page}.json"))
    }

    pub fn panel_list_table_path(&self) -> Utf8PathBuf {
        self.data_root.join("panel_list.tsv")
    }

    pub fn panel_dir(&self, id: PanelId) -> Utf8PathBuf {
        self.data_root.join("panels").join(id.to_string())
    }

    pub fn version_marker_path(&self, id: PanelId) -> Utf8PathBuf {
        self.panel_dir(id).join("version_created.txt")
    }

    pub fn extraction_marker_path(&self, id: PanelId) -> Utf8PathBuf {
        self.panel_dir(id).join("extracted.txt")
    }

    pub fn processed_marker_path(&self, id: PanelId) -> Utf8PathBuf {
        self.panel_dir(id).join("processed.txt")
    }

    pub fn gene_json_dir(&self, id: PanelId) -> Utf8PathBuf {
        self.panel_dir(id).join("genes").join("json")
    }

    pub fn gene_page_path(&self, id: PanelId, page: u32) -> Utf8PathBuf {
        self.gene_json_dir(id)
            .join(format!("genes_page_{page}.json"))
    }

    pub fn panel_table_path(&self, id: PanelId) -> Utf8PathBuf {
        self.panel_dir(id).join("genes.tsv")
    }

    pub fn merged_table_path(&self, kind: EntityKind) -> Utf8PathBuf {
        self.data_root.join(format!("{kind}_merged.tsv"))
    }

    pub fn merge_marker_path(&self, kind: EntityKind) -> Utf8PathBuf {
        self.data_root.join(format!("{kind}_merge_marker.txt"))
    }

    pub fn merge_log_path(&self, kind: EntityKind) -> Utf8PathBuf {
        self.data_root.join(format!("{kind}_merge_log.json"))
    }

    pub fn genelists_dir(&self) -> Utf8PathBuf {
        self.data_root.join("genelists")
    }

    pub fn genelist_marker_path(&self) -> Utf8PathBuf {
        self.genelists_dir().join("genelist_version.txt")
    }

    /// Panel directories present on disk, numeric ascending. Non-numeric
    /// entries are ignored.
    pub fn list_panel_dirs(&self) -> Result<Vec<PanelId>, SyncError> {
        let panels_root = self.data_root.join("panels");
        if !panels_root.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let entries = fs::read_dir(panels_root.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<PanelId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Raw gene pages of a panel in page order, keyed by page number.
    pub fn list_gene_pages(&self, id: PanelId) -> Result<Vec<(u32, Utf8PathBuf)>, SyncError> {
        let dir = self.gene_json_dir(id);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let pattern = Regex::new(r"^genes_page_(\d+)\.json$").expect("static pattern");
        let mut pages = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(captures) = pattern.captures(&name) {
                if let Ok(number) = captures[1].parse::<u32>() {
                    pages.push((number, dir.join(&name)));
                }
            }
        }
        pages.sort_by_key(|(number, _)| *number);
        Ok(pages)
    }

    /// Removes previously downloaded raw gene pages for a panel so a refetch
    /// never mixes old and new pages under pagination-count drift.
    pub fn clear_gene_pages(&self, id: PanelId) -> Result<(), SyncError> {
        let dir = self.gene_json_dir(id);
        if dir.as_std_path().exists() {
            fs::remove_dir_all(dir.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }

    pub fn write_text_atomic(path: &Utf8Path, content: &str) -> Result<(), SyncError> {
        Self::write_bytes_atomic(path, content.as_bytes())
    }

    /// Writes into a temp file in the target directory, then renames over the
    /// destination, so readers never observe a half-written file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
        let parent = path
            .parent()
            .ok_or_else(|| SyncError::Filesystem(format!("invalid path: {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".panel-sync")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read_text(path: &Utf8Path) -> Result<String, SyncError> {
        fs::read_to_string(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("read {path}: {err}")))
    }
}
