use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::{PanelAppClient, drain_pages};
use crate::config::Config;
use crate::domain::{PanelInfo, PanelId, VersionStamp};
use crate::error::SyncError;
use crate::store::Store;
use crate::sync::write_marker;

const PANEL_LIST_HEADER: &str =
    "id\tname\tversion\tversion_created\tnumber_of_genes\tnumber_of_strs\tnumber_of_regions";

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub pages: u32,
    pub panels: usize,
    pub truncated: bool,
}

/// Drains the paginated panel listing, persisting each raw page, then writes
/// the flattened `panel_list.tsv` and overwrites every panel's
/// catalog-version marker. Unconditional: no staleness comparison happens
/// here, and any page failure aborts the fetch.
pub fn fetch_catalog<C>(client: &C, store: &Store, config: &Config) -> Result<CatalogSummary, SyncError>
where
    C: PanelAppClient + ?Sized,
{
    store.ensure_data_root()?;
    check_api_version(client, config);

    info!("starting panel catalog extraction");
    let mut panels: Vec<PanelInfo> = Vec::new();
    let summary = drain_pages(client, &config.panels_url(), config.catalog_page_limit, |page, envelope| {
        let body = serde_json::to_vec_pretty(&envelope.raw)
            .map_err(|err| SyncError::ApiJson(err.to_string()))?;
        Store::write_bytes_atomic(&store.panel_list_page_path(page), &body)?;
        for result in &envelope.results {
            match parse_panel(result) {
                Some(panel) => panels.push(panel),
                None => warn!(page, "skipping catalog entry without usable id/version_created"),
            }
        }
        info!(page, total = envelope.count, "catalog page downloaded");
        Ok(())
    })?;

    write_panel_list(store, &panels)?;
    for panel in &panels {
        write_marker(&store.version_marker_path(panel.id), &panel.version_created)?;
    }

    info!(
        pages = summary.pages,
        panels = panels.len(),
        "panel catalog extraction completed"
    );
    Ok(CatalogSummary {
        pages: summary.pages,
        panels: panels.len(),
        truncated: summary.truncated,
    })
}

/// Advisory preflight against the swagger document. A mismatching or
/// unavailable version only logs a warning; the catalog fetch proceeds.
fn check_api_version<C>(client: &C, config: &Config)
where
    C: PanelAppClient + ?Sized,
{
    match client.fetch_api_version() {
        Ok(Some(version)) if version == config.api_version => {
            info!(version, "API version matches expected version");
        }
        Ok(Some(version)) => {
            warn!(
                found = version,
                expected = config.api_version,
                "API version mismatch, results may vary"
            );
        }
        Ok(None) => warn!("could not determine API version from swagger documentation"),
        Err(err) => warn!(error = %err, "failed to fetch swagger documentation"),
    }
}

pub fn parse_panel(value: &Value) -> Option<PanelInfo> {
    let id = value.get("id").and_then(Value::as_u64)?;
    let version_created: VersionStamp = value
        .get("version_created")
        .and_then(Value::as_str)?
        .parse()
        .ok()?;
    let stats = value.get("stats");
    let stat = |name: &str| {
        stats
            .and_then(|stats| stats.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    Some(PanelInfo {
        id: PanelId::new(id as u32),
        name: value
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        version: value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        version_created,
        number_of_genes: stat("number_of_genes"),
        number_of_strs: stat("number_of_strs"),
        number_of_regions: stat("number_of_regions"),
    })
}

pub fn write_panel_list(store: &Store, panels: &[PanelInfo]) -> Result<(), SyncError> {
    let mut table = String::from(PANEL_LIST_HEADER);
    table.push('\n');
    for panel in panels {
        table.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            panel.id,
            panel.name,
            panel.version,
            panel.version_created,
            panel.number_of_genes,
            panel.number_of_strs,
            panel.number_of_regions
        ));
    }
    Store::write_text_atomic(&store.panel_list_table_path(), &table)
}

/// Reads the flattened catalog back. Rows with a non-numeric id or an
/// unparsable `version_created` cannot drive staleness decisions and are
/// skipped with a warning.
pub fn read_panel_list(store: &Store) -> Result<Vec<PanelInfo>, SyncError> {
    let path = store.panel_list_table_path();
    if !path.as_std_path().exists() {
        return Err(SyncError::CatalogMissing(path.to_string()));
    }
    let content = Store::read_text(&path)?;
    let mut panels = Vec::new();
    for (line_number, line) in content.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let Ok(id) = fields[0].parse::<PanelId>() else {
            warn!(line = line_number + 1, value = fields[0], "invalid panel id in panel list");
            continue;
        };
        let Some(version_created) = fields
            .get(3)
            .and_then(|value| value.parse::<VersionStamp>().ok())
        else {
            warn!(line = line_number + 1, panel = %id, "unparsable version_created in panel list");
            continue;
        };
        let count = |index: usize| {
            fields
                .get(index)
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(0)
        };
        panels.push(PanelInfo {
            id,
            name: fields.get(1).unwrap_or(&"").to_string(),
            version: fields.get(2).unwrap_or(&"").to_string(),
            version_created,
            number_of_genes: count(4),
            number_of_strs: count(5),
            number_of_regions: count(6),
        });
    }
    info!(panels = panels.len(), "panel list loaded");
    Ok(panels)
}
