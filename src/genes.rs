use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::{PanelAppClient, drain_pages};
use crate::catalog::read_panel_list;
use crate::config::Config;
use crate::domain::{PanelId, PanelInfo, VersionStamp};
use crate::error::SyncError;
use crate::store::Store;
use crate::sync::{read_marker, needs_refetch, write_marker};

#[derive(Debug, Clone, Default)]
pub struct GeneFetchOptions {
    pub force: bool,
    /// Restrict the batch to one panel.
    pub panel: Option<PanelId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneFetchSummary {
    pub candidates: usize,
    pub fetched: usize,
    pub fresh: usize,
    pub failed: usize,
    pub failed_panels: Vec<PanelId>,
}

/// Downloads raw gene pages for every stale panel. One panel failing is
/// recorded and the batch continues; only a missing catalog is fatal.
pub fn download_genes<C>(
    client: &C,
    store: &Store,
    config: &Config,
    options: &GeneFetchOptions,
) -> Result<GeneFetchSummary, SyncError>
where
    C: PanelAppClient + ?Sized,
{
    let panels = read_panel_list(store)?;
    let candidates: Vec<&PanelInfo> = panels
        .iter()
        .filter(|panel| options.panel.is_none_or(|wanted| wanted == panel.id))
        .collect();
    if let Some(wanted) = options.panel {
        if candidates.is_empty() {
            return Err(SyncError::InvalidPanelId(format!(
                "panel {wanted} not present in the catalog"
            )));
        }
    }

    let mut summary = GeneFetchSummary {
        candidates: candidates.len(),
        fetched: 0,
        fresh: 0,
        failed: 0,
        failed_panels: Vec::new(),
    };

    for panel in candidates {
        let artifact = store.gene_json_dir(panel.id);
        let marker = read_marker(&store.version_marker_path(panel.id));
        let extraction = read_marker(&store.extraction_marker_path(panel.id));
        let Some(reason) = needs_refetch(
            options.force,
            &artifact,
            &marker,
            &extraction,
            &panel.version_created,
        ) else {
            debug!(panel = %panel.id, version = %panel.version_created, "panel is up to date");
            summary.fresh += 1;
            continue;
        };

        info!(panel = %panel.id, name = panel.name, reason = reason.describe(), "downloading genes");
        match download_panel_genes(client, store, config, panel) {
            Ok(pages) => {
                write_marker(&store.extraction_marker_path(panel.id), &VersionStamp::now())?;
                write_marker(&store.version_marker_path(panel.id), &panel.version_created)?;
                info!(panel = %panel.id, pages, "gene extraction completed");
                summary.fetched += 1;
            }
            Err(err) => {
                error!(panel = %panel.id, error = %err, "gene download failed");
                // A partial page set must not survive alongside still-valid
                // markers, or the next run would classify the panel fresh.
                if let Err(cleanup) = store.clear_gene_pages(panel.id) {
                    warn!(panel = %panel.id, error = %cleanup, "failed to clear partial gene pages");
                }
                summary.failed += 1;
                summary.failed_panels.push(panel.id);
            }
        }
    }

    info!(
        fetched = summary.fetched,
        fresh = summary.fresh,
        failed = summary.failed,
        "incremental gene extraction completed"
    );
    Ok(summary)
}

/// Clears any previously downloaded pages, then drains the per-panel gene
/// endpoint. Old pages must not survive a refetch: pagination-count drift
/// would otherwise mix old and new pages.
fn download_panel_genes<C>(
    client: &C,
    store: &Store,
    config: &Config,
    panel: &PanelInfo,
) -> Result<u32, SyncError>
where
    C: PanelAppClient + ?Sized,
{
    store.clear_gene_pages(panel.id)?;
    let summary = drain_pages(
        client,
        &config.panel_genes_url(panel.id),
        config.gene_page_limit,
        |page, envelope| {
            let body = serde_json::to_vec_pretty(&envelope.raw)
                .map_err(|err| SyncError::ApiJson(err.to_string()))?;
            Store::write_bytes_atomic(&store.gene_page_path(panel.id, page), &body)?;
            debug!(panel = %panel.id, page, genes = envelope.results.len(), "gene page downloaded");
            Ok(())
        },
    )?;
    Ok(summary.pages)
}
