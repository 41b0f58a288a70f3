use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::read_panel_list;
use crate::domain::{GeneRecord, PanelId, VersionStamp};
use crate::error::SyncError;
use crate::store::Store;
use crate::sync::{read_marker, needs_regeneration, write_marker};

#[derive(Debug, Clone, Default)]
pub struct TabulateOptions {
    pub force: bool,
    pub panel: Option<PanelId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabulateSummary {
    pub processed: usize,
    pub fresh: usize,
    pub skipped: usize,
    pub count_mismatches: usize,
}

#[derive(Debug, Clone)]
pub struct PanelTabulation {
    pub panel: PanelId,
    pub rows: u64,
    /// Declared-vs-actual gene count check; `None` when the catalog does not
    /// know the panel.
    pub count_ok: Option<bool>,
}

/// Tabulates every panel directory with downloaded gene pages, gated per
/// panel on the extraction marker vs the processed marker.
pub fn tabulate_all(store: &Store, options: &TabulateOptions) -> Result<TabulateSummary, SyncError> {
    let declared_counts: HashMap<PanelId, u64> = match read_panel_list(store) {
        Ok(panels) => panels
            .into_iter()
            .map(|panel| (panel.id, panel.number_of_genes))
            .collect(),
        Err(err) => {
            warn!(error = %err, "catalog unavailable, skipping gene-count validation");
            HashMap::new()
        }
    };

    let mut summary = TabulateSummary {
        processed: 0,
        fresh: 0,
        skipped: 0,
        count_mismatches: 0,
    };

    for id in store.list_panel_dirs()? {
        if options.panel.is_some_and(|wanted| wanted != id) {
            continue;
        }
        if store.list_gene_pages(id)?.is_empty() {
            warn!(panel = %id, "no raw gene pages, skipping tabulation");
            summary.skipped += 1;
            continue;
        }

        let extraction = read_marker(&store.extraction_marker_path(id));
        let source_version = extraction
            .recorded()
            .cloned()
            .unwrap_or_else(VersionStamp::now);
        let processed = read_marker(&store.processed_marker_path(id));
        let Some(reason) = needs_regeneration(
            options.force,
            &store.panel_table_path(id),
            &processed,
            &source_version,
        ) else {
            debug!(panel = %id, "panel table is up to date");
            summary.fresh += 1;
            continue;
        };

        info!(panel = %id, reason = reason.describe(), "tabulating panel");
        let outcome = tabulate_panel(store, id, declared_counts.get(&id).copied())?;
        summary.processed += 1;
        if outcome.count_ok == Some(false) {
            summary.count_mismatches += 1;
        }
    }

    info!(
        processed = summary.processed,
        fresh = summary.fresh,
        skipped = summary.skipped,
        "tabulation completed"
    );
    Ok(summary)
}

/// Pure transform of one panel's raw JSON pages into `genes.tsv`. Writes the
/// processed marker regardless of the advisory count validation outcome.
pub fn tabulate_panel(
    store: &Store,
    id: PanelId,
    declared_genes: Option<u64>,
) -> Result<PanelTabulation, SyncError> {
    let mut table = GeneRecord::header();
    table.push('\n');
    let mut rows = 0u64;

    for (page, path) in store.list_gene_pages(id)? {
        let content = Store::read_text(&path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|err| SyncError::ApiJson(format!("{path}: {err}")))?;
        let results = value
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(panel = %id, page, genes = results.len(), "projecting gene page");
        for record in &results {
            table.push_str(&project_record(record).to_row());
            table.push('\n');
            rows += 1;
        }
    }

    Store::write_text_atomic(&store.panel_table_path(id), &table)?;

    let count_ok = declared_genes.map(|declared| declared == rows);
    match (declared_genes, count_ok) {
        (Some(declared), Some(true)) => {
            info!(panel = %id, rows, declared, "gene count validation PASS");
        }
        (Some(declared), Some(false)) => {
            warn!(panel = %id, rows, declared, "gene count validation FAIL");
        }
        _ => debug!(panel = %id, rows, "no declared gene count, validation skipped"),
    }

    write_marker(&store.processed_marker_path(id), &VersionStamp::now())?;
    Ok(PanelTabulation {
        panel: id,
        rows,
        count_ok,
    })
}

/// Projects one gene entity into the fixed column set. Absent fields become
/// empty strings; sparse and heterogeneous records are expected.
pub fn project_record(value: &Value) -> GeneRecord {
    let gene_data = value.get("gene_data");
    let symbol = gene_data
        .and_then(|data| data.get("gene_symbol"))
        .and_then(Value::as_str)
        .or_else(|| value.get("entity_name").and_then(Value::as_str))
        .unwrap_or("");
    GeneRecord {
        symbol: clean(symbol),
        ensembl_id: resolve_ensembl_id(gene_data),
        confidence_level: scalar_field(value, "confidence_level"),
        penetrance: scalar_field(value, "penetrance"),
        mode_of_pathogenicity: scalar_field(value, "mode_of_pathogenicity"),
        publications: list_field(value, "publications"),
        mode_of_inheritance: scalar_field(value, "mode_of_inheritance"),
        tags: list_field(value, "tags"),
    }
}

/// Resolves the cross-reference identifier from
/// `gene_data.ensembl_genes.<build>.<version>.ensembl_id`.
///
/// Build preference is GRch38 over GRch37 (then any remaining build in name
/// order); within a build the highest version key wins, compared numerically
/// when both keys are numbers. The source left this tie-break unspecified.
fn resolve_ensembl_id(gene_data: Option<&Value>) -> String {
    let Some(builds) = gene_data
        .and_then(|data| data.get("ensembl_genes"))
        .and_then(Value::as_object)
    else {
        return String::new();
    };

    let mut build_names: Vec<&String> = builds.keys().collect();
    build_names.sort_by_key(|name| match name.as_str() {
        "GRch38" => (0, name.as_str()),
        "GRch37" => (1, name.as_str()),
        other => (2, other),
    });

    for name in build_names {
        let Some(versions) = builds.get(name).and_then(Value::as_object) else {
            continue;
        };
        let mut version_keys: Vec<&String> = versions.keys().collect();
        version_keys.sort_by(|a, b| match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => a.cmp(b),
        });
        if let Some(id) = version_keys
            .last()
            .and_then(|key| versions.get(*key))
            .and_then(|entry| entry.get("ensembl_id"))
            .and_then(Value::as_str)
        {
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    String::new()
}

fn scalar_field(value: &Value, name: &str) -> String {
    match value.get(name) {
        Some(Value::String(text)) => clean(text),
        Some(Value::Number(number)) => number.to_string(),
        Some(Value::Bool(flag)) => flag.to_string(),
        _ => String::new(),
    }
}

fn list_field(value: &Value, name: &str) -> String {
    let Some(items) = value.get(name).and_then(Value::as_array) else {
        return String::new();
    };
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::String(text) => clean(text),
            Value::Number(number) => number.to_string(),
            other => other.to_string(),
        })
        .collect();
    parts.join(",")
}

/// Tabs and newlines inside field values would break the rectangular table.
fn clean(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ").trim().to_string()
}
