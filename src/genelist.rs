use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{ConfidenceTier, EntityKind, LabelMode, PanelId, VersionStamp};
use crate::error::SyncError;
use crate::store::Store;
use crate::sync::{read_marker, needs_regeneration, write_marker};

/// Curated cancer/somatic panel subset used by the somatic genelists.
pub const SOMATIC_PANEL_IDS: [u32; 6] = [155, 158, 243, 259, 522, 1149];

/// Tag keywords selecting somatic rows; case-sensitive substring match
/// against the comma-joined tag column.
pub const SOMATIC_TAG_KEYWORDS: [&str; 3] = ["cancer", "somatic", "haemonc"];

#[derive(Debug, Clone, Default)]
pub struct GenelistOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenelistSummary {
    pub regenerated: bool,
    pub green_entries: usize,
    pub amber_entries: usize,
    pub combined_ids: usize,
    pub somatic_green_entries: usize,
    pub somatic_amber_entries: usize,
    pub somatic_combined_ids: usize,
}

/// One merged-table row reduced to the fields genelist derivation needs.
#[derive(Debug, Clone)]
struct MergedRow {
    panel: PanelId,
    ensembl_id: String,
    confidence_level: String,
    tags: String,
}

pub fn format_label(mode: LabelMode, namespace: &str, panel: PanelId, tier: ConfidenceTier) -> String {
    match mode {
        LabelMode::Namespaced => format!("{namespace}:{panel}.{}", tier.name()),
        LabelMode::Numeric => format!("{panel}_{}", tier.level()),
    }
}

/// Derives the six genelist files from the merged gene table, gated on the
/// merge marker vs the genelist marker. Missing-tier files are written empty
/// so downstream existence checks stay simple.
pub fn derive_genelists(
    store: &Store,
    config: &Config,
    options: &GenelistOptions,
) -> Result<GenelistSummary, SyncError> {
    let merge_marker = read_marker(&store.merge_marker_path(EntityKind::Genes));
    let Some(merge_stamp) = merge_marker.recorded().cloned() else {
        return Err(SyncError::MergeMarkerMissing(
            store.merge_marker_path(EntityKind::Genes).to_string(),
        ));
    };

    let genelist_marker = read_marker(&store.genelist_marker_path());
    // The marker lives inside genelists/, so the directory itself is a
    // useless artifact probe; gate on a derived file instead.
    let union_file = store.genelists_dir().join("all_gene_ids.txt");
    let Some(reason) =
        needs_regeneration(options.force, &union_file, &genelist_marker, &merge_stamp)
    else {
        info!("genelists are up to date");
        return Ok(GenelistSummary {
            regenerated: false,
            green_entries: 0,
            amber_entries: 0,
            combined_ids: 0,
            somatic_green_entries: 0,
            somatic_amber_entries: 0,
            somatic_combined_ids: 0,
        });
    };
    info!(reason = reason.describe(), "deriving genelists");

    let rows = read_merged_rows(store)?;
    let somatic_rows = somatic_subset(&rows);

    let dir = store.genelists_dir();
    let all = derive_scope(&rows, config, &dir, "")?;
    let somatic = derive_scope(&somatic_rows, config, &dir, "somatic_")?;

    write_marker(&store.genelist_marker_path(), &VersionStamp::now())?;
    info!(
        green = all.0,
        amber = all.1,
        combined = all.2,
        somatic_green = somatic.0,
        somatic_amber = somatic.1,
        somatic_combined = somatic.2,
        "genelist derivation completed"
    );
    Ok(GenelistSummary {
        regenerated: true,
        green_entries: all.0,
        amber_entries: all.1,
        combined_ids: all.2,
        somatic_green_entries: somatic.0,
        somatic_amber_entries: somatic.1,
        somatic_combined_ids: somatic.2,
    })
}

/// Writes the tier files and the combined id file for one row subset.
/// Returns (green, amber, combined) entry counts.
fn derive_scope(
    rows: &[MergedRow],
    config: &Config,
    dir: &camino::Utf8Path,
    prefix: &str,
) -> Result<(usize, usize, usize), SyncError> {
    let mut combined: BTreeSet<String> = BTreeSet::new();
    let mut counts = [0usize; 2];

    for (index, tier) in [ConfidenceTier::Green, ConfidenceTier::Amber].iter().enumerate() {
        let mut entries: BTreeSet<(String, String)> = BTreeSet::new();
        for row in rows {
            if row.ensembl_id.is_empty() || !tier.matches_level(&row.confidence_level) {
                continue;
            }
            let label = format_label(config.label_mode, &config.genelist_namespace, row.panel, *tier);
            combined.insert(row.ensembl_id.clone());
            entries.insert((row.ensembl_id.clone(), label));
        }
        counts[index] = entries.len();

        let mut content = String::new();
        for (id, label) in &entries {
            content.push_str(id);
            content.push('\t');
            content.push_str(label);
            content.push('\n');
        }
        let name = format!("{prefix}{}_genes.tsv", tier.name().to_lowercase());
        Store::write_text_atomic(&dir.join(name), &content)?;
    }

    let mut ids = String::new();
    for id in &combined {
        ids.push_str(id);
        ids.push('\n');
    }
    let union_name = if prefix.is_empty() {
        "all_gene_ids.txt".to_string()
    } else {
        format!("{prefix}gene_ids.txt")
    };
    Store::write_text_atomic(&dir.join(union_name), &ids)?;

    Ok((counts[0], counts[1], combined.len()))
}

/// Somatic restriction: rows from allow-listed panels and rows with a
/// matching tag keyword, unioned by identifier, then re-selected as full
/// rows so every panel occurrence of a selected gene contributes.
fn somatic_subset(rows: &[MergedRow]) -> Vec<MergedRow> {
    let mut selected_ids: BTreeSet<&str> = BTreeSet::new();
    for row in rows {
        if row.ensembl_id.is_empty() {
            continue;
        }
        let allow_listed = SOMATIC_PANEL_IDS.contains(&row.panel.value());
        let tag_matched = SOMATIC_TAG_KEYWORDS
            .iter()
            .any(|keyword| row.tags.contains(keyword));
        if allow_listed || tag_matched {
            selected_ids.insert(&row.ensembl_id);
        }
    }
    rows.iter()
        .filter(|row| selected_ids.contains(row.ensembl_id.as_str()))
        .cloned()
        .collect()
}

fn read_merged_rows(store: &Store) -> Result<Vec<MergedRow>, SyncError> {
    let path = store.merged_table_path(EntityKind::Genes);
    if !path.as_std_path().exists() {
        return Err(SyncError::PanelTableMissing(path.to_string()));
    }
    let content = Store::read_text(&path)?;
    let mut lines = content.lines();
    let header = lines.next().unwrap_or("");
    let columns: Vec<&str> = header.split('\t').collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|value| *value == name)
            .ok_or_else(|| {
                SyncError::MergeValidation(format!("merged table missing column `{name}`"))
            })
    };
    let panel_index = column("panel_id")?;
    let id_index = column("ensembl_id")?;
    let level_index = column("confidence_level")?;
    let tags_index = column("tags")?;

    let mut rows = Vec::new();
    for (line_number, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let Some(panel) = fields
            .get(panel_index)
            .and_then(|value| value.parse::<PanelId>().ok())
        else {
            warn!(line = line_number + 2, "unparsable panel id in merged table");
            continue;
        };
        rows.push(MergedRow {
            panel,
            ensembl_id: fields.get(id_index).unwrap_or(&"").to_string(),
            confidence_level: fields.get(level_index).unwrap_or(&"").to_string(),
            tags: fields.get(tags_index).unwrap_or(&"").to_string(),
        });
    }
    debug!(rows = rows.len(), "merged table loaded");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::GENE_COLUMNS;
    use crate::sync::MarkerState;

    fn store_in(temp: &tempfile::TempDir) -> Store {
        Store::new(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap())
    }

    fn write_merged(store: &Store, rows: &[(u32, &str, &str, &str)]) {
        let mut content = format!("panel_id\t{}\n", GENE_COLUMNS.join("\t"));
        for (panel, ensembl, level, tags) in rows {
            content.push_str(&format!(
                "{panel}\tSYM\t{ensembl}\t{level}\t\t\t\tBIALLELIC\t{tags}\n"
            ));
        }
        Store::write_text_atomic(&store.merged_table_path(EntityKind::Genes), &content).unwrap();
        write_marker(
            &store.merge_marker_path(EntityKind::Genes),
            &VersionStamp::now(),
        )
        .unwrap();
    }

    #[test]
    fn label_formats() {
        let panel = PanelId::new(137);
        assert_eq!(
            format_label(LabelMode::Namespaced, "Paus", panel, ConfidenceTier::Green),
            "Paus:137.Green"
        );
        assert_eq!(
            format_label(LabelMode::Numeric, "Paus", PanelId::new(4375), ConfidenceTier::Green),
            "4375_3"
        );
        assert_eq!(
            format_label(LabelMode::Numeric, "Paus", panel, ConfidenceTier::Amber),
            "137_2"
        );
    }

    #[test]
    fn green_row_lands_in_green_file_with_namespaced_label() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(&store, &[(42, "ENSG00000001", "3", "")]);

        derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        let green = Store::read_text(&store.genelists_dir().join("green_genes.tsv")).unwrap();
        assert_eq!(green, "ENSG00000001\tPaus:42.Green\n");
    }

    #[test]
    fn rows_sorted_by_id_then_label_and_union_deduplicated() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(
            &store,
            &[
                (20, "ENSG_B", "3", ""),
                (5, "ENSG_B", "3", ""),
                (5, "ENSG_A", "3", ""),
                (5, "ENSG_A", "2", ""),
            ],
        );

        let summary =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert_eq!(summary.green_entries, 3);
        assert_eq!(summary.amber_entries, 1);
        assert_eq!(summary.combined_ids, 2);

        let green = Store::read_text(&store.genelists_dir().join("green_genes.tsv")).unwrap();
        let lines: Vec<&str> = green.lines().collect();
        assert_eq!(
            lines,
            vec![
                "ENSG_A\tPaus:5.Green",
                "ENSG_B\tPaus:20.Green",
                "ENSG_B\tPaus:5.Green",
            ]
        );

        let ids = Store::read_text(&store.genelists_dir().join("all_gene_ids.txt")).unwrap();
        assert_eq!(ids, "ENSG_A\nENSG_B\n");
    }

    #[test]
    fn empty_identifier_rows_never_reach_genelists() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(&store, &[(1, "", "3", "cancer"), (1, "ENSG_X", "2", "")]);

        let summary =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert_eq!(summary.green_entries, 0);
        assert_eq!(summary.amber_entries, 1);
        assert_eq!(summary.combined_ids, 1);

        // Zero-match tier files still exist, empty.
        let green = Store::read_text(&store.genelists_dir().join("green_genes.tsv")).unwrap();
        assert_eq!(green, "");
    }

    #[test]
    fn somatic_scope_unions_allow_list_and_tag_match() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(
            &store,
            &[
                // Allow-listed panel.
                (155, "ENSG_ALLOW", "3", ""),
                // Tag keyword match outside the allow-list.
                (9, "ENSG_TAG", "3", "adult,cancer-predisposition"),
                // Unselected row.
                (9, "ENSG_OTHER", "3", "paediatric"),
                // Selected id re-selects its occurrence in another panel too.
                (9, "ENSG_ALLOW", "2", ""),
            ],
        );

        let summary =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert_eq!(summary.somatic_combined_ids, 2);
        assert_eq!(summary.somatic_green_entries, 2);
        assert_eq!(summary.somatic_amber_entries, 1);

        let ids = Store::read_text(&store.genelists_dir().join("somatic_gene_ids.txt")).unwrap();
        assert_eq!(ids, "ENSG_ALLOW\nENSG_TAG\n");
    }

    #[test]
    fn derivation_is_staleness_gated_on_merge_marker() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(&store, &[(1, "ENSG_X", "3", "")]);

        let first =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert!(first.regenerated);

        let second =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert!(!second.regenerated);

        // A newer merge marker reopens the gate.
        write_marker(
            &store.merge_marker_path(EntityKind::Genes),
            &VersionStamp::now(),
        )
        .unwrap();
        assert!(matches!(
            read_marker(&store.genelist_marker_path()),
            MarkerState::Recorded(_)
        ));
        let third = derive_genelists(
            &store,
            &Config::default(),
            &GenelistOptions { force: false },
        )
        .unwrap();
        assert!(third.regenerated);
    }

    #[test]
    fn deleting_derived_files_reopens_the_gate() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(&store, &[(1, "ENSG_X", "3", "")]);

        derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        for name in [
            "green_genes.tsv",
            "amber_genes.tsv",
            "all_gene_ids.txt",
            "somatic_green_genes.tsv",
            "somatic_amber_genes.tsv",
            "somatic_gene_ids.txt",
        ] {
            std::fs::remove_file(store.genelists_dir().join(name).as_std_path()).unwrap();
        }

        // The marker alone survives; the missing output must trigger a rerun.
        let again =
            derive_genelists(&store, &Config::default(), &GenelistOptions::default()).unwrap();
        assert!(again.regenerated);
        let ids = Store::read_text(&store.genelists_dir().join("all_gene_ids.txt")).unwrap();
        assert_eq!(ids, "ENSG_X\n");
    }

    #[test]
    fn missing_merge_marker_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let err = derive_genelists(&store, &Config::default(), &GenelistOptions::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::MergeMarkerMissing(_)));
    }

    #[test]
    fn numeric_label_mode_is_selectable() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        write_merged(&store, &[(4375, "ENSG_Y", "3", "")]);

        let config = Config {
            label_mode: LabelMode::Numeric,
            ..Config::default()
        };
        derive_genelists(&store, &config, &GenelistOptions::default()).unwrap();
        let green = Store::read_text(&store.genelists_dir().join("green_genes.tsv")).unwrap();
        assert_eq!(green, "ENSG_Y\t4375_3\n");
    }
}
