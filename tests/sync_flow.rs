use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::json;

use panel_sync::api::{PageEnvelope, PanelAppClient};
use panel_sync::config::Config;
use panel_sync::domain::{EntityKind, PanelId};
use panel_sync::error::SyncError;
use panel_sync::genes::{GeneFetchOptions, download_genes};
use panel_sync::pipeline::{RunOptions, run_pipeline};
use panel_sync::store::Store;

/// Serves a fixed two-panel catalog whose `version_created` stamps can be
/// bumped mid-test, and counts gene-endpoint hits per panel.
struct FakePanelApp {
    versions: Mutex<Vec<(u32, String)>>,
    gene_calls: Mutex<usize>,
}

impl FakePanelApp {
    fn new(versions: &[(u32, &str)]) -> Self {
        FakePanelApp {
            versions: Mutex::new(
                versions
                    .iter()
                    .map(|(id, stamp)| (*id, stamp.to_string()))
                    .collect(),
            ),
            gene_calls: Mutex::new(0),
        }
    }

    fn bump(&self, id: u32, stamp: &str) {
        let mut versions = self.versions.lock().unwrap();
        for entry in versions.iter_mut() {
            if entry.0 == id {
                entry.1 = stamp.to_string();
            }
        }
    }

    fn gene_calls(&self) -> usize {
        *self.gene_calls.lock().unwrap()
    }
}

impl PanelAppClient for FakePanelApp {
    fn fetch_page(&self, url: &str) -> Result<PageEnvelope, SyncError> {
        if url.contains("/genes/") {
            *self.gene_calls.lock().unwrap() += 1;
            return Ok(PageEnvelope::from_value(json!({
                "count": 1,
                "next": null,
                "results": [{
                    "entity_name": "TP53",
                    "confidence_level": "3",
                    "tags": ["somatic"],
                    "gene_data": {
                        "gene_symbol": "TP53",
                        "ensembl_genes": {
                            "GRch38": {"90": {"ensembl_id": "ENSG00000141510"}}
                        }
                    }
                }],
            })));
        }

        let versions = self.versions.lock().unwrap();
        let results: Vec<_> = versions
            .iter()
            .map(|(id, stamp)| {
                json!({
                    "id": id,
                    "name": format!("Panel {id}"),
                    "version": "1.0",
                    "version_created": stamp,
                    "stats": {"number_of_genes": 1},
                })
            })
            .collect();
        Ok(PageEnvelope::from_value(json!({
            "count": results.len(),
            "next": null,
            "results": results,
        })))
    }

    fn fetch_api_version(&self) -> Result<Option<String>, SyncError> {
        Ok(Some("v1".to_string()))
    }
}

fn store_in(temp: &tempfile::TempDir) -> Store {
    Store::new(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap())
}

#[test]
fn full_pipeline_lays_out_the_expected_tree() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let client = FakePanelApp::new(&[(42, "2024-01-01T00:00:00Z")]);

    let report =
        run_pipeline(&client, &store, &Config::default(), &RunOptions::default()).unwrap();
    assert!(report.succeeded);

    let id = PanelId::new(42);
    for path in [
        store.panel_list_page_path(1),
        store.panel_list_table_path(),
        store.version_marker_path(id),
        store.extraction_marker_path(id),
        store.gene_page_path(id, 1),
        store.panel_table_path(id),
        store.processed_marker_path(id),
        store.merged_table_path(EntityKind::Genes),
        store.merge_marker_path(EntityKind::Genes),
        store.merge_log_path(EntityKind::Genes),
        store.genelist_marker_path(),
        store.genelists_dir().join("green_genes.tsv"),
        store.genelists_dir().join("amber_genes.tsv"),
        store.genelists_dir().join("all_gene_ids.txt"),
        store.genelists_dir().join("somatic_green_genes.tsv"),
        store.genelists_dir().join("somatic_amber_genes.tsv"),
        store.genelists_dir().join("somatic_gene_ids.txt"),
    ] {
        assert!(path.as_std_path().exists(), "missing {path}");
    }

    let merged = Store::read_text(&store.merged_table_path(EntityKind::Genes)).unwrap();
    let mut lines = merged.lines();
    assert!(lines.next().unwrap().starts_with("panel_id\tsymbol\t"));
    assert!(lines.next().unwrap().starts_with("42\tTP53\tENSG00000141510\t3\t"));

    // The somatic tag on the gene row selects it for the somatic scope too.
    let somatic = Store::read_text(&store.genelists_dir().join("somatic_gene_ids.txt")).unwrap();
    assert_eq!(somatic, "ENSG00000141510\n");
}

#[test]
fn unchanged_catalog_skips_gene_downloads_on_the_second_run() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let client = FakePanelApp::new(&[(1, "2024-01-01T00:00:00Z"), (2, "2024-01-01T00:00:00Z")]);
    let config = Config::default();

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();
    let after_first = client.gene_calls();
    assert_eq!(after_first, 2);

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();
    assert_eq!(client.gene_calls(), after_first);
}

#[test]
fn version_bump_refetches_only_the_changed_panel() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let client = FakePanelApp::new(&[(1, "2024-01-01T00:00:00Z"), (2, "2024-01-01T00:00:00Z")]);
    let config = Config::default();

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();

    // A panel update stamps version_created after the extraction marker.
    let bumped = (chrono::Utc::now() + chrono::Duration::days(1))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    client.bump(2, &bumped);

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();
    assert_eq!(client.gene_calls(), 3);

    let marker = Store::read_text(&store.version_marker_path(PanelId::new(2))).unwrap();
    assert_eq!(marker.trim(), bumped);
}

#[test]
fn force_refetches_fresh_panels() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let client = FakePanelApp::new(&[(1, "2024-01-01T00:00:00Z")]);
    let config = Config::default();

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();
    assert_eq!(client.gene_calls(), 1);

    let options = GeneFetchOptions {
        force: true,
        panel: None,
    };
    let summary = download_genes(&client, &store, &config, &options).unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(client.gene_calls(), 2);
}

#[test]
fn deleting_an_artifact_triggers_a_refetch() {
    let temp = tempfile::tempdir().unwrap();
    let store = store_in(&temp);
    let client = FakePanelApp::new(&[(1, "2024-01-01T00:00:00Z")]);
    let config = Config::default();

    run_pipeline(&client, &store, &config, &RunOptions::default()).unwrap();
    std::fs::remove_dir_all(store.gene_json_dir(PanelId::new(1)).as_std_path()).unwrap();

    let summary =
        download_genes(&client, &store, &config, &GeneFetchOptions::default()).unwrap();
    assert_eq!(summary.fetched, 1);
}
