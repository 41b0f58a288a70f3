use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::api::PanelAppClient;
use crate::catalog::fetch_catalog;
use crate::config::Config;
use crate::domain::EntityKind;
use crate::error::SyncError;
use crate::genelist::{GenelistOptions, derive_genelists};
use crate::genes::{GeneFetchOptions, download_genes};
use crate::merge::merge_tables;
use crate::store::Store;
use crate::tabulate::{TabulateOptions, tabulate_all};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub force: bool,
    pub skip_genes: bool,
    pub skip_strs: bool,
    pub skip_regions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    CompletedWithFailures,
    Failed,
    Skipped,
}

impl StageStatus {
    /// A usable stage produced output its dependents can consume.
    fn usable(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::CompletedWithFailures)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageOutcome>,
    pub succeeded: bool,
}

/// One entry of the ordered stage list. A stage with a `requires` dependency
/// only runs when that stage produced usable output; a skipped or failed
/// dependency cascades as `Skipped`.
struct Stage<'a> {
    name: &'static str,
    skip: bool,
    requires: Option<&'static str>,
    run: Box<dyn FnOnce() -> Result<(StageStatus, Option<Value>), SyncError> + 'a>,
}

/// Runs the full sync as an ordered stage list: catalog, gene download,
/// tabulation, genes merge, genelist derivation, then the merge no-ops for
/// strs and regions. A hard error in any stage aborts the run (the catalog
/// being the usual case); a failed merge is recorded and only its dependents
/// are skipped.
pub fn run_pipeline<C>(
    client: &C,
    store: &Store,
    config: &Config,
    options: &RunOptions,
) -> Result<RunReport, SyncError>
where
    C: PanelAppClient + ?Sized,
{
    let stages = stage_list(client, store, config, options);
    let mut outcomes: Vec<StageOutcome> = Vec::new();

    for stage in stages {
        if stage.skip {
            info!(stage = stage.name, "stage skipped by request");
            outcomes.push(StageOutcome {
                stage: stage.name.to_string(),
                status: StageStatus::Skipped,
                summary: None,
            });
            continue;
        }
        if let Some(dependency) = stage.requires {
            let satisfied = outcomes
                .iter()
                .any(|outcome| outcome.stage == dependency && outcome.status.usable());
            if !satisfied {
                warn!(stage = stage.name, dependency, "dependency unavailable, stage skipped");
                outcomes.push(StageOutcome {
                    stage: stage.name.to_string(),
                    status: StageStatus::Skipped,
                    summary: None,
                });
                continue;
            }
        }

        let (status, summary) = (stage.run)()?;
        outcomes.push(StageOutcome {
            stage: stage.name.to_string(),
            status,
            summary,
        });
    }

    let succeeded = outcomes
        .iter()
        .all(|outcome| outcome.status != StageStatus::Failed);
    if succeeded {
        info!("sync run completed");
    } else {
        warn!("sync run finished with a failed stage");
    }
    Ok(RunReport {
        stages: outcomes,
        succeeded,
    })
}

fn stage_list<'a, C>(
    client: &'a C,
    store: &'a Store,
    config: &'a Config,
    options: &'a RunOptions,
) -> Vec<Stage<'a>>
where
    C: PanelAppClient + ?Sized,
{
    vec![
        Stage {
            name: "catalog",
            skip: false,
            requires: None,
            run: Box::new(move || {
                let summary = fetch_catalog(client, store, config)?;
                Ok((StageStatus::Completed, to_summary(&summary)))
            }),
        },
        Stage {
            name: "genes",
            skip: options.skip_genes,
            requires: Some("catalog"),
            run: Box::new(move || {
                let summary = download_genes(
                    client,
                    store,
                    config,
                    &GeneFetchOptions {
                        force: options.force,
                        panel: None,
                    },
                )?;
                let status = if summary.failed > 0 {
                    warn!(failed = summary.failed, "some panels failed to download");
                    StageStatus::CompletedWithFailures
                } else {
                    StageStatus::Completed
                };
                Ok((status, to_summary(&summary)))
            }),
        },
        Stage {
            name: "tabulate",
            skip: false,
            requires: Some("genes"),
            run: Box::new(move || {
                let summary = tabulate_all(
                    store,
                    &TabulateOptions {
                        force: options.force,
                        panel: None,
                    },
                )?;
                let status = if summary.skipped > 0 {
                    StageStatus::CompletedWithFailures
                } else {
                    StageStatus::Completed
                };
                Ok((status, to_summary(&summary)))
            }),
        },
        Stage {
            name: "merge_genes",
            skip: false,
            requires: Some("tabulate"),
            run: Box::new(move || {
                let report = merge_tables(store, EntityKind::Genes)?;
                let status = if !report.succeeded() {
                    StageStatus::Failed
                } else if report.panels_skipped.is_empty() {
                    StageStatus::Completed
                } else {
                    StageStatus::CompletedWithFailures
                };
                Ok((status, to_summary(&report)))
            }),
        },
        Stage {
            name: "genelists",
            skip: false,
            requires: Some("merge_genes"),
            run: Box::new(move || {
                let summary = derive_genelists(
                    store,
                    config,
                    &GenelistOptions {
                        force: options.force,
                    },
                )?;
                Ok((StageStatus::Completed, to_summary(&summary)))
            }),
        },
        Stage {
            name: "merge_strs",
            skip: options.skip_strs,
            requires: None,
            run: Box::new(move || {
                let report = merge_tables(store, EntityKind::Strs)?;
                Ok((StageStatus::Completed, to_summary(&report)))
            }),
        },
        Stage {
            name: "merge_regions",
            skip: options.skip_regions,
            requires: None,
            run: Box::new(move || {
                let report = merge_tables(store, EntityKind::Regions)?;
                Ok((StageStatus::Completed, to_summary(&report)))
            }),
        },
    ]
}

fn to_summary<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use serde_json::json;

    use super::*;
    use crate::api::PageEnvelope;

    /// Serves a one-panel catalog and a one-gene panel endpoint.
    struct OnePanelClient;

    impl PanelAppClient for OnePanelClient {
        fn fetch_page(&self, url: &str) -> Result<PageEnvelope, SyncError> {
            if url.contains("/genes/") {
                Ok(PageEnvelope::from_value(json!({
                    "count": 1,
                    "next": null,
                    "results": [{
                        "entity_name": "BRCA1",
                        "confidence_level": "3",
                        "gene_data": {
                            "gene_symbol": "BRCA1",
                            "ensembl_genes": {
                                "GRch38": {"90": {"ensembl_id": "ENSG00000012048"}}
                            }
                        }
                    }],
                })))
            } else {
                Ok(PageEnvelope::from_value(json!({
                    "count": 1,
                    "next": null,
                    "results": [{
                        "id": 42,
                        "name": "Hereditary cancer",
                        "version": "1.0",
                        "version_created": "2024-01-01T00:00:00Z",
                        "stats": {"number_of_genes": 1},
                    }],
                })))
            }
        }

        fn fetch_api_version(&self) -> Result<Option<String>, SyncError> {
            Ok(Some("v1".to_string()))
        }
    }

    fn store_in(temp: &tempfile::TempDir) -> Store {
        Store::new(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap())
    }

    #[test]
    fn full_run_produces_every_stage() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let report =
            run_pipeline(&OnePanelClient, &store, &Config::default(), &RunOptions::default())
                .unwrap();
        assert!(report.succeeded);
        let names: Vec<&str> = report.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(
            names,
            vec!["catalog", "genes", "tabulate", "merge_genes", "genelists", "merge_strs", "merge_regions"]
        );
        assert!(report
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Completed));

        let green = Store::read_text(&store.genelists_dir().join("green_genes.tsv")).unwrap();
        assert_eq!(green, "ENSG00000012048\tPaus:42.Green\n");
    }

    #[test]
    fn skip_genes_cascades_through_the_gene_branch() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let options = RunOptions {
            skip_genes: true,
            ..RunOptions::default()
        };
        let report =
            run_pipeline(&OnePanelClient, &store, &Config::default(), &options).unwrap();
        assert!(report.succeeded);
        let skipped: Vec<&str> = report
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Skipped)
            .map(|s| s.stage.as_str())
            .collect();
        assert_eq!(skipped, vec!["genes", "tabulate", "merge_genes", "genelists"]);
        // The entity-kind merges do not depend on the gene branch.
        assert!(report
            .stages
            .iter()
            .any(|s| s.stage == "merge_strs" && s.status == StageStatus::Completed));
    }

    #[test]
    fn second_run_is_incremental() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let config = Config::default();
        run_pipeline(&OnePanelClient, &store, &config, &RunOptions::default()).unwrap();

        let report =
            run_pipeline(&OnePanelClient, &store, &config, &RunOptions::default()).unwrap();
        assert!(report.succeeded);
        let genes = report
            .stages
            .iter()
            .find(|s| s.stage == "genes")
            .and_then(|s| s.summary.as_ref())
            .unwrap();
        assert_eq!(genes["fetched"], 0);
        assert_eq!(genes["fresh"], 1);
    }

    #[test]
    fn catalog_failure_aborts_the_run() {
        struct BrokenClient;
        impl PanelAppClient for BrokenClient {
            fn fetch_page(&self, _url: &str) -> Result<PageEnvelope, SyncError> {
                Err(SyncError::ApiHttp("connection refused".to_string()))
            }
            fn fetch_api_version(&self) -> Result<Option<String>, SyncError> {
                Ok(None)
            }
        }
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        let err = run_pipeline(&BrokenClient, &store, &Config::default(), &RunOptions::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::ApiHttp(_)));
    }
}
