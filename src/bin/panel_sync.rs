use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use panel_sync::api::PanelAppHttpClient;
use panel_sync::catalog::fetch_catalog;
use panel_sync::config::{Config, ConfigLoader};
use panel_sync::domain::{EntityKind, LabelMode, PanelId};
use panel_sync::error::SyncError;
use panel_sync::genelist::{GenelistOptions, derive_genelists};
use panel_sync::genes::{GeneFetchOptions, download_genes};
use panel_sync::merge::merge_tables;
use panel_sync::output::JsonOutput;
use panel_sync::pipeline::{RunOptions, run_pipeline};
use panel_sync::store::Store;
use panel_sync::tabulate::{TabulateOptions, tabulate_all};

#[derive(Parser)]
#[command(name = "panel-sync")]
#[command(about = "Incremental synchronization of PanelApp Australia gene panel data")]
#[command(version, author)]
struct Cli {
    /// Root directory of the local data store.
    #[arg(long, global = true, default_value = "./data")]
    data_root: Utf8PathBuf,

    /// Path to a JSON configuration file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Fetch the panel catalog and refresh version markers")]
    Catalog,
    #[command(about = "Download raw gene pages for stale panels")]
    Genes(StageArgs),
    #[command(about = "Tabulate downloaded gene pages into per-panel tables")]
    Tabulate(StageArgs),
    #[command(about = "Merge per-panel tables into one cross-panel table")]
    Merge(MergeArgs),
    #[command(about = "Derive genelist files from the merged gene table")]
    Genelists(GenelistArgs),
    #[command(about = "Run the full sync pipeline")]
    Run(RunArgs),
}

#[derive(Args, Clone)]
struct StageArgs {
    /// Restrict the stage to one panel id.
    #[arg(long)]
    panel: Option<u32>,

    #[arg(long)]
    force: bool,
}

#[derive(Args, Clone)]
struct MergeArgs {
    #[arg(long, value_enum, default_value_t = EntityKind::Genes)]
    kind: EntityKind,
}

#[derive(Args, Clone)]
struct GenelistArgs {
    #[arg(long)]
    force: bool,

    /// Label format override; defaults to the configured mode.
    #[arg(long, value_enum)]
    mode: Option<LabelMode>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[arg(long)]
    force: bool,

    #[arg(long)]
    skip_genes: bool,

    #[arg(long)]
    skip_strs: bool,

    #[arg(long)]
    skip_regions: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(sync) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(sync));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        SyncError::CatalogMissing(_)
        | SyncError::ConfigRead(_)
        | SyncError::MergeMarkerMissing(_)
        | SyncError::InvalidPanelId(_) => 2,
        SyncError::ApiHttp(_) | SyncError::ApiStatus { .. } | SyncError::ApiJson(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new(cli.data_root.clone());

    match cli.command {
        Command::Catalog => {
            let client = PanelAppHttpClient::new(&config)?;
            let summary = fetch_catalog(&client, &store, &config)?;
            JsonOutput::print_catalog(&summary).into_diagnostic()
        }
        Command::Genes(args) => {
            let client = PanelAppHttpClient::new(&config)?;
            let options = GeneFetchOptions {
                force: args.force,
                panel: args.panel.map(PanelId::new),
            };
            let summary = download_genes(&client, &store, &config, &options)?;
            JsonOutput::print_genes(&summary).into_diagnostic()
        }
        Command::Tabulate(args) => {
            let options = TabulateOptions {
                force: args.force,
                panel: args.panel.map(PanelId::new),
            };
            let summary = tabulate_all(&store, &options)?;
            JsonOutput::print_tabulate(&summary).into_diagnostic()
        }
        Command::Merge(args) => {
            let report = merge_tables(&store, args.kind)?;
            JsonOutput::print_merge(&report).into_diagnostic()?;
            if report.succeeded() {
                Ok(())
            } else {
                Err(miette::Report::msg("merge validation failed"))
            }
        }
        Command::Genelists(args) => {
            let config = with_mode(config, args.mode);
            let options = GenelistOptions { force: args.force };
            let summary = derive_genelists(&store, &config, &options)?;
            JsonOutput::print_genelists(&summary).into_diagnostic()
        }
        Command::Run(args) => {
            let client = PanelAppHttpClient::new(&config)?;
            let options = RunOptions {
                force: args.force,
                skip_genes: args.skip_genes,
                skip_strs: args.skip_strs,
                skip_regions: args.skip_regions,
            };
            let report = run_pipeline(&client, &store, &config, &options)?;
            JsonOutput::print_run(&report).into_diagnostic()?;
            if report.succeeded {
                Ok(())
            } else {
                Err(miette::Report::msg("sync run finished with a failed stage"))
            }
        }
    }
}

fn with_mode(config: Config, mode: Option<LabelMode>) -> Config {
    match mode {
        Some(mode) => Config {
            label_mode: mode,
            ..config
        },
        None => config,
    }
}
