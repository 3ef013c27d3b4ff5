// ABOUTME: CLI entry point for db-backup-exporter
// ABOUTME: Parses commands and routes to the pipeline stages

use clap::{Parser, Subcommand};
use db_backup_exporter::config::Settings;
use db_backup_exporter::dump::{DumpArtifact, DumpFormat};
use db_backup_exporter::error::PipelineError;
use db_backup_exporter::pipeline::{self, ExportMode, PipelineOptions};
use db_backup_exporter::tools::{Tool, ToolLocator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "db-backup-exporter")]
#[command(about = "Back up a database and export its tables to CSV", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: dump, then optional restore and export
    Run {
        /// Restore the dump into the DEST_* database
        #[arg(long)]
        restore: bool,
        /// Export every table to CSV with the given strategy
        #[arg(long, value_enum)]
        export: Option<ExportMode>,
    },
    /// Dump the SOURCE_* database and stop
    Dump,
    /// Restore an existing dump artifact into the DEST_* database
    Restore {
        /// Path of the dump artifact to load
        #[arg(long)]
        artifact: PathBuf,
    },
    /// Export tables to CSV from an existing dump or a live endpoint
    Export {
        #[arg(long, value_enum)]
        strategy: ExportMode,
        /// Dump artifact to parse (archive strategy only)
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    // Default to INFO level if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = dispatch(Cli::parse()).await {
        tracing::error!("{:#}", e);
        let code = e
            .downcast_ref::<PipelineError>()
            .map(PipelineError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Run { restore, export } => {
            let options = PipelineOptions { restore, export };
            let report = pipeline::run(&settings, &options).await?;
            tracing::info!(
                "✓ pipeline complete: artifact {}, {} tables exported",
                report.artifact.path.display(),
                report.exports.iter().filter(|r| r.ok).count()
            );
            Ok(())
        }
        Commands::Dump => {
            let options = PipelineOptions::default();
            let report = pipeline::run(&settings, &options).await?;
            tracing::info!("✓ dump written to {}", report.artifact.path.display());
            Ok(())
        }
        Commands::Restore { artifact } => {
            let destination = settings.destination.as_ref().ok_or_else(|| {
                PipelineError::Configuration(
                    "restore needs a destination database; set the DEST_* variables".into(),
                )
            })?;
            let format = match artifact.extension().and_then(|e| e.to_str()) {
                Some("sql") => DumpFormat::PlainSql,
                _ => DumpFormat::CustomArchive,
            };
            let restore_tool = match settings.engine {
                db_backup_exporter::config::Engine::Postgres => Tool::PgRestore,
                db_backup_exporter::config::Engine::MySql => Tool::MysqlClient,
            };
            let tools = ToolLocator::resolve(&[restore_tool], &settings.tool_overrides)?;
            db_backup_exporter::restore::restore(
                &tools,
                settings.engine,
                &DumpArtifact {
                    path: artifact,
                    format,
                },
                destination,
                settings.tool_timeout,
            )
            .await
        }
        Commands::Export { strategy, artifact } => {
            pipeline::ensure_export_supported(settings.engine)?;
            match strategy {
                ExportMode::Archive => {
                    let artifact = artifact.ok_or_else(|| {
                        PipelineError::Configuration(
                            "--artifact is required for the archive strategy".into(),
                        )
                    })?;
                    let results = pipeline::export_artifact(&settings, artifact).await?;
                    summarize(&results)
                }
                ExportMode::Live => {
                    // Live export without a preceding dump reads the source
                    // directly; a scratch destination is not required here.
                    let tools = ToolLocator::resolve(&[Tool::Psql], &settings.tool_overrides)?;
                    let target = settings
                        .destination
                        .clone()
                        .unwrap_or_else(|| settings.source.clone());
                    let exporter = db_backup_exporter::export::LiveExport::new(
                        target,
                        tools.path(Tool::Psql)?.to_path_buf(),
                        settings.tool_timeout,
                    );
                    let out_dir = db_backup_exporter::export::csv_dir(
                        &settings.output_dir,
                        &settings.source.database,
                        chrono::Local::now().naive_local(),
                    );
                    let results = exporter.export_all(&out_dir).await?;
                    summarize(&results)
                }
            }
        }
    }
}

fn summarize(results: &[db_backup_exporter::export::CsvExportResult]) -> anyhow::Result<()> {
    let exported = results.iter().filter(|r| r.ok).count();
    if exported == results.len() {
        tracing::info!("✓ export complete: {}/{} tables", exported, results.len());
    } else {
        tracing::warn!(
            "export finished with failures: {}/{} tables",
            exported,
            results.len()
        );
    }
    if let Some(failed) = results.iter().find(|r| !r.ok) {
        return Err(PipelineError::ExportFailed {
            table: failed.table.to_string(),
            reason: format!("{} of {} tables failed", results.len() - exported, results.len()),
        }
        .into());
    }
    Ok(())
}
