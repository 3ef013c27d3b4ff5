// ABOUTME: Orchestrates the Dump -> Restore -> TableExport sequence
// ABOUTME: Stops at the first failing stage; artifacts already written remain

use crate::config::{ConnectionSpec, Engine, Settings};
use crate::dump::{self, DumpArtifact};
use crate::error::PipelineError;
use crate::export::{csv_dir, ArchiveExport, CsvExportResult, ExportStrategy, LiveExport};
use crate::restore;
use crate::tools::{Tool, ToolLocator};
use anyhow::Result;

/// Which table-export strategy a run uses, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportMode {
    /// Parse the dump artifact directly; no database connection.
    Archive,
    /// Query a live endpoint and stream each table through psql.
    Live,
}

/// Stage selection for one run. Dump always happens; restore and export are
/// opted into.
#[derive(Debug, Default)]
pub struct PipelineOptions {
    pub restore: bool,
    pub export: Option<ExportMode>,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub artifact: DumpArtifact,
    pub exports: Vec<CsvExportResult>,
}

/// Run the pipeline: Dump, then optional Restore, then optional TableExport.
///
/// Tool resolution happens before any stage so a missing binary fails the run
/// without side effects. No compensating rollback on failure: backups are
/// additive artifacts, and partial output aids debugging.
pub async fn run(settings: &Settings, options: &PipelineOptions) -> Result<PipelineReport> {
    let tools = ToolLocator::resolve(
        &required_tools(settings.engine, options)?,
        &settings.tool_overrides,
    )?;

    let artifact = dump::dump(
        &tools,
        settings.engine,
        &settings.source,
        &settings.output_dir,
        &settings.exclude_schemas,
        settings.tool_timeout,
    )
    .await?;

    if options.restore {
        let destination = require_destination(settings)?;
        restore::restore(
            &tools,
            settings.engine,
            &artifact,
            destination,
            settings.tool_timeout,
        )
        .await?;
    }

    let exports = match options.export {
        None => Vec::new(),
        Some(mode) => {
            let strategy = build_strategy(settings, options, mode, &tools, &artifact)?;
            let out_dir = csv_dir(
                &settings.output_dir,
                &settings.source.database,
                chrono::Local::now().naive_local(),
            );
            let results = strategy.export_all(&out_dir).await?;

            let exported = results.iter().filter(|r| r.ok).count();
            if exported == results.len() {
                tracing::info!(
                    "✓ export complete: {}/{} tables in {}",
                    exported,
                    results.len(),
                    out_dir.display()
                );
            } else {
                tracing::warn!(
                    "export finished with failures: {}/{} tables in {}",
                    exported,
                    results.len(),
                    out_dir.display()
                );
            }

            if let Some(failed) = results.iter().find(|r| !r.ok) {
                return Err(PipelineError::ExportFailed {
                    table: failed.table.to_string(),
                    reason: format!(
                        "{} of {} tables failed; see log output above",
                        results.len() - exported,
                        results.len()
                    ),
                }
                .into());
            }
            results
        }
    };

    Ok(PipelineReport { artifact, exports })
}

/// Export-only entry point for a pre-existing dump artifact.
pub async fn export_artifact(
    settings: &Settings,
    artifact: std::path::PathBuf,
) -> Result<Vec<CsvExportResult>> {
    ensure_export_supported(settings.engine)?;
    let strategy = ExportStrategy::Archive(ArchiveExport::new(artifact));
    let out_dir = csv_dir(
        &settings.output_dir,
        &settings.source.database,
        chrono::Local::now().naive_local(),
    );
    strategy.export_all(&out_dir).await
}

/// CSV export works on Postgres only; both strategies assume its dump format
/// and catalog. Every export entry point checks this before doing anything.
pub fn ensure_export_supported(engine: Engine) -> Result<(), PipelineError> {
    if engine != Engine::Postgres {
        return Err(PipelineError::Configuration(
            "CSV export is only supported for the postgres engine".into(),
        ));
    }
    Ok(())
}

fn build_strategy(
    settings: &Settings,
    options: &PipelineOptions,
    mode: ExportMode,
    tools: &ToolLocator,
    artifact: &DumpArtifact,
) -> Result<ExportStrategy> {
    ensure_export_supported(settings.engine)?;
    Ok(match mode {
        ExportMode::Archive => ExportStrategy::Archive(ArchiveExport::new(artifact.path.clone())),
        ExportMode::Live => {
            // Export from the scratch copy when one was restored; otherwise
            // straight from the source.
            let target = if options.restore {
                require_destination(settings)?.clone()
            } else {
                settings.source.clone()
            };
            ExportStrategy::Live(LiveExport::new(
                target,
                tools.path(Tool::Psql)?.to_path_buf(),
                settings.tool_timeout,
            ))
        }
    })
}

fn require_destination(settings: &Settings) -> Result<&ConnectionSpec, PipelineError> {
    settings.destination.as_ref().ok_or_else(|| {
        PipelineError::Configuration(
            "this run needs a destination database; set the DEST_* variables".into(),
        )
    })
}

/// Tools the requested stages need, resolved up front.
fn required_tools(engine: Engine, options: &PipelineOptions) -> Result<Vec<Tool>> {
    let mut tools = Vec::new();
    match engine {
        Engine::Postgres => {
            tools.push(Tool::PgDump);
            if options.restore {
                tools.push(Tool::PgRestore);
            }
            if options.export == Some(ExportMode::Live) {
                tools.push(Tool::Psql);
            }
        }
        Engine::MySql => {
            tools.push(Tool::MysqlDump);
            if options.restore {
                tools.push(Tool::MysqlClient);
            }
            if options.export.is_some() {
                ensure_export_supported(engine)?;
            }
        }
    }
    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_run_resolves_the_tools_its_stages_need() {
        let dump_only = PipelineOptions::default();
        assert_eq!(
            required_tools(Engine::Postgres, &dump_only).unwrap(),
            vec![Tool::PgDump]
        );

        let full = PipelineOptions {
            restore: true,
            export: Some(ExportMode::Live),
        };
        assert_eq!(
            required_tools(Engine::Postgres, &full).unwrap(),
            vec![Tool::PgDump, Tool::PgRestore, Tool::Psql]
        );

        let archive_export = PipelineOptions {
            restore: false,
            export: Some(ExportMode::Archive),
        };
        // Archive parsing needs no extra binary.
        assert_eq!(
            required_tools(Engine::Postgres, &archive_export).unwrap(),
            vec![Tool::PgDump]
        );
    }

    #[test]
    fn export_guard_accepts_postgres_only() {
        assert!(ensure_export_supported(Engine::Postgres).is_ok());
        assert!(ensure_export_supported(Engine::MySql).is_err());
    }

    #[test]
    fn mysql_export_is_rejected() {
        let options = PipelineOptions {
            restore: false,
            export: Some(ExportMode::Archive),
        };
        assert!(required_tools(Engine::MySql, &options).is_err());
    }

    #[test]
    fn mysql_restore_needs_the_client() {
        let options = PipelineOptions {
            restore: true,
            export: None,
        };
        assert_eq!(
            required_tools(Engine::MySql, &options).unwrap(),
            vec![Tool::MysqlDump, Tool::MysqlClient]
        );
    }
}
