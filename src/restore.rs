// ABOUTME: Wrapper for pg_restore / mysql to load a dump into a destination
// ABOUTME: Clean-before-restore with if-exists, no-owner and no-privileges

use crate::config::{ConnectionSpec, Engine};
use crate::dump::{DumpArtifact, DumpFormat};
use crate::error::PipelineError;
use crate::process::run_tool;
use crate::tools::{Tool, ToolLocator};
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Argument vector for pg_restore.
///
/// Existing objects are dropped and recreated (`--clean`), with missing
/// objects tolerated during the drop phase (`--if-exists`). Source ownership
/// and privileges are suppressed: destination roles generally differ from the
/// source, and restoring grants verbatim would fail or hand out unintended
/// access.
pub fn pg_restore_args(artifact: &Path, destination: &ConnectionSpec) -> Vec<String> {
    vec![
        "--clean".to_string(),
        "--if-exists".to_string(),
        "--no-owner".to_string(),
        "--no-privileges".to_string(),
        "--verbose".to_string(),
        "--no-password".to_string(),
        "--host".to_string(),
        destination.host.clone(),
        "--port".to_string(),
        destination.port.to_string(),
        "--username".to_string(),
        destination.user.clone(),
        "--dbname".to_string(),
        destination.database.clone(),
        artifact.display().to_string(),
    ]
}

/// Argument vector for the mysql client; the dump text arrives on stdin and
/// the password through `MYSQL_PWD`.
pub fn mysql_restore_args(destination: &ConnectionSpec) -> Vec<String> {
    vec![
        "--host".to_string(),
        destination.host.clone(),
        "--port".to_string(),
        destination.port.to_string(),
        "--user".to_string(),
        destination.user.clone(),
        destination.database.clone(),
    ]
}

/// Load a dump artifact into the destination database.
///
/// Non-zero exit fails with `RestoreFailed` carrying both captured streams;
/// pg_restore reports row-level progress on stdout and errors on stderr, and
/// operators need both.
pub async fn restore(
    tools: &ToolLocator,
    engine: Engine,
    artifact: &DumpArtifact,
    destination: &ConnectionSpec,
    timeout: Option<Duration>,
) -> Result<()> {
    let out = match (engine, artifact.format) {
        (Engine::Postgres, DumpFormat::CustomArchive) => {
            tracing::info!(
                "restoring {} into database '{}'",
                artifact.path.display(),
                destination.database
            );
            let mut cmd = Command::new(tools.path(Tool::PgRestore)?);
            cmd.args(pg_restore_args(&artifact.path, destination))
                .env("PGPASSWORD", destination.password.expose())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            run_tool(cmd, "pg_restore", timeout).await?
        }
        (Engine::MySql, DumpFormat::PlainSql) => {
            tracing::info!(
                "restoring {} into database '{}'",
                artifact.path.display(),
                destination.database
            );
            let file = std::fs::File::open(&artifact.path).with_context(|| {
                format!("failed to open dump file {}", artifact.path.display())
            })?;
            let mut cmd = Command::new(tools.path(Tool::MysqlClient)?);
            cmd.args(mysql_restore_args(destination))
                .env("MYSQL_PWD", destination.password.expose())
                .stdin(Stdio::from(file))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            run_tool(cmd, "mysql", timeout).await?
        }
        (engine, format) => {
            return Err(PipelineError::Configuration(format!(
                "dump artifact format {:?} cannot be restored with the {:?} engine",
                format, engine
            ))
            .into());
        }
    };

    if !out.success() {
        let mut diagnostics = out.stderr.trim().to_string();
        if !out.stdout.trim().is_empty() {
            diagnostics = format!("{}\n{}", out.stdout.trim(), diagnostics);
        }
        return Err(PipelineError::RestoreFailed {
            status: out.status_text(),
            diagnostics,
        }
        .into());
    }

    tracing::info!("✓ restore complete: database '{}'", destination.database);
    Ok(())
}
