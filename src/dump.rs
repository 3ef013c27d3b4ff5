// ABOUTME: Wrapper for pg_dump / mysqldump to snapshot a source database
// ABOUTME: Produces a dump artifact at a deterministic, date-stamped path

use crate::config::{ConnectionSpec, Engine};
use crate::error::PipelineError;
use crate::process::{run_tool, ToolOutput};
use crate::tools::{Tool, ToolLocator};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// On-disk dump format, decided by the engine that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Plain SQL text, restorable by feeding it to the engine's client.
    PlainSql,
    /// PostgreSQL custom archive with an internal catalog of entries.
    CustomArchive,
}

impl DumpFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DumpFormat::PlainSql => "sql",
            DumpFormat::CustomArchive => "backup",
        }
    }
}

/// A dump file on disk. Created once by the dump stage and never mutated;
/// consumed by the restore and export stages.
#[derive(Debug, Clone)]
pub struct DumpArtifact {
    pub path: PathBuf,
    pub format: DumpFormat,
}

/// Deterministic artifact path: `{dir}/{database}_{YYYYMMDD}.{ext}`.
///
/// Same database and same date always yield the same path, so an operator
/// can predict where today's dump lives.
pub fn artifact_path(
    output_dir: &Path,
    database: &str,
    format: DumpFormat,
    date: NaiveDate,
) -> PathBuf {
    output_dir.join(format!(
        "{}_{}.{}",
        database,
        date.format("%Y%m%d"),
        format.extension()
    ))
}

/// Argument vector for pg_dump. The password is never part of it; it travels
/// through `PGPASSWORD` where other processes on the host cannot read it.
pub fn pg_dump_args(
    source: &ConnectionSpec,
    output: &Path,
    exclude_schemas: &[String],
) -> Vec<String> {
    let mut args = vec![
        "--format=custom".to_string(),
        "--blobs".to_string(),
        "--no-password".to_string(),
        "--host".to_string(),
        source.host.clone(),
        "--port".to_string(),
        source.port.to_string(),
        "--username".to_string(),
        source.user.clone(),
    ];
    for schema in exclude_schemas {
        args.push("--exclude-schema".to_string());
        args.push(schema.clone());
    }
    args.push(format!("--file={}", output.display()));
    args.push(source.database.clone());
    args
}

/// Argument vector for mysqldump. `--single-transaction` keeps the snapshot
/// consistent; routines and events are part of a schema-complete dump. The
/// password travels through `MYSQL_PWD`, never an inline `-p` argument.
pub fn mysqldump_args(source: &ConnectionSpec) -> Vec<String> {
    vec![
        "--host".to_string(),
        source.host.clone(),
        "--port".to_string(),
        source.port.to_string(),
        "--user".to_string(),
        source.user.clone(),
        "--single-transaction".to_string(),
        "--routines".to_string(),
        "--events".to_string(),
        source.database.clone(),
    ]
}

/// Dump the source database into `output_dir`.
///
/// Non-zero exit fails the run with `DumpFailed` carrying the captured
/// stderr; nothing downstream runs on a failed dump.
pub async fn dump(
    tools: &ToolLocator,
    engine: Engine,
    source: &ConnectionSpec,
    output_dir: &Path,
    exclude_schemas: &[String],
    timeout: Option<Duration>,
) -> Result<DumpArtifact> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let today = chrono::Local::now().date_naive();
    match engine {
        Engine::Postgres => {
            let path = artifact_path(output_dir, &source.database, DumpFormat::CustomArchive, today);
            tracing::info!(
                "dumping database '{}' to {}",
                source.database,
                path.display()
            );

            let mut cmd = Command::new(tools.path(Tool::PgDump)?);
            cmd.args(pg_dump_args(source, &path, exclude_schemas))
                .env("PGPASSWORD", source.password.expose())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            let out = run_tool(cmd, "pg_dump", timeout).await?;
            check_dump_output(&out)?;

            tracing::info!("✓ dump complete: {}", path.display());
            Ok(DumpArtifact {
                path,
                format: DumpFormat::CustomArchive,
            })
        }
        Engine::MySql => {
            let path = artifact_path(output_dir, &source.database, DumpFormat::PlainSql, today);
            tracing::info!(
                "dumping database '{}' to {}",
                source.database,
                path.display()
            );

            let file = std::fs::File::create(&path)
                .with_context(|| format!("failed to create dump file {}", path.display()))?;

            let mut cmd = Command::new(tools.path(Tool::MysqlDump)?);
            cmd.args(mysqldump_args(source))
                .env("MYSQL_PWD", source.password.expose())
                .stdin(Stdio::null())
                .stdout(Stdio::from(file))
                .stderr(Stdio::piped());

            // A truncated dump at the deterministic path would pass for a
            // good one on a later restore; take it off disk on any failure,
            // including a timeout kill.
            let result = run_tool(cmd, "mysqldump", timeout).await;
            let failed = match &result {
                Ok(out) => !out.success(),
                Err(_) => true,
            };
            if failed {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("could not remove partial dump {}: {}", path.display(), e);
                }
            }
            check_dump_output(&result?)?;

            tracing::info!("✓ dump complete: {}", path.display());
            Ok(DumpArtifact {
                path,
                format: DumpFormat::PlainSql,
            })
        }
    }
}

fn check_dump_output(out: &ToolOutput) -> Result<()> {
    if out.success() {
        return Ok(());
    }
    Err(PipelineError::DumpFailed {
        status: out.status_text(),
        stderr: out.stderr.trim().to_string(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn spec() -> ConnectionSpec {
        ConnectionSpec {
            host: "db1".into(),
            port: 5432,
            user: "u".into(),
            password: Secret::new("hunter2".into()),
            database: "shop".into(),
        }
    }

    #[test]
    fn artifact_path_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 29).unwrap();
        let path = artifact_path(Path::new("/tmp"), "shop", DumpFormat::CustomArchive, date);
        assert_eq!(path, PathBuf::from("/tmp/shop_20260829.backup"));

        let path = artifact_path(Path::new("/tmp"), "shop", DumpFormat::PlainSql, date);
        assert_eq!(path, PathBuf::from("/tmp/shop_20260829.sql"));
    }

    #[test]
    fn pg_dump_args_never_contain_the_password() {
        let args = pg_dump_args(&spec(), Path::new("/tmp/shop.backup"), &[]);
        assert!(args.iter().all(|a| !a.contains("hunter2")));
        assert!(args.contains(&"--format=custom".to_string()));
        assert!(args.contains(&"--blobs".to_string()));
        assert!(args.contains(&"--no-password".to_string()));
        assert_eq!(args.last().unwrap(), "shop");
    }

    #[test]
    fn pg_dump_args_exclude_configured_schemas() {
        let excludes = vec!["_heroku".to_string()];
        let args = pg_dump_args(&spec(), Path::new("/tmp/shop.backup"), &excludes);
        let pos = args.iter().position(|a| a == "--exclude-schema").unwrap();
        assert_eq!(args[pos + 1], "_heroku");
    }

    #[test]
    fn mysqldump_args_never_contain_the_password() {
        let args = mysqldump_args(&spec());
        assert!(args.iter().all(|a| !a.contains("hunter2")));
        assert!(args.iter().all(|a| !a.starts_with("-p")));
        assert!(args.contains(&"--single-transaction".to_string()));
        assert!(args.contains(&"--routines".to_string()));
        assert!(args.contains(&"--events".to_string()));
    }
}
