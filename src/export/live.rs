// ABOUTME: Live-query export strategy: catalog enumeration plus psql \copy
// ABOUTME: One connection lists the tables, then each table streams via psql

use crate::config::ConnectionSpec;
use crate::export::{csv_file_name, CsvExportResult, TableDescriptor};
use crate::process::run_tool;
use anyhow::{Context, Result};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_postgres::Client;

/// Strategy B: enumerate user tables on a live endpoint and export each one
/// with a server-side streaming copy.
///
/// Normally pointed at the just-restored destination so the source database
/// is never placed under export-time load. The enumeration connection is
/// closed before the exports run; each table gets its own short-lived psql
/// invocation.
pub struct LiveExport {
    pub target: ConnectionSpec,
    pub psql: PathBuf,
    pub timeout: Option<Duration>,
}

impl LiveExport {
    pub fn new(target: ConnectionSpec, psql: PathBuf, timeout: Option<Duration>) -> Self {
        LiveExport {
            target,
            psql,
            timeout,
        }
    }

    pub async fn export_all(&self, out_dir: &Path) -> Result<Vec<CsvExportResult>> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export dir {}", out_dir.display()))?;

        let tables = {
            let client = connect(&self.target).await?;
            list_tables(&client).await?
            // client drops here; the spawned connection task winds down with it
        };
        tracing::info!(
            "found {} user tables in database '{}'",
            tables.len(),
            self.target.database
        );

        let mut results = Vec::new();
        for table in tables {
            let path = out_dir.join(csv_file_name(&table));
            match self.copy_table(&table, &path).await {
                Ok(rows) => {
                    tracing::info!("exported {} ({} rows) to {}", table, rows, path.display());
                    results.push(CsvExportResult {
                        table,
                        path,
                        rows: Some(rows),
                        ok: true,
                    });
                }
                Err(e) => {
                    tracing::error!("export of {} failed: {:#}", table, e);
                    results.push(CsvExportResult {
                        table,
                        path,
                        rows: None,
                        ok: false,
                    });
                }
            }
        }

        Ok(results)
    }

    /// Export one table through `psql \copy ... TO 'file' (FORMAT csv, HEADER)`.
    async fn copy_table(&self, table: &TableDescriptor, path: &Path) -> Result<u64> {
        let meta = copy_meta_command(table, path);

        let mut cmd = Command::new(&self.psql);
        cmd.args(psql_args(&self.target))
            .arg("--command")
            .arg(&meta)
            .env("PGPASSWORD", self.target.password.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let out = run_tool(cmd, "psql", self.timeout).await?;
        if !out.success() {
            anyhow::bail!(
                "psql exited with {}: {}",
                out.status_text(),
                out.stderr.trim()
            );
        }
        Ok(parse_copy_count(&out.stdout))
    }
}

/// Connection arguments for psql; the password travels via `PGPASSWORD`.
pub fn psql_args(target: &ConnectionSpec) -> Vec<String> {
    vec![
        "--no-password".to_string(),
        "--quiet".to_string(),
        "--variable".to_string(),
        "ON_ERROR_STOP=1".to_string(),
        "--host".to_string(),
        target.host.clone(),
        "--port".to_string(),
        target.port.to_string(),
        "--username".to_string(),
        target.user.clone(),
        "--dbname".to_string(),
        target.database.clone(),
    ]
}

/// The `\copy` meta-command for one table. Identifiers are double-quoted and
/// the output path single-quoted, with embedded quotes doubled.
pub fn copy_meta_command(table: &TableDescriptor, path: &Path) -> String {
    format!(
        "\\copy (SELECT * FROM {}.{}) TO '{}' WITH (FORMAT csv, HEADER)",
        quote_ident(&table.schema),
        quote_ident(&table.name),
        path.display().to_string().replace('\'', "''")
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// psql reports `COPY <n>` for a completed copy; absent or unparsable output
/// counts as zero rather than failing a successful export.
pub fn parse_copy_count(stdout: &str) -> u64 {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("COPY "))
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

/// Open a TLS-capable connection to enumerate the catalog.
pub async fn connect(spec: &ConnectionSpec) -> Result<Client> {
    let tls = TlsConnector::builder()
        .build()
        .context("failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls);

    let mut config = tokio_postgres::Config::new();
    config
        .host(&spec.host)
        .port(spec.port)
        .user(&spec.user)
        .password(spec.password.expose())
        .dbname(&spec.database)
        .connect_timeout(Duration::from_secs(30));

    let (client, connection) = config.connect(tls).await.with_context(|| {
        format!(
            "failed to connect to {}:{}/{}",
            spec.host, spec.port, spec.database
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("connection task ended: {}", e);
        }
    });

    Ok(client)
}

/// List user tables, excluding the system schemas.
pub async fn list_tables(client: &Client) -> Result<Vec<TableDescriptor>> {
    let rows = client
        .query(
            "SELECT schemaname, tablename
             FROM pg_catalog.pg_tables
             WHERE schemaname NOT IN ('pg_catalog', 'information_schema')
             ORDER BY schemaname, tablename",
            &[],
        )
        .await
        .context("failed to list tables")?;

    Ok(rows
        .iter()
        .map(|row| TableDescriptor {
            schema: row.get(0),
            name: row.get(1),
        })
        .collect())
}
