// ABOUTME: Per-table CSV export stage with two interchangeable strategies
// ABOUTME: Archive-parse (no live connection) and live-query (psql \copy)

pub mod archive;
pub mod live;

pub use archive::ArchiveExport;
pub use live::LiveExport;

use anyhow::Result;
use chrono::NaiveDateTime;
use std::fmt;
use std::path::{Path, PathBuf};

/// One exportable table, identified by its qualifying schema and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Outcome of exporting one table. Collected into the pipeline summary.
#[derive(Debug)]
pub struct CsvExportResult {
    pub table: TableDescriptor,
    pub path: PathBuf,
    pub rows: Option<u64>,
    pub ok: bool,
}

/// How table contents become CSV files. Selected explicitly by the caller;
/// both variants export every table to `{out_dir}/{schema}.{table}.csv`.
///
/// Per-table failures do not abort the remaining tables: each failing table
/// is recorded as a failed result and the export continues, so one broken
/// table does not cost the operator the rest of the export. The orchestrator
/// fails the run afterwards if any entry failed.
pub enum ExportStrategy {
    /// Parse the dump artifact's catalog; no database connection needed.
    Archive(ArchiveExport),
    /// Enumerate tables on a live endpoint and stream each through `\copy`.
    Live(LiveExport),
}

impl ExportStrategy {
    /// Export every table to one CSV file each under `out_dir`.
    ///
    /// The directory is created (with parents) before anything is written.
    /// Zero tables is success with zero results.
    pub async fn export_all(&self, out_dir: &Path) -> Result<Vec<CsvExportResult>> {
        match self {
            ExportStrategy::Archive(strategy) => strategy.export_all(out_dir).await,
            ExportStrategy::Live(strategy) => strategy.export_all(out_dir).await,
        }
    }
}

/// File name for one table's export: `{schema}.{table}.csv`.
pub fn csv_file_name(table: &TableDescriptor) -> String {
    format!("{}.{}.csv", table.schema, table.name)
}

/// Export directory for one run: `{output_dir}/{database}_{YYYYMMDD_HHMMSS}_csv`.
pub fn csv_dir(output_dir: &Path, database: &str, stamp: NaiveDateTime) -> PathBuf {
    output_dir.join(format!("{}_{}_csv", database, stamp.format("%Y%m%d_%H%M%S")))
}
