// ABOUTME: Archive-parse export strategy: dump catalog to per-table CSV files
// ABOUTME: No live database connection; row data is decoded from the archive

use crate::archive::{Archive, TableData, TocEntry};
use crate::export::{csv_file_name, CsvExportResult, TableDescriptor};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Strategy A: read table contents straight out of a custom-format dump.
///
/// Fast and connection-free, but it trusts the archive's internal catalog:
/// data-bearing entries the reader does not classify as `TABLE DATA` would
/// otherwise vanish silently, so they are counted and reported as a warning.
pub struct ArchiveExport {
    pub artifact: PathBuf,
}

impl ArchiveExport {
    pub fn new(artifact: PathBuf) -> Self {
        ArchiveExport { artifact }
    }

    pub async fn export_all(&self, out_dir: &Path) -> Result<Vec<CsvExportResult>> {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export dir {}", out_dir.display()))?;

        let mut archive = Archive::load(&self.artifact)?;
        tracing::info!(
            "loaded dump archive {} ({} catalog entries)",
            self.artifact.display(),
            archive.entries.len()
        );

        let entries: Vec<TocEntry> = archive.entries.clone();
        let skipped = entries
            .iter()
            .filter(|e| e.had_dumper && !e.is_table_data())
            .count();
        if skipped > 0 {
            tracing::warn!(
                "{} data-bearing archive entries are not table data (e.g. large objects) \
                 and were not exported",
                skipped
            );
        }

        let mut results = Vec::new();
        for entry in entries.iter().filter(|e| e.is_table_data()) {
            let table = TableDescriptor {
                schema: entry.namespace.clone().unwrap_or_default(),
                name: entry.tag.clone().unwrap_or_default(),
            };
            let path = out_dir.join(csv_file_name(&table));

            match archive
                .table_data(entry)
                .and_then(|data| write_csv(&path, &data))
            {
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
}

fn write_csv(path: &Path, data: &TableData) -> Result<u64> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record(&data.columns)?;
    for row in &data.rows {
        writer.write_record(row.iter().map(|field| field.as_deref().unwrap_or("")))?;
    }
    writer.flush()?;
    Ok(data.rows.len() as u64)
}
