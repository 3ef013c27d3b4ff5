// ABOUTME: Resolves the external client binaries a run depends on
// ABOUTME: Explicit configured paths win over PATH search; resolved once per run

use crate::error::PipelineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use which::which;

/// External client binaries the pipeline can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    PgDump,
    PgRestore,
    Psql,
    MysqlDump,
    MysqlClient,
}

impl Tool {
    pub const ALL: [Tool; 5] = [
        Tool::PgDump,
        Tool::PgRestore,
        Tool::Psql,
        Tool::MysqlDump,
        Tool::MysqlClient,
    ];

    pub fn binary_name(self) -> &'static str {
        match self {
            Tool::PgDump => "pg_dump",
            Tool::PgRestore => "pg_restore",
            Tool::Psql => "psql",
            Tool::MysqlDump => "mysqldump",
            Tool::MysqlClient => "mysql",
        }
    }

    /// Environment key for an explicit path override. Installations often
    /// carry several client versions, so the configured path has priority.
    pub fn override_key(self) -> &'static str {
        match self {
            Tool::PgDump => "PG_DUMP_PATH",
            Tool::PgRestore => "PG_RESTORE_PATH",
            Tool::Psql => "PSQL_PATH",
            Tool::MysqlDump => "MYSQLDUMP_PATH",
            Tool::MysqlClient => "MYSQL_PATH",
        }
    }
}

/// Absolute paths of every tool a run needs, resolved up front.
///
/// Resolution happens once, before any stage executes, so a missing binary
/// fails the run before a dump is started and all stages of one run use the
/// same binary versions.
#[derive(Debug)]
pub struct ToolLocator {
    paths: HashMap<Tool, PathBuf>,
}

impl ToolLocator {
    pub fn resolve(
        required: &[Tool],
        overrides: &HashMap<Tool, PathBuf>,
    ) -> Result<Self, PipelineError> {
        let mut paths = HashMap::new();
        for &tool in required {
            let path = match overrides.get(&tool) {
                Some(explicit) => {
                    if !explicit.is_file() {
                        return Err(PipelineError::ToolNotFound {
                            tool: tool.binary_name().to_string(),
                            reason: format!(
                                "configured path {} does not exist",
                                explicit.display()
                            ),
                        });
                    }
                    explicit.clone()
                }
                None => which(tool.binary_name()).map_err(|e| PipelineError::ToolNotFound {
                    tool: tool.binary_name().to_string(),
                    reason: e.to_string(),
                })?,
            };
            tracing::debug!("resolved {} -> {}", tool.binary_name(), path.display());
            paths.insert(tool, path);
        }
        Ok(ToolLocator { paths })
    }

    pub fn path(&self, tool: Tool) -> Result<&Path, PipelineError> {
        self.paths
            .get(&tool)
            .map(PathBuf::as_path)
            .ok_or_else(|| PipelineError::ToolNotFound {
                tool: tool.binary_name().to_string(),
                reason: "tool was not part of this run's resolution set".into(),
            })
    }
}
