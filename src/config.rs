// ABOUTME: Run configuration built once from an environment snapshot
// ABOUTME: Connection specs, engine selection, tool overrides, output paths

use crate::error::PipelineError;
use crate::tools::Tool;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Database family a pipeline run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Postgres,
    MySql,
}

impl Engine {
    fn parse(value: &str) -> Result<Self, PipelineError> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Engine::Postgres),
            "mysql" | "mariadb" => Ok(Engine::MySql),
            other => Err(PipelineError::Configuration(format!(
                "DB_ENGINE must be 'postgres' or 'mysql', got '{}'",
                other
            ))),
        }
    }
}

/// A password that never appears in `Debug` or log output.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: String) -> Self {
        Secret(value)
    }

    /// The raw value, for handing to a subprocess environment or a driver.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[redacted]")
    }
}

/// Validated connection parameters for one database endpoint.
///
/// Constructed once from configuration and immutable afterwards. A missing
/// value is an error, never an empty default: a silently empty host or
/// database name would point the dump/restore tool at the wrong database.
#[derive(Debug, Clone)]
pub struct ConnectionSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
}

impl ConnectionSpec {
    /// Resolve a spec from `{prefix}_HOST`, `_PORT`, `_USER`, `_PASSWORD`,
    /// `_DB` entries of an environment snapshot.
    pub fn from_vars(
        vars: &HashMap<String, String>,
        prefix: &str,
    ) -> Result<Self, PipelineError> {
        let host = required(vars, prefix, "HOST")?;
        let port_raw = required(vars, prefix, "PORT")?;
        let user = required(vars, prefix, "USER")?;
        let password = required(vars, prefix, "PASSWORD")?;
        let database = required(vars, prefix, "DB")?;

        let port: u16 = port_raw.parse().map_err(|_| {
            PipelineError::Configuration(format!(
                "{}_PORT must be an integer in 1-65535, got '{}'",
                prefix, port_raw
            ))
        })?;
        if port == 0 {
            return Err(PipelineError::Configuration(format!(
                "{}_PORT must be in 1-65535, got 0",
                prefix
            )));
        }

        Ok(ConnectionSpec {
            host,
            port,
            user,
            password: Secret::new(password),
            database,
        })
    }
}

fn required(
    vars: &HashMap<String, String>,
    prefix: &str,
    key: &str,
) -> Result<String, PipelineError> {
    let name = format!("{}_{}", prefix, key);
    match vars.get(&name) {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        Some(_) => Err(PipelineError::Configuration(format!(
            "{} is set but empty",
            name
        ))),
        None => Err(PipelineError::Configuration(format!("{} is not set", name))),
    }
}

/// Immutable configuration for one pipeline run.
///
/// Built exactly once from an environment snapshot and passed by reference to
/// every stage; no component reads ambient environment state directly.
#[derive(Debug)]
pub struct Settings {
    pub engine: Engine,
    pub source: ConnectionSpec,
    /// Present only when the `DEST_*` namespace is configured.
    pub destination: Option<ConnectionSpec>,
    /// Root directory for dump artifacts and CSV export directories.
    pub output_dir: PathBuf,
    /// Schemas excluded from Postgres dumps (engine-internal namespaces).
    pub exclude_schemas: Vec<String>,
    /// Explicit tool paths, taking priority over PATH search.
    pub tool_overrides: HashMap<Tool, PathBuf>,
    /// Upper bound on every external tool invocation; `None` means unbounded.
    pub tool_timeout: Option<Duration>,
}

impl Settings {
    /// Snapshot the process environment and build the run configuration.
    pub fn from_env() -> Result<Self, PipelineError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, PipelineError> {
        let engine = match vars.get("DB_ENGINE") {
            Some(value) => Engine::parse(value)?,
            None => Engine::Postgres,
        };

        let source = ConnectionSpec::from_vars(vars, "SOURCE")?;

        // The destination namespace is all-or-nothing: a partial set of
        // DEST_* keys is a misconfiguration, not an absent destination.
        let has_dest = ["HOST", "PORT", "USER", "PASSWORD", "DB"]
            .iter()
            .any(|key| vars.contains_key(&format!("DEST_{}", key)));
        let destination = if has_dest {
            Some(ConnectionSpec::from_vars(vars, "DEST")?)
        } else {
            None
        };

        let output_dir = vars
            .get("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        let exclude_schemas = vars
            .get("EXCLUDE_SCHEMAS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut tool_overrides = HashMap::new();
        for tool in Tool::ALL {
            if let Some(path) = vars.get(tool.override_key()) {
                tool_overrides.insert(tool, PathBuf::from(path));
            }
        }

        let tool_timeout = match vars.get("TOOL_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    PipelineError::Configuration(format!(
                        "TOOL_TIMEOUT_SECS must be a positive integer, got '{}'",
                        raw
                    ))
                })?;
                if secs == 0 {
                    return Err(PipelineError::Configuration(
                        "TOOL_TIMEOUT_SECS must be greater than zero".into(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Settings {
            engine,
            source,
            destination,
            output_dir,
            exclude_schemas,
            tool_overrides,
            tool_timeout,
        })
    }
}
