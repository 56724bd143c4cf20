use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::classifier::Classifier;
use crate::core::config::ConfigError;

/// One problem file. `transient` marks files produced by the engine itself
/// that must be removed once the run is over.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub name: Option<String>,
    pub path: PathBuf,
    pub transient: bool,
}

impl Instance {
    pub fn new<P: Into<PathBuf>>(name: Option<String>, path: P) -> Self {
        Instance {
            name,
            path: path.into(),
            transient: false,
        }
    }

    pub fn transient<P: Into<PathBuf>>(name: Option<String>, path: P) -> Self {
        Instance {
            transient: true,
            ..Instance::new(name, path)
        }
    }

    /// Name used in result rows: the configured name, falling back to the
    /// file's base name.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// An external binary under benchmark, or the symmetry tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutableConfig {
    pub name: String,
    pub path: PathBuf,
    pub options: Vec<String>,
    pub enabled: bool,
    pub classifier: Classifier,
}

impl ExecutableConfig {
    pub fn new<P: AsRef<Path>>(
        name: &str,
        path: P,
        options: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        ensure_executable(path)?;

        Ok(ExecutableConfig {
            name: name.to_string(),
            path: path.into(),
            options,
            enabled: true,
            classifier: Classifier::default(),
        })
    }

    pub fn with_classifier(self, classifier: Classifier) -> Self {
        Self { classifier, ..self }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }
}

#[cfg(unix)]
fn ensure_executable(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|_| ConfigError::ExecutableNotFound {
        path: path.into(),
    })?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return Err(ConfigError::NotExecutable { path: path.into() });
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_executable(path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::ExecutableNotFound { path: path.into() });
    }
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Termination {
    #[default]
    Exited,
    TimedOut,
    Failed(String),
}

/// Raw measurements of one process execution.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub exit_code: i32,
    pub cpu_time_seconds: f64,
    pub wall_time_seconds: f64,
    pub cpu_usage_avg_percent: f64,
    pub cpu_usage_max_percent: f64,
    pub memory_peak_mb: f64,
    pub stdout: String,
    pub stderr: String,
    pub termination: Termination,
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome {
            exit_code: -1,
            cpu_time_seconds: 0.0,
            wall_time_seconds: 0.0,
            cpu_usage_avg_percent: 0.0,
            cpu_usage_max_percent: 0.0,
            memory_peak_mb: 0.0,
            stdout: String::new(),
            stderr: String::new(),
            termination: Termination::Exited,
        }
    }
}

impl Outcome {
    pub fn timed_out(&self) -> bool {
        self.termination == Termination::TimedOut
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Error,
    Unknown,
    Timeout,
    SymBreakError,
    Sat,
    Unsat,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Error => "ERROR",
            Status::Unknown => "UNKNOWN",
            Status::Timeout => "TIMEOUT",
            Status::SymBreakError => "SYM_BREAK_ERROR",
            Status::Sat => "SAT",
            Status::Unsat => "UNSAT",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every column a result row can carry, in schema order.
pub const RESULT_FIELDS: [&str; 13] = [
    "solver",
    "original_instance",
    "break_time_seconds",
    "status",
    "error",
    "exit_code",
    "cpu_time_seconds",
    "wall_time_seconds",
    "cpu_usage_avg_percent",
    "cpu_usage_max_percent",
    "memory_peak_mb",
    "stdout",
    "stderr",
];

/// Classified record of one benchmark run (one per task stage).
#[derive(Clone, Debug, PartialEq)]
pub struct BenchResult {
    pub solver: String,
    pub original_instance: String,
    pub break_time_seconds: f64,
    pub status: Status,
    pub error: String,
    pub outcome: Outcome,
}

impl BenchResult {
    pub fn new(solver: &str, original_instance: &str, break_time_seconds: f64, status: Status) -> Self {
        BenchResult {
            solver: solver.to_string(),
            original_instance: original_instance.to_string(),
            break_time_seconds,
            status,
            error: String::new(),
            outcome: Outcome::default(),
        }
    }

    pub fn with_error(self, error: String) -> Self {
        Self { error, ..self }
    }

    pub fn with_outcome(self, outcome: Outcome) -> Self {
        Self { outcome, ..self }
    }

    /// Looks a column up by name. Unknown names yield `None`.
    pub fn field(&self, name: &str) -> Option<String> {
        let o = &self.outcome;
        let value = match name {
            "solver" => self.solver.clone(),
            "original_instance" => self.original_instance.clone(),
            "break_time_seconds" => self.break_time_seconds.to_string(),
            "status" => self.status.to_string(),
            "error" => self.error.clone(),
            "exit_code" => o.exit_code.to_string(),
            "cpu_time_seconds" => o.cpu_time_seconds.to_string(),
            "wall_time_seconds" => o.wall_time_seconds.to_string(),
            "cpu_usage_avg_percent" => o.cpu_usage_avg_percent.to_string(),
            "cpu_usage_max_percent" => o.cpu_usage_max_percent.to_string(),
            "memory_peak_mb" => o.memory_peak_mb.to_string(),
            "stdout" => o.stdout.clone(),
            "stderr" => o.stderr.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// One unit of scheduled work.
#[derive(Clone, Debug)]
pub struct Task {
    pub solver: ExecutableConfig,
    pub instance: Instance,
    pub budget: Duration,
}
