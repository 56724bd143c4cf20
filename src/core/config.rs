use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{BROKEN_SUFFIX, DEFAULT_OUTPUT, DEFAULT_TIME_MARKER, DEFAULT_TIMEOUT_SECS};
use crate::core::classifier::Classifier;
use crate::core::domain::{ExecutableConfig, Instance, RESULT_FIELDS, Task};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Executable not found: {}", path.display())]
    ExecutableNotFound { path: PathBuf },
    #[error("File is not executable: {}", path.display())]
    NotExecutable { path: PathBuf },
    #[error("Instance not found: {}", path.display())]
    InstanceNotFound { path: PathBuf },
    #[error("Output path specified while using transient files")]
    TransientWithOutputPath,
    #[error("Invalid timeout: {value}")]
    InvalidTimeout { value: f64 },
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Two tasks would write the same broken instance: {}", path.display())]
    OutputCollision { path: PathBuf },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid time marker: {0}")]
    TimeMarker(#[from] regex::Error),
}

/// Where the symmetry tool writes the broken instance.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputMode {
    /// Fresh file in a scratch directory, removed after the run.
    Transient,
    /// `<stem>_sb_<solver><.ext>` next to the input.
    Sibling,
    /// `<stem>_sb_<solver><.ext>` inside a caller-chosen directory.
    Directory(PathBuf),
}

impl OutputMode {
    pub fn new(transient: bool, output_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        match (transient, output_dir) {
            (true, Some(_)) => Err(ConfigError::TransientWithOutputPath),
            (true, None) => Ok(OutputMode::Transient),
            (false, Some(dir)) => Ok(OutputMode::Directory(dir)),
            (false, None) => Ok(OutputMode::Sibling),
        }
    }

    /// Persistent output path of the broken `input` for one solver.
    /// Transient outputs are allocated by the breaker itself.
    pub fn target(&self, input: &Path, solver: &str) -> Option<PathBuf> {
        let file_name = broken_file_name(input, solver);
        match self {
            OutputMode::Transient => None,
            OutputMode::Sibling => Some(input.parent().unwrap_or(Path::new(".")).join(file_name)),
            OutputMode::Directory(dir) => Some(dir.join(file_name)),
        }
    }

    /// Every task must own its output, otherwise concurrent workers
    /// overwrite or delete each other's broken instances.
    pub fn check_collisions(&self, tasks: &[Task]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for task in tasks {
            let Some(path) = self.target(&task.instance.path, &task.solver.name) else {
                continue;
            };
            if !seen.insert(path.clone()) {
                return Err(ConfigError::OutputCollision { path });
            }
        }
        Ok(())
    }
}

fn broken_file_name(input: &Path, solver: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let tag: String = solver
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    match input.extension() {
        Some(ext) => format!("{}{}_{}.{}", stem, BROKEN_SUFFIX, tag, ext.to_string_lossy()),
        None => format!("{}{}_{}", stem, BROKEN_SUFFIX, tag),
    }
}

#[derive(Clone, Debug)]
pub struct SymmetrySettings {
    pub tool: ExecutableConfig,
    pub output: OutputMode,
    pub time_marker: String,
}

/// Validated run configuration.
#[derive(Clone, Debug)]
pub struct Settings {
    pub solvers: Vec<ExecutableConfig>,
    pub instances: Vec<Instance>,
    pub timeout: Duration,
    pub max_workers: usize,
    pub symmetry: Option<SymmetrySettings>,
    pub output: PathBuf,
    pub fields: Vec<String>,
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.into(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = serde_json::from_str(raw)?;
        file.try_into()
    }
}

pub fn timeout_from_secs(value: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(ConfigError::InvalidTimeout { value }),
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    solvers: Vec<SolverEntry>,
    instances: Vec<InstanceEntry>,
    #[serde(default = "default_timeout")]
    timeout_secs: f64,
    #[serde(default = "default_workers")]
    max_workers: usize,
    #[serde(default)]
    symmetry: Option<SymmetryEntry>,
    #[serde(default)]
    output: OutputEntry,
}

#[derive(Debug, Deserialize)]
struct SolverEntry {
    name: String,
    path: PathBuf,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default = "enabled")]
    enabled: bool,
    #[serde(default)]
    classifier: Classifier,
}

#[derive(Debug, Deserialize)]
struct InstanceEntry {
    #[serde(default)]
    name: Option<String>,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SymmetryEntry {
    #[serde(default = "enabled")]
    enabled: bool,
    path: PathBuf,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    transient: bool,
    #[serde(default)]
    output_dir: Option<PathBuf>,
    #[serde(default)]
    time_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputEntry {
    #[serde(default = "default_output")]
    path: PathBuf,
    #[serde(default = "default_fields")]
    fields: Vec<String>,
}

impl Default for OutputEntry {
    fn default() -> Self {
        OutputEntry {
            path: default_output(),
            fields: default_fields(),
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_workers() -> usize {
    1
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}

fn default_fields() -> Vec<String> {
    RESULT_FIELDS.iter().map(|f| f.to_string()).collect()
}

impl TryFrom<SolverEntry> for ExecutableConfig {
    type Error = ConfigError;

    fn try_from(entry: SolverEntry) -> Result<Self, ConfigError> {
        Ok(ExecutableConfig::new(&entry.name, &entry.path, entry.options)?
            .with_enabled(entry.enabled)
            .with_classifier(entry.classifier))
    }
}

impl TryFrom<InstanceEntry> for Instance {
    type Error = ConfigError;

    fn try_from(entry: InstanceEntry) -> Result<Self, ConfigError> {
        if !entry.path.exists() {
            return Err(ConfigError::InstanceNotFound { path: entry.path });
        }
        Ok(Instance::new(entry.name, entry.path))
    }
}

impl TryFrom<SymmetryEntry> for SymmetrySettings {
    type Error = ConfigError;

    fn try_from(entry: SymmetryEntry) -> Result<Self, ConfigError> {
        let output = OutputMode::new(entry.transient, entry.output_dir)?;
        let tool = ExecutableConfig::new("symmetry", &entry.path, entry.options)?;

        Ok(SymmetrySettings {
            tool,
            output,
            time_marker: entry
                .time_marker
                .unwrap_or_else(|| DEFAULT_TIME_MARKER.to_string()),
        })
    }
}

impl TryFrom<FileConfig> for Settings {
    type Error = ConfigError;

    fn try_from(file: FileConfig) -> Result<Self, ConfigError> {
        let solvers = file
            .solvers
            .into_iter()
            .map(ExecutableConfig::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let instances = file
            .instances
            .into_iter()
            .map(Instance::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let symmetry = match file.symmetry {
            Some(entry) if entry.enabled => Some(entry.try_into()?),
            _ => None,
        };

        Ok(Settings {
            solvers,
            instances,
            timeout: timeout_from_secs(file.timeout_secs)?,
            max_workers: file.max_workers,
            symmetry,
            output: file.output.path,
            fields: file.output.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let solver = dir.path().join("solver.sh");
        std::fs::write(&solver, "#!/bin/sh\nexit 10\n").unwrap();
        std::fs::set_permissions(&solver, std::fs::Permissions::from_mode(0o755)).unwrap();
        let cnf = dir.path().join("test.cnf");
        std::fs::write(&cnf, "p cnf 1 1\n1 0\n").unwrap();
        (dir, solver, cnf)
    }

    #[test]
    fn test_load_minimal_config() {
        let (_dir, solver, cnf) = fixture();
        let raw = format!(
            r#"{{"solvers": [{{"name": "A", "path": "{}"}}],
                "instances": [{{"path": "{}"}}]}}"#,
            solver.display(),
            cnf.display()
        );

        let settings = Settings::from_json(&raw).unwrap();

        assert_eq!(settings.solvers.len(), 1);
        assert!(settings.solvers[0].enabled);
        assert_eq!(settings.solvers[0].classifier, Classifier::ExitCode);
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert_eq!(settings.max_workers, 1);
        assert!(settings.symmetry.is_none());
        assert_eq!(settings.fields.len(), RESULT_FIELDS.len());
    }

    #[test]
    fn test_transient_with_output_dir_is_rejected() {
        let (dir, solver, cnf) = fixture();
        let raw = format!(
            r#"{{"solvers": [{{"name": "A", "path": "{solver}"}}],
                "instances": [{{"path": "{cnf}"}}],
                "symmetry": {{"path": "{solver}", "transient": true, "output_dir": "{out}"}}}}"#,
            solver = solver.display(),
            cnf = cnf.display(),
            out = dir.path().display()
        );

        let result = Settings::from_json(&raw);
        assert!(matches!(result, Err(ConfigError::TransientWithOutputPath)));
    }

    #[test]
    fn test_missing_instance_fails_fast() {
        let (dir, solver, _cnf) = fixture();
        let raw = format!(
            r#"{{"solvers": [{{"name": "A", "path": "{}"}}],
                "instances": [{{"path": "{}"}}]}}"#,
            solver.display(),
            dir.path().join("missing.cnf").display()
        );

        let result = Settings::from_json(&raw);
        assert!(matches!(result, Err(ConfigError::InstanceNotFound { .. })));
    }

    #[test]
    fn test_non_positive_timeout_is_rejected() {
        for value in [-1.0, 0.0, 1e-12, f64::NAN] {
            assert!(
                matches!(timeout_from_secs(value), Err(ConfigError::InvalidTimeout { .. })),
                "{value} was accepted"
            );
        }
        assert_eq!(timeout_from_secs(1.5).unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_output_mode_selection() {
        assert_eq!(OutputMode::new(true, None).unwrap(), OutputMode::Transient);
        assert_eq!(OutputMode::new(false, None).unwrap(), OutputMode::Sibling);
        assert_eq!(
            OutputMode::new(false, Some("/tmp/sb".into())).unwrap(),
            OutputMode::Directory("/tmp/sb".into())
        );
    }

    #[test]
    fn test_zero_timeout_in_file_fails_fast() {
        let (_dir, solver, cnf) = fixture();
        let raw = format!(
            r#"{{"solvers": [{{"name": "A", "path": "{}"}}],
                "instances": [{{"path": "{}"}}],
                "timeout_secs": 0}}"#,
            solver.display(),
            cnf.display()
        );

        let result = Settings::from_json(&raw);
        assert!(matches!(result, Err(ConfigError::InvalidTimeout { .. })));
    }

    #[test]
    fn test_targets_are_per_solver() {
        let input = Path::new("/data/q8.cnf");

        assert_eq!(OutputMode::Transient.target(input, "A"), None);
        assert_eq!(
            OutputMode::Sibling.target(input, "kissat 3.1"),
            Some(PathBuf::from("/data/q8_sb_kissat_3_1.cnf"))
        );
        assert_eq!(
            OutputMode::Directory("/out".into()).target(Path::new("/data/q8"), "A"),
            Some(PathBuf::from("/out/q8_sb_A"))
        );
    }

    fn task(solver: &str, path: &str) -> Task {
        Task {
            solver: ExecutableConfig::new(solver, "/bin/sh", vec![]).unwrap(),
            instance: Instance::new(None, path),
            budget: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_output_collisions() {
        let distinct = vec![
            task("A", "/x/q8.cnf"),
            task("B", "/x/q8.cnf"),
            task("A", "/y/q8.cnf"),
        ];
        assert!(OutputMode::Sibling.check_collisions(&distinct).is_ok());
        assert!(OutputMode::Transient.check_collisions(&distinct).is_ok());
        assert!(matches!(
            OutputMode::Directory("/out".into()).check_collisions(&distinct),
            Err(ConfigError::OutputCollision { ref path }) if path == Path::new("/out/q8_sb_A.cnf")
        ));

        let same_tag = vec![task("a b", "/x/q8.cnf"), task("a_b", "/x/q8.cnf")];
        assert!(OutputMode::Sibling.check_collisions(&same_tag).is_err());
    }
}
