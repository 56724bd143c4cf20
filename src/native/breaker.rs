use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::fs;
use uuid::Uuid;

use crate::constants::{BROKEN_SUFFIX, TRANSIENT_PREFIX};
use crate::core::config::{ConfigError, OutputMode, SymmetrySettings};
use crate::core::domain::{ExecutableConfig, Instance, Termination};
use crate::core::pipeline::cleanup::TransientFiles;
use crate::core::traits::breaker::{BreakError, Reduction, SymmetryBreaker};
use crate::core::traits::executor::Executor;

/// Runs an external symmetry breaking tool (BreakID style:
/// `<tool> [options...] <input> <output>`) under the same supervision as
/// the solvers.
#[derive(Debug)]
pub struct NativeBreaker {
    tool: ExecutableConfig,
    output: OutputMode,
    time_marker: Regex,
    scratch_dir: PathBuf,
    executor: Arc<dyn Executor>,
    transient: Arc<TransientFiles>,
}

impl NativeBreaker {
    pub fn new(
        settings: SymmetrySettings,
        executor: Arc<dyn Executor>,
        transient: Arc<TransientFiles>,
    ) -> Result<Self, ConfigError> {
        Ok(NativeBreaker {
            tool: settings.tool,
            output: settings.output,
            time_marker: marker_pattern(&settings.time_marker)?,
            scratch_dir: std::env::temp_dir().join("satbench"),
            executor,
            transient,
        })
    }

    #[cfg(test)]
    pub fn with_scratch_dir<P: AsRef<Path>>(self, dir: P) -> Self {
        Self {
            scratch_dir: dir.as_ref().into(),
            ..self
        }
    }

    async fn allocate_output(&self, instance: &Instance, solver: &str) -> Result<Instance, BreakError> {
        let name = Some(broken_name(instance));
        if let Some(path) = self.output.target(&instance.path, solver) {
            if let OutputMode::Directory(dir) = &self.output {
                create_dir(dir).await?;
            }
            return Ok(Instance::new(name, path));
        }

        create_dir(&self.scratch_dir).await?;
        let path = self
            .scratch_dir
            .join(format!("{}{}.cnf", TRANSIENT_PREFIX, Uuid::new_v4()));
        let broken = Instance::transient(name, path);
        self.transient.register(broken.clone()).await;
        Ok(broken)
    }

    async fn run_tool(
        &self,
        instance: &Instance,
        broken: Instance,
        timeout: Duration,
    ) -> Result<Reduction, BreakError> {
        let args = [instance.path.clone(), broken.path.clone()];
        let outcome = self.executor.execute(&self.tool, &args, timeout).await;

        match outcome.termination {
            Termination::TimedOut => {
                tracing::info!("Symmetry breaking of {} timed out", instance.display_name());
                Ok(Reduction::TimedOut)
            }
            Termination::Failed(msg) => Err(BreakError::Launch { msg }),
            Termination::Exited if outcome.exit_code != 0 => {
                // transient outputs are left to the central cleanup
                if !broken.transient && fs::try_exists(&broken.path).await.unwrap_or(false) {
                    if let Err(e) = fs::remove_file(&broken.path).await {
                        tracing::warn!("Failed to remove {}: {}", broken.path.display(), e);
                    }
                }
                Err(BreakError::ToolFailed {
                    code: outcome.exit_code,
                    stderr: outcome.stderr,
                })
            }
            Termination::Exited => Ok(Reduction::Broken {
                break_time: parse_break_time(&self.time_marker, &outcome.stdout),
                instance: broken,
            }),
        }
    }
}

#[async_trait::async_trait]
impl SymmetryBreaker for NativeBreaker {
    #[tracing::instrument(skip(self))]
    async fn reduce(
        &self,
        instance: &Instance,
        solver: &str,
        timeout: Duration,
    ) -> Result<Reduction, BreakError> {
        let broken = self.allocate_output(instance, solver).await?;
        self.run_tool(instance, broken, timeout).await
    }
}

/// Matches a number directly after the marker, separated by whitespace only.
fn marker_pattern(marker: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"{}\s*(\d+(?:\.\d+)?)", regex::escape(marker)))
}

/// Sums every number that follows the marker, over all lines. The tool
/// reports one time per phase.
pub fn parse_break_time(marker: &Regex, output: &str) -> f64 {
    output
        .lines()
        .flat_map(|line| marker.captures_iter(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse::<f64>().ok())
        .sum()
}

fn broken_name(instance: &Instance) -> String {
    format!("{}{}", instance.display_name(), BROKEN_SUFFIX)
}

async fn create_dir(dir: &Path) -> Result<(), BreakError> {
    fs::create_dir_all(dir).await.map_err(|e| BreakError::Launch {
        msg: format!("Failed to create {}: {}", dir.display(), e),
    })
}
