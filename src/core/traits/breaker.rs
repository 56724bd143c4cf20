use std::time::Duration;

use crate::core::domain::Instance;

#[derive(Clone, Debug, PartialEq)]
pub enum Reduction {
    Broken { instance: Instance, break_time: f64 },
    TimedOut,
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum BreakError {
    #[error("Symmetry tool failed with exit code {code}: {stderr}")]
    ToolFailed { code: i32, stderr: String },
    #[error("Failed to launch symmetry tool: {msg}")]
    Launch { msg: String },
}

/// Rewrites an instance into an equisatisfiable one with symmetries broken.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SymmetryBreaker: std::fmt::Debug + Send + Sync {
    /// `solver` names the consumer of the broken instance; every
    /// (instance, solver) pair gets its own output.
    async fn reduce(
        &self,
        instance: &Instance,
        solver: &str,
        timeout: Duration,
    ) -> Result<Reduction, BreakError>;
}
