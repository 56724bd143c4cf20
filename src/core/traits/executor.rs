use std::path::PathBuf;
use std::time::Duration;

use crate::core::domain::{ExecutableConfig, Outcome};

/// Runs one external process to completion or until `timeout` elapses.
///
/// The process is started as `<path> [options...] [args...]`. Implementations
/// never fail: launch and OS errors are reported through
/// [`Outcome::termination`](crate::core::domain::Termination).
#[mockall::automock]
#[async_trait::async_trait]
pub trait Executor: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        executable: &ExecutableConfig,
        args: &[PathBuf],
        timeout: Duration,
    ) -> Outcome;
}
