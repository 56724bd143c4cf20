use std::time::Duration;

pub const TASK_TX_ERR: &str = "Failed to send task to worker queue";
pub const REPORT_TX_ERR: &str = "Failed to send task report to coordinator";

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
/// Time between SIGTERM and SIGKILL when tearing down a timed out tree.
pub const KILL_GRACE: Duration = Duration::from_millis(200);
/// Upper bound for collecting output after the tree was killed.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub const TIMEOUT_MARKER: &str = "Timeout reached";
pub const DEFAULT_TIME_MARKER: &str = "T:";
pub const TRANSIENT_PREFIX: &str = "__TEMP__";
pub const BROKEN_SUFFIX: &str = "_sb";

pub const EXIT_SAT: i32 = 10;
pub const EXIT_UNSAT: i32 = 20;

pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_OUTPUT: &str = "multi_solver_results.csv";
