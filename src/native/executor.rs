use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::constants::{DRAIN_TIMEOUT, KILL_GRACE, SAMPLE_INTERVAL, TIMEOUT_MARKER};
use crate::core::domain::{ExecutableConfig, Outcome, Termination};
use crate::core::traits::executor::Executor;
use crate::native::procfs;

const MB: f64 = 1024.0 * 1024.0;

/// Spawns a process and polls its whole process tree while it runs.
#[derive(Clone, Debug)]
pub struct ProcessSampler {
    interval: Duration,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self::with_interval(SAMPLE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        ProcessSampler { interval }
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Executor for ProcessSampler {
    #[tracing::instrument(skip(self))]
    async fn execute(
        &self,
        executable: &ExecutableConfig,
        args: &[PathBuf],
        timeout: Duration,
    ) -> Outcome {
        if timeout.is_zero() {
            tracing::debug!("No time left, not spawning");
            return Outcome {
                stderr: TIMEOUT_MARKER.to_string(),
                termination: Termination::TimedOut,
                ..Outcome::default()
            };
        }

        let mut cmd = Command::new(&executable.path);
        cmd.args(&executable.options)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);

        let start_time = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return failed(format!("Failed to spawn process: {}", e), Usage::default()),
        };
        let Some(pid) = child.id() else {
            return failed("Process exited before it could be observed".to_string(), Usage::default());
        };

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());
        let sampling = Sampling::start(pid, self.interval);

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let wall_time = start_time.elapsed();
                // background leftovers would hold the pipes open
                signal_tree(pid, &[], libc::SIGKILL);
                let usage = sampling.finish().await;
                tracing::debug!("Process {} exited with {}", pid, status);

                usage.into_outcome(Outcome {
                    exit_code: status.code().unwrap_or(-1),
                    wall_time_seconds: wall_time.as_secs_f64(),
                    stdout: drain(stdout).await,
                    stderr: drain(stderr).await,
                    termination: Termination::Exited,
                    ..Outcome::default()
                })
            }
            Ok(Err(e)) => {
                kill_tree(pid, &mut child).await;
                let usage = sampling.finish().await;
                failed(format!("Failed to wait for process: {}", e), usage)
            }
            Err(_) => {
                tracing::debug!("Process {} exceeded {:?}, killing its tree", pid, timeout);
                kill_tree(pid, &mut child).await;
                let usage = sampling.finish().await;
                stderr.abort();

                usage.into_outcome(Outcome {
                    exit_code: -1,
                    wall_time_seconds: timeout.as_secs_f64(),
                    stdout: drain(stdout).await,
                    stderr: TIMEOUT_MARKER.to_string(),
                    termination: Termination::TimedOut,
                    ..Outcome::default()
                })
            }
        }
    }
}

fn failed(msg: String, usage: Usage) -> Outcome {
    tracing::warn!("{}", msg);
    usage.into_outcome(Outcome {
        stderr: format!("Execution error: {}", msg),
        termination: Termination::Failed(msg),
        ..Outcome::default()
    })
}

fn spawn_reader<R>(pipe: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).trim().to_string()
    })
}

/// An escaped grandchild may keep the pipe open forever, so reading is
/// bounded.
async fn drain(mut reader: JoinHandle<String>) -> String {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            reader.abort();
            String::new()
        }
    }
}

/// SIGTERM to the group and every known descendant, SIGKILL after a grace
/// period. Descendants are discovered again before the second signal since
/// the tree may have forked in between.
async fn kill_tree(pid: u32, child: &mut Child) {
    let victims = tokio::task::spawn_blocking(move || procfs::descendants(pid))
        .await
        .unwrap_or_default();
    signal_tree(pid, &victims, libc::SIGTERM);

    let _ = tokio::time::timeout(KILL_GRACE, child.wait()).await;

    let late = tokio::task::spawn_blocking(move || procfs::descendants(pid))
        .await
        .unwrap_or_default();
    signal_tree(pid, &victims, libc::SIGKILL);
    signal_tree(pid, &late, libc::SIGKILL);

    let _ = child.start_kill();
    let _ = child.wait().await;
}

fn signal_tree(group: u32, pids: &[u32], signal: libc::c_int) {
    // SAFETY: kill(2) only takes plain integers; stale pids yield ESRCH
    unsafe {
        libc::kill(-(group as libc::pid_t), signal);
        for pid in pids {
            libc::kill(*pid as libc::pid_t, signal);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Usage {
    peak_memory_mb: f64,
    cpu_samples: Vec<f64>,
    cpu_time_seconds: f64,
}

impl Usage {
    fn record(&mut self, memory_mb: f64, cpu_percent: f64, cpu_time_seconds: f64) {
        self.peak_memory_mb = self.peak_memory_mb.max(memory_mb);
        self.cpu_samples.push(cpu_percent);
        self.cpu_time_seconds = cpu_time_seconds;
    }

    /// Mean of the non-zero samples; the first sample of every process is
    /// zero because there is nothing to diff against yet.
    fn cpu_avg(&self) -> f64 {
        let busy: Vec<f64> = self.cpu_samples.iter().copied().filter(|c| *c > 0.0).collect();
        if busy.is_empty() {
            return 0.0;
        }
        busy.iter().sum::<f64>() / busy.len() as f64
    }

    fn cpu_max(&self) -> f64 {
        self.cpu_samples.iter().copied().fold(0.0, f64::max)
    }

    fn into_outcome(self, outcome: Outcome) -> Outcome {
        Outcome {
            cpu_time_seconds: self.cpu_time_seconds,
            cpu_usage_avg_percent: self.cpu_avg(),
            cpu_usage_max_percent: self.cpu_max(),
            memory_peak_mb: self.peak_memory_mb,
            ..outcome
        }
    }
}

struct Sampling {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<Usage>,
}

impl Sampling {
    fn start(pid: u32, interval: Duration) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let ticks_per_second = procfs::clock_ticks_per_second();
            let page_size = procfs::page_size();
            let mut usage = Usage::default();
            let mut previous: HashMap<u32, u64> = HashMap::new();
            let mut last = Instant::now();

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }

                let Ok(tree) = tokio::task::spawn_blocking(move || procfs::process_tree(pid)).await
                else {
                    continue;
                };
                if tree.is_empty() {
                    continue;
                }

                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                let mut memory_bytes = 0u64;
                let mut total_ticks = 0u64;
                let mut delta_ticks = 0u64;
                let mut current = HashMap::with_capacity(tree.len());
                for stat in &tree {
                    memory_bytes += stat.rss_pages * page_size;
                    total_ticks += stat.cpu_ticks;
                    if let Some(before) = previous.get(&stat.pid) {
                        delta_ticks += stat.cpu_ticks.saturating_sub(*before);
                    }
                    current.insert(stat.pid, stat.cpu_ticks);
                }
                previous = current;

                let cpu_percent = if elapsed > 0.0 {
                    delta_ticks as f64 / ticks_per_second / elapsed * 100.0
                } else {
                    0.0
                };
                usage.record(
                    memory_bytes as f64 / MB,
                    cpu_percent,
                    total_ticks as f64 / ticks_per_second,
                );
            }

            usage
        });

        Sampling { stop_tx, handle }
    }

    async fn finish(self) -> Usage {
        let _ = self.stop_tx.send(());
        self.handle.await.unwrap_or_default()
    }
}
