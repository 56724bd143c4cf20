use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use itertools::Itertools;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::{
    constants::{BROKEN_SUFFIX, REPORT_TX_ERR, TASK_TX_ERR},
    core::{
        config::ConfigError,
        domain::{BenchResult, ExecutableConfig, Instance, Status, Task, Termination},
        traits::{
            breaker::{Reduction, SymmetryBreaker},
            executor::Executor,
        },
    },
};

#[derive(Debug)]
enum WorkItem {
    Run(Task),
    Shutdown,
}

/// Everything one task produced, in stage order. Receiving it is the
/// task's completion acknowledgement.
#[derive(Debug)]
struct TaskReport {
    results: Vec<BenchResult>,
}

type SharedQueue = Arc<Mutex<UnboundedReceiver<WorkItem>>>;

/// Fixed-size worker pool running every task through the solver and,
/// optionally, the symmetry breaking stage.
#[derive(Clone, Debug)]
pub struct Scheduler {
    executor: Arc<dyn Executor>,
    breaker: Option<Arc<dyn SymmetryBreaker>>,
    workers: usize,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn Executor>, max_workers: usize) -> Self {
        Scheduler {
            executor,
            breaker: None,
            workers: clamp_workers(max_workers),
        }
    }

    pub fn with_breaker(self, breaker: Arc<dyn SymmetryBreaker>) -> Self {
        Self {
            breaker: Some(breaker),
            ..self
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs all tasks and returns once every worker has been joined.
    /// Results of one task keep their stage order; tasks interleave freely.
    #[tracing::instrument(skip_all, fields(tasks = tasks.len(), workers = self.workers))]
    pub async fn run(&self, tasks: Vec<Task>) -> Vec<BenchResult> {
        let total = tasks.len();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<WorkItem>();
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<TaskReport>();
        let queue_rx: SharedQueue = Arc::new(Mutex::new(queue_rx));

        let workers: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|id| self.spawn_worker(id, queue_rx.clone(), report_tx.clone()))
            .collect();
        drop(report_tx);

        for task in tasks {
            queue_tx.send(WorkItem::Run(task)).expect(TASK_TX_ERR);
        }

        let mut results = Vec::with_capacity(total);
        let mut acknowledged = 0;
        while acknowledged < total {
            let Some(report) = report_rx.recv().await else {
                tracing::error!("All workers stopped with {} tasks pending", total - acknowledged);
                break;
            };
            acknowledged += 1;
            results.extend(report.results);
        }

        for _ in 0..workers.len() {
            let _ = queue_tx.send(WorkItem::Shutdown);
        }
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                tracing::error!("Worker crashed: {}", e);
            }
        }

        tracing::info!("All {} tasks done, {} results", total, results.len());
        results
    }

    fn spawn_worker(
        &self,
        id: usize,
        queue: SharedQueue,
        report_tx: UnboundedSender<TaskReport>,
    ) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let breaker = self.breaker.clone();

        tokio::spawn(async move {
            loop {
                let item = queue.lock().await.recv().await;
                let task = match item {
                    Some(WorkItem::Run(task)) => task,
                    Some(WorkItem::Shutdown) | None => break,
                };

                let results = run_guarded(task, executor.clone(), breaker.clone()).await;
                report_tx.send(TaskReport { results }).expect(REPORT_TX_ERR);
            }
            tracing::debug!("Worker {} stopped", id);
        })
    }
}

/// Requested worker count, bounded by the number of logical CPUs.
pub fn clamp_workers(requested: usize) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if requested > available {
        tracing::warn!(
            "Requested {} workers but only {} CPUs are available, using {}",
            requested,
            available,
            available
        );
        return available;
    }
    requested.max(1)
}

/// Every enabled solver against every instance, directories expanded.
pub fn plan(
    solvers: &[ExecutableConfig],
    instances: &[Instance],
    budget: Duration,
) -> Result<Vec<Task>, ConfigError> {
    let instances = expand_instances(instances)?;

    Ok(instances
        .iter()
        .cartesian_product(solvers.iter().filter(|s| s.enabled))
        .map(|(instance, solver)| Task {
            solver: solver.clone(),
            instance: instance.clone(),
            budget,
        })
        .collect())
}

/// Replaces directories by the files they contain, named `<dir name>_<n>`.
pub fn expand_instances(instances: &[Instance]) -> Result<Vec<Instance>, ConfigError> {
    let mut expanded = Vec::with_capacity(instances.len());
    for instance in instances {
        if !instance.path.is_dir() {
            expanded.push(instance.clone());
            continue;
        }

        let base = instance.display_name();
        let files = list_files(&instance.path)?;
        for (counter, path) in files.into_iter().enumerate() {
            expanded.push(Instance::new(Some(format!("{}_{}", base, counter + 1)), path));
        }
    }
    Ok(expanded)
}

fn list_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, ConfigError> {
    let read_err = |source| ConfigError::Read {
        path: dir.into(),
        source,
    };
    let mut files = std::fs::read_dir(dir)
        .map_err(read_err)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

async fn run_guarded(
    task: Task,
    executor: Arc<dyn Executor>,
    breaker: Option<Arc<dyn SymmetryBreaker>>,
) -> Vec<BenchResult> {
    let solver = task.solver.name.clone();
    let instance = task.instance.display_name();

    match tokio::spawn(process_task(task, executor, breaker)).await {
        Ok(results) => results,
        Err(e) => {
            tracing::error!("Task {} on {} failed: {}", solver, instance, e);
            vec![BenchResult::new(&solver, &instance, 0.0, Status::Error)
                .with_error(format!("Task failed: {}", e))]
        }
    }
}

async fn process_task(
    task: Task,
    executor: Arc<dyn Executor>,
    breaker: Option<Arc<dyn SymmetryBreaker>>,
) -> Vec<BenchResult> {
    let name = task.instance.display_name();
    tracing::info!("Running {} on {}", task.solver.name, name);

    let plain = run_solver(executor.as_ref(), &task.solver, &task.instance, task.budget, 0.0).await;
    tracing::info!("{} on {}: {}", task.solver.name, name, plain.status);
    let mut results = vec![plain];

    let Some(breaker) = breaker else {
        return results;
    };

    let broken_name = format!("{}{}", name, BROKEN_SUFFIX);
    match breaker.reduce(&task.instance, &task.solver.name, task.budget).await {
        Ok(Reduction::Broken { instance, break_time }) => {
            let remaining = remaining_budget(task.budget, break_time);
            let broken =
                run_solver(executor.as_ref(), &task.solver, &instance, remaining, break_time).await;
            tracing::info!("{} on {}: {}", task.solver.name, broken_name, broken.status);
            results.push(broken);
        }
        Ok(Reduction::TimedOut) => {
            results.push(
                BenchResult::new(&task.solver.name, &broken_name, -1.0, Status::Timeout)
                    .with_error("Symmetry breaking timed out".to_string()),
            );
        }
        Err(e) => {
            tracing::warn!("Symmetry breaking of {} failed: {}", name, e);
            results.push(
                BenchResult::new(&task.solver.name, &broken_name, -1.0, Status::SymBreakError)
                    .with_error(e.to_string()),
            );
        }
    }

    results
}

/// Budget left after symmetry breaking, never negative. Zero makes the
/// executor report a timeout without spawning anything.
fn remaining_budget(budget: Duration, break_time: f64) -> Duration {
    Duration::try_from_secs_f64(break_time)
        .map(|spent| budget.saturating_sub(spent))
        .unwrap_or(Duration::ZERO)
}

async fn run_solver(
    executor: &dyn Executor,
    solver: &ExecutableConfig,
    instance: &Instance,
    budget: Duration,
    break_time: f64,
) -> BenchResult {
    let result = BenchResult::new(&solver.name, &instance.display_name(), break_time, Status::Error);

    // with no budget left the executor reports a timeout regardless
    if !budget.is_zero() && !tokio::fs::try_exists(&instance.path).await.unwrap_or(false) {
        return result.with_error(format!("Instance not found: {}", instance.path.display()));
    }

    let outcome = executor
        .execute(solver, &[instance.path.clone()], budget)
        .await;
    let (status, error) = match &outcome.termination {
        Termination::Failed(msg) => (Status::Error, msg.clone()),
        _ => (solver.classifier.classify(&outcome), String::new()),
    };

    BenchResult { status, ..result }
        .with_error(error)
        .with_outcome(outcome)
}
