use std::sync::Arc;

use crate::core::config::{ConfigError, Settings};
use crate::core::domain::{BenchResult, Status};
use crate::core::pipeline::cleanup::{TransientFiles, cleanup};
use crate::core::pipeline::scheduling::{Scheduler, plan};
use crate::core::sink::{self, SinkError};
use crate::core::traits::executor::Executor;
use crate::native::breaker::NativeBreaker;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to write results: {0}")]
    Sink(#[from] SinkError),
}

/// Runs a whole benchmark: plan, execute, clean up transient files, then
/// persist the results.
#[tracing::instrument(skip_all)]
pub async fn run_benchmark(
    settings: &Settings,
    executor: Arc<dyn Executor>,
) -> Result<Vec<BenchResult>, BenchError> {
    let tasks = plan(&settings.solvers, &settings.instances, settings.timeout)?;
    let transient = Arc::new(TransientFiles::new());

    let mut scheduler = Scheduler::new(executor.clone(), settings.max_workers);
    if let Some(symmetry) = &settings.symmetry {
        symmetry.output.check_collisions(&tasks)?;
        let breaker = NativeBreaker::new(symmetry.clone(), executor, transient.clone())?;
        scheduler = scheduler.with_breaker(Arc::new(breaker));
    }

    tracing::info!(
        "Scheduling {} tasks on {} workers",
        tasks.len(),
        scheduler.workers()
    );
    let results = scheduler.run(tasks).await;

    cleanup(transient.take().await).await;
    sink::write(&results, &settings.fields, &settings.output)?;

    log_summary(&results);
    Ok(results)
}

fn log_summary(results: &[BenchResult]) {
    let count = |status: Status| results.iter().filter(|r| r.status == status).count();
    tracing::info!(
        sat = count(Status::Sat),
        unsat = count(Status::Unsat),
        unknown = count(Status::Unknown),
        timeout = count(Status::Timeout),
        error = count(Status::Error) + count(Status::SymBreakError),
        "Benchmark finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{OutputMode, SymmetrySettings};
    use crate::core::domain::{ExecutableConfig, Instance, RESULT_FIELDS};
    use crate::native::executor::ProcessSampler;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn settings(dir: &Path, symmetry: Option<SymmetrySettings>) -> Settings {
        let cnf = dir.join("test.cnf");
        std::fs::write(&cnf, "p cnf 1 1\n1 0\n").unwrap();

        let sat = script(dir, "sat.sh", "echo 's SATISFIABLE'\nexit 10");
        let slow = script(dir, "slow.sh", "sleep 10\nexit 20");

        Settings {
            solvers: vec![
                ExecutableConfig::new("sat", sat, vec![]).unwrap(),
                ExecutableConfig::new("slow", slow, vec![]).unwrap(),
            ],
            instances: vec![Instance::new(Some("I".to_string()), cnf)],
            timeout: Duration::from_secs(1),
            max_workers: 2,
            symmetry,
            output: dir.join("results.csv"),
            fields: RESULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn symmetry(dir: &Path, output: OutputMode) -> SymmetrySettings {
        let tool = script(dir, "breakid.sh", "echo 'T: 0.05'\ncp \"$1\" \"$2\"");
        SymmetrySettings {
            tool: ExecutableConfig::new("breakid", tool, vec![]).unwrap(),
            output,
            time_marker: "T:".to_string(),
        }
    }

    fn scratch_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("scratch"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_plain_benchmark_writes_every_result() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), None);

        let results = run_benchmark(&settings, Arc::new(ProcessSampler::new()))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        let sat = results.iter().find(|r| r.solver == "sat").unwrap();
        assert_eq!(sat.status, Status::Sat);
        let slow = results.iter().find(|r| r.solver == "slow").unwrap();
        assert_eq!(slow.status, Status::Timeout);
        assert_eq!(slow.outcome.exit_code, -1);

        let mut reader = csv::Reader::from_path(&settings.output).unwrap();
        assert_eq!(reader.headers().unwrap().len(), RESULT_FIELDS.len());
        assert_eq!(reader.records().count(), 2);
    }

    #[tokio::test]
    async fn test_transient_outputs_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let symmetry = symmetry(dir.path(), OutputMode::Transient);
        let mut settings = settings(dir.path(), Some(symmetry));
        settings.solvers.truncate(1);

        let executor = Arc::new(ProcessSampler::new());
        let transient = Arc::new(TransientFiles::new());
        let breaker = NativeBreaker::new(
            settings.symmetry.clone().unwrap(),
            executor.clone(),
            transient.clone(),
        )
        .unwrap()
        .with_scratch_dir(dir.path().join("scratch"));
        let scheduler = Scheduler::new(executor, 1).with_breaker(Arc::new(breaker));
        let tasks = plan(&settings.solvers, &settings.instances, settings.timeout).unwrap();

        let results = scheduler.run(tasks).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].original_instance, "I_sb");
        assert_eq!(results[1].status, Status::Sat);
        assert!((results[1].break_time_seconds - 0.05).abs() < 1e-9);
        assert_eq!(scratch_files(dir.path()), 1);

        cleanup(transient.take().await).await;
        assert_eq!(scratch_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_sibling_output_survives_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let symmetry = symmetry(dir.path(), OutputMode::Sibling);
        let mut settings = settings(dir.path(), Some(symmetry));
        settings.solvers.truncate(1);

        let results = run_benchmark(&settings, Arc::new(ProcessSampler::new()))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].break_time_seconds, 0.0);
        assert_eq!(results[1].status, Status::Sat);
        assert!(dir.path().join("test_sb_sat.cnf").exists());
    }

    #[tokio::test]
    async fn test_concurrent_solvers_do_not_share_broken_instances() {
        let dir = tempfile::tempdir().unwrap();
        let slow_tool = script(
            dir.path(),
            "breakid.sh",
            ": > \"$2\"\nsleep 1\ncp \"$1\" \"$2\"\necho 'T: 1.0'",
        );
        let symmetry = SymmetrySettings {
            tool: ExecutableConfig::new("breakid", slow_tool, vec![]).unwrap(),
            output: OutputMode::Sibling,
            time_marker: "T:".to_string(),
        };
        let mut settings = settings(dir.path(), Some(symmetry));
        let check = "grep -q 'p cnf' \"$1\" && exit 10 || exit 1";
        settings.solvers = vec![
            ExecutableConfig::new("A", script(dir.path(), "a.sh", &format!("sleep 0.2\n{check}")), vec![])
                .unwrap(),
            ExecutableConfig::new("B", script(dir.path(), "b.sh", &format!("sleep 1.3\n{check}")), vec![])
                .unwrap(),
        ];
        settings.timeout = Duration::from_secs(10);

        let results = run_benchmark(&settings, Arc::new(ProcessSampler::new()))
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        for solver in ["A", "B"] {
            let broken = results
                .iter()
                .find(|r| r.solver == solver && r.original_instance == "I_sb")
                .unwrap();
            assert_eq!(broken.status, Status::Sat, "{solver} read a foreign broken instance");
            assert!(dir.path().join(format!("test_sb_{solver}.cnf")).exists());
        }
    }

    #[tokio::test]
    async fn test_colliding_outputs_fail_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let symmetry = symmetry(dir.path(), OutputMode::Directory(dir.path().join("out")));
        let mut settings = settings(dir.path(), Some(symmetry));
        settings.solvers.truncate(1);
        let other = dir.path().join("other");
        std::fs::create_dir(&other).unwrap();
        std::fs::write(other.join("test.cnf"), "p cnf 1 1\n1 0\n").unwrap();
        settings.instances.push(Instance::new(Some("J".to_string()), other.join("test.cnf")));

        let result = run_benchmark(&settings, Arc::new(ProcessSampler::new())).await;

        assert!(matches!(
            result,
            Err(BenchError::Config(ConfigError::OutputCollision { .. }))
        ));
        assert!(!settings.output.exists());
    }
}
