use std::io::ErrorKind;

use tokio::sync::Mutex;

use crate::core::domain::Instance;

/// Files created by the engine during a run, shared between workers.
#[derive(Debug, Default)]
pub struct TransientFiles {
    files: Mutex<Vec<Instance>>,
}

impl TransientFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, instance: Instance) {
        self.files.lock().await.push(instance);
    }

    pub async fn take(&self) -> Vec<Instance> {
        std::mem::take(&mut *self.files.lock().await)
    }
}

/// Deletes the backing files of transient instances. Must only run after
/// every worker has been joined. Failures are logged and swallowed.
#[tracing::instrument(skip(instances))]
pub async fn cleanup(instances: Vec<Instance>) {
    for instance in instances.iter().filter(|i| i.transient) {
        match tokio::fs::remove_file(&instance.path).await {
            Ok(()) => tracing::debug!("Removed {}", instance.path.display()),
            // the tool may have failed before writing anything
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to delete transient file {}: {}",
                instance.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_removes_only_transient_files() {
        let dir = tempfile::tempdir().unwrap();
        let transient_path = dir.path().join("__TEMP__a.cnf");
        let owned_path = dir.path().join("test_sb.cnf");
        std::fs::write(&transient_path, "p cnf 0 0\n").unwrap();
        std::fs::write(&owned_path, "p cnf 0 0\n").unwrap();

        cleanup(vec![
            Instance::transient(None, &transient_path),
            Instance::new(None, &owned_path),
        ])
        .await;

        assert!(!transient_path.exists());
        assert!(owned_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("__TEMP__never_written.cnf");

        cleanup(vec![Instance::transient(None, &missing)]).await;

        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn test_take_drains_registry() {
        let files = TransientFiles::new();
        files.register(Instance::transient(None, "/tmp/a.cnf")).await;
        files.register(Instance::transient(None, "/tmp/b.cnf")).await;

        assert_eq!(files.take().await.len(), 2);
        assert!(files.take().await.is_empty());
    }
}
