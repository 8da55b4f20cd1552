use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::fetcher::{FetchRequest, MediaFetcher};
use crate::registry::JobRegistry;

fn discard_orphan(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(?err, path = %path.display(), "failed to remove orphaned output");
    }
}

/// Runs one job to completion on the current thread, reporting everything
/// through the registry.
pub fn process_job(request: FetchRequest, registry: &JobRegistry, fetcher: &dyn MediaFetcher) {
    let id = request.id;

    tracing::info!(job_id = %id, url = %request.url, format = ?request.format, "processor: starting media tool");

    let result = fetcher.fetch(&request, &mut |percent| registry.update_progress(id, percent));

    match result {
        Ok(path) => {
            if registry.complete(id, path.clone()) {
                tracing::info!(job_id = %id, path = %path.display(), "processor: complete");
            } else {
                tracing::warn!(job_id = %id, "processor: job no longer running, discarding output");
                discard_orphan(&path);
            }
        }
        Err(err) => {
            tracing::warn!(job_id = %id, %err, "processor: ended with error");
            registry.fail(id, err.to_string());
        }
    }
}

/// Receives dispatched jobs and gives each its own blocking worker.
pub async fn processor(
    mut rx: UnboundedReceiver<FetchRequest>,
    registry: Arc<JobRegistry>,
    fetcher: Arc<dyn MediaFetcher>,
) {
    tracing::info!("Starting extraction processor...");

    while let Some(request) = rx.recv().await {
        let id = request.id;
        let worker = tokio::task::spawn_blocking({
            let registry = registry.clone();
            let fetcher = fetcher.clone();
            move || process_job(request, &registry, fetcher.as_ref())
        });

        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = worker.await {
                tracing::error!(job_id = %id, ?err, "processor: worker panicked");
                registry.fail(id, "internal error while processing");
            }
        });
    }

    tracing::info!("Extraction processor shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::{Format, JobId, State, FAILED_PROGRESS};
    use chrono::TimeDelta;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Replays a fixed list of progress values, then writes the output file
    /// or fails with the given message.
    struct ScriptedFetcher {
        steps: Vec<f32>,
        failure: Option<String>,
        seen: Mutex<Vec<f32>>,
    }

    impl ScriptedFetcher {
        fn succeeding(steps: Vec<f32>) -> Self {
            ScriptedFetcher {
                steps,
                failure: None,
                seen: Mutex::new(vec![]),
            }
        }

        fn failing(message: &str) -> Self {
            ScriptedFetcher {
                steps: vec![5.0],
                failure: Some(message.to_owned()),
                seen: Mutex::new(vec![]),
            }
        }
    }

    impl MediaFetcher for ScriptedFetcher {
        fn fetch(
            &self,
            request: &FetchRequest,
            progress: &mut dyn FnMut(f32),
        ) -> Result<PathBuf, FetchError> {
            for step in &self.steps {
                self.seen.lock().unwrap().push(*step);
                progress(*step);
            }
            if let Some(message) = &self.failure {
                return Err(FetchError::Failed(message.clone()));
            }
            let path = request.output_path();
            std::fs::write(&path, b"media")?;
            Ok(path)
        }
    }

    struct PanickingFetcher;

    impl MediaFetcher for PanickingFetcher {
        fn fetch(&self, _: &FetchRequest, _: &mut dyn FnMut(f32)) -> Result<PathBuf, FetchError> {
            panic!("tool crashed");
        }
    }

    fn start_job(registry: &JobRegistry, dir: &Path, format: Format) -> FetchRequest {
        let id = registry.create("http://x");
        let url = registry.start(id, format).unwrap();
        FetchRequest {
            id,
            url,
            format,
            download_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_process_job_success() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(TimeDelta::hours(12));
        let request = start_job(&registry, dir.path(), Format::Audio);
        let id = request.id;
        let fetcher = ScriptedFetcher::succeeding(vec![0.0, 40.0, 100.0]);

        process_job(request, &registry, &fetcher);

        let job = registry.get(id).unwrap();
        assert_eq!(job.state(), State::Succeeded);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.output_path, Some(dir.path().join(format!("{id}.mp3"))));
        assert!(job.expires_at.is_some());
        assert_eq!(*fetcher.seen.lock().unwrap(), vec![0.0, 40.0, 100.0]);
    }

    #[test]
    fn test_process_job_failure() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(TimeDelta::hours(12));
        let request = start_job(&registry, dir.path(), Format::Video);
        let id = request.id;

        process_job(request, &registry, &ScriptedFetcher::failing("network error"));

        let job = registry.get(id).unwrap();
        assert_eq!(job.state(), State::Failed);
        assert_eq!(job.error_message.as_deref(), Some("network error"));
        assert_eq!(job.progress, FAILED_PROGRESS);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_vanished_job_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(TimeDelta::hours(12));
        let request = FetchRequest {
            id: JobId::new(),
            url: "http://x".to_owned(),
            format: Format::Audio,
            download_dir: dir.path().to_path_buf(),
        };
        let path = request.output_path();

        process_job(request, &registry, &ScriptedFetcher::succeeding(vec![50.0]));

        assert!(!path.exists());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unrepresentable_expiry_discards_output() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::new(TimeDelta::days(365 * 1_000_000));
        let request = start_job(&registry, dir.path(), Format::Audio);
        let id = request.id;
        let path = request.output_path();

        process_job(request, &registry, &ScriptedFetcher::succeeding(vec![100.0]));

        let job = registry.get(id).unwrap();
        assert_eq!(job.state(), State::Failed);
        assert!(job.expires_at.is_none());
        assert!(!path.exists());
    }

    async fn wait_for_terminal(registry: &JobRegistry, id: JobId) -> State {
        for _ in 0..200 {
            let state = registry.get(id).unwrap().state();
            if matches!(state, State::Succeeded | State::Failed) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never finished");
    }

    #[tokio::test]
    async fn test_processor_runs_dispatched_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new(TimeDelta::hours(12)));
        let (tx, rx) = mpsc::unbounded_channel();
        let fetcher: Arc<dyn MediaFetcher> = Arc::new(ScriptedFetcher::succeeding(vec![10.0, 90.0]));
        let handle = tokio::spawn(processor(rx, registry.clone(), fetcher));

        let first = start_job(&registry, dir.path(), Format::Audio);
        let second = start_job(&registry, dir.path(), Format::Video);
        let (first_id, second_id) = (first.id, second.id);
        tx.send(first).unwrap();
        tx.send(second).unwrap();

        assert_eq!(wait_for_terminal(&registry, first_id).await, State::Succeeded);
        assert_eq!(wait_for_terminal(&registry, second_id).await, State::Succeeded);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_processor_survives_worker_panic() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new(TimeDelta::hours(12)));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(processor(rx, registry.clone(), Arc::new(PanickingFetcher)));

        let request = start_job(&registry, dir.path(), Format::Audio);
        let id = request.id;
        tx.send(request).unwrap();

        assert_eq!(wait_for_terminal(&registry, id).await, State::Failed);
        assert_eq!(
            registry.get(id).unwrap().error_message.as_deref(),
            Some("internal error while processing")
        );
    }
}
