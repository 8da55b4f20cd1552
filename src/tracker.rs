use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::error::JobError;
use crate::fetcher::FetchRequest;
use crate::models::{Format, Job, JobId, State, Status};
use crate::registry::JobRegistry;

/// A finished file ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub path: PathBuf,
    pub format: Format,
}

/// Operations exposed to the HTTP layer.
#[derive(Clone)]
pub struct Tracker {
    registry: Arc<JobRegistry>,
    download_dir: PathBuf,
    channel: UnboundedSender<FetchRequest>,
}

impl Tracker {
    pub fn new(
        registry: Arc<JobRegistry>,
        download_dir: PathBuf,
        channel: UnboundedSender<FetchRequest>,
    ) -> Self {
        Tracker {
            registry,
            download_dir,
            channel,
        }
    }

    pub fn submit(&self, url: impl Into<String>) -> JobId {
        let id = self.registry.create(url);
        tracing::info!(job_id = %id, "job submitted");
        id
    }

    pub fn job(&self, id: JobId) -> Result<Job, JobError> {
        self.registry.get(id).ok_or(JobError::NotFound)
    }

    /// Chooses the output format and hands the job to the processor.
    /// Returns as soon as the job is queued.
    pub fn start(&self, id: JobId, fmt: &str) -> Result<(), JobError> {
        self.job(id)?;
        let format: Format = fmt.parse()?;
        let url = self.registry.start(id, format)?;

        let request = FetchRequest {
            id,
            url,
            format,
            download_dir: self.download_dir.clone(),
        };

        if self.channel.send(request).is_err() {
            tracing::error!(job_id = %id, "processor is not running");
            self.registry.fail(id, JobError::Dispatch.to_string());
            return Err(JobError::Dispatch);
        }

        tracing::info!(job_id = %id, ?format, "job queued");
        Ok(())
    }

    pub fn status(&self, id: JobId) -> Result<Status, JobError> {
        self.job(id).map(|job| Status::from(&job))
    }

    pub fn output(&self, id: JobId) -> Result<Output, JobError> {
        let job = self.job(id)?;

        match (job.state(), job.output_path, job.format) {
            (State::Succeeded, Some(path), Some(format)) => Ok(Output { path, format }),
            _ => Err(JobError::NotReady),
        }
    }
}
