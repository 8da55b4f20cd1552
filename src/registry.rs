use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::JobError;
use crate::models::{Format, Job, JobId, State, FAILED_PROGRESS};

/// In-memory job store shared between request handlers, workers and the
/// sweeper.
///
/// Every operation takes the lock exactly once, so readers always see a
/// record either before or after a mutation, never in between.
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Job>>,
    expire_after: TimeDelta,
}

impl JobRegistry {
    pub fn new(expire_after: TimeDelta) -> Self {
        JobRegistry {
            jobs: Mutex::new(HashMap::new()),
            expire_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        // Mutations compute everything fallible before touching a record, so
        // a poisoned map still holds whole records.
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create(&self, source_url: impl Into<String>) -> JobId {
        let mut jobs = self.lock();

        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }

        jobs.insert(id, Job::new(id, source_url.into()));
        id
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().get(&id).cloned()
    }

    /// Sets the format on a freshly created job and moves it to Running.
    ///
    /// Returns the source URL the worker should fetch. Only one call per id
    /// can succeed.
    pub fn start(&self, id: JobId, format: Format) -> Result<String, JobError> {
        let mut jobs = self.lock();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound)?;

        if job.state() != State::Created {
            return Err(JobError::AlreadyStarted);
        }

        job.format = Some(format);
        job.progress = 0.0;
        Ok(job.source_url.clone())
    }

    pub fn update_progress(&self, id: JobId, percent: f32) {
        if !percent.is_finite() {
            return;
        }

        let mut jobs = self.lock();
        if let Some(job) = jobs.get_mut(&id) {
            if job.state() == State::Running {
                job.progress = job.progress.max(percent.clamp(0.0, 100.0));
            }
        }
    }

    /// Records a finished output file. Returns `false` when the job is gone
    /// or no longer running, in which case the caller still owns the file.
    pub fn complete(&self, id: JobId, output_path: PathBuf) -> bool {
        self.complete_at(id, output_path, Utc::now())
    }

    /// An expiry past the representable date range fails the job instead,
    /// leaving the file with the caller.
    pub fn complete_at(&self, id: JobId, output_path: PathBuf, now: DateTime<Utc>) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.state() == State::Running => {
                let Some(expires_at) = now.checked_add_signed(self.expire_after) else {
                    job.progress = FAILED_PROGRESS;
                    job.error_message = Some("expiry time out of range".to_owned());
                    return false;
                };

                job.progress = 100.0;
                job.error_message = None;
                job.output_path = Some(output_path);
                job.expires_at = Some(expires_at);
                true
            }
            _ => false,
        }
    }

    pub fn fail(&self, id: JobId, message: impl Into<String>) -> bool {
        let mut jobs = self.lock();
        match jobs.get_mut(&id) {
            Some(job) if job.state() == State::Running => {
                job.progress = FAILED_PROGRESS;
                job.output_path = None;
                job.expires_at = None;
                job.error_message = Some(message.into());
                true
            }
            _ => false,
        }
    }

    /// Removes every job whose expiry is at or before `now` and hands back
    /// their output files for the caller to delete.
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Vec<PathBuf> {
        let mut jobs = self.lock();
        let mut removed = vec![];

        jobs.retain(|_, job| {
            if job.is_expired(now) {
                removed.extend(job.output_path.take());
                false
            } else {
                true
            }
        });

        removed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
