use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::JobError;

/// Progress value stored on a job once it has failed.
pub const FAILED_PROGRESS: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // An id that cannot be parsed can never have been issued.
        Uuid::parse_str(s).map(JobId).map_err(|_| JobError::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Audio,
    Video,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Audio => "mp3",
            Format::Video => "mp4",
        }
    }
}

impl FromStr for Format {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp3" | "audio" => Ok(Format::Audio),
            "mp4" | "video" => Ok(Format::Video),
            other => Err(JobError::InvalidFormat(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// A job record as held by the registry.
///
/// `output_path` and `error_message` are never both set, and `expires_at`
/// is set exactly when `output_path` is.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub format: Option<Format>,
    pub progress: f32,
    pub output_path: Option<PathBuf>,
    pub error_message: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, source_url: String) -> Self {
        Job {
            id,
            source_url,
            format: None,
            progress: 0.0,
            output_path: None,
            error_message: None,
            expires_at: None,
        }
    }

    pub fn state(&self) -> State {
        if self.error_message.is_some() {
            State::Failed
        } else if self.output_path.is_some() {
            State::Succeeded
        } else if self.format.is_some() {
            State::Running
        } else {
            State::Created
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

/// Client-facing projection of a job.
///
/// A finished job points at its download route rather than the file on disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Status {
    Pending {
        percent: f32,
    },
    Running {
        percent: f32,
    },
    Failed {
        error: String,
    },
    Done {
        #[serde(rename = "downloadLocation")]
        download_location: String,
    },
}

impl From<&Job> for Status {
    fn from(job: &Job) -> Self {
        match job.state() {
            State::Created => Status::Pending { percent: 0.0 },
            State::Running => Status::Running {
                percent: job.progress,
            },
            State::Failed => Status::Failed {
                error: job.error_message.clone().unwrap_or_default(),
            },
            State::Succeeded => Status::Done {
                download_location: format!("/file/{}", job.id),
            },
        }
    }
}

pub fn build_path(dir: &Path, id: JobId, format: Format) -> PathBuf {
    dir.join(format!("{id}.{}", format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_format_parsing() {
        assert_eq!("mp3".parse::<Format>().unwrap(), Format::Audio);
        assert_eq!("video".parse::<Format>().unwrap(), Format::Video);
        assert_matches!("wav".parse::<Format>(), Err(JobError::InvalidFormat(f)) if f == "wav");
        assert_matches!("MP3".parse::<Format>(), Err(JobError::InvalidFormat(_)));
    }

    #[test]
    fn test_state_derivation() {
        let mut job = Job::new(JobId::new(), "http://x".to_owned());
        assert_eq!(job.state(), State::Created);

        job.format = Some(Format::Video);
        assert_eq!(job.state(), State::Running);

        job.output_path = Some(PathBuf::from("/out/a.mp4"));
        assert_eq!(job.state(), State::Succeeded);
    }

    #[test]
    fn test_status_projection() {
        let mut job = Job::new(JobId::new(), "http://x".to_owned());
        assert_eq!(Status::from(&job), Status::Pending { percent: 0.0 });

        job.format = Some(Format::Audio);
        job.progress = 40.0;
        assert_eq!(Status::from(&job), Status::Running { percent: 40.0 });

        job.error_message = Some("network error".to_owned());
        job.progress = FAILED_PROGRESS;
        assert_eq!(
            Status::from(&job),
            Status::Failed {
                error: "network error".to_owned()
            }
        );
    }

    #[test]
    fn test_status_json_shape() {
        let job = Job::new(JobId::new(), "http://x".to_owned());
        assert_eq!(
            serde_json::to_value(Status::from(&job)).unwrap(),
            serde_json::json!({"state": "pending", "percent": 0.0})
        );

        let done = Status::Done {
            download_location: "/file/abc".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(done).unwrap(),
            serde_json::json!({"state": "done", "downloadLocation": "/file/abc"})
        );
    }

    #[test]
    fn test_build_path() {
        let id = JobId::new();
        let path = build_path(Path::new("/downloads"), id, Format::Audio);
        assert_eq!(path, PathBuf::from(format!("/downloads/{id}.mp3")));
    }

    #[test]
    fn test_unparseable_id_is_not_found() {
        assert_matches!("not-a-uuid".parse::<JobId>(), Err(JobError::NotFound));
    }
}
