use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use regex::Regex;

use crate::error::FetchError;
use crate::models::{build_path, Format, JobId};

/// Everything a media tool needs to produce the output of one job.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: JobId,
    pub url: String,
    pub format: Format,
    pub download_dir: PathBuf,
}

impl FetchRequest {
    pub fn output_path(&self) -> PathBuf {
        build_path(&self.download_dir, self.id, self.format)
    }
}

/// The external downloader/transcoder.
///
/// `fetch` blocks until the tool is done. It may call `progress` any number
/// of times with a percentage in `[0, 100]`.
pub trait MediaFetcher: Send + Sync {
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError>;
}

pub struct YtDlp {
    executable: String,
    cookies_file: Option<PathBuf>,
    progress_re: Regex,
}

impl YtDlp {
    pub fn new(executable: impl Into<String>, cookies_file: Option<PathBuf>) -> Self {
        YtDlp {
            executable: executable.into(),
            cookies_file,
            progress_re: Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").unwrap(),
        }
    }

    fn cookies(&self) -> Option<&Path> {
        // The cookie file is optional and may appear or vanish at runtime.
        self.cookies_file.as_deref().filter(|path| path.is_file())
    }

    fn parse_progress(&self, line: &str) -> Option<f32> {
        let cap = self.progress_re.captures(line)?;
        cap.get(1)?.as_str().parse::<f32>().ok()
    }
}

fn build_arguments(request: &FetchRequest, cookies: Option<&Path>) -> Vec<String> {
    let template = request
        .download_dir
        .join(format!("{}.%(ext)s", request.id));

    let mut arguments: Vec<String> = vec![
        "--newline".to_owned(),
        "-o".to_owned(),
        template.to_string_lossy().into_owned(),
    ];

    let format_arguments = match request.format {
        Format::Audio => "-f bestaudio -x --audio-format mp3",
        Format::Video => "-f bestvideo+bestaudio --merge-output-format mp4",
    };
    arguments.extend(format_arguments.split(' ').map(str::to_owned));

    if let Some(path) = cookies {
        arguments.push("--cookies".to_owned());
        arguments.push(path.to_string_lossy().into_owned());
    }

    arguments.push("--".to_owned());
    arguments.push(request.url.clone());
    arguments
}

fn error_text(stderr: &str) -> Option<String> {
    let errors: Vec<&str> = stderr
        .lines()
        .filter(|line| line.starts_with("ERROR:"))
        .collect();

    if !errors.is_empty() {
        return Some(errors.join("\n"));
    }

    let trimmed = stderr.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

impl MediaFetcher for YtDlp {
    fn fetch(
        &self,
        request: &FetchRequest,
        progress: &mut dyn FnMut(f32),
    ) -> Result<PathBuf, FetchError> {
        let arguments = build_arguments(request, self.cookies());

        tracing::debug!(job_id = %request.id, ?arguments, "launching {}", self.executable);

        let mut process = Command::new(&self.executable)
            .args(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stderr on the side so a chatty tool never blocks on a full pipe.
        let stderr_reader = process.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        if let Some(stdout) = process.stdout.take() {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if let Some(percent) = self.parse_progress(&line) {
                    progress(percent);
                }
            }
        }

        let exit_status = process.wait()?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !exit_status.success() {
            return Err(FetchError::Failed(
                error_text(&stderr)
                    .unwrap_or_else(|| format!("{} failed ({exit_status})", self.executable)),
            ));
        }

        let output_path = request.output_path();
        if !output_path.is_file() {
            return Err(FetchError::MissingOutput(output_path));
        }

        Ok(output_path)
    }
}
