use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub struct Config {
    pub download_dir: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub ytdlp_path: String,
    pub host: String,
    pub port: u16,
    pub expire_completed_jobs_after: Duration,
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            download_dir: PathBuf::from("/downloads"),
            cookies_file: None,
            ytdlp_path: "yt-dlp".to_owned(),
            host: "0.0.0.0".to_owned(),
            port: 5000,
            expire_completed_jobs_after: Duration::from_secs(12 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
    match value {
        None => default,
        Some(text) => text.parse::<T>().unwrap_or_else(|_| {
            tracing::warn!(key, value = %text, "ignoring malformed setting");
            default
        }),
    }
}

/// Longest accepted expiry. Larger values push timestamps past what the
/// clock can represent.
const MAX_EXPIRE_AFTER_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn bounded_expiry(value: Option<String>, default: u64) -> u64 {
    let secs = parse_or("EXPIRE_AFTER_SECS", value, default);
    if secs > MAX_EXPIRE_AFTER_SECS {
        tracing::warn!(secs, max = MAX_EXPIRE_AFTER_SECS, "EXPIRE_AFTER_SECS out of range, using default");
        return default;
    }
    secs
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        Config {
            download_dir: lookup("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            cookies_file: lookup("COOKIES_FILE")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or("PORT", lookup("PORT"), defaults.port),
            expire_completed_jobs_after: Duration::from_secs(bounded_expiry(
                lookup("EXPIRE_AFTER_SECS"),
                defaults.expire_completed_jobs_after.as_secs(),
            )),
            sweep_interval: Duration::from_secs(
                parse_or(
                    "SWEEP_INTERVAL_SECS",
                    lookup("SWEEP_INTERVAL_SECS"),
                    defaults.sweep_interval.as_secs(),
                )
                .max(1),
            ),
        }
    }
}
