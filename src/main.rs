use std::sync::Arc;

use anyhow::Context;
use chrono::TimeDelta;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use ytserve::config::Config;
use ytserve::fetcher::{MediaFetcher, YtDlp};
use ytserve::processor::processor;
use ytserve::registry::JobRegistry;
use ytserve::sweeper::run_sweeper;
use ytserve::tracker::Tracker;
use ytserve::web::start_web_server;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env();

    std::fs::create_dir_all(&config.download_dir).with_context(|| {
        format!(
            "Failed to create download directory {}",
            config.download_dir.display()
        )
    })?;

    let registry = Arc::new(JobRegistry::new(TimeDelta::from_std(
        config.expire_completed_jobs_after,
    )?));

    let fetcher: Arc<dyn MediaFetcher> =
        Arc::new(YtDlp::new(config.ytdlp_path.clone(), config.cookies_file.clone()));

    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(processor(rx, registry.clone(), fetcher));
    tokio::spawn(run_sweeper(registry.clone(), config.sweep_interval));

    let tracker = Tracker::new(registry, config.download_dir.clone(), tx);

    start_web_server(tracker, &config.host, config.port)
        .await
        .context("web server failed")
}
