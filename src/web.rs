use actix_web::{
    get,
    http::header::{self, ContentDisposition, DispositionParam, DispositionType},
    post, web, App, HttpResponse, HttpServer, Responder, Result,
};
use serde::Deserialize;
use tokio::fs;
use tokio_util::io::ReaderStream;

use crate::error::JobError;
use crate::models::{Format, JobId, Status};
use crate::tracker::Tracker;

pub struct AppState {
    tracker: Tracker,
}

impl AppState {
    pub fn new(tracker: Tracker) -> Self {
        AppState { tracker }
    }
}

#[derive(Deserialize)]
struct SubmitParams {
    url: String,
}

#[derive(Deserialize)]
struct StartParams {
    fmt: Option<String>,
}

const INDEX_PAGE: &str = r#"<!doctype html>
<title>Media Downloader</title>
<h2>Enter media URL</h2>
<form method="POST">
  URL: <input name="url" required>
  <button type="submit">Next</button>
</form>
"#;

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

fn parse_id(raw: &str) -> Result<JobId, JobError> {
    raw.parse::<JobId>()
}

fn content_type(format: Format) -> &'static str {
    match format {
        Format::Audio => "audio/mpeg",
        Format::Video => "video/mp4",
    }
}

#[get("/")]
async fn index() -> impl Responder {
    html(INDEX_PAGE.to_owned())
}

#[post("/")]
async fn submit(data: web::Data<AppState>, params: web::Form<SubmitParams>) -> impl Responder {
    let id = data.tracker.submit(params.into_inner().url);

    HttpResponse::SeeOther()
        .insert_header((header::LOCATION, format!("/dl-temp/{id}")))
        .finish()
}

#[get("/dl-temp/{id}")]
async fn choose_format(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, JobError> {
    let id = parse_id(&path)?;
    let job = data.tracker.job(id)?;

    Ok(html(format!(
        r#"<!doctype html>
<title>Download Temp</title>
<h2>Choose format for download</h2>
<p>{url}</p>
<a href="/start/{id}?fmt=mp3"><button>MP3</button></a>
<a href="/start/{id}?fmt=mp4"><button>MP4</button></a>
"#,
        url = escape_html(&job.source_url),
    )))
}

#[get("/start/{id}")]
async fn start(
    data: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<StartParams>,
) -> Result<HttpResponse, JobError> {
    let id = parse_id(&path)?;
    let fmt = params.into_inner().fmt.unwrap_or_default();

    data.tracker.start(id, &fmt)?;

    Ok(html(format!(
        r#"<!doctype html>
<title>Downloading...</title>
<h2>Downloading in background...</h2>
<p>Refresh <a href="/link/{id}">here</a> to get your link once done.</p>
"#
    )))
}

#[get("/link/{id}")]
async fn link(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, JobError> {
    let id = parse_id(&path)?;

    let body = match data.tracker.status(id)? {
        Status::Pending { .. } => "Still downloading...".to_owned(),
        Status::Running { percent } => format!("Still downloading... ({percent:.0}%)"),
        Status::Failed { error } => format!("Download failed: {}", escape_html(&error)),
        Status::Done { download_location } => format!(
            r#"<!doctype html>
<title>Download Ready</title>
<h2>Your download is ready</h2>
<p>Use wget/curl to download (valid 12h):</p>
<p><a href="{download_location}">{download_location}</a></p>
"#
        ),
    };

    Ok(html(body))
}

#[get("/status/{id}")]
async fn status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<web::Json<Status>, JobError> {
    let id = parse_id(&path)?;
    Ok(web::Json(data.tracker.status(id)?))
}

#[get("/file/{id}")]
async fn download_file(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, JobError> {
    let id = parse_id(&path)?;
    let output = data.tracker.output(id)?;

    // Once opened, the sweeper unlinking the file does not cut the stream short.
    let file = fs::File::open(&output.path).await.map_err(|err| {
        tracing::warn!(job_id = %id, ?err, "output file could not be opened");
        JobError::NotFound
    })?;

    let filename = format!("{id}.{}", output.format.extension());

    Ok(HttpResponse::Ok()
        .content_type(content_type(output.format))
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(filename)],
        })
        .streaming(ReaderStream::new(file)))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(submit)
        .service(choose_format)
        .service(start)
        .service(link)
        .service(status)
        .service(download_file);
}

pub async fn start_web_server(tracker: Tracker, host: &str, port: u16) -> std::io::Result<()> {
    let app_state = web::Data::new(AppState::new(tracker));

    tracing::info!("Starting web server at {host}:{port}...");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((host, port))?
    .run()
    .await
}
