//! Control API: health check, job status, a run trigger that launches
//! `cloudpipe run` as an independent child process, and CSV upload/download
//! against the object store.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::{net::TcpListener, process::Command};
use uuid::Uuid;

use crate::{
    journal::{PipelineLog, Stage},
    store::ObjectStore,
};

/// Finished jobs beyond this many are forgotten, oldest first.
pub const MAX_JOB_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Jobs launched by this server, oldest first.
///
/// At most `capacity` jobs are kept; running jobs are never evicted.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_JOB_HISTORY)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    fn start(&self) -> Job {
        let job = Job {
            job_id: Uuid::new_v4(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            error: None,
        };
        let mut jobs = self.jobs.lock();
        jobs.push_back(job.clone());
        while jobs.len() > self.capacity {
            let Some(oldest_finished) = jobs
                .iter()
                .position(|entry| entry.status != JobStatus::Running)
            else {
                break;
            };
            jobs.remove(oldest_finished);
        }
        job
    }

    fn finish(&self, job_id: Uuid, exit_code: Option<i32>, error: Option<String>) {
        let mut jobs = self.jobs.lock();
        if let Some(job) = jobs.iter_mut().find(|job| job.job_id == job_id) {
            job.status = if error.is_none() && exit_code == Some(0) {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            job.finished_at = Some(Utc::now());
            job.exit_code = exit_code;
            job.error = error;
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.lock().iter().find(|job| job.job_id == job_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs.lock().iter().cloned().collect()
    }
}

/// How a run job is launched: `<program> run --config-dir <config_dir>`.
#[derive(Debug, Clone)]
pub struct Launcher {
    pub program: PathBuf,
    pub config_dir: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobRegistry>,
    pub launcher: Arc<Launcher>,
    pub store: Arc<dyn ObjectStore>,
    pub log: Arc<dyn PipelineLog>,
}

impl AppState {
    pub fn new(launcher: Launcher, store: Arc<dyn ObjectStore>, log: Arc<dyn PipelineLog>) -> Self {
        Self {
            jobs: Arc::new(JobRegistry::new()),
            launcher: Arc::new(launcher),
            store,
            log,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/pipeline/status", get(status_handler))
        .route("/api/pipeline/run", post(run_handler))
        .route("/api/upload/csv", post(upload_handler))
        .route("/api/download/{filename}", get(download_handler))
        .with_state(state)
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub job_id: Option<Uuid>,
}

/// All jobs, or one job when `?job_id=` is given.
pub async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> (StatusCode, Json<Value>) {
    match query.job_id {
        Some(job_id) => match state.jobs.get(job_id) {
            Some(job) => (StatusCode::OK, Json(json!(job))),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown job {job_id}") })),
            ),
        },
        None => (StatusCode::OK, Json(json!({ "jobs": state.jobs.snapshot() }))),
    }
}

/// Launches a run and returns its job id without waiting for it.
pub async fn run_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let job = state.jobs.start();
    let launcher = &state.launcher;
    let spawned = Command::new(&launcher.program)
        .arg("run")
        .arg("--config-dir")
        .arg(&launcher.config_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            state.log.info(
                Stage::ControlApi,
                &format!("Job {} started (pid {:?})", job.job_id, child.id()),
            );
            let jobs = Arc::clone(&state.jobs);
            let log = Arc::clone(&state.log);
            let job_id = job.job_id;
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => {
                        log.info(
                            Stage::ControlApi,
                            &format!("Job {job_id} exited with {status}"),
                        );
                        jobs.finish(job_id, status.code(), None);
                    }
                    Err(err) => {
                        log.error(Stage::ControlApi, &format!("Job {job_id}: {err}"));
                        jobs.finish(job_id, None, Some(err.to_string()));
                    }
                }
            });
            (
                StatusCode::ACCEPTED,
                Json(json!({ "job_id": job.job_id, "status": JobStatus::Running })),
            )
        }
        Err(err) => {
            let message = format!("cannot start {:?}: {err}", launcher.program);
            state
                .log
                .error(Stage::ControlApi, &format!("Job {}: {message}", job.job_id));
            state.jobs.finish(job.job_id, None, Some(message.clone()));
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "job_id": job.job_id, "error": message })),
            )
        }
    }
}

fn error_body(code: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Value>) {
    (code, Json(json!({ "error": message.into() })))
}

/// Object names the upload and download routes accept: one path segment.
fn valid_object_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

/// Stores the request body as `?filename=` in the object store.
///
/// Names without a `.csv` suffix get one, matching what the cleaning and
/// sync stages look for.
pub async fn upload_handler(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(filename) = query.filename.map(|name| name.trim().to_string()) else {
        return error_body(StatusCode::BAD_REQUEST, "No file provided");
    };
    if !valid_object_name(&filename) {
        return error_body(StatusCode::BAD_REQUEST, format!("Invalid file name '{filename}'"));
    }
    if body.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Uploaded file is empty");
    }
    let filename = if filename.to_ascii_lowercase().ends_with(".csv") {
        filename
    } else {
        format!("{filename}.csv")
    };

    let store = Arc::clone(&state.store);
    let name = filename.clone();
    let size = body.len();
    let stored = tokio::task::spawn_blocking(move || store.put(&name, &body)).await;
    match stored {
        Ok(Ok(())) => {
            state
                .log
                .info(Stage::ControlApi, &format!("Stored upload {filename} ({size} bytes)"));
            (
                StatusCode::OK,
                Json(json!({
                    "status": "uploaded",
                    "filename": filename,
                    "size": size,
                    "timestamp": Utc::now(),
                })),
            )
        }
        Ok(Err(err)) => {
            state
                .log
                .error(Stage::ControlApi, &format!("Upload {filename}: {err:#}"));
            error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
        Err(err) => error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

/// Returns an object's bytes as `text/csv`.
pub async fn download_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    if !valid_object_name(&filename) {
        return error_body(StatusCode::BAD_REQUEST, format!("Invalid file name '{filename}'"))
            .into_response();
    }
    let store = Arc::clone(&state.store);
    let name = filename.clone();
    let fetched = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
        let exists = store.list()?.iter().any(|object| *object == name);
        if exists { store.get(&name).map(Some) } else { Ok(None) }
    })
    .await;
    match fetched {
        Ok(Ok(Some(bytes))) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Ok(Ok(None)) => {
            error_body(StatusCode::NOT_FOUND, format!("No object named '{filename}'")).into_response()
        }
        Ok(Err(err)) => {
            state
                .log
                .error(Stage::ControlApi, &format!("Download {filename}: {err:#}"));
            error_body(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")).into_response()
        }
        Err(err) => error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Serves the control API until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Binding control API to {addr}"))?;
    let local = listener.local_addr()?;
    state
        .log
        .info(Stage::ControlApi, &format!("Listening on http://{local}"));
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Serving control API")
}

/// Blocking entry point used by the CLI.
pub fn run_blocking(addr: SocketAddr, state: AppState) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(serve(addr, state))
}
