//! HTTP API for recordings and replays
//!
//! ## Endpoints
//!
//! - `GET /recordings` - List recordings (`rids` optional CSV filter)
//! - `DELETE /recording` - Delete a recording (`rid`)
//! - `POST /record` - Start a recording (`type` = stream | batch | query)
//! - `POST /replay` - Replay a recording into a task (`name`, `id`,
//!   `clock`, `rec-time`)
//!
//! Errors are JSON bodies of the form `{"Error": "..."}` with 400 for
//! malformed parameters, 404 for unknown tasks or recordings, and 500
//! for internal failures.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::clock::{Clock, FastClock, WallClock};
use crate::error::SluiceError;
use crate::models::codec::Precision;
use crate::models::TaskType;
use crate::query;
use crate::replay::{Recorder, RecordingInfo, RecordingStore, Replayer};
use crate::task::{Task, TaskMaster, TaskStore};

/// Shared state for the replay API
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RecordingStore>,
    pub recorder: Arc<Recorder>,
    pub task_store: Arc<dyn TaskStore>,
}

/// Build the replay API router
pub fn create_replay_router(state: ApiState) -> Router {
    Router::new()
        .route("/recordings", get(list_recordings))
        .route("/recording", delete(delete_recording))
        .route("/record", post(record))
        .route("/replay", post(replay))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ListResponse {
    #[serde(rename = "Recordings")]
    recordings: Vec<RecordingInfo>,
}

#[derive(Debug, Serialize)]
struct RecordResponse {
    #[serde(rename = "RecordingID")]
    recording_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    #[serde(rename = "Error")]
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.into(),
        }),
    )
        .into_response()
}

fn status_for(err: &SluiceError) -> StatusCode {
    match err {
        SluiceError::Request(_) | SluiceError::Query(_) => StatusCode::BAD_REQUEST,
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    rids: Option<String>,
}

async fn list_recordings(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Response {
    let ids: Vec<String> = params
        .rids
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    match state.store.list(&ids) {
        Ok(recordings) => (StatusCode::OK, Json(ListResponse { recordings })).into_response(),
        // Directory-read failures have always surfaced as 404 here;
        // callers depend on the status.
        Err(e) => error_response(StatusCode::NOT_FOUND, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    rid: Option<String>,
}

async fn delete_recording(
    State(state): State<ApiState>,
    Query(params): Query<DeleteParams>,
) -> Response {
    let Some(rid) = params.rid.filter(|r| !r.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "no recording ID specified");
    };
    state.store.delete(&rid);
    StatusCode::OK.into_response()
}

#[derive(Debug, Deserialize)]
struct RecordParams {
    #[serde(rename = "type")]
    record_type: Option<String>,
    name: Option<String>,
    duration: Option<String>,
    start: Option<String>,
    past: Option<String>,
    stop: Option<String>,
    query: Option<String>,
    ttype: Option<String>,
}

async fn record(State(state): State<ApiState>, Query(params): Query<RecordParams>) -> Response {
    let rid = Recorder::next_id();
    let result = match params.record_type.as_deref() {
        Some("stream") => record_stream(&state, rid, &params).await,
        Some("batch") => record_batch(&state, rid, &params).await,
        Some("query") => record_query(&state, rid, &params).await,
        _ => Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid recording type",
        )),
    };

    match result {
        Ok(()) => {
            info!(recording = %rid, "recording created");
            (
                StatusCode::OK,
                Json(RecordResponse {
                    recording_id: rid.to_string(),
                }),
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}

async fn record_stream(
    state: &ApiState,
    rid: Uuid,
    params: &RecordParams,
) -> Result<(), Response> {
    let task = load_task(state, params.name.as_deref())?;
    let duration = params
        .duration
        .as_deref()
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "no duration specified"))?;
    let duration = query::parse_duration(duration).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid duration string: {}", e),
        )
    })?;

    state
        .recorder
        .record_stream(rid, duration, &task.dbrps)
        .await
        .map_err(internal)
}

async fn record_batch(state: &ApiState, rid: Uuid, params: &RecordParams) -> Result<(), Response> {
    if params.start.is_some() && params.past.is_some() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "must not pass both 'start' and 'past' parameters",
        ));
    }

    let start = match (&params.start, &params.past) {
        (Some(s), _) => Some(parse_rfc3339(s)?),
        (_, Some(p)) => {
            let past = query::parse_duration(p)
                .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;
            let past = chrono::Duration::from_std(past).map_err(|e| {
                error_response(StatusCode::BAD_REQUEST, format!("past out of range: {}", e))
            })?;
            Some(Utc::now() - past)
        }
        _ => None,
    };
    let stop = match &params.stop {
        Some(s) => Some(parse_rfc3339(s)?),
        None => None,
    };

    let task = load_task(state, params.name.as_deref())?;
    state
        .recorder
        .record_batch(rid, &task, start, stop)
        .await
        .map_err(internal)
}

async fn record_query(state: &ApiState, rid: Uuid, params: &RecordParams) -> Result<(), Response> {
    let q = params
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "must pass query parameter"))?;
    let task_type = match params.ttype.as_deref() {
        Some("stream") => TaskType::Stream,
        Some("batch") => TaskType::Batch,
        other => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid type {:?}", other.unwrap_or("")),
            ))
        }
    };

    state
        .recorder
        .record_query(rid, q, task_type)
        .await
        .map_err(internal)
}

#[derive(Debug, Deserialize)]
struct ReplayParams {
    name: Option<String>,
    id: Option<String>,
    clock: Option<String>,
    #[serde(rename = "rec-time")]
    rec_time: Option<String>,
}

async fn replay(State(state): State<ApiState>, Query(params): Query<ReplayParams>) -> Response {
    let rec_time = match params.rec_time.as_deref() {
        None | Some("") => false,
        Some(s) => match s.parse::<bool>() {
            Ok(b) => b,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        },
    };

    let task = match state
        .task_store
        .load(params.name.as_deref().unwrap_or_default())
    {
        Ok(t) => t,
        Err(e) => {
            return error_response(StatusCode::NOT_FOUND, format!("task load: {}", e));
        }
    };

    let clock: Arc<dyn Clock> = match params.clock.as_deref() {
        None | Some("") | Some("wall") => Arc::new(WallClock::new()),
        Some("fast") => Arc::new(FastClock::new(Utc::now())),
        Some(other) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid clock type {:?}", other),
            );
        }
    };

    let id = params.id.as_deref().unwrap_or_default();
    info!(task = %task.name, recording = %id, rec_time, "starting replay");

    // Fresh execution environment per replay; torn down on every path.
    let task_master = TaskMaster::new();
    task_master.open();
    let result = run_replay(&state, &task_master, &task, id, clock, rec_time).await;
    match result {
        Ok(()) => match task_master.close().await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Err(resp) => {
            if let Err(e) = task_master.close().await {
                error!(error = %e, "task master close after failed replay");
            }
            resp
        }
    }
}

async fn run_replay(
    state: &ApiState,
    task_master: &Arc<TaskMaster>,
    task: &Task,
    id: &str,
    clock: Arc<dyn Clock>,
    rec_time: bool,
) -> Result<(), Response> {
    // start_task errors already carry their phase prefix
    let executing = task_master
        .start_task(task)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let replayer = Replayer::new(clock);
    let done = match task.task_type {
        TaskType::Stream => {
            let src = state
                .store
                .find_stream(id)
                .map_err(|e| error_response(status_for(&e), format!("replay find: {}", e)))?;
            let sink = task_master.stream_collector().map_err(internal)?;
            replayer.replay_stream(src, sink, rec_time, Precision::Nanosecond)
        }
        TaskType::Batch => {
            let srcs = state
                .store
                .find_batch(id)
                .map_err(|e| error_response(status_for(&e), format!("replay find: {}", e)))?;
            let sinks = task_master.batch_collectors(&task.name).map_err(internal)?;
            replayer.replay_batch(srcs, sinks, rec_time)
        }
    };

    // A task that failed to come up reports before any data moves.
    executing
        .err()
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match done.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("replay: {}", e),
        )),
        Err(_) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "replay: completion channel dropped",
        )),
    }
}

fn load_task(state: &ApiState, name: Option<&str>) -> Result<Task, Response> {
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "no task specified"))?;
    state
        .task_store
        .load(name)
        .map_err(|e| error_response(StatusCode::NOT_FOUND, e.to_string()))
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, Response> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

fn internal(e: SluiceError) -> Response {
    error!(error = %e, "request failed");
    error_response(status_for(&e), e.to_string())
}
