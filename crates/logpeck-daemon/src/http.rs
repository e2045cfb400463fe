// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP control surface for task management.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use logpeck::errors::PeckError;
use logpeck::pecker::Pecker;
use logpeck::task::TaskConfig;

const ADD_PATH: &str = "/peck_task/add";
const UPDATE_PATH: &str = "/peck_task/update";
const REMOVE_PATH: &str = "/peck_task/remove";
const START_PATH: &str = "/peck_task/start";
const STOP_PATH: &str = "/peck_task/stop";
const TEST_PATH: &str = "/peck_task/test";
const LIST_PATH: &str = "/peck_task/list";
const LIST_STATS_PATH: &str = "/peck_task/liststats";
const PECKER_STAT_PATH: &str = "/pecker/stat";
const VERSION_PATH: &str = "/version";

#[derive(Clone)]
pub struct ApiState {
    pub pecker: Arc<Pecker>,
    /// Cancelled when the registry reports an unrecoverable error.
    pub shutdown: CancellationToken,
}

/// Only the task name is read from bodies naming an existing task.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskName {
    name: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(ADD_PATH, post(add))
        .route(UPDATE_PATH, post(update))
        .route(REMOVE_PATH, post(remove))
        .route(START_PATH, post(start))
        .route(STOP_PATH, post(stop))
        .route(TEST_PATH, post(test))
        .route(LIST_PATH, get(list))
        .route(LIST_STATS_PATH, get(list_stats))
        .route(PECKER_STAT_PATH, get(pecker_stat))
        .route(VERSION_PATH, get(version))
        .with_state(state)
}

fn status_of(err: &PeckError) -> StatusCode {
    match err {
        PeckError::Config(_) => StatusCode::BAD_REQUEST,
        PeckError::NotFound(_) => StatusCode::NOT_FOUND,
        PeckError::AlreadyExists(_)
        | PeckError::AlreadyInState { .. }
        | PeckError::AlreadyStarted => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(state: &ApiState, err: &PeckError) -> Response {
    if err.is_unrecoverable() {
        error!("HTTP | {err}, shutting down");
        state.shutdown.cancel();
    } else {
        debug!("HTTP | Request failed: {err}");
    }
    (status_of(err), err.to_string()).into_response()
}

fn respond(state: &ApiState, result: Result<(), PeckError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(e) => error_response(state, &e),
    }
}

fn parse_config(body: &[u8]) -> Result<TaskConfig, PeckError> {
    TaskConfig::from_json(body)
}

fn parse_name(body: &[u8]) -> Result<String, PeckError> {
    let task: TaskName = serde_json::from_slice(body)
        .map_err(|e| PeckError::Config(format!("Parse error: {e}")))?;
    if task.name.trim().is_empty() {
        return Err(PeckError::Config("Parse error: need field Name".to_string()));
    }
    Ok(task.name)
}

async fn add(State(state): State<ApiState>, body: Bytes) -> Response {
    let result = match parse_config(&body) {
        Ok(config) => state.pecker.add_peck_task(config, None).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn update(State(state): State<ApiState>, body: Bytes) -> Response {
    let result = match parse_config(&body) {
        Ok(config) => state.pecker.update_peck_task(config).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn remove(State(state): State<ApiState>, body: Bytes) -> Response {
    let result = match parse_name(&body) {
        Ok(name) => state.pecker.remove_peck_task(&name).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn start(State(state): State<ApiState>, body: Bytes) -> Response {
    let result = match parse_name(&body) {
        Ok(name) => state.pecker.start_peck_task(&name).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn stop(State(state): State<ApiState>, body: Bytes) -> Response {
    let result = match parse_name(&body) {
        Ok(name) => state.pecker.stop_peck_task(&name).await,
        Err(e) => Err(e),
    };
    respond(&state, result)
}

async fn test(State(state): State<ApiState>, body: Bytes) -> Response {
    let config = match parse_config(&body) {
        Ok(config) => config,
        Err(e) => return error_response(&state, &e),
    };
    match state.pecker.test_peck_task(&config).await {
        Ok(results) => Json(results).into_response(),
        Err(e) => error_response(&state, &e),
    }
}

async fn list(State(state): State<ApiState>) -> Response {
    match state.pecker.list_peck_task().await {
        Ok(configs) => Json(configs).into_response(),
        Err(e) => error_response(&state, &e),
    }
}

async fn list_stats(State(state): State<ApiState>) -> Response {
    match state.pecker.list_task_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(&state, &e),
    }
}

async fn pecker_stat(State(state): State<ApiState>) -> Response {
    Json(state.pecker.get_stat().await).into_response()
}

async fn version() -> Response {
    Json(json!({ "Version": env!("CARGO_PKG_VERSION") })).into_response()
}
