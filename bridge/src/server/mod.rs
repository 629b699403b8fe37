// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only query surface: health, per-direction sync status and failed
//! records, plus the prometheus scrape endpoint.

use crate::error::RelayerError;
use crate::sync_engine::pause::PauseSignal;
use crate::sync_engine::{DirectionReport, SyncEngine};
use crate::types::{Direction, ProcessedRecord};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

pub const HEALTH_PATH: &str = "/health";
pub const STATUS_PATH: &str = "/status";
// Note: Using :param syntax for axum 0.7.x
pub const FAILED_RECORDS_PATH: &str = "/records/:direction/failed";
pub const METRICS_PATH: &str = "/metrics";

#[derive(serde::Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub directions: Vec<DirectionReport>,
    pub pause: Option<PauseSignal>,
}

pub fn run_server(
    socket_address: &SocketAddr,
    engine: Arc<SyncEngine>,
) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address).await?;
        info!("Status server listening on {}", socket_address);
        axum::serve(listener, make_router(engine).into_make_service()).await?;
        Ok(())
    })
}

pub(crate) fn make_router(engine: Arc<SyncEngine>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(STATUS_PATH, get(status))
        .route(FAILED_RECORDS_PATH, get(failed_records))
        .with_state(engine)
}

pub fn run_metrics_server(
    socket_address: &SocketAddr,
    registry: Registry,
) -> tokio::task::JoinHandle<anyhow::Result<()>> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address).await?;
        info!("Metrics server listening on {}", socket_address);
        let router = Router::new()
            .route(METRICS_PATH, get(metrics))
            .with_state(registry);
        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    })
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            RelayerError::DirectionNotConfigured(_) => StatusCode::NOT_FOUND,
            RelayerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, format!("Something went wrong: {}", self)).into_response()
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn status(State(engine): State<Arc<SyncEngine>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        directions: engine.report().await,
        pause: engine.pause_signal(),
    })
}

async fn failed_records(
    Path(direction): Path<String>,
    State(engine): State<Arc<SyncEngine>>,
) -> Result<Json<Vec<ProcessedRecord>>, RelayerError> {
    let direction = direction
        .parse::<Direction>()
        .map_err(RelayerError::InvalidRequest)?;
    Ok(Json(engine.failed_records(direction).await?))
}

async fn metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {:?}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
