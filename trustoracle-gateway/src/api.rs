//! Management surface: read-only projections of the store plus the
//! manual batch trigger.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use trustoracle_core::{run_batch, BatchSummary, ChainGateway, Device, Store, SubmissionRecord};

use crate::config::GatewayConfig;
use crate::connections::ConnectionMap;
use crate::error::ApiError;
use crate::messages::PetView;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub chain: Option<Arc<dyn ChainGateway>>,
    pub connections: ConnectionMap,
    pub config: Arc<GatewayConfig>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/devices", get(list_devices))
        .route("/api/v1/devices/{id}", get(get_device))
        .route("/api/v1/devices/{id}/submissions", get(device_submissions))
        .route("/api/v1/pending", get(pending))
        .route("/api/v1/pets/{device_id}", get(get_pet))
        .route("/api/v1/batch/run", post(trigger_batch))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct StatusView {
    devices: i64,
    submissions: i64,
    pending: i64,
    active_connections: usize,
    chain_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_balance: Option<String>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusView>, ApiError> {
    let chain_balance = match &state.chain {
        Some(chain) => {
            let call = chain.get_balance();
            match tokio::time::timeout(state.config.chain_call_timeout, call).await {
                Ok(Ok(balance)) => Some(balance),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "balance lookup failed");
                    None
                }
                Err(_) => None,
            }
        }
        None => None,
    };

    Ok(Json(StatusView {
        devices: state.store.count_devices()?,
        submissions: state.store.count_submissions()?,
        pending: state.store.count_pending()?,
        active_connections: state.connections.len().await,
        chain_enabled: state.chain.is_some(),
        chain_balance,
    }))
}

#[derive(Serialize)]
struct DeviceView {
    device_id: String,
    public_key: String,
    registered_at: i64,
    last_seen: i64,
    total_steps: i64,
    total_submissions: i64,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chain_device_id: Option<String>,
}

impl From<&Device> for DeviceView {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.device_id.clone(),
            public_key: format!("0x{}", hex::encode(&device.public_key)),
            registered_at: device.registered_at,
            last_seen: device.last_seen,
            total_steps: device.total_steps,
            total_submissions: device.total_submissions,
            status: device.status.as_str().to_string(),
            chain_device_id: device.chain_device_id.clone(),
        }
    }
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<Vec<DeviceView>>, ApiError> {
    let devices = state.store.list_devices()?;
    Ok(Json(devices.iter().map(DeviceView::from).collect()))
}

async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeviceView>, ApiError> {
    let device = state
        .store
        .get_device(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("device {}", id)))?;
    Ok(Json(DeviceView::from(&device)))
}

#[derive(Serialize)]
struct SubmissionView {
    id: i64,
    device_id: String,
    step_count: u32,
    timestamp: i64,
    battery_percent: u8,
    received_at: i64,
    verified: bool,
    submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tx_digest: Option<String>,
}

impl From<&SubmissionRecord> for SubmissionView {
    fn from(record: &SubmissionRecord) -> Self {
        Self {
            id: record.id,
            device_id: record.device_id.clone(),
            step_count: record.step_count,
            timestamp: record.timestamp,
            battery_percent: record.battery_percent,
            received_at: record.received_at,
            verified: record.verified,
            submitted: record.submitted,
            tx_digest: record.tx_digest.clone(),
        }
    }
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn device_submissions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    state
        .store
        .get_device(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("device {}", id)))?;
    let records = state
        .store
        .list_for_device(&id, query.limit.unwrap_or(50).min(500))?;
    Ok(Json(records.iter().map(SubmissionView::from).collect()))
}

async fn pending(State(state): State<AppState>) -> Result<Json<Vec<SubmissionView>>, ApiError> {
    let records = state.store.list_pending(None)?;
    Ok(Json(records.iter().map(SubmissionView::from).collect()))
}

async fn get_pet(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<PetView>, ApiError> {
    let pet = state
        .store
        .find_pet(&device_id)?
        .ok_or_else(|| ApiError::NotFound(format!("pet for device {}", device_id)))?;
    Ok(Json(PetView::from(&pet)))
}

/// Manual batch trigger: runs the same path as the scheduled task and
/// returns its summary synchronously.
async fn trigger_batch(State(state): State<AppState>) -> Result<Json<BatchSummary>, ApiError> {
    let chain = state.chain.as_ref().ok_or(ApiError::ChainDisabled)?;
    let summary = run_batch(
        &state.store,
        chain.as_ref(),
        state.config.chain_call_timeout,
    )
    .await?;
    Ok(Json(summary))
}
