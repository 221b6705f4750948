use axum::extract::{Query, State};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::discovery::{InitOutcome, InitStatus};

static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Pins the uptime origin to server start rather than the first status call.
pub fn mark_started() {
    Lazy::force(&STARTED);
}

#[derive(Debug, Deserialize)]
pub struct InitializeParams {
    force: Option<String>,
}

fn parse_force(raw: Option<&str>) -> Result<bool, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) => v
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid force: {} (expected true or false)", v))),
    }
}

pub async fn initialize(State(state): State<AppState>, Query(params): Query<InitializeParams>) -> ApiResult<InitOutcome> {
    let force = parse_force(params.force.as_deref())?;
    let outcome = state.init.run(force).await?;
    Ok(ApiResponse::ok(outcome))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    chain_id: u64,
    mock_network: bool,
    aggregator_configured: bool,
    uptime_seconds: u64,
    initialization: InitStatus,
}

pub async fn status(State(state): State<AppState>) -> ApiResult<SystemStatus> {
    Ok(ApiResponse::ok(SystemStatus {
        chain_id: state.chain_id,
        mock_network: state.swaps.is_mock_network(),
        aggregator_configured: state.swaps.aggregator_configured(),
        uptime_seconds: STARTED.elapsed().as_secs(),
        initialization: state.init.status(),
    }))
}
