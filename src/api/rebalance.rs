use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use ethers::types::Address;
use serde::Deserialize;

use super::pools::parse_target_ratio;
use super::{parse_address, parse_body, ApiError, ApiResponse, ApiResult, AppState};
use crate::estimator::RebalanceEstimate;
use crate::executor::RebalanceOutcome;
use crate::types::conversions::f64_to_decimal;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateParams {
    target_ratio: Option<String>,
}

pub async fn estimate(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<EstimateParams>,
) -> ApiResult<RebalanceEstimate> {
    let address = parse_address(&address)?;
    let pool = state
        .registry
        .get_pool(&address)
        .ok_or_else(|| ApiError::NotFound(format!("pool {:?} not found", address)))?;

    let target = match params.target_ratio.as_deref() {
        Some(raw) => parse_target_ratio(raw)?,
        None => f64_to_decimal(pool.target_ratio)?,
    };
    let estimate = state.estimator.estimate(address, Some(target)).await?;
    Ok(ApiResponse::ok(estimate))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    target_ratio: Option<f64>,
    #[serde(default)]
    from_address: Option<Address>,
}

pub async fn execute(
    State(state): State<AppState>,
    Path(address): Path<String>,
    body: Bytes,
) -> ApiResult<RebalanceOutcome> {
    let address = parse_address(&address)?;
    let body: ExecuteBody = if body.is_empty() {
        ExecuteBody::default()
    } else {
        parse_body(&body)?
    };
    let target = match body.target_ratio {
        Some(t) => Some(parse_target_ratio(&t.to_string())?),
        None => None,
    };
    let outcome = state.executor.execute(address, target, body.from_address).await?;
    Ok(ApiResponse::ok(outcome))
}
