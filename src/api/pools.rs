use axum::extract::{Path, Query, State};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use super::{parse_address, ApiError, ApiResponse, ApiResult, AppState};
use crate::discovery::InitOutcome;
use crate::evaluator::{self, Evaluation};
use crate::types::{Pool, PoolMetrics};

pub async fn list_pools(State(state): State<AppState>) -> ApiResult<Vec<Pool>> {
    Ok(ApiResponse::ok(state.registry.get_all_pools()))
}

pub async fn get_pool(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Pool> {
    let address = parse_address(&address)?;
    state
        .registry
        .get_pool(&address)
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound(format!("pool {:?} not found", address)))
}

pub async fn get_metrics(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<PoolMetrics> {
    let address = parse_address(&address)?;
    state
        .registry
        .get_pool_metrics(&address)
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound(format!("pool {:?} not found", address)))
}

pub async fn reset_metrics(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<PoolMetrics> {
    let address = parse_address(&address)?;
    state.registry.reset_metrics(&address)?;
    state
        .registry
        .get_pool_metrics(&address)
        .map(ApiResponse::ok)
        .ok_or_else(|| ApiError::NotFound(format!("pool {:?} not found", address)))
}

/// Live status poll of a registered pool.
pub async fn refresh(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Pool> {
    let address = parse_address(&address)?;
    if !state.registry.contains(&address) {
        return Err(ApiError::NotFound(format!("pool {:?} not found", address)));
    }
    let pool = state.init.discovery().refresh_pool(address).await?;
    Ok(ApiResponse::ok(pool))
}

/// Manual scan: skips the cooldown but still refuses to overlap a running one.
pub async fn discover(State(state): State<AppState>) -> ApiResult<InitOutcome> {
    Ok(ApiResponse::ok(state.init.run(true).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateParams {
    reserve_a: Option<String>,
    reserve_b: Option<String>,
    target_ratio: Option<String>,
    decimals_a: Option<String>,
    decimals_b: Option<String>,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::BadRequest(format!("missing parameter {}", name))),
    }
}

fn decimals(value: &Option<String>, name: &str) -> Result<u8, ApiError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, v))),
    }
}

pub(crate) fn parse_target_ratio(raw: &str) -> Result<Decimal, ApiError> {
    let target = Decimal::from_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("invalid targetRatio: {}", raw)))?;
    if target <= Decimal::ZERO {
        return Err(ApiError::BadRequest("targetRatio must be positive".to_string()));
    }
    Ok(target)
}

/// Pure evaluator over caller-supplied raw reserves.
pub async fn evaluate(
    State(state): State<AppState>,
    Query(params): Query<EvaluateParams>,
) -> ApiResult<Evaluation> {
    let reserve_a = required(&params.reserve_a, "reserveA")?;
    let reserve_b = required(&params.reserve_b, "reserveB")?;
    let target = parse_target_ratio(required(&params.target_ratio, "targetRatio")?)?;

    let evaluation = evaluator::evaluate_raw(
        reserve_a,
        reserve_b,
        decimals(&params.decimals_a, "decimalsA")?,
        decimals(&params.decimals_b, "decimalsB")?,
        target,
        state.policy,
    )?;
    Ok(ApiResponse::ok(evaluation))
}
