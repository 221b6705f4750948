use axum::extract::{Path, Query, State};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use super::{parse_address, ApiError, ApiResponse, ApiResult, AppState};
use crate::swap::TokenMatch;
use crate::types::conversions::u256_to_decimal;

const DEFAULT_SEARCH_LIMIT: usize = 10;
const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    query: Option<String>,
    limit: Option<String>,
}

pub async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> ApiResult<Vec<TokenMatch>> {
    let query = params.query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(ApiError::BadRequest("missing parameter query".to_string()));
    }
    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => DEFAULT_SEARCH_LIMIT,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ApiError::BadRequest(format!("invalid limit: {}", raw)))?,
    }
    .clamp(1, MAX_SEARCH_LIMIT);
    Ok(ApiResponse::ok(state.swaps.search_tokens(query, limit).await))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenView {
    address: Address,
    name: String,
    symbol: String,
    decimals: u8,
    total_supply: String,
}

pub async fn token_info(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<TokenView> {
    let address = parse_address(&address)?;
    let info = state.reader.token_info(address).await?;
    Ok(ApiResponse::ok(TokenView {
        address: info.address,
        name: info.name,
        symbol: info.symbol,
        decimals: info.decimals,
        total_supply: info.total_supply.to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    token: Address,
    owner: Address,
    symbol: String,
    /// Raw base units.
    balance: String,
    /// Token units.
    formatted: String,
}

pub async fn balance(
    State(state): State<AppState>,
    Path((token, owner)): Path<(String, String)>,
) -> ApiResult<BalanceView> {
    let token = parse_address(&token)?;
    let owner = parse_address(&owner)?;
    let (info, raw) = tokio::try_join!(state.reader.token_info(token), state.reader.balance_of(token, owner))?;
    let formatted = u256_to_decimal(raw, info.decimals)
        .map(|d| d.normalize().to_string())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(ApiResponse::ok(BalanceView {
        token,
        owner,
        symbol: info.symbol,
        balance: raw.to_string(),
        formatted,
    }))
}
