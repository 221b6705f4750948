use axum::body::Bytes;
use axum::extract::State;

use super::{parse_body, ApiResponse, ApiResult, AppState};
use crate::swap::{SwapExecution, SwapQuote, SwapRequest};

pub async fn quote(State(state): State<AppState>, body: Bytes) -> ApiResult<SwapQuote> {
    let request: SwapRequest = parse_body(&body)?;
    Ok(ApiResponse::ok(state.swaps.quote(&request).await?))
}

pub async fn execute(State(state): State<AppState>, body: Bytes) -> ApiResult<SwapExecution> {
    let request: SwapRequest = parse_body(&body)?;
    Ok(ApiResponse::ok(state.swaps.execute(&request).await?))
}
