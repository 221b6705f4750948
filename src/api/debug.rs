use axum::extract::State;
use log::warn;
use serde::Serialize;
use std::time::Instant;

use super::{ApiResponse, ApiResult, AppState};
use crate::accessor::{diagnose_contracts, ContractDiagnostic};

pub async fn contracts(State(state): State<AppState>) -> ApiResult<Vec<ContractDiagnostic>> {
    Ok(ApiResponse::ok(diagnose_contracts(&*state.reader, &state.contracts).await))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcDiagnostic {
    connected: bool,
    chain_id: u64,
    block_number: Option<u64>,
    latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Asks the node for the latest block, giving up after the configured RPC
/// timeout. An unreachable node is reported in the payload, not as a failure.
pub async fn rpc(State(state): State<AppState>) -> ApiResult<RpcDiagnostic> {
    let started = Instant::now();
    let result = tokio::time::timeout(state.rpc_timeout, state.reader.block_number()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (block_number, error) = match result {
        Ok(Ok(block)) => (Some(block), None),
        Ok(Err(e)) => (None, Some(format!("{:#}", e))),
        Err(_) => (None, Some(format!("no answer within {} ms", state.rpc_timeout.as_millis()))),
    };
    if let Some(e) = &error {
        warn!("RPC diagnostic failed: {}", e);
    }

    Ok(ApiResponse::ok(RpcDiagnostic {
        connected: block_number.is_some(),
        chain_id: state.chain_id,
        block_number,
        latency_ms,
        error,
    }))
}
