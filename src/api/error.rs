use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::warn;

use super::response::ApiResponse;
use crate::executor::RebalanceError;
use crate::registry::RegistryError;
use crate::swap::SwapError;
use crate::types::conversions::ConversionError;

/// Failure at the HTTP boundary. Every variant renders as the JSON envelope
/// with `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("API request failed: {}", self);
        }
        (status, ApiResponse::failure(self.to_string())).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl From<ConversionError> for ApiError {
    fn from(e: ConversionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<SwapError> for ApiError {
    fn from(e: SwapError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownPool(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RebalanceError> for ApiError {
    fn from(e: RebalanceError) -> Self {
        match e {
            RebalanceError::UnknownPool(_) => ApiError::NotFound(e.to_string()),
            RebalanceError::NotNeeded(_) | RebalanceError::Rejected(_) | RebalanceError::Swap(_) => {
                warn!("Rebalance refused: {}", e);
                ApiError::BadRequest(e.to_string())
            }
            RebalanceError::Other(inner) => ApiError::from(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[test]
    fn maps_domain_errors_to_status_codes() {
        let unknown = ApiError::from(RegistryError::UnknownPool(Address::zero()));
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let bad = ApiError::from(ConversionError::InvalidAmount("x".into()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let rejected = ApiError::from(RebalanceError::Rejected("impact".into()));
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let rpc = ApiError::from(anyhow::anyhow!("connection refused"));
        assert_eq!(rpc.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(rpc.to_string(), "connection refused");
    }
}
