use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qbot_core::{CandleError, Horizon, StartRejection};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("training already in progress")]
    AlreadyRunning {
        current_ticker: Option<String>,
        current_horizon: Option<Horizon>,
        progress_percent: u8,
    },

    #[error("no tickers found")]
    NoTickers,

    #[error("invalid tickers")]
    InvalidTickers(Vec<String>),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    InvalidQuery(#[from] CandleError),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StartRejection> for ApiError {
    fn from(rejection: StartRejection) -> Self {
        match rejection {
            StartRejection::AlreadyRunning {
                current_ticker,
                current_horizon,
                progress_percent,
            } => Self::AlreadyRunning {
                current_ticker,
                current_horizon,
                progress_percent,
            },
            StartRejection::NoTickers => Self::NoTickers,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let reason = self.to_string();
        match self {
            Self::AlreadyRunning {
                current_ticker,
                current_horizon,
                progress_percent,
            } => (
                StatusCode::CONFLICT,
                Json(json!({
                    "accepted": false,
                    "reason": reason,
                    "current_ticker": current_ticker,
                    "current_horizon": current_horizon,
                    "progress_percent": progress_percent,
                })),
            )
                .into_response(),
            Self::NoTickers | Self::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "accepted": false, "reason": reason })),
            )
                .into_response(),
            Self::InvalidTickers(tickers) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "accepted": false, "reason": reason, "tickers": tickers })),
            )
                .into_response(),
            Self::InvalidQuery(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
            }
            Self::NotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": reason }))).into_response()
            }
            Self::Internal(e) => {
                tracing::error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": format!("{e:#}") })),
                )
                    .into_response()
            }
        }
    }
}
