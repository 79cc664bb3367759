use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use qbot_core::{is_valid_ticker, normalize_tickers, Run, RunSummary, StartRejection, StartSignal};
use qbot_data::ModelListing;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Summaries returned by the history endpoint.
const HISTORY_PAGE: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRequest {
    #[serde(default)]
    pub tickers: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct StartAccepted {
    pub accepted: bool,
    pub message: &'static str,
    pub tickers: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<RunSummary>,
    pub total: usize,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Current run record, or the idle record when none is stored.
///
/// # Errors
/// Returns `ApiError::Internal` if the store cannot be read.
pub async fn training_status(State(state): State<AppState>) -> Result<Json<Run>, ApiError> {
    let run = state.store.load_run().await?.unwrap_or_else(Run::idle);
    Ok(Json(run))
}

/// Publishes a start signal for the training worker.
///
/// An empty body or an empty ticker list lets the worker's selector choose.
///
/// # Errors
/// Returns `ApiError::BadRequest` for a body that is not a JSON start request,
/// `ApiError::InvalidTickers` if any requested ticker is malformed,
/// `ApiError::AlreadyRunning` while a run is in progress,
/// `ApiError::NoTickers` if the explicit list holds only blank tickers, and
/// `ApiError::Internal` if the store cannot be reached.
pub async fn start_training(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StartAccepted>), ApiError> {
    let request = parse_start_request(&headers, &body)?;

    if let Some(run) = state.store.load_run().await? {
        if run.is_running() {
            return Err(StartRejection::already_running(&run).into());
        }
    }

    let tickers = match request.tickers {
        Some(list) if !list.is_empty() => {
            let invalid: Vec<String> = list
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty() && !is_valid_ticker(t))
                .map(str::to_string)
                .collect();
            if !invalid.is_empty() {
                return Err(ApiError::InvalidTickers(invalid));
            }

            let tickers = normalize_tickers(&list);
            if tickers.is_empty() {
                return Err(ApiError::NoTickers);
            }
            Some(tickers)
        }
        _ => None,
    };

    let signal = StartSignal::new(tickers.clone(), "api");
    state
        .store
        .put_start_signal(&signal, state.signal_ttl)
        .await?;

    info!("Training start requested for {:?}", tickers);

    Ok((
        StatusCode::ACCEPTED,
        Json(StartAccepted {
            accepted: true,
            message: "training start requested",
            tickers,
        }),
    ))
}

/// An empty body is an empty request; anything else must be a JSON start request.
fn parse_start_request(headers: &HeaderMap, body: &[u8]) -> Result<StartRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRequest::default());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false);
    if !is_json {
        return Err(ApiError::BadRequest(
            "expected request with `Content-Type: application/json`".to_string(),
        ));
    }

    let Json(request) =
        Json::<StartRequest>::from_bytes(body).map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(request)
}

/// # Errors
/// Returns `ApiError::Internal` if the models directory cannot be read.
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelListing>, ApiError> {
    Ok(Json(state.inventory.list().await?))
}

/// # Errors
/// Returns `ApiError::Internal` if the store cannot be read.
pub async fn training_history(
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.store.history(HISTORY_PAGE).await?;
    let total = state.store.history_len().await?;
    Ok(Json(HistoryResponse { history, total }))
}
