//! Read-only chart endpoints over the bar store.

use crate::error::ApiError;
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use qbot_core::{
    normalize_symbol, parse_timeframes, parse_timestamp, Candle, CandleQuery, LatestQuote,
    Timeframe,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
pub struct CandleParams {
    pub timeframe: Option<String>,
    pub limit: Option<i64>,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MultiParams {
    pub timeframes: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CandleResponse {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub data: Vec<Candle>,
}

#[derive(Debug, Serialize)]
pub struct MultiCandleResponse {
    pub symbol: String,
    pub timeframes: BTreeMap<Timeframe, Vec<Candle>>,
    pub requested: Vec<Timeframe>,
}

/// Candles for one symbol. Defaults to 100 candles of 15min.
///
/// # Errors
/// Returns `ApiError::InvalidQuery` for a bad symbol, timeframe, or range,
/// and `ApiError::Internal` if the bar store fails.
pub async fn candles(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<CandleParams>,
) -> Result<Json<CandleResponse>, ApiError> {
    let timeframe = params
        .timeframe
        .as_deref()
        .map_or(Ok(Timeframe::Min15), str::parse)?;
    let start = params.start.as_deref().map(parse_timestamp).transpose()?;
    let end = params.end.as_deref().map(parse_timestamp).transpose()?;
    let query = CandleQuery::new(&symbol, timeframe, params.limit, start, end)?;

    let data = state.candles.candles(&query).await?;
    Ok(Json(CandleResponse {
        symbol: query.ticker,
        timeframe,
        count: data.len(),
        data,
    }))
}

/// Candles for one symbol at several timeframes. Defaults to 15min, 1hour and 1day.
///
/// # Errors
/// Returns `ApiError::InvalidQuery` for a bad symbol or timeframe list, and
/// `ApiError::Internal` if the bar store fails.
pub async fn multi_candles(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(params): Query<MultiParams>,
) -> Result<Json<MultiCandleResponse>, ApiError> {
    let ticker = normalize_symbol(&symbol)?;
    let requested = parse_timeframes(params.timeframes.as_deref().unwrap_or("15min,1hour,1day"))?;

    let mut timeframes = BTreeMap::new();
    for &timeframe in &requested {
        let query = CandleQuery::new(&ticker, timeframe, params.limit, None, None)?;
        timeframes.insert(timeframe, state.candles.candles(&query).await?);
    }

    Ok(Json(MultiCandleResponse {
        symbol: ticker,
        timeframes,
        requested,
    }))
}

/// Newest price and change against the previous close.
///
/// # Errors
/// Returns `ApiError::InvalidQuery` for a bad symbol, `ApiError::NotFound`
/// when the symbol has no bars, and `ApiError::Internal` if the store fails.
pub async fn latest(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<LatestQuote>, ApiError> {
    let ticker = normalize_symbol(&symbol)?;
    state
        .candles
        .latest(&ticker)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No data found for {ticker}")))
}
