//! API route definitions.

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::analysis::AnalysisState;
use crate::error::Error;
use crate::pipeline::Stage;
use crate::signal::{NewSignal, SignalKind};
use crate::storage::{AnalysisResultRepository, IncidentRepository, SignalRepository, Store};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/events", post(ingest_event).get(list_events))
        .route("/events/batch", post(ingest_batch))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/rca", get(list_analyses))
        .route("/rca/{id}", get(get_analysis))
        .route("/rca/{id}/investigations", get(list_investigations))
        .route("/rca/{id}/reanalyze", post(reanalyze))
        .route("/status", get(status))
        .route("/pipeline/process", post(process))
        .route("/pipeline/enrichment", post(|state: State<AppState>| run_stage(state, Stage::Enrichment)))
        .route("/pipeline/fusion", post(|state: State<AppState>| run_stage(state, Stage::Fusion)))
        .route("/pipeline/rca", post(|state: State<AppState>| run_stage(state, Stage::Analysis)))
}

type ApiResult = Result<Json<Value>, ApiError>;

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    kind: Option<String>,
    state: Option<String>,
}

impl ListQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn ingest_event(State(state): State<AppState>, Json(signal): Json<NewSignal>) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut stored = state.pipeline.ingest(vec![signal]).await?;
    let signal = stored.pop();
    Ok((StatusCode::CREATED, Json(json!({ "data": signal, "meta": meta() }))))
}

async fn ingest_batch(State(state): State<AppState>, Json(signals): Json<Vec<NewSignal>>) -> Result<(StatusCode, Json<Value>), ApiError> {
    if signals.is_empty() {
        return Err(ApiError::bad_request("batch is empty"));
    }
    let stored = state.pipeline.ingest(signals).await?;
    let total = stored.len();
    Ok((StatusCode::CREATED, Json(json!({ "data": stored, "meta": { "total": total } }))))
}

async fn list_events(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult {
    let kind = match q.kind.as_deref() {
        Some(k) => Some(k.parse::<SignalKind>().map_err(ApiError::bad_request)?),
        None => None,
    };
    let limit = q.limit();
    let signals = state.query(move |s| s.recent_signals(limit, kind)).await?;
    let total = signals.len();
    Ok(Json(json!({ "data": signals, "meta": { "total": total } })))
}

async fn list_incidents(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult {
    let limit = q.limit();
    let incidents = state.query(move |s| s.recent_incidents(limit)).await?;
    let total = incidents.len();
    Ok(Json(json!({ "data": incidents, "meta": { "total": total } })))
}

async fn get_incident(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let key = id.clone();
    let (incident, analysis) = state
        .query(move |s| Ok((s.incident(&key)?, s.by_incident_id(&key)?)))
        .await?;
    let incident = incident.ok_or_else(|| Error::not_found("incident", id))?;
    Ok(Json(json!({
        "data": { "incident": incident, "analysis": analysis },
        "meta": meta()
    })))
}

async fn list_analyses(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult {
    let filter = match q.state.as_deref() {
        Some(st) => Some(st.parse::<AnalysisState>().map_err(ApiError::bad_request)?),
        None => None,
    };
    let limit = q.limit();
    let results = state.query(move |s| s.recent_results(limit, filter)).await?;
    let total = results.len();
    Ok(Json(json!({ "data": results, "meta": { "total": total } })))
}

async fn get_analysis(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let key = id.clone();
    let result = state.query(move |s| s.by_incident_id(&key)).await?;
    let result = result.ok_or_else(|| Error::not_found("analysis result", id))?;
    Ok(Json(json!({ "data": result, "meta": meta() })))
}

async fn list_investigations(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let key = id.clone();
    let (exists, records) = state
        .query(move |s| Ok((s.exists_by_id(&key)?, s.investigations_for(&key)?)))
        .await?;
    if !exists {
        return Err(Error::not_found("incident", id).into());
    }
    let total = records.len();
    Ok(Json(json!({ "data": records, "meta": { "total": total } })))
}

async fn reanalyze(State(state): State<AppState>, Path(id): Path<String>) -> Result<(StatusCode, Json<Value>), ApiError> {
    let discarded = state.pipeline.reanalyze(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": { "incident_id": id, "previous_result_discarded": discarded },
            "meta": meta()
        })),
    ))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let (counts, deep_analysis) = state.query(|s| Ok((s.counts()?, s.investigation_stats()?))).await?;
    let metrics = state.pipeline.metrics().snapshot();
    Ok(Json(json!({
        "data": { "counts": counts, "metrics": metrics, "deep_analysis": deep_analysis },
        "meta": meta()
    })))
}

async fn process(State(state): State<AppState>) -> ApiResult {
    let report = state.pipeline.run_cycle().await;
    Ok(Json(json!({ "data": report, "meta": meta() })))
}

async fn run_stage(State(state): State<AppState>, stage: Stage) -> ApiResult {
    let report = state.pipeline.run_stage(stage).await;
    Ok(Json(json!({ "data": report, "meta": { "stage": stage, "timestamp": chrono::Utc::now().to_rfc3339() } })))
}
