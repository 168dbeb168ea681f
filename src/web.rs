//! HTTP facade binding the external interface table (spec.md §6) to a
//! concrete `axum::Router`.
//!
//! Modeled on the teacher's `web.rs`: CORS layer, a request-logging
//! middleware, and a flat `/api` route tree — stripped of the static
//! SPA asset embedding and auth/clubs/payments routes that are out of
//! scope here (see DESIGN.md).

use axum::{
    extract::{Path as AxumPath, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::adsb_poller::EnrichmentPoller;
use crate::ais::AisConsumer;
use crate::error::RadarError;
use crate::facade::QueryFacade;
use crate::semantic::SemanticIndex;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<QueryFacade>,
    pub ais: Arc<AisConsumer>,
    pub semantic: Arc<SemanticIndex>,
    pub poller: Arc<EnrichmentPoller>,
    pub rebuild_tx: tokio::sync::mpsc::Sender<()>,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    timestamp: i64,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { status: "ok", data: Some(data), error: None, timestamp: Utc::now().timestamp() })
}

impl IntoResponse for RadarError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> { status: "error", data: None, error: Some(self.to_string()), timestamp: Utc::now().timestamp() };
        (self.status_code(), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tmp/aircraft.json", get(aircraft_snapshot))
        .route("/api/coastline", get(coastline))
        .route("/api/airspace", get(airspace_view))
        .route("/api/airspace/identify", get(airspace_identify))
        .route("/api/ssr-codes", get(ssr_codes))
        .route("/api/notams", get(notams))
        .route("/api/metar/{icao}", get(metar))
        .route("/api/weather", get(weather))
        .route("/api/aircraft/history/{hex}", get(aircraft_history))
        .route("/api/aircraft/summary/{hex}", get(aircraft_summary))
        .route("/api/aircraft/active", get(aircraft_active))
        .route("/api/events", get(events))
        .route("/api/database/stats", get(database_stats))
        .route("/api/aircraft/lookup/{hex}", get(aircraft_lookup))
        .route("/api/aircraft/search/registration/{r}", get(search_registration))
        .route("/api/aircraft/search/type/{t}", get(search_type))
        .route("/api/ais/vessels", get(ais_vessels))
        .route("/api/ais/status", get(ais_status))
        .route("/api/ais/connect", post(ais_connect))
        .route("/api/ais/disconnect", post(ais_disconnect))
        .route("/ask", get(ask))
        .route("/chat", get(chat))
        .route("/rebuild", post(rebuild))
        .route("/debug", get(debug))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct LatLonRange {
    lat: f64,
    lon: f64,
    range: Option<f64>,
}

async fn airspace_view(State(state): State<AppState>, Query(q): Query<LatLonRange>) -> impl IntoResponse {
    let view = state.facade.airspace_view(q.lat, q.lon, q.range.unwrap_or(10.0));
    ok(view)
}

#[derive(Deserialize)]
struct IdentifyParams {
    lat: f64,
    lon: f64,
    #[allow(dead_code)]
    altitude: Option<f64>,
}

async fn airspace_identify(State(state): State<AppState>, Query(q): Query<IdentifyParams>) -> impl IntoResponse {
    let zones = state.facade.airspace_identify(q.lat, q.lon);
    ok(json!({ "zones": zones }))
}

/// The raw upstream-shaped snapshot, proxied with whatever enrichment
/// the last poll tick attached (spec.md §6, `/tmp/aircraft.json`).
/// Unlike every other route this isn't wrapped in the status envelope —
/// downstream map consumers expect the bare `{now, aircraft}` shape the
/// upstream receiver itself produces.
async fn aircraft_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        state.poller.latest_snapshot_json(),
    )
}

#[derive(Deserialize)]
struct CoastlineParams {
    lat: f64,
    lon: f64,
    range: Option<f64>,
    #[allow(dead_code)]
    region: Option<String>,
}

async fn coastline(State(state): State<AppState>, Query(q): Query<CoastlineParams>) -> impl IntoResponse {
    let range = q.range.unwrap_or(100.0);
    let features = state.facade.coastline(q.lat, q.lon, range);
    ok(json!({
        "features": features,
        "center": { "lat": q.lat, "lon": q.lon },
        "range_nm": range,
    }))
}

#[derive(Deserialize)]
struct SsrParams {
    code: Option<String>,
    category: Option<String>,
}

async fn ssr_codes(State(state): State<AppState>, Query(q): Query<SsrParams>) -> impl IntoResponse {
    if let Some(code) = &q.code {
        return ok(state.facade.ssr_lookup(code)).into_response();
    }
    if let Some(category) = &q.category {
        return ok(state.facade.ssr_by_category(category)).into_response();
    }
    ok(state.facade.ssr_all()).into_response()
}

#[derive(Deserialize)]
struct NotamParams {
    lat: f64,
    lon: f64,
    range: Option<f64>,
    category: Option<String>,
    priority: Option<String>,
}

async fn notams(State(state): State<AppState>, Query(q): Query<NotamParams>) -> Result<impl IntoResponse, RadarError> {
    let mut items = state.facade.notams(q.lat, q.lon, q.range.unwrap_or(50.0)).await?;
    if let Some(category) = &q.category {
        items.retain(|n| n.category.eq_ignore_ascii_case(category));
    }
    if let Some(priority) = &q.priority {
        items.retain(|n| format!("{:?}", n.priority).eq_ignore_ascii_case(priority));
    }
    Ok(ok(items))
}

async fn metar(State(state): State<AppState>, AxumPath(icao): AxumPath<String>) -> Result<impl IntoResponse, RadarError> {
    let record = state.facade.metar(&icao).await?;
    Ok(ok(record))
}

async fn weather(State(state): State<AppState>, Query(q): Query<LatLonRange>) -> Result<impl IntoResponse, RadarError> {
    let cells = state.facade.weather(q.lat, q.lon, q.range.unwrap_or(50.0)).await?;
    Ok(ok(cells))
}

#[derive(Deserialize)]
struct HoursParam {
    hours: Option<i64>,
}

async fn aircraft_history(
    State(state): State<AppState>,
    AxumPath(hex): AxumPath<String>,
    Query(q): Query<HoursParam>,
) -> Result<impl IntoResponse, RadarError> {
    let history = state.facade.aircraft_history(&hex, q.hours.unwrap_or(24))?;
    Ok(ok(history))
}

async fn aircraft_summary(State(state): State<AppState>, AxumPath(hex): AxumPath<String>) -> Result<impl IntoResponse, RadarError> {
    let summary = state.facade.aircraft_summary(&hex)?;
    match summary {
        Some(s) => Ok(ok(s)),
        None => Err(RadarError::NotFound(format!("no summary for {hex}"))),
    }
}

#[derive(Deserialize)]
struct MinutesParam {
    minutes: Option<i64>,
}

async fn aircraft_active(State(state): State<AppState>, Query(q): Query<MinutesParam>) -> Result<impl IntoResponse, RadarError> {
    let active = state.facade.aircraft_active(q.minutes.unwrap_or(15))?;
    Ok(ok(active))
}

#[derive(Deserialize)]
struct EventsParams {
    hex: Option<String>,
    kind: Option<String>,
    hours: Option<i64>,
}

async fn events(State(state): State<AppState>, Query(q): Query<EventsParams>) -> Result<impl IntoResponse, RadarError> {
    let events = state.facade.events(q.hex.as_deref(), q.kind.as_deref(), q.hours.unwrap_or(24))?;
    Ok(ok(events))
}

async fn database_stats(State(state): State<AppState>) -> Result<impl IntoResponse, RadarError> {
    let active = state.facade.aircraft_active(24 * 60)?;
    Ok(ok(json!({ "tracked_last_24h": active.len() })))
}

async fn aircraft_lookup(State(state): State<AppState>, AxumPath(hex): AxumPath<String>) -> impl IntoResponse {
    match state.facade.registry_lookup(&hex) {
        Some(record) => ok(record).into_response(),
        None => RadarError::NotFound(format!("no registry record for {hex}")).into_response(),
    }
}

async fn search_registration(State(state): State<AppState>, AxumPath(prefix): AxumPath<String>) -> impl IntoResponse {
    ok(state.facade.registry_search_registration(&prefix))
}

async fn search_type(State(state): State<AppState>, AxumPath(type_code): AxumPath<String>) -> impl IntoResponse {
    ok(state.facade.registry_search_type(&type_code))
}

async fn ais_vessels(State(state): State<AppState>, Query(q): Query<LatLonRange>) -> impl IntoResponse {
    let vessels = state.facade.vessels_in_range(q.lat, q.lon, q.range.unwrap_or(25.0));
    ok(vessels
        .into_iter()
        .map(|(v, d)| json!({ "vessel": v, "distance_nm": d }))
        .collect::<Vec<_>>())
}

async fn ais_status(State(state): State<AppState>) -> impl IntoResponse {
    ok(json!({
        "status": format!("{:?}", state.ais.status()),
        "vessel_count": state.ais.vessel_count(),
    }))
}

async fn ais_connect(State(_state): State<AppState>) -> impl IntoResponse {
    ok(json!({ "message": "AIS connect is managed by the composition root's supervised task" }))
}

async fn ais_disconnect(State(state): State<AppState>) -> impl IntoResponse {
    state.ais.request_stop();
    ok(json!({ "message": "disconnect requested" }))
}

#[derive(Deserialize)]
struct AskParams {
    q: String,
    threshold: Option<f32>,
    max_results: Option<usize>,
    #[allow(dead_code)]
    format: Option<String>,
}

async fn ask(State(state): State<AppState>, Query(q): Query<AskParams>) -> Result<impl IntoResponse, RadarError> {
    metrics::counter!(crate::metrics::SEMANTIC_QUERIES_TOTAL).increment(1);
    let results = state.facade.ask(&q.q, q.threshold.unwrap_or(0.2), q.max_results.unwrap_or(5)).await?;
    Ok(ok(results))
}

#[derive(Deserialize)]
struct ChatParams {
    q: String,
    threshold: Option<f32>,
    max_context: Option<usize>,
    show_context: Option<bool>,
}

async fn chat(State(state): State<AppState>, Query(q): Query<ChatParams>) -> Result<impl IntoResponse, RadarError> {
    let response = state.facade.chat(&q.q, q.threshold.unwrap_or(0.2), q.max_context.unwrap_or(5)).await?;
    let show_context = q.show_context.unwrap_or(true);
    Ok(ok(json!({
        "context_messages": if show_context { Some(&response.context_messages) } else { None },
        "historical_data": response.historical_data,
    })))
}

async fn rebuild(State(state): State<AppState>) -> impl IntoResponse {
    let _ = state.rebuild_tx.send(()).await;
    ok(json!({ "message": "rebuild requested" }))
}

async fn debug(State(state): State<AppState>) -> impl IntoResponse {
    ok(json!({
        "uptime_s": state.started_at.elapsed().as_secs(),
        "semantic_index_size": state.semantic.len(),
        "ais_vessel_count": state.ais.vessel_count(),
    }))
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    ok(json!({
        "uptime_s": state.started_at.elapsed().as_secs(),
        "ais_status": format!("{:?}", state.ais.status()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_without_error_field_on_success() {
        let env = Envelope { status: "ok", data: Some(42), error: None, timestamp: 0 };
        let json = serde_json::to_string(&env).unwrap();
        assert!(!json.contains("\"error\""));
        info!("{json}");
    }
}
