use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use drone_protocol::messages::{
    parse_takeoff_altitude, CommandReply, ErrorReply, MoveRequest, VehicleSnapshot,
    MAX_BODY_BYTES,
};
use drone_protocol::ndjson::NDJSON;
use logger::{Color, Logger};
use serde::Deserialize;

use super::sim_error::SimError;
use super::telemetry::{snapshot_stream, SnapshotFeed};
use super::vehicle::Vehicle;
use super::vehicle_state::Position;
use super::TELEMETRY_PERIOD_MILLIS;

/// Shared by every handler of the control surface.
#[derive(Clone)]
pub struct ControlState {
    pub vehicle: Vehicle,
    /// Cleared on shutdown, which ends every open telemetry stream.
    pub running: Arc<AtomicBool>,
    pub logger: Logger,
}

#[derive(Debug, Deserialize)]
pub struct TakeoffParams {
    altitude: Option<String>,
}

/// Routes `/control/*` and `/telemetry` to vehicle operations.
///
/// Commands that do not fit the current flight state still answer `200` with
/// `{"status": "error"}`. Out-of-range input answers `422` before the vehicle
/// is touched. A known path with the wrong method answers `405`.
pub fn router(state: ControlState) -> Router {
    let logger = state.logger.clone();
    Router::new()
        .route("/control/takeoff", post(takeoff))
        .route("/control/land", post(land))
        .route("/control/move", post(displace))
        .route("/control/move_to", post(move_to))
        .route("/control/status", get(status))
        .route("/telemetry", get(telemetry))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
        .layer(middleware::from_fn_with_state(logger, log_request))
}

async fn takeoff(
    State(state): State<ControlState>,
    Query(params): Query<TakeoffParams>,
) -> Result<Json<CommandReply>, SimError> {
    let altitude = parse_takeoff_altitude(params.altitude.as_deref())?;
    command_reply(
        state.vehicle.takeoff(altitude),
        format!("Drone took off to {:?} meters", altitude),
    )
}

async fn land(State(state): State<ControlState>) -> Result<Json<CommandReply>, SimError> {
    command_reply(state.vehicle.land(), "Drone landed".to_string())
}

async fn displace(
    State(state): State<ControlState>,
    body: Bytes,
) -> Result<Json<CommandReply>, SimError> {
    let delta = parse_move(&body)?;
    let reply = match state
        .vehicle
        .displace(delta.latitude, delta.longitude, delta.altitude)
    {
        Ok(position) => CommandReply::success(format!(
            "Moved to lat: {:?}, lon: {:?}, alt: {:?}",
            position.latitude, position.longitude, position.altitude
        )),
        Err(e) if e.is_invalid_state() => CommandReply::error(e.to_string()),
        Err(e) => return Err(e),
    };
    Ok(Json(reply))
}

async fn move_to(
    State(state): State<ControlState>,
    body: Bytes,
) -> Result<Json<CommandReply>, SimError> {
    let goal = parse_move(&body)?;
    command_reply(
        state
            .vehicle
            .set_goal(Position::new(goal.latitude, goal.longitude, goal.altitude)),
        format!(
            "Drone moving to lat: {:?}, lon: {:?}, alt: {:?}",
            goal.latitude, goal.longitude, goal.altitude
        ),
    )
}

async fn status(State(state): State<ControlState>) -> Result<Json<VehicleSnapshot>, SimError> {
    Ok(Json(state.vehicle.snapshot()?))
}

async fn telemetry(State(state): State<ControlState>) -> Response {
    state
        .logger
        .info("Telemetry subscriber connected", Color::Magenta, true)
        .ok();
    let feed = SnapshotFeed::new(state.vehicle.clone(), state.logger.clone());
    let frames = snapshot_stream(
        feed,
        Arc::clone(&state.running),
        Duration::from_millis(TELEMETRY_PERIOD_MILLIS),
    );
    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(frames)).into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

async fn log_request(State(logger): State<Logger>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri());
    let response = next.run(request).await;
    logger
        .info(
            &format!("{} -> {}", line, response.status().as_u16()),
            Color::Blue,
            false,
        )
        .ok();
    response
}

fn command_reply(
    result: Result<(), SimError>,
    success: String,
) -> Result<Json<CommandReply>, SimError> {
    match result {
        Ok(()) => Ok(Json(CommandReply::success(success))),
        Err(e) if e.is_invalid_state() => Ok(Json(CommandReply::error(e.to_string()))),
        Err(e) => Err(e),
    }
}

fn parse_move(body: &[u8]) -> Result<MoveRequest, SimError> {
    let request: MoveRequest =
        serde_json::from_slice(body).map_err(|e| SimError::MalformedBody(e.to_string()))?;
    request.validate()?;
    Ok(request)
}

fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(ErrorReply::new(detail))).into_response()
}

impl IntoResponse for SimError {
    fn into_response(self) -> Response {
        let status = match &self {
            SimError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            SimError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, &self.to_string())
    }
}
