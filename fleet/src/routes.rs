use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use drone_protocol::messages::{
    parse_takeoff_altitude, BlockArea, ErrorReply, MoveRequest, RegisterReply, RelayReply,
    StatusReply, VehicleRecordView, MAX_BODY_BYTES,
};
use drone_protocol::ndjson::NDJSON;
use logger::{Color, Logger};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::aggregator::{ChannelSink, SubscriberSet};
use crate::block_areas::BlockAreaRegistry;
use crate::errors::FleetError;
use crate::relay::{FleetCommandRelay, VehicleCommand};

/// Frames a subscriber may fall behind before it is dropped.
pub const SUBSCRIBER_BUFFER: usize = 8;

/// Shared state behind every fleet handler.
pub struct FleetService {
    pub relay: FleetCommandRelay,
    pub block_areas: BlockAreaRegistry,
    pub subscribers: Arc<SubscriberSet>,
    pub logger: Logger,
}

#[derive(Debug, Deserialize)]
pub struct TakeoffParams {
    altitude: Option<String>,
}

/// The fleet API. Errors answer with a `{"detail"}` body.
pub fn router(service: Arc<FleetService>) -> Router {
    let logger = service.logger.clone();
    Router::new()
        .route("/fleet", get(list_vehicles))
        .route("/fleet/register", post(register))
        .route("/fleet/telemetry", get(telemetry))
        .route("/fleet/{id}", get(get_vehicle))
        .route("/fleet/{id}/status", get(vehicle_status))
        .route("/fleet/{id}/{verb}", post(relay_command))
        .route("/block-areas", post(create_block_area).get(list_block_areas))
        .route("/block-areas/{id}", get(get_block_area))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(service)
        .layer(middleware::from_fn_with_state(logger, log_request))
}

async fn register(
    State(service): State<Arc<FleetService>>,
    body: Bytes,
) -> Result<Json<RegisterReply>, FleetError> {
    let request = parse_json(&body)?;
    // Registration resolves the vehicle's address, which may block.
    let reply = blocking(move || service.relay.register(request)).await?;
    Ok(Json(reply))
}

async fn list_vehicles(
    State(service): State<Arc<FleetService>>,
) -> Result<Json<Vec<VehicleRecordView>>, FleetError> {
    let records = service.relay.registry().list()?;
    Ok(Json(records.iter().map(|record| record.view()).collect()))
}

async fn get_vehicle(
    State(service): State<Arc<FleetService>>,
    Path(raw_id): Path<String>,
) -> Result<Json<VehicleRecordView>, FleetError> {
    let id = parse_id(&raw_id)?;
    Ok(Json(service.relay.registry().get(id)?.view()))
}

async fn vehicle_status(
    State(service): State<Arc<FleetService>>,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusReply>, FleetError> {
    let id = parse_id(&raw_id)?;
    let reply = blocking(move || service.relay.status(id)).await?;
    Ok(Json(reply))
}

async fn relay_command(
    State(service): State<Arc<FleetService>>,
    Path((raw_id, verb)): Path<(String, String)>,
    Query(params): Query<TakeoffParams>,
    body: Bytes,
) -> Result<Json<RelayReply>, FleetError> {
    let id = parse_id(&raw_id)?;
    let command = parse_command(&verb, params.altitude.as_deref(), &body)?;
    let reply = blocking(move || service.relay.relay(id, command)).await?;
    Ok(Json(reply))
}

async fn telemetry(State(service): State<Arc<FleetService>>) -> Result<Response, FleetError> {
    let (frames, queued) = mpsc::channel(SUBSCRIBER_BUFFER);
    let id = service.subscribers.add(Arc::new(ChannelSink::new(frames)))?;
    service
        .logger
        .info(
            &format!("Telemetry subscriber {} connected", id),
            Color::Magenta,
            true,
        )
        .ok();

    let body = Body::from_stream(ReceiverStream::new(queued).map(Ok::<_, Infallible>));
    Ok(([(header::CONTENT_TYPE, NDJSON)], body).into_response())
}

async fn create_block_area(
    State(service): State<Arc<FleetService>>,
    body: Bytes,
) -> Result<Json<BlockArea>, FleetError> {
    Ok(Json(service.block_areas.create(parse_json(&body)?)?))
}

async fn list_block_areas(
    State(service): State<Arc<FleetService>>,
) -> Result<Json<Vec<BlockArea>>, FleetError> {
    Ok(Json(service.block_areas.list()?))
}

async fn get_block_area(
    State(service): State<Arc<FleetService>>,
    Path(id): Path<String>,
) -> Result<Json<BlockArea>, FleetError> {
    Ok(Json(service.block_areas.get(&id)?))
}

async fn not_found() -> FleetError {
    FleetError::NotFound("Not Found".to_string())
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

/// Runs a vehicle call off the async workers; every call is bounded by the
/// transport timeout.
async fn blocking<T, F>(work: F) -> Result<T, FleetError>
where
    F: FnOnce() -> Result<T, FleetError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|_| FleetError::ThreadError("relay".to_string()))?
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, FleetError> {
    serde_json::from_slice(body).map_err(|e| FleetError::Json(e.to_string()))
}

pub fn parse_id(raw: &str) -> Result<u64, FleetError> {
    raw.parse::<u64>()
        .map_err(|_| FleetError::Validation(format!("Invalid drone id: {}", raw)))
}

/// Decodes the command named by the last path segment. Unknown verbs are
/// `NotFound`, like any other unknown route.
pub fn parse_command(
    verb: &str,
    altitude: Option<&str>,
    body: &[u8],
) -> Result<VehicleCommand, FleetError> {
    let command = match verb {
        "takeoff" => VehicleCommand::Takeoff {
            altitude: match altitude {
                Some(raw) => Some(parse_takeoff_altitude(Some(raw))?),
                None => None,
            },
        },
        "land" => VehicleCommand::Land,
        "move" => VehicleCommand::Move(parse_json::<MoveRequest>(body)?),
        "move_to" => VehicleCommand::MoveTo(parse_json::<MoveRequest>(body)?),
        _ => return Err(FleetError::NotFound("Not Found".to_string())),
    };
    Ok(command)
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorReply::new(self.detail()))).into_response()
    }
}
