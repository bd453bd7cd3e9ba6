use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::db::DbHandle;
use super::models::{CounterOp, DoorKey, NextEvent};
use super::workflow;
use crate::errors::TrackerError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateLocationRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct DoorRequest {
    pub location_id: i64,
    pub stiege: String,
    pub stockwerk: String,
    pub tuere: String,
}

impl DoorRequest {
    fn key(&self) -> Result<DoorKey, TrackerError> {
        DoorKey::new(self.location_id, &self.stiege, &self.stockwerk, &self.tuere)
    }
}

#[derive(Deserialize)]
pub struct AdvanceStatusRequest {
    #[serde(flatten)]
    pub door: DoorRequest,
    pub event: NextEvent,
}

#[derive(Deserialize)]
pub struct CreateLeadRequest {
    #[serde(flatten)]
    pub door: DoorRequest,
    pub first_name: String,
    pub last_name: Option<String>,
}

#[derive(Deserialize)]
pub struct AdjustCountersRequest {
    pub ops: Vec<CounterOp>,
}

#[derive(Deserialize)]
pub struct LocationFilter {
    pub location_id: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

/// Maps the tracker error taxonomy onto HTTP. Policy no-ops never reach
/// here (they are successes); conflicts keep their dedicated codes.
pub struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self.0 {
            TrackerError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            TrackerError::LocationNotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found", Some(self.0.to_string()))
            }
            TrackerError::AddressExists { .. } => (StatusCode::CONFLICT, "address_exists", None),
            TrackerError::DuplicateLead { .. } => {
                (StatusCode::CONFLICT, "door_already_has_lead", None)
            }
            TrackerError::Contention => (
                StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                Some("database busy, retry the request".to_string()),
            ),
            TrackerError::Database(_) | TrackerError::LockPoisoned | TrackerError::TaskPanicked => {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "db_error",
                    Some(self.0.to_string()),
                )
            }
        };
        let mut body = serde_json::json!({ "error": code });
        if let Some(details) = details {
            body["details"] = details.into();
        }
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/locations", get(list_locations).post(create_location))
        .route("/api/locations/{id}", get(get_location))
        .route("/api/locations/{id}/adjust", post(adjust_counters))
        .route("/api/doors", get(list_door_events))
        .route("/api/doors/knock", post(knock_door))
        .route("/api/doors/advance", post(advance_door_status))
        .route("/api/leads", get(list_leads).post(create_lead))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_location(
    State(state): State<SharedState>,
    Json(req): Json<CreateLocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let address = req.address;
    let location = state.db.call(move |db| db.create_location(&address)).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "ok": true, "location": location })),
    ))
}

async fn list_locations(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let locations = state.db.call(|db| db.list_locations()).await?;
    Ok(Json(serde_json::json!({ "locations": locations })))
}

async fn get_location(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let location = state.db.call(move |db| db.get_location(id)).await?;
    Ok(Json(serde_json::json!({ "location": location })))
}

async fn adjust_counters(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<AdjustCountersRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let location = state
        .db
        .call(move |db| workflow::adjust_counters(db, id, &req.ops))
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "location": location })))
}

async fn knock_door(
    State(state): State<SharedState>,
    Json(req): Json<DoorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = req.key()?;
    let location = state.db.call(move |db| workflow::knock(db, &key)).await?;
    Ok(Json(serde_json::json!({ "ok": true, "location": location })))
}

async fn advance_door_status(
    State(state): State<SharedState>,
    Json(req): Json<AdvanceStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = req.door.key()?;
    let event = req.event;
    let location = state
        .db
        .call(move |db| workflow::advance_status(db, &key, event))
        .await?;
    Ok(Json(serde_json::json!({ "ok": true, "location": location })))
}

async fn create_lead(
    State(state): State<SharedState>,
    Json(req): Json<CreateLeadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = req.door.key()?;
    let first_name = req.first_name;
    let last_name = req.last_name;
    let (lead, location) = state
        .db
        .call(move |db| workflow::record_lead(db, &key, &first_name, last_name.as_deref()))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "ok": true, "lead": lead, "location": location })),
    ))
}

async fn list_door_events(
    State(state): State<SharedState>,
    Query(filter): Query<LocationFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let events = state
        .db
        .call(move |db| db.list_door_events(filter.location_id))
        .await?;
    Ok(Json(serde_json::json!({ "events": events })))
}

async fn list_leads(
    State(state): State<SharedState>,
    Query(filter): Query<LocationFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let leads = state
        .db
        .call(move |db| db.list_leads(filter.location_id))
        .await?;
    Ok(Json(serde_json::json!({ "leads": leads })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                TrackerError::Validation("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                TrackerError::LocationNotFound { id: 1 },
                StatusCode::NOT_FOUND,
            ),
            (
                TrackerError::AddressExists {
                    address: "x".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                TrackerError::DuplicateLead {
                    location_id: 1,
                    stiege: "A".into(),
                    stockwerk: "1".into(),
                    tuere: "1".into(),
                },
                StatusCode::CONFLICT,
            ),
            (TrackerError::Contention, StatusCode::SERVICE_UNAVAILABLE),
            (
                TrackerError::LockPoisoned,
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_door_request_key_validation() {
        let req = DoorRequest {
            location_id: 1,
            stiege: " A ".into(),
            stockwerk: "2".into(),
            tuere: "5".into(),
        };
        let key = req.key().unwrap();
        assert_eq!(key.stiege, "A");

        let bad = DoorRequest {
            location_id: 1,
            stiege: "".into(),
            stockwerk: "2".into(),
            tuere: "5".into(),
        };
        assert!(bad.key().is_err());
    }
}
