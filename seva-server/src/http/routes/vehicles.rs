//! Transport tracking endpoints

use axum::extract::{Query, State};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::repos::{Vehicle, VehicleRepo};
use crate::http::error::ApiError;
use crate::http::extractors::{CsrfVerified, ValidId};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct VehicleQuery {
    pub route: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
}

/// GET /api/vehicles - active fleet, optionally one route
async fn list_vehicles(
    State(state): State<AppState>,
    Query(query): Query<VehicleQuery>,
) -> Result<Json<Vec<Vehicle>>, ApiError> {
    let repo = VehicleRepo::new(state.db());
    let vehicles = match query.route.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(route) => repo.by_route(route).await?,
        None => repo.list_active().await?,
    };
    Ok(Json(vehicles))
}

/// GET /api/vehicles/{id}
async fn get_vehicle(State(state): State<AppState>, ValidId(id): ValidId) -> Result<Json<Vehicle>, ApiError> {
    Ok(Json(VehicleRepo::new(state.db()).get(id).await?))
}

/// PUT /api/vehicles/{id}/location
async fn update_location(
    State(state): State<AppState>,
    ValidId(id): ValidId,
    _csrf: CsrfVerified,
    Json(update): Json<LocationUpdate>,
) -> Result<Json<Vehicle>, ApiError> {
    let vehicle = VehicleRepo::new(state.db())
        .update_location(id, update.latitude, update.longitude)
        .await?;
    Ok(Json(vehicle))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/vehicles", get(list_vehicles))
        .route("/vehicles/{id}", get(get_vehicle))
        .route("/vehicles/{id}/location", put(update_location))
}
