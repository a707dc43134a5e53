//! Campus transport fleet and live positions

use std::time::Duration;

use serde::Serialize;

use crate::db::{Conditions, Database, DbError, FindOptions, OrderBy, Row};
use crate::{fields, params};

const TABLE: &str = "vehicles";

/// Positions go stale quickly; keep the fleet list short-lived.
const ACTIVE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: i64,
    pub registration: String,
    pub name: String,
    pub route: String,
    pub driver_name: Option<String>,
    pub capacity: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub active: bool,
    pub location_updated_at: Option<String>,
}

impl Vehicle {
    fn from_row(row: &Row) -> Result<Self, DbError> {
        Ok(Self {
            id: row.i64("id")?,
            registration: row.text("registration")?,
            name: row.text("name")?,
            route: row.text("route")?,
            driver_name: row.opt_text("driver_name")?,
            capacity: row.i64("capacity")?,
            latitude: row.opt_f64("latitude")?,
            longitude: row.opt_f64("longitude")?,
            active: row.bool("active")?,
            location_updated_at: row.opt_text("location_updated_at")?,
        })
    }
}

pub struct VehicleRepo<'a> {
    db: &'a Database,
}

impl<'a> VehicleRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub async fn list_active(&self) -> Result<Vec<Vehicle>, DbError> {
        self.db
            .fetch_all(
                "SELECT * FROM vehicles WHERE active = ? AND deleted_at IS NULL ORDER BY route, name",
                &params![true],
                Some(ACTIVE_TTL),
            )
            .await?
            .iter()
            .map(Vehicle::from_row)
            .collect()
    }

    pub async fn get(&self, id: i64) -> Result<Vehicle, DbError> {
        let row = self.db.find(TABLE, id).await?.ok_or_else(|| DbError::NotFound {
            resource: "vehicle",
            id: id.to_string(),
        })?;
        Vehicle::from_row(&row)
    }

    pub async fn by_route(&self, route: &str) -> Result<Vec<Vehicle>, DbError> {
        let conditions = Conditions::new()
            .eq("route", route)
            .eq("active", true)
            .is_null("deleted_at");
        let options = FindOptions::new().order(OrderBy::asc("name"));
        self.db
            .find_all(TABLE, &conditions, &options)
            .await?
            .iter()
            .map(Vehicle::from_row)
            .collect()
    }

    /// Record a GPS fix. Cached fleet lists are dropped by the write.
    pub async fn update_location(&self, id: i64, latitude: f64, longitude: f64) -> Result<Vehicle, DbError> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(DbError::invalid(format!(
                "coordinates ({}, {}) are out of range",
                latitude, longitude
            )));
        }

        let updated = self
            .db
            .update(
                TABLE,
                fields! {
                    "latitude" => latitude,
                    "longitude" => longitude,
                    "location_updated_at" => self.db.now(),
                },
                &Conditions::new().eq("id", id),
            )
            .await?;
        if updated == 0 {
            return Err(DbError::NotFound {
                resource: "vehicle",
                id: id.to_string(),
            });
        }
        tracing::debug!(vehicle_id = id, latitude, longitude, "vehicle location updated");
        self.get(id).await
    }
}
