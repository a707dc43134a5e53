//! Appointment booking endpoints

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::repos::{Booking, BookingRepo, NewBooking, TeacherRepo};
use crate::db::{DbError, Paginated, PaginationParams};
use crate::http::error::ApiError;
use crate::http::extractors::{CsrfVerified, ValidId};
use crate::request::sanitize::{clean, clean_opt};
use crate::request::{Flash, Rule, ValidationError, Validator};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub student_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub student_id: i64,
    pub teacher_id: i64,
    pub booking_date: String,
    pub time_slot: String,
    pub purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub student_id: i64,
}

/// A page of bookings with navigation hints.
#[derive(Serialize)]
pub struct BookingPage {
    #[serde(flatten)]
    pub page: Paginated<Booking>,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl From<Paginated<Booking>> for BookingPage {
    fn from(page: Paginated<Booking>) -> Self {
        Self {
            total_pages: page.total_pages(),
            has_next: page.has_next(),
            has_prev: page.has_prev(),
            page,
        }
    }
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub id: i64,
    pub status: &'static str,
}

/// GET /api/bookings?student_id=&page=&per_page=
async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<BookingQuery>,
    Query(paging): Query<PaginationParams>,
) -> Result<Json<BookingPage>, ApiError> {
    let student_id = query
        .student_id
        .filter(|id| *id > 0)
        .ok_or(ValidationError::Empty { field: "student_id" })?;
    let page = BookingRepo::new(state.db())
        .page_for_student(student_id, paging.into())
        .await?;
    Ok(Json(page.into()))
}

/// POST /api/bookings
async fn create_booking(
    State(state): State<AppState>,
    csrf: CsrfVerified,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    Validator::new()
        .field("booking_date", Some(req.booking_date.as_str()), &[Rule::Required, Rule::Date])
        .field("time_slot", Some(req.time_slot.as_str()), &[Rule::Required, Rule::MaxLen(20)])
        .field("purpose", req.purpose.as_deref(), &[Rule::MaxLen(500)])
        .finish()?;

    let booking_date = NaiveDate::parse_from_str(req.booking_date.trim(), "%Y-%m-%d").map_err(|_| {
        ValidationError::InvalidFormat {
            field: "booking_date",
            reason: "must be a date (YYYY-MM-DD)",
        }
    })?;
    if booking_date < state.db().today() {
        return Err(ValidationError::InvalidFormat {
            field: "booking_date",
            reason: "cannot be in the past",
        }
        .into());
    }

    let teacher = TeacherRepo::new(state.db()).get(req.teacher_id).await?;
    if !teacher.available {
        return Err(ApiError::Conflict {
            message: format!("{} is not accepting appointments", teacher.name),
        });
    }

    let result = BookingRepo::new(state.db())
        .create(NewBooking {
            student_id: req.student_id,
            teacher_id: teacher.id,
            booking_date,
            time_slot: clean(&req.time_slot),
            purpose: clean_opt(req.purpose.as_deref()),
        })
        .await;

    match result {
        Ok(booking) => {
            state.sessions().flash(
                &csrf.session_id,
                Flash::success(format!("Appointment requested with {}", teacher.name)),
            );
            Ok((StatusCode::CREATED, Json(booking)))
        }
        Err(e @ DbError::Conflict(_)) => {
            state
                .sessions()
                .flash(&csrf.session_id, Flash::error("That slot has just been taken"));
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /api/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    ValidId(id): ValidId,
    csrf: CsrfVerified,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    BookingRepo::new(state.db()).cancel(id, req.student_id).await?;
    state
        .sessions()
        .flash(&csrf.session_id, Flash::info("Appointment cancelled"));
    Ok(Json(CancelResponse {
        id,
        status: "cancelled",
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bookings", get(list_bookings).post(create_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
}

#[cfg(test)]
mod tests {
    use crate::db::repos::teachers::tests::seed_teacher;
    use crate::http::test_support::{get, get_with, json, TestApp, TestSession};
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value as JsonValue};

    fn next_week() -> String {
        (chrono::Utc::now().date_naive() + chrono::Duration::days(7))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn booking(teacher_id: i64, date: &str) -> JsonValue {
        json!({
            "student_id": 11,
            "teacher_id": teacher_id,
            "booking_date": date,
            "time_slot": "10:00-10:30",
            "purpose": "<b>Project</b> review",
        })
    }

    async fn book(app: &TestApp, session: &TestSession, body: JsonValue) -> (StatusCode, JsonValue) {
        let (status, _, body) = app
            .send(json(Method::POST, "/api/bookings", body, session, Some(session.csrf.as_str())))
            .await;
        (status, body)
    }

    #[tokio::test]
    async fn create_list_and_cancel() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        let session = app.session().await;

        let (status, body) = book(&app, &session, booking(teacher, &next_week())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["purpose"], "&lt;b&gt;Project&lt;/b&gt; review");
        let id = body["id"].as_i64().unwrap();

        let (_, _, listed) = app.send(get("/api/bookings?student_id=11")).await;
        assert_eq!(listed["items"].as_array().unwrap().len(), 1);
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["page"], 1);

        let (status, _, body) = app
            .send(json(
                Method::POST,
                &format!("/api/bookings/{}/cancel", id),
                json!({ "student_id": 11 }),
                &session,
                Some(session.csrf.as_str()),
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");

        let (_, _, body) = app.send(get_with("/api/session", &session)).await;
        let flashes = body["flashes"].as_array().unwrap();
        assert_eq!(flashes.len(), 2);
        assert_eq!(flashes[0]["level"], "success");
    }

    #[tokio::test]
    async fn double_booking_is_409() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        let session = app.session().await;
        let date = next_week();

        assert_eq!(book(&app, &session, booking(teacher, &date)).await.0, StatusCode::CREATED);
        let (status, body) = book(&app, &session, booking(teacher, &date)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert_eq!(app.state.db().transaction_depth(), 0);
    }

    #[tokio::test]
    async fn listing_is_paginated() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        let session = app.session().await;
        for slot in ["09:00-09:30", "10:00-10:30", "11:00-11:30"] {
            let mut body = booking(teacher, &next_week());
            body["time_slot"] = json!(slot);
            assert_eq!(book(&app, &session, body).await.0, StatusCode::CREATED);
        }

        let (status, _, body) = app.send(get("/api/bookings?student_id=11&page=2&per_page=2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
        assert_eq!(body["total"], 3);
        assert_eq!(body["page"], 2);
        assert_eq!(body["per_page"], 2);
        assert_eq!(body["total_pages"], 2);
        assert_eq!(body["has_next"], false);
        assert_eq!(body["has_prev"], true);

        let (_, _, body) = app.send(get("/api/bookings?student_id=11&per_page=500")).await;
        assert_eq!(body["per_page"], 100);
        assert_eq!(body["items"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mutations_require_csrf() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        let session = app.session().await;

        let (status, _, _) = app
            .send(json(Method::POST, "/api/bookings", booking(teacher, &next_week()), &session, None))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _, _) = app
            .send(json(
                Method::POST,
                "/api/bookings",
                booking(teacher, &next_week()),
                &session,
                Some("forged-token"),
            ))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        let session = app.session().await;

        let (status, body) = book(&app, &session, booking(teacher, "11/03/2024")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"]["booking_date"].is_array());

        let (status, _) = book(&app, &session, booking(teacher, "2001-01-01")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = book(&app, &session, booking(teacher + 50, &next_week())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(app.send(get("/api/bookings")).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unavailable_teacher_cannot_be_booked() {
        let app = TestApp::new().await;
        let teacher = seed_teacher(app.state.db(), "Dr. Iyer", "CSE", false).await;
        let session = app.session().await;

        let (status, _) = book(&app, &session, booking(teacher, &next_week())).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
