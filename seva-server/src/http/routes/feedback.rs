//! Feedback endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::repos::{CategorySummary, FeedbackRepo, NewFeedback, FEEDBACK_CATEGORIES};
use crate::http::error::ApiError;
use crate::http::extractors::CsrfVerified;
use crate::request::sanitize::clean;
use crate::request::{Flash, Rule, Validator};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub user_id: i64,
    pub category: String,
    pub rating: i64,
    pub subject: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct FeedbackCreated {
    pub id: i64,
}

/// POST /api/feedback
async fn submit_feedback(
    State(state): State<AppState>,
    csrf: CsrfVerified,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackCreated>), ApiError> {
    let rating = req.rating.to_string();
    Validator::new()
        .field("category", Some(req.category.as_str()), &[Rule::Required, Rule::InList(FEEDBACK_CATEGORIES)])
        .field("rating", Some(rating.as_str()), &[Rule::Required, Rule::Range(1, 5)])
        .field("subject", Some(req.subject.as_str()), &[Rule::Required, Rule::MinLen(3), Rule::MaxLen(200)])
        .field("message", Some(req.message.as_str()), &[Rule::Required, Rule::MaxLen(2000)])
        .finish()?;

    let id = FeedbackRepo::new(state.db())
        .submit(NewFeedback {
            user_id: req.user_id,
            category: req.category,
            rating: req.rating,
            subject: clean(&req.subject),
            message: clean(&req.message),
        })
        .await?;

    state
        .sessions()
        .flash(&csrf.session_id, Flash::success("Thank you for your feedback"));
    Ok((StatusCode::CREATED, Json(FeedbackCreated { id })))
}

/// GET /api/feedback/summary
async fn summary(State(state): State<AppState>) -> Result<Json<Vec<CategorySummary>>, ApiError> {
    Ok(Json(FeedbackRepo::new(state.db()).summary_by_category().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/feedback", post(submit_feedback))
        .route("/feedback/summary", get(summary))
}

#[cfg(test)]
mod tests {
    use crate::http::test_support::{get, json, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn submit_then_summarize() {
        let app = TestApp::new().await;
        let session = app.session().await;

        for rating in [4, 2] {
            let (status, _, body) = app
                .send(json(
                    Method::POST,
                    "/api/feedback",
                    json!({
                        "user_id": 3,
                        "category": "transport",
                        "rating": rating,
                        "subject": "Evening bus",
                        "message": "Please add a 7pm trip.",
                    }),
                    &session,
                    Some(session.csrf.as_str()),
                ))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert!(body["id"].as_i64().unwrap() > 0);
        }

        let (status, _, body) = app.send(get("/api/feedback/summary")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["category"], "transport");
        assert_eq!(body[0]["count"], 2);
        assert_eq!(body[0]["average_rating"], 3.0);
    }

    #[tokio::test]
    async fn all_field_errors_reported_together() {
        let app = TestApp::new().await;
        let session = app.session().await;

        let (status, _, body) = app
            .send(json(
                Method::POST,
                "/api/feedback",
                json!({
                    "user_id": 3,
                    "category": "canteen",
                    "rating": 9,
                    "subject": "",
                    "message": "ok",
                }),
                &session,
                Some(session.csrf.as_str()),
            ))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields = body["fields"].as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert!(fields.contains_key("category"));
        assert!(fields.contains_key("rating"));
        assert!(fields.contains_key("subject"));
    }
}
