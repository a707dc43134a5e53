//! Teacher directory endpoints

use axum::extract::{Query, State};
use axum::{routing::get, Json, Router};
use serde::Deserialize;

use crate::db::repos::{Teacher, TeacherRepo};
use crate::http::error::ApiError;
use crate::http::extractors::ValidId;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TeacherQuery {
    pub department: Option<String>,
}

/// GET /api/teachers - available teachers, or a whole department
async fn list_teachers(
    State(state): State<AppState>,
    Query(query): Query<TeacherQuery>,
) -> Result<Json<Vec<Teacher>>, ApiError> {
    let repo = TeacherRepo::new(state.db());
    let department = query.department.as_deref().map(str::trim).filter(|d| !d.is_empty());
    let teachers = match department {
        Some(department) => repo.by_department(department).await?,
        None => repo.list_available().await?,
    };
    Ok(Json(teachers))
}

/// GET /api/teachers/{id}
async fn get_teacher(State(state): State<AppState>, ValidId(id): ValidId) -> Result<Json<Teacher>, ApiError> {
    Ok(Json(TeacherRepo::new(state.db()).get(id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/teachers", get(list_teachers))
        .route("/teachers/{id}", get(get_teacher))
}

#[cfg(test)]
mod tests {
    use crate::db::repos::teachers::tests::seed_teacher;
    use crate::http::test_support::{get, TestApp};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn lists_and_fetches_teachers() {
        let app = TestApp::new().await;
        let rao = seed_teacher(app.state.db(), "Dr. Rao", "CSE", true).await;
        seed_teacher(app.state.db(), "Dr. Iyer", "CSE", false).await;

        let (status, _, body) = app.send(get("/api/teachers")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, _, body) = app.send(get("/api/teachers?department=CSE")).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, _, body) = app.send(get(&format!("/api/teachers/{}", rao))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Dr. Rao");
        assert_eq!(body["available"], true);
    }

    #[tokio::test]
    async fn bad_and_missing_ids() {
        let app = TestApp::new().await;
        assert_eq!(app.send(get("/api/teachers/abc")).await.0, StatusCode::BAD_REQUEST);
        assert_eq!(app.send(get("/api/teachers/0")).await.0, StatusCode::BAD_REQUEST);

        let (status, _, body) = app.send(get("/api/teachers/77")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }
}
