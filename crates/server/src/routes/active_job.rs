// crates/server/src/routes/active_job.rs
//! API routes for the active-job pointer.
//!
//! - GET    /active-job                 Current pointer (nullable fields)
//! - POST   /active-job                 Point at a job (400 unless `job_id` is a UUID)
//! - DELETE /active-job[?job_id=X]      Clear; compare-and-clear when `job_id` is given

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use jobkeeper_core::{ActiveJob, JobId};
use jobkeeper_db::DbError;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[cfg_attr(test, derive(Deserialize))]
pub struct ActiveJobResponse {
    #[ts(type = "string | null")]
    pub job_id: Option<JobId>,
    pub title: Option<String>,
}

impl From<ActiveJob> for ActiveJobResponse {
    fn from(active: ActiveJob) -> Self {
        Self {
            job_id: active.job_id,
            title: active.title,
        }
    }
}

#[derive(Debug, Deserialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
pub struct SetActiveJobRequest {
    pub job_id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearActiveJobQuery {
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize, TS)]
#[ts(export, export_to = "../../../web/src/types/generated/")]
#[cfg_attr(test, derive(Deserialize))]
pub struct ClearActiveJobResponse {
    pub cleared: bool,
}

/// GET /api/active-job
async fn get_active_job(State(state): State<Arc<AppState>>) -> ApiResult<Json<ActiveJobResponse>> {
    let active = state.db.get_active_job().await?;
    Ok(Json(active.into()))
}

/// POST /api/active-job
async fn set_active_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SetActiveJobRequest>, JsonRejection>,
) -> ApiResult<Json<ActiveJobResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    match state
        .db
        .set_active_job(&request.job_id, request.title.as_deref())
        .await
    {
        Ok(()) => {}
        Err(DbError::InvalidJobId(_)) => {
            return Err(ApiError::BadRequest("job_id must be a UUID".to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    let active = state.db.get_active_job().await?;
    Ok(Json(active.into()))
}

/// DELETE /api/active-job
async fn clear_active_job(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearActiveJobQuery>,
) -> ApiResult<Json<ClearActiveJobResponse>> {
    let cleared = match query.job_id.as_deref() {
        Some(job_id) => state.db.clear_active_job_if_current(job_id).await?,
        None => {
            state.db.clear_active_job().await?;
            true
        }
    };
    Ok(Json(ClearActiveJobResponse { cleared }))
}

/// Build the active-job router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/active-job",
        get(get_active_job)
            .post(set_active_job)
            .delete(clear_active_job),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use jobkeeper_db::Database;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<AppState>) {
        let db = Database::new_in_memory().await.unwrap();
        let state = AppState::new(db);
        let app = Router::new()
            .nest("/api", router())
            .with_state(Arc::clone(&state));
        (app, state)
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_get_empty_pointer() {
        let (app, _state) = app().await;
        let (status, body) = send(app, Method::GET, "/api/active-job", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["job_id"].is_null());
        assert!(json["title"].is_null());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (app, state) = app().await;
        let id = JobId::new();
        let payload = format!(r#"{{"job_id":"{id}","title":"Renaming 4 files"}}"#);
        let (status, _) = send(app.clone(), Method::POST, "/api/active-job", Some(&payload)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, Method::GET, "/api/active-job", None).await;
        assert_eq!(status, StatusCode::OK);
        let response: ActiveJobResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(response.job_id, Some(id));
        assert_eq!(response.title.as_deref(), Some("Renaming 4 files"));
        assert!(state.db.get_active_job().await.unwrap().is_set());
    }

    #[tokio::test]
    async fn test_set_rejects_malformed_id() {
        let (app, state) = app().await;
        let (status, body) = send(
            app,
            Method::POST,
            "/api/active-job",
            Some(r#"{"job_id":"not-a-uuid","title":"x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.contains("not-a-uuid"));
        assert!(!state.db.get_active_job().await.unwrap().is_set());
    }

    #[tokio::test]
    async fn test_set_rejects_missing_body_field() {
        let (app, _state) = app().await;
        let (status, _) = send(app, Method::POST, "/api/active-job", Some(r#"{"title":"x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear_unconditionally() {
        let (app, state) = app().await;
        state
            .db
            .set_active_job(&JobId::new().to_string(), None)
            .await
            .unwrap();

        let (status, body) = send(app, Method::DELETE, "/api/active-job", None).await;
        assert_eq!(status, StatusCode::OK);
        let response: ClearActiveJobResponse = serde_json::from_str(&body).unwrap();
        assert!(response.cleared);
        assert!(!state.db.get_active_job().await.unwrap().is_set());
    }

    #[tokio::test]
    async fn test_compare_and_clear_over_http() {
        let (app, state) = app().await;
        let current = JobId::new();
        let stale = JobId::new();
        state
            .db
            .set_active_job(&current.to_string(), None)
            .await
            .unwrap();

        let uri = format!("/api/active-job?job_id={stale}");
        let (_, body) = send(app.clone(), Method::DELETE, &uri, None).await;
        let response: ClearActiveJobResponse = serde_json::from_str(&body).unwrap();
        assert!(!response.cleared);
        assert_eq!(
            state.db.get_active_job().await.unwrap().job_id,
            Some(current)
        );

        let uri = format!("/api/active-job?job_id={current}");
        let (_, body) = send(app, Method::DELETE, &uri, None).await;
        let response: ClearActiveJobResponse = serde_json::from_str(&body).unwrap();
        assert!(response.cleared);
        assert!(!state.db.get_active_job().await.unwrap().is_set());
    }
}
