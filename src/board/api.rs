use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch},
};
use serde::Deserialize;
use tokio::sync::broadcast;

use super::db::{DbHandle, NewTask};
use super::models::{ContextKey, MoveRequest, PositionContext};
use super::ws::{WsEvent, WsMessage, broadcast_message};
use crate::errors::PositionError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<WsEvent>,
}

pub type SharedState = Arc<AppState>;

/// Header carrying the caller's tenant. Authentication sits in front of
/// this service and is expected to set it.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateStatusRequest {
    pub name: String,
    #[serde(default)]
    pub sort_order: i32,
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub context: Option<String>,
    pub context_id: Option<i64>,
}

/// Body of `PATCH /api/task-positions/update`. `context` stays a string
/// here so an unknown value is reported as a validation error.
#[derive(Deserialize)]
pub struct UpdatePositionRequest {
    pub task_id: i64,
    pub context: String,
    #[serde(default)]
    pub context_id: Option<i64>,
    pub position: i32,
    #[serde(default)]
    pub task_ids: Vec<i64>,
}

impl UpdatePositionRequest {
    fn into_move(self) -> Result<MoveRequest, PositionError> {
        let req = MoveRequest {
            task_id: self.task_id,
            context: PositionContext::from_str(&self.context)?,
            context_id: self.context_id,
            position: self.position,
            task_ids: self.task_ids,
        };
        req.validate()?;
        Ok(req)
    }
}

// ── Tenant extractor ──────────────────────────────────────────────────

/// The organization every handler is scoped to.
pub struct OrgId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for OrgId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .ok_or_else(|| ApiError::BadRequest(format!("Missing {} header", ORGANIZATION_HEADER)))?;
        raw.to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(OrgId)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} header", ORGANIZATION_HEADER)))
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PositionError> for ApiError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::NotFound(msg) => ApiError::NotFound(msg),
            PositionError::Validation(_) => ApiError::BadRequest(err.to_string()),
            PositionError::Conflict(_) => ApiError::Conflict(err.to_string()),
            PositionError::Database(_) | PositionError::Remote(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        PositionError::from(err).into()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/organizations",
            get(list_organizations).post(create_organization),
        )
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/statuses", get(list_statuses).post(create_status))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/{id}", get(get_task).delete(delete_task))
        .route("/api/tasks/{id}/status", patch(set_task_status))
        .route("/api/task-positions/update", patch(update_position))
        .route("/api/task-positions/{context}", get(list_global_positions))
        .route(
            "/api/task-positions/{context}/{context_id}",
            get(list_scoped_positions),
        )
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_organizations(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let orgs = state.db.call(|db| db.list_organizations()).await?;
    Ok(Json(orgs))
}

async fn create_organization(
    State(state): State<SharedState>,
    Json(req): Json<CreateOrganizationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name;
    let org = state.db.call(move |db| db.create_organization(&name)).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

async fn list_projects(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state.db.call(move |db| db.list_projects(org)).await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name;
    let project = state.db.call(move |db| db.create_project(org, &name)).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_statuses(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
) -> Result<impl IntoResponse, ApiError> {
    let statuses = state.db.call(move |db| db.list_statuses(org)).await?;
    Ok(Json(statuses))
}

async fn create_status(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Json(req): Json<CreateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state
        .db
        .call(move |db| db.create_status(org, &req.name, req.sort_order))
        .await?;
    Ok((StatusCode::CREATED, Json(status)))
}

/// Without a context: every task of the organization by id. With one: the
/// tasks of that context in board order.
async fn list_tasks(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let key = match query.context {
        Some(ref c) => Some(ContextKey::new(PositionContext::from_str(c)?, query.context_id)?),
        None => None,
    };
    let tasks = state
        .db
        .call(move |db| match key {
            Some(key) => db.list_tasks_ordered(org, &key),
            None => db.list_tasks(org, None),
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Json(req): Json<NewTask>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.db.call(move |db| db.create_task(org, &req)).await?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskCreated { task: task.clone() });
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state.db.call(move |db| db.get_task(org, id)).await?;
    match task {
        Some(task) => Ok(Json(task)),
        None => Err(PositionError::task_not_found(id, org).into()),
    }
}

async fn delete_task(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.db.call(move |db| db.delete_task(org, id)).await?;
    if !deleted {
        return Err(PositionError::task_not_found(id, org).into());
    }
    broadcast_message(
        &state.ws_tx,
        &WsMessage::TaskDeleted {
            organization_id: org,
            task_id: id,
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn set_task_status(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Path(id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = state
        .db
        .call(move |db| db.set_task_status(org, id, req.status_id))
        .await?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskUpdated { task: task.clone() });
    Ok(Json(task))
}

async fn list_global_positions(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Path(context): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = ContextKey::new(PositionContext::from_str(&context)?, None)?;
    let positions = state.db.call(move |db| db.list_positions(org, &key)).await?;
    Ok(Json(positions))
}

async fn list_scoped_positions(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    Path((context, context_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let key = ContextKey::new(PositionContext::from_str(&context)?, Some(context_id))?;
    let positions = state.db.call(move |db| db.list_positions(org, &key)).await?;
    Ok(Json(positions))
}

async fn update_position(
    State(state): State<SharedState>,
    OrgId(org): OrgId,
    payload: Result<Json<UpdatePositionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let req = body.into_move()?;
    let (context, context_id, task_id) = (req.context, req.context_id, req.task_id);

    let outcome = state
        .db
        .call(move |db| db.move_position(org, &req))
        .await
        .map_err(|e| {
            let err = PositionError::from(e);
            if err.is_retryable() {
                tracing::warn!(organization_id = org, task_id, error = %err, "position move lost a race");
            }
            ApiError::from(err)
        })?;

    tracing::info!(
        organization_id = org,
        task_id,
        context = %context,
        context_id = ?context_id,
        written = outcome.written,
        "task position updated"
    );

    if outcome.written > 0 {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::PositionsUpdated {
                organization_id: org,
                context,
                context_id,
                positions: outcome.positions.clone(),
            },
        );
    }
    Ok(Json(outcome))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> (Router, broadcast::Receiver<WsEvent>) {
        let db = BoardDb::new_in_memory().unwrap();
        let (ws_tx, ws_rx) = broadcast::channel(16);
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
            ws_tx,
        });
        (api_router().with_state(state), ws_rx)
    }

    async fn body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        org: Option<i64>,
        body: Option<serde_json::Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(org) = org {
            builder = builder.header(ORGANIZATION_HEADER, org.to_string());
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    /// Creates org 1 with project 1 and `n` tasks in it; returns the task ids.
    async fn seed(app: &Router, n: usize) -> Vec<i64> {
        send(app, "POST", "/api/organizations", None, Some(serde_json::json!({"name": "acme"}))).await;
        send(app, "POST", "/api/projects", Some(1), Some(serde_json::json!({"name": "web"}))).await;
        let mut ids = Vec::new();
        for i in 0..n {
            let resp = send(
                app,
                "POST",
                "/api/tasks",
                Some(1),
                Some(serde_json::json!({"title": format!("Task {}", i), "project_id": 1})),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::CREATED);
            ids.push(body_json(resp.into_body()).await["id"].as_i64().unwrap());
        }
        ids
    }

    fn pairs(value: &serde_json::Value) -> Vec<(i64, i64)> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|p| (p["task_id"].as_i64().unwrap(), p["position"].as_i64().unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _rx) = test_app();
        let resp = send(&app, "GET", "/health", None, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_org_header_is_bad_request() {
        let (app, _rx) = test_app();
        let resp = send(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("x-organization-id"));
    }

    #[tokio::test]
    async fn test_empty_group_lists_nothing() {
        let (app, _rx) = test_app();
        seed(&app, 2).await;
        let resp = send(&app, "GET", "/api/task-positions/project/1", Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp.into_body()).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_then_query_round_trip() {
        let (app, mut rx) = test_app();
        let t = seed(&app, 3).await;

        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[2],
                "context": "project",
                "context_id": 1,
                "position": 1,
                "task_ids": t,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let moved = body_json(resp.into_body()).await;
        assert_eq!(
            pairs(&moved["positions"]),
            vec![(t[2], 1), (t[0], 2), (t[1], 3)]
        );

        let resp = send(&app, "GET", "/api/task-positions/project/1", Some(1), None).await;
        let listed = body_json(resp.into_body()).await;
        assert_eq!(pairs(&listed), pairs(&moved["positions"]));

        // Task creation broadcasts come first; the last message is the move.
        let mut last = None;
        while let Ok(msg) = rx.try_recv() {
            last = Some(msg);
        }
        let last = last.unwrap();
        assert_eq!(last.organization_id, 1);
        let last: serde_json::Value = serde_json::from_str(&last.payload).unwrap();
        assert_eq!(last["type"], "PositionsUpdated");
        assert_eq!(last["data"]["context"], "project");
    }

    #[tokio::test]
    async fn test_all_projects_context_without_id() {
        let (app, _rx) = test_app();
        let t = seed(&app, 2).await;
        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[1],
                "context": "all_projects",
                "context_id": null,
                "position": 1,
                "task_ids": t,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(&app, "GET", "/api/task-positions/all_projects", Some(1), None).await;
        let listed = body_json(resp.into_body()).await;
        assert_eq!(pairs(&listed), vec![(t[1], 1), (t[0], 2)]);
    }

    #[tokio::test]
    async fn test_invalid_context_is_bad_request() {
        let (app, _rx) = test_app();
        let t = seed(&app, 1).await;
        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[0],
                "context": "sprint",
                "context_id": 1,
                "position": 1,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, "GET", "/api/task-positions/sprint", Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_context_id_is_bad_request() {
        let (app, _rx) = test_app();
        let t = seed(&app, 1).await;
        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[0],
                "context": "kanban_status",
                "position": 1,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, "GET", "/api/task-positions/project", Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_positive_position_is_bad_request() {
        let (app, _rx) = test_app();
        let t = seed(&app, 1).await;
        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[0],
                "context": "project",
                "context_id": 1,
                "position": 0,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_foreign_organization_is_not_found() {
        let (app, _rx) = test_app();
        let t = seed(&app, 2).await;
        send(&app, "POST", "/api/organizations", None, Some(serde_json::json!({"name": "globex"}))).await;

        let resp = send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(2),
            Some(serde_json::json!({
                "task_id": t[0],
                "context": "all_projects",
                "position": 1,
                "task_ids": t,
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&app, "GET", "/api/task-positions/project/1", Some(2), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_task_from_other_project_is_not_found() {
        let (app, _rx) = test_app();
        let t = seed(&app, 2).await;
        send(&app, "POST", "/api/projects", Some(1), Some(serde_json::json!({"name": "mobile"}))).await;

        let move_into = |project: i64| {
            serde_json::json!({
                "task_id": t[0],
                "context": "project",
                "context_id": project,
                "position": 1,
                "task_ids": t,
            })
        };
        let resp = send(&app, "PATCH", "/api/task-positions/update", Some(1), Some(move_into(1))).await;
        assert_eq!(resp.status(), StatusCode::OK);

        for _ in 0..2 {
            let resp =
                send(&app, "PATCH", "/api/task-positions/update", Some(1), Some(move_into(2))).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
        let resp = send(&app, "GET", "/api/task-positions/project/2", Some(1), None).await;
        assert!(body_json(resp.into_body()).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_tasks_in_board_order() {
        let (app, _rx) = test_app();
        let t = seed(&app, 3).await;
        send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[1],
                "context": "project",
                "context_id": 1,
                "position": 1,
                "task_ids": [t[1]],
            })),
        )
        .await;

        let resp = send(&app, "GET", "/api/tasks?context=project&context_id=1", Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let tasks = body_json(resp.into_body()).await;
        let ids: Vec<i64> = tasks
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![t[1], t[0], t[2]]);
    }

    #[tokio::test]
    async fn test_delete_task_compacts_and_404s_after() {
        let (app, _rx) = test_app();
        let t = seed(&app, 3).await;
        send(
            &app,
            "PATCH",
            "/api/task-positions/update",
            Some(1),
            Some(serde_json::json!({
                "task_id": t[0],
                "context": "project",
                "context_id": 1,
                "position": 3,
                "task_ids": t,
            })),
        )
        .await;

        let resp = send(&app, "DELETE", &format!("/api/tasks/{}", t[1]), Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = send(&app, "GET", "/api/task-positions/project/1", Some(1), None).await;
        let listed = body_json(resp.into_body()).await;
        assert_eq!(pairs(&listed), vec![(t[2], 1), (t[0], 2)]);

        let resp = send(&app, "GET", &format!("/api/tasks/{}", t[1]), Some(1), None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_task_status() {
        let (app, _rx) = test_app();
        let t = seed(&app, 1).await;
        let resp = send(&app, "POST", "/api/statuses", Some(1), Some(serde_json::json!({"name": "Doing"}))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let status = body_json(resp.into_body()).await;

        let resp = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}/status", t[0]),
            Some(1),
            Some(serde_json::json!({"status_id": status["id"]})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let task = body_json(resp.into_body()).await;
        assert_eq!(task["status_id"], status["id"]);
    }
}
