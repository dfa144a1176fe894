//! Administrative HTTP API.
//!
//! | Route | Behaviour |
//! |---|---|
//! | `GET /health` | liveness and connected client count |
//! | `GET /share/:link` | redeem a share link; returns the accepted version only |
//! | `POST /:client_id/roots` | register a root directory |
//! | `GET /:client_id/roots/:root_id` | read a root directory (`root_id` is the percent-encoded after path) |
//! | `PATCH`/`POST /:client_id/roots/:root_id` | not implemented |

use crate::error::ServerError;
use crate::locks::run_blocking;
use crate::pool::ConnectionPool;
use crate::registration::RegistrationService;
use crate::sharing::SharingService;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rootsync_protocol::{File, RootDirRegisterRequest, RootDirResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct AdminState {
    /// Root directory registration.
    pub registration: Arc<RegistrationService>,
    /// Share link redemption.
    pub sharing: Arc<SharingService>,
    /// Live connections.
    pub pool: Arc<ConnectionPool>,
}

/// Builds the administrative router.
pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/share/:link", get(redeem_link))
        .route("/:client_id/roots", post(register_root))
        .route(
            "/:client_id/roots/:root_id",
            get(get_root).patch(not_implemented).post(not_implemented),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.pool.len(),
    }))
}

async fn redeem_link(
    State(state): State<AdminState>,
    Path(link): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let sharing = Arc::clone(&state.sharing);
    let token = link.clone();
    let file = run_blocking(move || sharing.redeem(&token)).await?;
    Ok(Json(json!({
        "link": link,
        "file": shared_file_view(&file),
    })))
}

/// The part of a file a link holder may see. Staged conflict versions,
/// client paths and client identities stay private.
fn shared_file_view(file: &File) -> Value {
    json!({
        "after_path": file.after_path,
        "latest_hash": file.latest_hash,
        "latest_sync_timestamp": file.latest_sync_timestamp,
        "contents_existed": file.contents_existed,
        "metadata": file.metadata,
    })
}

async fn register_root(
    State(state): State<AdminState>,
    Path(client_id): Path<String>,
    payload: Result<Json<RootDirRegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    let Json(request) = payload.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    let registration = Arc::clone(&state.registration);
    let root = run_blocking(move || registration.register_root_dir(&client_id, &request)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": format!("root directory {} registered", root.after_path),
            "root": RootDirResponse::from(&root),
        })),
    ))
}

async fn get_root(
    State(state): State<AdminState>,
    Path((client_id, root_id)): Path<(String, String)>,
) -> Result<Json<RootDirResponse>, ServerError> {
    let registration = Arc::clone(&state.registration);
    let root = run_blocking(move || registration.get_root_dir(&client_id, &root_id)).await?;
    Ok(Json(RootDirResponse::from(&root)))
}

async fn not_implemented() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": "not implemented" })),
    )
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServerError::Exhausted(_) => StatusCode::GONE,
            err if err.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status.is_server_error() {
            warn!(error = %self, "admin request failed");
            "internal server error".to_string()
        } else {
            debug!(error = %self, "admin request rejected");
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use crate::transport::MemoryLink;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use rootsync_protocol::{ClientRegisterRequest, Conflict, FileHistory, RootDirectory};
    use rootsync_storage::InMemoryStore;
    use tower::ServiceExt;

    fn state() -> (AdminState, Arc<Repository>) {
        let repository = Arc::new(Repository::new(Arc::new(InMemoryStore::new())));
        let pool = Arc::new(ConnectionPool::new());
        let registration = Arc::new(RegistrationService::new(
            Arc::clone(&repository),
            Arc::clone(&pool),
            None,
        ));
        let (link, _) = MemoryLink::new("10.0.0.1:5");
        registration
            .register_client(&ClientRegisterRequest::new("c1"), &link.connection())
            .unwrap();
        let sharing = Arc::new(SharingService::new(Arc::clone(&repository), 10));
        (
            AdminState {
                registration,
                sharing,
                pool,
            },
            repository,
        )
    }

    async fn send(router: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_connections() {
        let (state, _) = state();
        let (status, body) = send(build_router(state), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connections"], 1);
    }

    #[tokio::test]
    async fn register_and_read_root() {
        let (state, _) = state();
        let router = build_router(state);

        let body = r#"{"before_path":"/home/c1/docs","after_path":"/docs","password":"pw"}"#;
        let (status, value) = send(router.clone(), Method::POST, "/c1/roots", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["root"]["owner"], "c1");
        assert!(value["root"].get("password").is_none());

        let (status, value) = send(router.clone(), Method::GET, "/c1/roots/%2Fdocs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["after_path"], "/docs");

        let (status, _) = send(router, Method::GET, "/c2/roots/%2Fdocs", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let (state, _) = state();
        let (status, value) =
            send(build_router(state), Method::POST, "/c1/roots", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(value["error"].is_string());
    }

    #[tokio::test]
    async fn unknown_client_is_not_found() {
        let (state, _) = state();
        let body = r#"{"before_path":"/x","after_path":"/x"}"#;
        let (status, _) = send(build_router(state), Method::POST, "/ghost/roots", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn placeholders_answer_not_implemented() {
        let (state, _) = state();
        let router = build_router(state);
        let (status, _) = send(router.clone(), Method::PATCH, "/c1/roots/%2Fdocs", Some("{}")).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        let (status, _) = send(router, Method::POST, "/c1/roots/%2Fdocs", Some("{}")).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn share_link_statuses() {
        let (state, repository) = state();
        repository
            .put_root_dir(&RootDirectory {
                after_path: "/docs".into(),
                owner: "c1".into(),
                uuids: vec!["c1".into()],
                ..RootDirectory::default()
            })
            .unwrap();
        repository
            .put_file(&File {
                after_path: "/docs/a".into(),
                root_dir_key: "/docs".into(),
                latest_hash: "h1".into(),
                ..File::default()
            })
            .unwrap();
        let link = state.sharing.create_link("c1", "/docs/a", 1).unwrap().link;
        let router = build_router(state);

        let (status, value) = send(router.clone(), Method::GET, &format!("/share/{link}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["file"]["latest_hash"], "h1");

        let (status, _) = send(router.clone(), Method::GET, &format!("/share/{link}"), None).await;
        assert_eq!(status, StatusCode::GONE);

        let (status, _) = send(router, Method::GET, "/share/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shared_file_hides_conflict_state() {
        let (state, repository) = state();
        repository
            .put_root_dir(&RootDirectory {
                after_path: "/docs".into(),
                owner: "c1".into(),
                uuids: vec!["c1".into(), "c2".into()],
                ..RootDirectory::default()
            })
            .unwrap();
        let mut conflict = Conflict::new("/docs/a");
        conflict.stage(FileHistory {
            after_path: "/docs/a".into(),
            before_path: "/home/c2/secret/a".into(),
            uuid: "c2".into(),
            hash: "rival".into(),
            ..FileHistory::default()
        });
        repository
            .put_file(&File {
                after_path: "/docs/a".into(),
                before_path: "/home/c1/docs/a".into(),
                root_dir_key: "/docs".into(),
                latest_hash: "h1".into(),
                latest_edit_client: "c1".into(),
                need_force_sync: true,
                conflict,
                ..File::default()
            })
            .unwrap();
        let link = state.sharing.create_link("c1", "/docs/a", 2).unwrap().link;

        let uri = format!("/share/{link}");
        let (status, value) = send(build_router(state), Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["file"]["latest_hash"], "h1");
        assert_eq!(value["file"]["after_path"], "/docs/a");

        let file = value["file"].as_object().unwrap();
        for hidden in ["conflict", "latest_edit_client", "before_path", "need_force_sync"] {
            assert!(!file.contains_key(hidden), "{hidden} exposed");
        }
        let body = value.to_string();
        assert!(!body.contains("rival"));
        assert!(!body.contains("/home/"));
    }
}
