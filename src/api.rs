//! # Tracker API
//!
//! Shared application state and the Axum router that stitches together every
//! endpoint group.
//!
//! ## Endpoints
//!
//! - `POST /v1/auth/signup`, `POST /v1/auth/login`, `GET /v1/auth/me`
//! - `GET /v1/users`
//! - `GET /v1/questions`, `POST /v1/questions`, `DELETE /v1/questions/:q_id`
//! - `GET /v1/questions/stats`
//! - `POST /v1/questions/:q_id/mark`, `POST /v1/questions/:q_id/like`
//! - `GET /v1/marks`, `GET /v1/likes`
//! - `GET /v1/groups`, `POST /v1/groups`
//! - `GET /v1/groups/:group_id`, `GET /v1/groups/:group_id/users`,
//!   `GET /v1/groups/:group_id/stats`
//! - `GET /v1/languages`
//! - `GET /v1/questions/:q_id/solutions`, `POST /v1/questions/:q_id/solutions`
//! - `GET /health`

use crate::auth::{create_auth_router, AuthService};
use crate::config::Config;
use crate::db::Store;
use crate::error::{TrackerError, TrackerResult};
use crate::groups::{create_group_router, GroupService};
use crate::questions::{create_question_router, QuestionService};
use crate::solutions::{create_solution_router, SolutionService};

use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub auth: AuthService,
    pub questions: QuestionService,
    pub groups: GroupService,
    pub solutions: SolutionService,
    /// Account hidden from user and completion listings
    pub reserved_username: String,
}

impl AppState {
    pub fn new(store: Arc<Store>, config: &Config, jwt_secret: Vec<u8>) -> Self {
        Self {
            auth: AuthService::new(Arc::clone(&store), jwt_secret),
            questions: QuestionService::new(
                Arc::clone(&store),
                config.reserved_username.clone(),
                config.default_group.clone(),
            ),
            groups: GroupService::new(Arc::clone(&store), config.reserved_username.clone()),
            solutions: SolutionService::new(Arc::clone(&store)),
            reserved_username: config.reserved_username.clone(),
            store,
        }
    }
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Unwraps a mandatory request field. Absent and blank values are both
/// treated as missing; the value is returned untrimmed.
pub(crate) fn required(value: Option<String>, field: &'static str) -> TrackerResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(TrackerError::MissingField(field)),
    }
}

/// Creates the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(create_auth_router(state.clone()))
        .merge(create_question_router(state.clone()))
        .merge(create_group_router(state.clone()))
        .merge(create_solution_router(state.clone()))
        .merge(
            Router::new()
                .route("/health", get(health_handler))
                .route("/", get(root_handler))
                .with_state(state),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "signup": "POST /v1/auth/signup",
            "login": "POST /v1/auth/login",
            "me": "GET /v1/auth/me",
            "users": "GET /v1/users",
            "questions": "GET|POST /v1/questions",
            "delete_question": "DELETE /v1/questions/:q_id",
            "mark": "POST /v1/questions/:q_id/mark",
            "like": "POST /v1/questions/:q_id/like",
            "marks": "GET /v1/marks",
            "likes": "GET /v1/likes",
            "question_stats": "GET /v1/questions/stats",
            "groups": "GET|POST /v1/groups",
            "group": "GET /v1/groups/:group_id",
            "group_users": "GET /v1/groups/:group_id/users",
            "group_stats": "GET /v1/groups/:group_id/stats",
            "languages": "GET /v1/languages",
            "solutions": "GET|POST /v1/questions/:q_id/solutions",
            "health": "GET /health"
        }
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let database = if state.store.is_in_memory() {
        ":memory:"
    } else {
        state.store.path()
    };
    match state.store.query("SELECT 1".to_string(), vec![]).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": database
            })),
        ),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": e.to_string()
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use axum::body::Body;
    use axum::http::{header, Request, Response, StatusCode};
    use serde_json::Value;
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<Store>) {
        let store = Arc::new(Store::in_memory().await.unwrap());
        migrations::run_pending(&store).await.unwrap();
        let state = AppState::new(
            Arc::clone(&store),
            &Config::default(),
            AuthService::generate_secret(),
        );
        (create_router(state), store)
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn signup(app: &Router, username: &str) -> String {
        let response = send(
            app,
            "POST",
            "/v1/auth/signup",
            None,
            Some(json!({ "username": username, "password": "correct-horse" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await["data"]["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app().await;
        let response = send(&app, "GET", "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_add_question_requires_auth() {
        let (app, store) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/v1/questions",
            None,
            Some(json!({ "name": "two-sum", "link": "https://leetcode.com/problems/two-sum/" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["code"], "UNAUTHORIZED");

        let response = send(
            &app,
            "POST",
            "/v1/questions",
            Some("not-a-token"),
            Some(json!({ "name": "two-sum", "link": "https://leetcode.com/problems/two-sum/" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let rows = store
            .query("SELECT q_id FROM questions".to_string(), vec![])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_add_question_missing_field() {
        let (app, _) = create_test_app().await;
        let token = signup(&app, "alice").await;

        let response = send(
            &app,
            "POST",
            "/v1/questions",
            Some(&token),
            Some(json!({ "name": "two-sum" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "MISSING_FIELD");
    }

    #[tokio::test]
    async fn test_question_listing_flow() {
        let (app, _) = create_test_app().await;
        let alice = signup(&app, "alice").await;
        let bob = signup(&app, "bob").await;
        signup(&app, "admin").await;

        let response = send(
            &app,
            "POST",
            "/v1/questions",
            Some(&alice),
            Some(json!({ "name": "Q1", "link": "https://leetcode.com/problems/q1/" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let q_id = created["data"]["q_id"].as_i64().unwrap();
        assert_eq!(created["data"]["name"], "Q1");

        let response = send(
            &app,
            "POST",
            &format!("/v1/questions/{}/mark", q_id),
            Some(&alice),
            Some(json!({ "done": true })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/v1/questions", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "data": [{
                    "q_id": q_id,
                    "name": "Q1",
                    "link": "https://leetcode.com/problems/q1/",
                    "posted_by": "alice",
                    "alice": true,
                    "bob": false
                }]
            })
        );

        let response = send(&app, "GET", "/v1/marks", Some(&bob), None).await;
        let marks = body_json(response).await;
        assert_eq!(marks["data"].as_array().unwrap().len(), 1);
        assert_eq!(marks["data"][0]["done"], true);
        assert_eq!(marks["data"][0]["q_id"], q_id);
    }

    #[tokio::test]
    async fn test_list_questions_filter() {
        let (app, _) = create_test_app().await;
        let alice = signup(&app, "alice").await;
        for name in ["two-sum", "three-sum", "lru-cache"] {
            let response = send(
                &app,
                "POST",
                "/v1/questions",
                Some(&alice),
                Some(json!({ "name": name, "link": format!("https://leetcode.com/problems/{}/", name) })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = send(&app, "GET", "/v1/questions?q_name=SUM", None, None).await;
        let body = body_json(response).await;
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["two-sum", "three-sum"]);

        // An unparsable group filter is ignored
        let response = send(&app, "GET", "/v1/questions?group_id=abc", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let (app, _) = create_test_app().await;
        let token = signup(&app, "alice").await;

        let request = Request::builder()
            .method("POST")
            .uri("/v1/questions")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_paged_listing_and_stats_routes() {
        let (app, _) = create_test_app().await;
        let alice = signup(&app, "alice").await;

        let mut ids = Vec::new();
        for name in ["one", "two", "three"] {
            let response = send(
                &app,
                "POST",
                "/v1/questions",
                Some(&alice),
                Some(json!({ "name": name, "link": format!("https://leetcode.com/problems/{}/", name) })),
            )
            .await;
            ids.push(body_json(response).await["data"]["q_id"].as_i64().unwrap());
        }
        send(
            &app,
            "POST",
            &format!("/v1/questions/{}/mark", ids[0]),
            Some(&alice),
            Some(json!({ "done": true })),
        )
        .await;

        let response = send(&app, "GET", "/v1/questions?page_size=2", None, None).await;
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        let next = &body["next"];
        assert_eq!(next["after_id"], ids[1]);

        let uri = format!(
            "/v1/questions?page_size=2&after_time={}&after_id={}",
            next["after_time"].as_str().unwrap(),
            ids[1]
        );
        let body = body_json(send(&app, "GET", &uri, None, None).await).await;
        assert_eq!(body["data"][0]["q_id"], ids[2]);
        assert_eq!(body["next"], Value::Null);

        let response = send(&app, "GET", "/v1/questions/stats", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, "GET", "/v1/questions/stats", Some(&alice), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await["data"],
            json!({ "question_count": 3, "completed_count": 1 })
        );

        let response = send(&app, "GET", "/v1/groups/1/stats", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let stats = body_json(response).await;
        assert_eq!(stats["data"]["question_count"], 3);
        assert_eq!(stats["data"]["completed_count"], 1);
        assert_eq!(stats["data"]["still_need"].as_array().unwrap().len(), 2);
        assert_eq!(stats["data"]["stack_graph_data"][0]["alice"], 1);

        let response = send(&app, "GET", "/v1/groups/42", None, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_signup_is_conflict() {
        let (app, _) = create_test_app().await;
        signup(&app, "alice").await;

        let response = send(
            &app,
            "POST",
            "/v1/auth/signup",
            None,
            Some(json!({ "username": "alice", "password": "another-pass" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"]["code"], "CONFLICT");
    }

    #[test]
    fn test_required() {
        assert_eq!(required(Some(" x ".to_string()), "name").unwrap(), " x ");
        assert!(matches!(
            required(Some("   ".to_string()), "name"),
            Err(TrackerError::MissingField("name"))
        ));
        assert!(matches!(required(None, "link"), Err(TrackerError::MissingField("link"))));
    }
}
