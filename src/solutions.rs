//! # Solutions Module
//!
//! Languages and the solutions members post for a question.

use crate::api::{required, AppState};
use crate::auth::AuthUser;
use crate::db::{SqlValue, Store};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{now_timestamp, Language, Solution};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct SolutionService {
    store: Arc<Store>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewSolution {
    pub title: Option<String>,
    /// Language name, e.g. `"Rust"`
    pub language: Option<String>,
    pub tc: Option<String>,
    pub sc: Option<String>,
    pub code: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SolutionService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn list_languages(&self) -> TrackerResult<Vec<Language>> {
        self.store
            .query_rows(
                format!("SELECT {} FROM languages ORDER BY name", Language::COLUMNS),
                vec![],
                Language::from_row,
            )
            .await
    }

    async fn ensure_question(&self, q_id: i64) -> TrackerResult<()> {
        self.store
            .query_opt(
                "SELECT q_id FROM questions WHERE q_id = ?".to_string(),
                vec![SqlValue::Integer(q_id)],
                |row| row.get::<_, i64>(0),
            )
            .await?
            .map(|_| ())
            .ok_or_else(|| TrackerError::not_found(format!("Question {} not found", q_id)))
    }

    /// Solutions for a question, oldest first
    pub async fn list_solutions(&self, q_id: i64) -> TrackerResult<Vec<Solution>> {
        self.ensure_question(q_id).await?;
        self.store
            .query_rows(
                format!(
                    "SELECT {} FROM solutions s JOIN languages l ON s.language_id = l.id \
                     WHERE s.q_id = ? ORDER BY s.posted_time, s.id",
                    Solution::COLUMNS
                ),
                vec![SqlValue::Integer(q_id)],
                Solution::from_row,
            )
            .await
    }

    pub async fn add_solution(
        &self,
        caller: &AuthUser,
        q_id: i64,
        req: NewSolution,
    ) -> TrackerResult<Solution> {
        let title = required(req.title, "title")?.trim().to_string();
        let language = required(req.language, "language")?.trim().to_string();
        let tc = required(req.tc, "tc")?.trim().to_string();
        let sc = required(req.sc, "sc")?.trim().to_string();
        let code = required(req.code, "code")?;
        let notes = req.notes.unwrap_or_default();

        self.ensure_question(q_id).await?;

        let language_id = self
            .store
            .query_opt(
                "SELECT id FROM languages WHERE name = ?".to_string(),
                vec![SqlValue::Text(language.clone())],
                |row| row.get::<_, i64>(0),
            )
            .await?
            .ok_or_else(|| TrackerError::invalid(format!("Unknown language '{}'", language)))?;

        let posted_time = now_timestamp();
        let id = self
            .store
            .insert(
                "INSERT INTO solutions (q_id, language_id, posted_by, title, code, notes, tc, sc, posted_time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
                    .to_string(),
                vec![
                    q_id.into(),
                    language_id.into(),
                    caller.id.into(),
                    title.clone().into(),
                    code.clone().into(),
                    notes.clone().into(),
                    tc.clone().into(),
                    sc.clone().into(),
                    posted_time.clone().into(),
                ],
            )
            .await?;
        info!("{} posted solution {} for question {}", caller.username, id, q_id);

        Ok(Solution {
            id,
            q_id,
            language,
            posted_by: caller.id,
            title,
            code,
            notes,
            tc,
            sc,
            posted_time,
        })
    }
}

/// GET /v1/languages
async fn list_languages_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TrackerError> {
    let languages = state.solutions.list_languages().await?;
    Ok(Json(json!({ "data": languages })))
}

/// GET /v1/questions/:q_id/solutions
async fn list_solutions_handler(
    State(state): State<AppState>,
    Path(q_id): Path<i64>,
) -> Result<impl IntoResponse, TrackerError> {
    let solutions = state.solutions.list_solutions(q_id).await?;
    Ok(Json(json!({ "data": solutions })))
}

/// POST /v1/questions/:q_id/solutions
async fn add_solution_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(q_id): Path<i64>,
    payload: Result<Json<NewSolution>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(req) = payload?;
    let solution = state.solutions.add_solution(&user, q_id, req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": solution }))))
}

pub fn create_solution_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/languages", get(list_languages_handler))
        .route(
            "/v1/questions/:q_id/solutions",
            get(list_solutions_handler).post(add_solution_handler),
        )
        .with_state(state)
}
