//! # Questions Module
//!
//! Practice questions and the per-user state attached to them.
//!
//! ## Endpoints
//!
//! - `GET /v1/questions` - Listing with one completion flag per user
//! - `GET /v1/questions/stats` - Your completion count (auth)
//! - `POST /v1/questions` - Post a question (auth)
//! - `DELETE /v1/questions/:q_id` - Remove a question you posted (auth)
//! - `POST /v1/questions/:q_id/mark` - Set your completion flag (auth)
//! - `POST /v1/questions/:q_id/like` - Set your like (auth)
//! - `GET /v1/marks` - Every completion mark
//! - `GET /v1/likes` - Every like

use crate::api::{required, AppState};
use crate::auth::AuthUser;
use crate::db::{SqlValue, Store};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{now_timestamp, LikeQuestion, MarkQuestion, Question, QuestionListing};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed keys of a listing row; no username may shadow them
pub const QUESTION_ROW_KEYS: [&str; 4] = ["q_id", "name", "link", "posted_by"];

pub const MAX_NAME_LENGTH: usize = 255;
pub const MAX_LINK_LENGTH: usize = 500;

/// Largest page a listing request may ask for
pub const MAX_PAGE_SIZE: usize = 100;

/// Query and command service for questions, marks and likes
#[derive(Clone)]
pub struct QuestionService {
    store: Arc<Store>,
    reserved_username: String,
    default_group: String,
}

/// Listing filters and keyset cursor; anything unparsable is ignored.
///
/// Paging is keyed on `(posted_time, q_id)`: pass the last row's
/// `after_time`/`after_id` from the previous page's `next` cursor.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub q_name: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Only questions this user id has not marked done
    #[serde(default)]
    pub not_completed_by: Option<String>,
    #[serde(default)]
    pub page_size: Option<String>,
    #[serde(default)]
    pub after_time: Option<String>,
    #[serde(default)]
    pub after_id: Option<String>,
}

fn parse_id(value: Option<&str>) -> Option<i64> {
    value.and_then(|s| s.trim().parse::<i64>().ok())
}

impl ListParams {
    fn page_size(&self) -> Option<usize> {
        self.page_size
            .as_deref()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .map(|n| n.min(MAX_PAGE_SIZE))
    }

    fn cursor(&self) -> Option<PageCursor> {
        let after_time = self
            .after_time
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        let after_id = parse_id(self.after_id.as_deref())?;
        Some(PageCursor {
            after_time: after_time.to_string(),
            after_id,
        })
    }
}

/// Position after which the next page starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub after_time: String,
    pub after_id: i64,
}

/// One page of the listing; `next` is `None` on the last page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPage {
    pub items: Vec<QuestionListing>,
    pub next: Option<PageCursor>,
}

/// Completion totals for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionStats {
    pub question_count: i64,
    pub completed_count: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub group_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewQuestion {
    pub name: Option<String>,
    pub link: Option<String>,
    /// Falls back to the configured default group
    #[serde(default)]
    pub group_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkRequest {
    pub done: Option<bool>,
    #[serde(default)]
    pub difficulty: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LikeRequest {
    pub like: Option<bool>,
}

/// Escapes LIKE wildcards so the filter is a plain substring match
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl QuestionService {
    pub fn new(
        store: Arc<Store>,
        reserved_username: impl Into<String>,
        default_group: impl Into<String>,
    ) -> Self {
        Self {
            store,
            reserved_username: reserved_username.into(),
            default_group: default_group.into(),
        }
    }

    /// Questions in posting order, each carrying a `done` flag for every
    /// non-reserved user.
    pub async fn list_questions(&self, params: ListParams) -> TrackerResult<Vec<QuestionListing>> {
        Ok(self.list_question_page(params).await?.items)
    }

    /// One page of the listing.
    ///
    /// Marks are read once for the whole page and joined in memory.
    pub async fn list_question_page(&self, params: ListParams) -> TrackerResult<QuestionPage> {
        let users: Vec<(i64, String)> = self
            .store
            .query_rows(
                "SELECT id, username FROM users WHERE username != ? ORDER BY id".to_string(),
                vec![SqlValue::Text(self.reserved_username.clone())],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .await?;

        let mut sql = String::from(
            "SELECT q.q_id, q.name, q.link, u.username AS posted_by, q.posted_time \
             FROM questions q JOIN users u ON q.posted_by = u.id WHERE 1 = 1",
        );
        let mut filter_params = Vec::new();

        if let Some(q_name) = params.q_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            sql.push_str(" AND q.name LIKE ? ESCAPE '\\'");
            filter_params.push(SqlValue::Text(like_pattern(q_name)));
        }
        if let Some(group_id) = parse_id(params.group_id.as_deref()) {
            sql.push_str(" AND q.group_id = ?");
            filter_params.push(SqlValue::Integer(group_id));
        }
        if let Some(user_id) = parse_id(params.not_completed_by.as_deref()) {
            sql.push_str(
                " AND NOT EXISTS (SELECT 1 FROM question_marks m \
                 WHERE m.q_id = q.q_id AND m.user_id = ? AND m.done = 1)",
            );
            filter_params.push(SqlValue::Integer(user_id));
        }
        if let Some(cursor) = params.cursor() {
            sql.push_str(" AND (q.posted_time, q.q_id) > (?, ?)");
            filter_params.push(SqlValue::Text(cursor.after_time));
            filter_params.push(SqlValue::Integer(cursor.after_id));
        }
        sql.push_str(" ORDER BY q.posted_time, q.q_id");

        let page_size = params.page_size();
        if let Some(size) = page_size {
            // One extra row tells us whether another page follows
            sql.push_str(&format!(" LIMIT {}", size + 1));
        }

        let mut rows: Vec<(i64, String, String, String, String)> = self
            .store
            .query_rows(sql, filter_params, |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .await?;

        let next = match page_size {
            Some(size) if rows.len() > size => {
                rows.truncate(size);
                rows.last().map(|(q_id, _, _, _, posted_time)| PageCursor {
                    after_time: posted_time.clone(),
                    after_id: *q_id,
                })
            }
            _ => None,
        };

        let marks: HashMap<(i64, i64), bool> = self
            .store
            .query_rows::<((i64, i64), bool), _>(
                "SELECT q_id, user_id, done FROM question_marks \
                 WHERE q_id IS NOT NULL AND user_id IS NOT NULL"
                    .to_string(),
                vec![],
                |row| Ok(((row.get(0)?, row.get(1)?), row.get(2)?)),
            )
            .await?
            .into_iter()
            .collect();

        debug!(
            "Listing {} questions for {} users ({} marks)",
            rows.len(),
            users.len(),
            marks.len()
        );

        let items = rows
            .into_iter()
            .map(|(q_id, name, link, posted_by, _)| {
                let completion: BTreeMap<String, bool> = users
                    .iter()
                    .map(|(user_id, username)| {
                        let done = marks.get(&(q_id, *user_id)).copied().unwrap_or(false);
                        (username.clone(), done)
                    })
                    .collect();

                QuestionListing {
                    q_id,
                    name,
                    link,
                    posted_by,
                    completion,
                }
            })
            .collect();

        Ok(QuestionPage { items, next })
    }

    /// How many questions exist (optionally within one group) and how many
    /// of them `caller` has marked done
    pub async fn question_stats(
        &self,
        caller: &AuthUser,
        group_id: Option<i64>,
    ) -> TrackerResult<QuestionStats> {
        let mut sql = String::from(
            "SELECT COUNT(*), \
                    COUNT(CASE WHEN EXISTS (SELECT 1 FROM question_marks m \
                        WHERE m.q_id = q.q_id AND m.user_id = ? AND m.done = 1) THEN 1 END) \
             FROM questions q",
        );
        let mut params = vec![SqlValue::Integer(caller.id)];
        if let Some(group_id) = group_id {
            sql.push_str(" WHERE q.group_id = ?");
            params.push(SqlValue::Integer(group_id));
        }

        let stats = self
            .store
            .query_opt(sql, params, |row| {
                Ok(QuestionStats {
                    question_count: row.get(0)?,
                    completed_count: row.get(1)?,
                })
            })
            .await?;
        Ok(stats.unwrap_or(QuestionStats {
            question_count: 0,
            completed_count: 0,
        }))
    }

    pub async fn get_question(&self, q_id: i64) -> TrackerResult<Question> {
        self.store
            .query_opt(
                format!("SELECT {} FROM questions WHERE q_id = ?", Question::COLUMNS),
                vec![SqlValue::Integer(q_id)],
                Question::from_row,
            )
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("Question {} not found", q_id)))
    }

    /// Id of the configured default group, creating it if it was renamed
    /// away from the seeded one
    async fn default_group_id(&self) -> TrackerResult<i64> {
        let name = self.default_group.clone();
        self.store
            .with_transaction(move |conn| {
                conn.execute(
                    "INSERT INTO question_groups (name, created_at) VALUES (?1, ?2) \
                     ON CONFLICT(name) DO NOTHING",
                    rusqlite::params![name, now_timestamp()],
                )?;
                conn.query_row(
                    "SELECT id FROM question_groups WHERE name = ?1",
                    rusqlite::params![name],
                    |row| row.get(0),
                )
            })
            .await
    }

    async fn resolve_group(&self, group_id: Option<i64>) -> TrackerResult<i64> {
        let Some(group_id) = group_id else {
            return self.default_group_id().await;
        };

        self.store
            .query_opt(
                "SELECT id FROM question_groups WHERE id = ?".to_string(),
                vec![SqlValue::Integer(group_id)],
                |row| row.get(0),
            )
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("Group {} not found", group_id)))
    }

    /// Creates a question posted by `caller` at the current server time
    pub async fn add_question(&self, caller: &AuthUser, req: NewQuestion) -> TrackerResult<Question> {
        let name = required(req.name, "name")?.trim().to_string();
        let link = required(req.link, "link")?.trim().to_string();

        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(TrackerError::invalid(format!(
                "name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }
        if link.chars().count() > MAX_LINK_LENGTH {
            return Err(TrackerError::invalid(format!(
                "link must be at most {} characters",
                MAX_LINK_LENGTH
            )));
        }

        let group = self.resolve_group(req.group_id).await?;
        let posted_time = now_timestamp();

        let q_id = self
            .store
            .insert(
                "INSERT INTO questions (name, link, posted_time, posted_by, group_id) \
                 VALUES (?, ?, ?, ?, ?)"
                    .to_string(),
                vec![
                    name.clone().into(),
                    link.clone().into(),
                    posted_time.clone().into(),
                    caller.id.into(),
                    group.into(),
                ],
            )
            .await?;

        info!("{} posted question {} ({})", caller.username, q_id, name);

        Ok(Question {
            q_id,
            name,
            link,
            posted_time,
            posted_by: caller.id,
            group,
        })
    }

    /// Only the poster may delete; solutions, marks and likes cascade
    pub async fn delete_question(&self, caller: &AuthUser, q_id: i64) -> TrackerResult<()> {
        let question = self.get_question(q_id).await?;
        if question.posted_by != caller.id {
            return Err(TrackerError::Forbidden(
                "Only the poster can delete a question".to_string(),
            ));
        }

        self.store
            .execute(
                "DELETE FROM questions WHERE q_id = ?".to_string(),
                vec![SqlValue::Integer(q_id)],
            )
            .await?;
        info!("{} deleted question {}", caller.username, q_id);
        Ok(())
    }

    pub async fn list_marks(&self) -> TrackerResult<Vec<MarkQuestion>> {
        self.store
            .query_rows(
                format!("SELECT {} FROM question_marks ORDER BY id", MarkQuestion::COLUMNS),
                vec![],
                MarkQuestion::from_row,
            )
            .await
    }

    /// Sets the caller's mark on a question, replacing any earlier one.
    /// An omitted difficulty keeps the stored value.
    /// `done_time` records when the question was first completed.
    pub async fn mark_question(
        &self,
        caller: &AuthUser,
        q_id: i64,
        req: MarkRequest,
    ) -> TrackerResult<MarkQuestion> {
        let done = req.done.ok_or(TrackerError::MissingField("done"))?;
        self.get_question(q_id).await?;

        let user_id = caller.id;
        let difficulty = req.difficulty;
        let now = now_timestamp();
        // done_time keeps the first completion and is cleared when undone
        let mark = self
            .store
            .with_transaction(move |conn| {
                conn.execute(
                    "INSERT INTO question_marks (user_id, q_id, done, difficulty, done_time) \
                     VALUES (?1, ?2, ?3, COALESCE(?4, 0), CASE WHEN ?3 THEN ?5 END) \
                     ON CONFLICT(user_id, q_id) DO UPDATE SET \
                         done = excluded.done, \
                         difficulty = COALESCE(?4, question_marks.difficulty), \
                         done_time = CASE WHEN excluded.done \
                             THEN COALESCE(question_marks.done_time, excluded.done_time) END",
                    rusqlite::params![user_id, q_id, done, difficulty, now],
                )?;
                conn.query_row(
                    &format!(
                        "SELECT {} FROM question_marks WHERE user_id = ?1 AND q_id = ?2",
                        MarkQuestion::COLUMNS
                    ),
                    [user_id, q_id],
                    MarkQuestion::from_row,
                )
            })
            .await?;

        debug!("{} marked question {} done={}", caller.username, q_id, done);
        Ok(mark)
    }

    pub async fn list_likes(&self) -> TrackerResult<Vec<LikeQuestion>> {
        self.store
            .query_rows(
                format!("SELECT {} FROM question_likes ORDER BY id", LikeQuestion::COLUMNS),
                vec![],
                LikeQuestion::from_row,
            )
            .await
    }

    /// Sets the caller's like on a question and stamps `like_time`
    pub async fn like_question(
        &self,
        caller: &AuthUser,
        q_id: i64,
        req: LikeRequest,
    ) -> TrackerResult<LikeQuestion> {
        let liked = req.like.ok_or(TrackerError::MissingField("like"))?;
        self.get_question(q_id).await?;

        let user_id = caller.id;
        let like_time = now_timestamp();
        let like = self
            .store
            .with_transaction(move |conn| {
                conn.execute(
                    "INSERT INTO question_likes (user_id, q_id, liked, like_time) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(user_id, q_id) DO UPDATE SET \
                         liked = excluded.liked, like_time = excluded.like_time",
                    rusqlite::params![user_id, q_id, liked, like_time],
                )?;
                conn.query_row(
                    &format!(
                        "SELECT {} FROM question_likes WHERE user_id = ?1 AND q_id = ?2",
                        LikeQuestion::COLUMNS
                    ),
                    [user_id, q_id],
                    LikeQuestion::from_row,
                )
            })
            .await?;

        Ok(like)
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /v1/questions
async fn list_questions_handler(
    State(state): State<AppState>,
    params: Option<Query<ListParams>>,
) -> Result<impl IntoResponse, TrackerError> {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let paged = params.page_size().is_some();
    let page = state.questions.list_question_page(params).await?;
    if paged {
        Ok(Json(json!({ "data": page.items, "next": page.next })))
    } else {
        Ok(Json(json!({ "data": page.items })))
    }
}

/// GET /v1/questions/stats
async fn question_stats_handler(
    State(state): State<AppState>,
    user: AuthUser,
    params: Option<Query<StatsParams>>,
) -> Result<impl IntoResponse, TrackerError> {
    let group_id = params.and_then(|Query(p)| parse_id(p.group_id.as_deref()));
    let stats = state.questions.question_stats(&user, group_id).await?;
    Ok(Json(json!({ "data": stats })))
}

/// POST /v1/questions
async fn add_question_handler(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<NewQuestion>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(req) = payload?;
    let question = state.questions.add_question(&user, req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": question }))))
}

/// DELETE /v1/questions/:q_id
async fn delete_question_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(q_id): Path<i64>,
) -> Result<impl IntoResponse, TrackerError> {
    state.questions.delete_question(&user, q_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/marks
async fn list_marks_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TrackerError> {
    let marks = state.questions.list_marks().await?;
    Ok(Json(json!({ "data": marks })))
}

/// POST /v1/questions/:q_id/mark
async fn mark_question_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(q_id): Path<i64>,
    payload: Result<Json<MarkRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(req) = payload?;
    let mark = state.questions.mark_question(&user, q_id, req).await?;
    Ok(Json(json!({ "data": mark })))
}

/// GET /v1/likes
async fn list_likes_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TrackerError> {
    let likes = state.questions.list_likes().await?;
    Ok(Json(json!({ "data": likes })))
}

/// POST /v1/questions/:q_id/like
async fn like_question_handler(
    State(state): State<AppState>,
    user: AuthUser,
    Path(q_id): Path<i64>,
    payload: Result<Json<LikeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(req) = payload?;
    let like = state.questions.like_question(&user, q_id, req).await?;
    Ok(Json(json!({ "data": like })))
}

pub fn create_question_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/questions",
            get(list_questions_handler).post(add_question_handler),
        )
        .route("/v1/questions/stats", get(question_stats_handler))
        .route("/v1/questions/:q_id", delete(delete_question_handler))
        .route("/v1/questions/:q_id/mark", post(mark_question_handler))
        .route("/v1/questions/:q_id/like", post(like_question_handler))
        .route("/v1/marks", get(list_marks_handler))
        .route("/v1/likes", get(list_likes_handler))
        .with_state(state)
}
