//! # Groups Module
//!
//! Every question is filed under exactly one group. A default group is
//! seeded by the schema; members can create more.
//!
//! ## Endpoints
//!
//! - `GET /v1/groups`, `POST /v1/groups` (auth)
//! - `GET /v1/groups/:group_id` - One group
//! - `GET /v1/groups/:group_id/users` - Users who posted or marked in it
//! - `GET /v1/groups/:group_id/stats` - Completion totals and per-day counts

use crate::api::{required, AppState};
use crate::auth::AuthUser;
use crate::db::{SqlValue, Store};
use crate::error::{TrackerError, TrackerResult};
use crate::models::{now_timestamp, Group, Question, UserSummary};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const MAX_GROUP_NAME_LENGTH: usize = 100;

/// Fixed key of a per-day stats row; no username may shadow it
pub const DAILY_ROW_KEY: &str = "done_date";

fn group_exists(name: &str) -> TrackerError {
    TrackerError::Conflict(format!("Group '{}' already exists", name))
}

#[derive(Clone)]
pub struct GroupService {
    store: Arc<Store>,
    reserved_username: String,
}

/// Completions per user on one calendar day (UTC), zero-filled for every
/// group user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCompletions {
    pub done_date: String,
    #[serde(flatten)]
    pub counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub question_count: i64,
    /// Questions at least one listed user has marked done
    pub completed_count: i64,
    /// Questions nobody has marked done yet, in posting order
    pub still_need: Vec<Question>,
    pub stack_graph_data: Vec<DailyCompletions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewGroup {
    pub name: Option<String>,
}

impl GroupService {
    pub fn new(store: Arc<Store>, reserved_username: impl Into<String>) -> Self {
        Self {
            store,
            reserved_username: reserved_username.into(),
        }
    }

    pub async fn list_groups(&self) -> TrackerResult<Vec<Group>> {
        self.store
            .query_rows(
                format!("SELECT {} FROM question_groups ORDER BY id", Group::COLUMNS),
                vec![],
                Group::from_row,
            )
            .await
    }

    pub async fn create_group(&self, caller: &AuthUser, req: NewGroup) -> TrackerResult<Group> {
        let name = required(req.name, "name")?.trim().to_string();
        if name.chars().count() > MAX_GROUP_NAME_LENGTH {
            return Err(TrackerError::invalid(format!(
                "name must be at most {} characters",
                MAX_GROUP_NAME_LENGTH
            )));
        }

        let taken = self
            .store
            .query_opt(
                "SELECT id FROM question_groups WHERE name = ?".to_string(),
                vec![SqlValue::Text(name.clone())],
                |row| row.get::<_, i64>(0),
            )
            .await?;
        if taken.is_some() {
            return Err(group_exists(&name));
        }

        let created_at = now_timestamp();
        let id = self
            .store
            .insert(
                "INSERT INTO question_groups (name, created_by, created_at) VALUES (?, ?, ?)"
                    .to_string(),
                vec![name.clone().into(), caller.id.into(), created_at.clone().into()],
            )
            .await
            .map_err(|e| match e {
                TrackerError::Conflict(_) => group_exists(&name),
                e => e,
            })?;
        info!("{} created group {} ({})", caller.username, id, name);

        Ok(Group {
            id,
            name,
            created_by: Some(caller.id),
            created_at,
        })
    }

    pub async fn get_group(&self, group_id: i64) -> TrackerResult<Group> {
        self.store
            .query_opt(
                format!("SELECT {} FROM question_groups WHERE id = ?", Group::COLUMNS),
                vec![SqlValue::Integer(group_id)],
                Group::from_row,
            )
            .await?
            .ok_or_else(|| TrackerError::not_found(format!("Group {} not found", group_id)))
    }

    /// Non-reserved users who posted or marked a question in the group
    pub async fn group_users(&self, group_id: i64) -> TrackerResult<Vec<UserSummary>> {
        self.get_group(group_id).await?;
        self.store
            .query_rows(
                "SELECT u.id AS id, u.username AS username FROM users u \
                 WHERE u.username != ? \
                   AND (EXISTS (SELECT 1 FROM questions q \
                                WHERE q.group_id = ? AND q.posted_by = u.id) \
                     OR EXISTS (SELECT 1 FROM question_marks m \
                                JOIN questions q ON m.q_id = q.q_id \
                                WHERE q.group_id = ? AND m.user_id = u.id)) \
                 ORDER BY u.id"
                    .to_string(),
                vec![
                    SqlValue::Text(self.reserved_username.clone()),
                    SqlValue::Integer(group_id),
                    SqlValue::Integer(group_id),
                ],
                UserSummary::from_row,
            )
            .await
    }

    pub async fn group_stats(&self, group_id: i64) -> TrackerResult<GroupStats> {
        let users = self.group_users(group_id).await?;

        let question_count = self
            .store
            .query_opt(
                "SELECT COUNT(*) FROM questions WHERE group_id = ?".to_string(),
                vec![SqlValue::Integer(group_id)],
                |row| row.get::<_, i64>(0),
            )
            .await?
            .unwrap_or(0);

        let still_need = self
            .store
            .query_rows(
                format!(
                    "SELECT {} FROM questions q WHERE q.group_id = ? \
                       AND NOT EXISTS (SELECT 1 FROM question_marks m \
                                       JOIN users u ON m.user_id = u.id \
                                       WHERE m.q_id = q.q_id AND m.done = 1 \
                                         AND u.username != ?) \
                     ORDER BY q.posted_time, q.q_id",
                    Question::COLUMNS
                ),
                vec![
                    SqlValue::Integer(group_id),
                    SqlValue::Text(self.reserved_username.clone()),
                ],
                Question::from_row,
            )
            .await?;

        let daily: Vec<(String, String, i64)> = self
            .store
            .query_rows(
                "SELECT substr(m.done_time, 1, 10) AS done_date, u.username, COUNT(*) \
                 FROM question_marks m \
                 JOIN users u ON m.user_id = u.id \
                 JOIN questions q ON m.q_id = q.q_id \
                 WHERE q.group_id = ? AND m.done = 1 AND m.done_time IS NOT NULL \
                   AND u.username != ? \
                 GROUP BY done_date, u.username"
                    .to_string(),
                vec![
                    SqlValue::Integer(group_id),
                    SqlValue::Text(self.reserved_username.clone()),
                ],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .await?;

        let mut by_day: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
        for (done_date, username, count) in daily {
            let counts = by_day.entry(done_date).or_insert_with(|| {
                users.iter().map(|u| (u.username.clone(), 0)).collect()
            });
            counts.insert(username, count);
        }

        debug!(
            "Group {} stats: {} questions, {} pending, {} active days",
            group_id,
            question_count,
            still_need.len(),
            by_day.len()
        );

        Ok(GroupStats {
            question_count,
            completed_count: question_count - still_need.len() as i64,
            still_need,
            stack_graph_data: by_day
                .into_iter()
                .map(|(done_date, counts)| DailyCompletions { done_date, counts })
                .collect(),
        })
    }
}

/// GET /v1/groups
async fn list_groups_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, TrackerError> {
    let groups = state.groups.list_groups().await?;
    Ok(Json(json!({ "data": groups })))
}

/// POST /v1/groups
async fn create_group_handler(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<NewGroup>, JsonRejection>,
) -> Result<impl IntoResponse, TrackerError> {
    let Json(req) = payload?;
    let group = state.groups.create_group(&user, req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "data": group }))))
}

/// GET /v1/groups/:group_id
async fn get_group_handler(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, TrackerError> {
    let group = state.groups.get_group(group_id).await?;
    Ok(Json(json!({ "data": group })))
}

/// GET /v1/groups/:group_id/users
async fn group_users_handler(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, TrackerError> {
    let users = state.groups.group_users(group_id).await?;
    Ok(Json(json!({ "data": users })))
}

/// GET /v1/groups/:group_id/stats
async fn group_stats_handler(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<impl IntoResponse, TrackerError> {
    let stats = state.groups.group_stats(group_id).await?;
    Ok(Json(json!({ "data": stats })))
}

pub fn create_group_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/groups",
            get(list_groups_handler).post(create_group_handler),
        )
        .route("/v1/groups/:group_id", get(get_group_handler))
        .route("/v1/groups/:group_id/users", get(group_users_handler))
        .route("/v1/groups/:group_id/stats", get(group_stats_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    async fn setup() -> (GroupService, AuthUser) {
        let store = Arc::new(Store::in_memory().await.unwrap());
        migrations::run_pending(&store).await.unwrap();
        let id = store
            .insert(
                "INSERT INTO users (username, password_hash) VALUES ('carol', 'unused')".to_string(),
                vec![],
            )
            .await
            .unwrap();
        let user = AuthUser {
            id,
            username: "carol".to_string(),
        };
        (GroupService::new(store, "admin"), user)
    }

    #[tokio::test]
    async fn test_default_group_is_seeded() {
        let (service, _) = setup().await;
        let groups = service.list_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "General");
        assert_eq!(groups[0].created_by, None);
    }

    #[tokio::test]
    async fn test_create_group() {
        let (service, carol) = setup().await;

        let group = service
            .create_group(&carol, NewGroup { name: Some(" Blind 75 ".to_string()) })
            .await
            .unwrap();
        assert_eq!(group.name, "Blind 75");
        assert_eq!(group.created_by, Some(carol.id));

        let err = service
            .create_group(&carol, NewGroup { name: Some("Blind 75".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Conflict(_)));

        let err = service.create_group(&carol, NewGroup::default()).await.unwrap_err();
        assert!(matches!(err, TrackerError::MissingField("name")));

        assert_eq!(service.list_groups().await.unwrap().len(), 2);
        assert_eq!(service.get_group(group.id).await.unwrap(), group);
        assert!(matches!(
            service.get_group(99).await.unwrap_err(),
            TrackerError::NotFound(_)
        ));
    }

    /// carol (id 1) posts; dave (id 2) and admin (id 3) mark; erin (id 4)
    /// only acts in another group
    async fn seed_group_activity(service: &GroupService) {
        service
            .store
            .execute_batch(
                r#"
                INSERT INTO users (username, password_hash) VALUES ('dave', 'unused');
                INSERT INTO users (username, password_hash) VALUES ('admin', 'unused');
                INSERT INTO users (username, password_hash) VALUES ('erin', 'unused');
                INSERT INTO question_groups (name, created_at) VALUES ('Other', '2024-01-01T00:00:00.000000Z');
                INSERT INTO questions (name, link, posted_time, posted_by, group_id)
                    VALUES ('Q1', 'https://leetcode.com/problems/q1/', '2024-01-01T00:00:00.000000Z', 1, 1);
                INSERT INTO questions (name, link, posted_time, posted_by, group_id)
                    VALUES ('Q2', 'https://leetcode.com/problems/q2/', '2024-01-02T00:00:00.000000Z', 1, 1);
                INSERT INTO questions (name, link, posted_time, posted_by, group_id)
                    VALUES ('Q3', 'https://leetcode.com/problems/q3/', '2024-01-03T00:00:00.000000Z', 1, 1);
                INSERT INTO questions (name, link, posted_time, posted_by, group_id)
                    VALUES ('Elsewhere', 'https://leetcode.com/problems/x/', '2024-01-03T00:00:00.000000Z', 4, 2);
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (1, 1, 1, '2024-02-01T08:00:00.000000Z');
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (1, 1, 2, '2024-02-01T21:30:00.000000Z');
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (1, 2, 2, '2024-02-03T10:00:00.000000Z');
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (1, 3, 3, '2024-02-03T11:00:00.000000Z');
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (0, 3, 1, NULL);
                INSERT INTO question_marks (done, q_id, user_id, done_time)
                    VALUES (1, 4, 4, '2024-02-03T12:00:00.000000Z');
                "#
                .to_string(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_users() {
        let (service, _) = setup().await;
        seed_group_activity(&service).await;

        let names: Vec<String> = service
            .group_users(1)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["carol", "dave"]);

        assert!(matches!(
            service.group_users(99).await.unwrap_err(),
            TrackerError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_group_stats() {
        let (service, _) = setup().await;
        seed_group_activity(&service).await;

        let stats = service.group_stats(1).await.unwrap();
        assert_eq!(stats.question_count, 3);
        // Q3 was only completed by the reserved user
        assert_eq!(stats.completed_count, 2);
        assert_eq!(
            stats.still_need.iter().map(|q| q.name.as_str()).collect::<Vec<_>>(),
            ["Q3"]
        );
        assert_eq!(
            stats.stack_graph_data,
            vec![
                DailyCompletions {
                    done_date: "2024-02-01".to_string(),
                    counts: BTreeMap::from([("carol".to_string(), 1), ("dave".to_string(), 1)]),
                },
                DailyCompletions {
                    done_date: "2024-02-03".to_string(),
                    counts: BTreeMap::from([("carol".to_string(), 0), ("dave".to_string(), 1)]),
                },
            ]
        );

        let value = serde_json::to_value(&stats.stack_graph_data[1]).unwrap();
        assert_eq!(value, json!({ "done_date": "2024-02-03", "carol": 0, "dave": 1 }));
    }

    #[tokio::test]
    async fn test_empty_group_stats() {
        let (service, carol) = setup().await;
        let group = service
            .create_group(&carol, NewGroup { name: Some("Empty".to_string()) })
            .await
            .unwrap();

        let stats = service.group_stats(group.id).await.unwrap();
        assert_eq!(stats.question_count, 0);
        assert_eq!(stats.completed_count, 0);
        assert!(stats.still_need.is_empty());
        assert!(stats.stack_graph_data.is_empty());
    }
}
