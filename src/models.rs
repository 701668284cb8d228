//! # Models
//!
//! Typed rows and their wire representation. Each struct lists exactly the
//! fields that leave the server (the serializer allow-list), the matching
//! `SELECT` column list, and a `from_row` conversion.

use chrono::{SecondsFormat, Utc};
use rusqlite::Row;
use serde::Serialize;
use std::collections::BTreeMap;

/// Current server time as a fixed-width RFC 3339 string.
///
/// Fixed width keeps lexical `ORDER BY` on the text column chronological.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Public view of a user; never carries the password hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
}

impl UserSummary {
    pub const COLUMNS: &'static str = "id, username";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub q_id: i64,
    pub name: String,
    pub link: String,
    pub posted_time: String,
    /// Poster's user id
    pub posted_by: i64,
    /// Owning group id
    pub group: i64,
}

impl Question {
    pub const COLUMNS: &'static str = "q_id, name, link, posted_time, posted_by, group_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            q_id: row.get("q_id")?,
            name: row.get("name")?,
            link: row.get("link")?,
            posted_time: row.get("posted_time")?,
            posted_by: row.get("posted_by")?,
            group: row.get("group_id")?,
        })
    }
}

/// One row of the question listing: the question, its poster's username,
/// and one completion flag per listed user keyed by username
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionListing {
    pub q_id: i64,
    pub name: String,
    pub link: String,
    pub posted_by: String,
    #[serde(flatten)]
    pub completion: BTreeMap<String, bool>,
}

/// A user's completion flag for a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkQuestion {
    pub id: i64,
    pub done: bool,
    pub difficulty: i64,
    pub q_id: Option<i64>,
    pub user_id: Option<i64>,
    /// When the mark last became done; cleared when undone
    pub done_time: Option<String>,
}

impl MarkQuestion {
    pub const COLUMNS: &'static str = "id, done, difficulty, q_id, user_id, done_time";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            done: row.get("done")?,
            difficulty: row.get("difficulty")?,
            q_id: row.get("q_id")?,
            user_id: row.get("user_id")?,
            done_time: row.get("done_time")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LikeQuestion {
    pub id: i64,
    #[serde(rename = "like")]
    pub liked: bool,
    pub like_time: String,
    pub q_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl LikeQuestion {
    pub const COLUMNS: &'static str = "id, liked, like_time, q_id, user_id";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            liked: row.get("liked")?,
            like_time: row.get("like_time")?,
            q_id: row.get("q_id")?,
            user_id: row.get("user_id")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    /// `None` for the seeded default group
    pub created_by: Option<i64>,
    pub created_at: String,
}

impl Group {
    pub const COLUMNS: &'static str = "id, name, created_by, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Language {
    pub id: i64,
    pub name: String,
}

impl Language {
    pub const COLUMNS: &'static str = "id, name";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Solution {
    pub id: i64,
    pub q_id: i64,
    /// Language name
    pub language: String,
    pub posted_by: i64,
    pub title: String,
    pub code: String,
    pub notes: String,
    pub tc: String,
    pub sc: String,
    pub posted_time: String,
}

impl Solution {
    /// Columns of `solutions s JOIN languages l`
    pub const COLUMNS: &'static str =
        "s.id AS id, s.q_id AS q_id, l.name AS language, s.posted_by AS posted_by, \
         s.title AS title, s.code AS code, s.notes AS notes, s.tc AS tc, s.sc AS sc, \
         s.posted_time AS posted_time";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            q_id: row.get("q_id")?,
            language: row.get("language")?,
            posted_by: row.get("posted_by")?,
            title: row.get("title")?,
            code: row.get("code")?,
            notes: row.get("notes")?,
            tc: row.get("tc")?,
            sc: row.get("sc")?,
            posted_time: row.get("posted_time")?,
        })
    }
}
