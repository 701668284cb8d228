//! # Schema Migrations
//!
//! The schema evolves through an ordered list of reversible [`Migration`]
//! records. Applied versions are tracked in `schema_migrations`; every
//! apply or rollback step runs in the same transaction as its bookkeeping
//! row, so a failed step leaves the database at the previous version.

use crate::db::Store;
use crate::error::{TrackerError, TrackerResult};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info};

/// A single schema change with its inverse
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// Every schema change, oldest first. Versions must be strictly increasing.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up: r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                date_joined DATETIME DEFAULT CURRENT_TIMESTAMP
            );
        "#,
        down: "DROP TABLE users;",
    },
    Migration {
        version: 2,
        name: "create_groups",
        up: r#"
            CREATE TABLE question_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                created_by INTEGER REFERENCES users(id) ON DELETE CASCADE,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO question_groups (name) VALUES ('General');
        "#,
        down: "DROP TABLE question_groups;",
    },
    Migration {
        version: 3,
        name: "create_languages",
        up: r#"
            CREATE TABLE languages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL
            );
            INSERT INTO languages (name) VALUES
                ('Python'), ('JavaScript'), ('TypeScript'), ('Java'),
                ('C++'), ('Go'), ('Rust');
        "#,
        down: "DROP TABLE languages;",
    },
    Migration {
        version: 4,
        name: "create_questions",
        up: r#"
            CREATE TABLE questions (
                q_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                link TEXT NOT NULL,
                posted_time TEXT NOT NULL,
                posted_by INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                group_id INTEGER NOT NULL REFERENCES question_groups(id) ON DELETE CASCADE
            );
            CREATE INDEX questions_posted_by_idx ON questions(posted_by);
        "#,
        down: r#"
            DROP INDEX questions_posted_by_idx;
            DROP TABLE questions;
        "#,
    },
    Migration {
        version: 5,
        name: "create_solutions",
        up: r#"
            CREATE TABLE solutions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                q_id INTEGER NOT NULL REFERENCES questions(q_id) ON DELETE CASCADE,
                language_id INTEGER NOT NULL REFERENCES languages(id) ON DELETE CASCADE,
                posted_by INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                code TEXT NOT NULL,
                notes TEXT NOT NULL DEFAULT '',
                tc TEXT NOT NULL,
                sc TEXT NOT NULL,
                posted_time TEXT NOT NULL
            );
            CREATE INDEX solutions_q_id_idx ON solutions(q_id);
        "#,
        down: r#"
            DROP INDEX solutions_q_id_idx;
            DROP TABLE solutions;
        "#,
    },
    Migration {
        version: 6,
        name: "create_question_marks",
        up: r#"
            CREATE TABLE question_marks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                done INTEGER NOT NULL DEFAULT 0,
                difficulty INTEGER NOT NULL DEFAULT 0,
                q_id INTEGER REFERENCES questions(q_id) ON DELETE CASCADE,
                user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        down: "DROP TABLE question_marks;",
    },
    Migration {
        version: 7,
        name: "create_question_likes",
        up: r#"
            CREATE TABLE question_likes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                liked INTEGER NOT NULL DEFAULT 0,
                like_time TEXT NOT NULL,
                q_id INTEGER REFERENCES questions(q_id) ON DELETE CASCADE,
                user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
        down: "DROP TABLE question_likes;",
    },
    Migration {
        version: 8,
        name: "unique_marks_and_likes_per_user",
        // Older rows may hold several marks for one pair; the newest wins.
        up: r#"
            DELETE FROM question_marks
            WHERE user_id IS NOT NULL AND q_id IS NOT NULL
              AND id NOT IN (SELECT MAX(id) FROM question_marks GROUP BY user_id, q_id);
            DELETE FROM question_likes
            WHERE user_id IS NOT NULL AND q_id IS NOT NULL
              AND id NOT IN (SELECT MAX(id) FROM question_likes GROUP BY user_id, q_id);
            CREATE UNIQUE INDEX question_marks_user_q_uniq ON question_marks(user_id, q_id);
            CREATE UNIQUE INDEX question_likes_user_q_uniq ON question_likes(user_id, q_id);
        "#,
        down: r#"
            DROP INDEX question_likes_user_q_uniq;
            DROP INDEX question_marks_user_q_uniq;
        "#,
    },
    Migration {
        version: 9,
        name: "add_question_marks_done_time",
        // Marks made before this column existed have no completion date.
        up: "ALTER TABLE question_marks ADD COLUMN done_time TEXT;",
        down: "ALTER TABLE question_marks DROP COLUMN done_time;",
    },
];

const CREATE_TRACKING_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at TEXT NOT NULL
    );
"#;

/// Latest version known to this build
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn applied_set(conn: &rusqlite::Connection) -> rusqlite::Result<HashSet<i64>> {
    conn.execute_batch(CREATE_TRACKING_TABLE)?;
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(versions)
}

/// Applies every pending migration in order and returns the versions applied
pub async fn run_pending(store: &Store) -> TrackerResult<Vec<i64>> {
    let applied = store
        .with_transaction(|conn| {
            let done = applied_set(conn)?;
            let mut applied = Vec::new();

            for migration in MIGRATIONS.iter().filter(|m| !done.contains(&m.version)) {
                debug!("Applying migration {:04}_{}", migration.version, migration.name);
                conn.execute_batch(migration.up)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    rusqlite::params![migration.version, migration.name, Utc::now().to_rfc3339()],
                )?;
                applied.push(migration.version);
            }

            Ok(applied)
        })
        .await
        .map_err(|e| TrackerError::MigrationFailed(e.to_string()))?;

    if applied.is_empty() {
        debug!("Schema is up to date (version {})", latest_version());
    } else {
        info!("Applied {} migration(s): {:?}", applied.len(), applied);
    }
    Ok(applied)
}

/// Reverts applied migrations newer than `target`, newest first.
/// Returns the versions that were rolled back.
pub async fn rollback_to(store: &Store, target: i64) -> TrackerResult<Vec<i64>> {
    if target < 0 || target > latest_version() {
        return Err(TrackerError::MigrationFailed(format!(
            "Unknown target version {} (latest is {})",
            target,
            latest_version()
        )));
    }

    let reverted = store
        .with_transaction(move |conn| {
            let done = applied_set(conn)?;
            let mut reverted = Vec::new();

            for migration in MIGRATIONS
                .iter()
                .rev()
                .filter(|m| m.version > target && done.contains(&m.version))
            {
                debug!("Reverting migration {:04}_{}", migration.version, migration.name);
                conn.execute_batch(migration.down)?;
                conn.execute(
                    "DELETE FROM schema_migrations WHERE version = ?1",
                    [migration.version],
                )?;
                reverted.push(migration.version);
            }

            Ok(reverted)
        })
        .await
        .map_err(|e| TrackerError::MigrationFailed(e.to_string()))?;

    if reverted.is_empty() {
        debug!("Nothing to roll back above version {}", target);
    } else {
        info!("Rolled back to version {} ({:?} reverted)", target, reverted);
    }
    Ok(reverted)
}

/// Versions currently recorded as applied, ascending
pub async fn applied_versions(store: &Store) -> TrackerResult<Vec<i64>> {
    let mut versions: Vec<i64> = store
        .with_transaction(|conn| Ok(applied_set(conn)?.into_iter().collect()))
        .await?;
    versions.sort_unstable();
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_strictly_increase() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version, "{} >= {}", pair[0].name, pair[1].name);
        }
        assert_eq!(latest_version(), 9);
    }

    #[tokio::test]
    async fn test_run_pending_is_idempotent() {
        let store = Store::in_memory().await.unwrap();

        let first = run_pending(&store).await.unwrap();
        assert_eq!(first, (1..=9).collect::<Vec<_>>());

        let second = run_pending(&store).await.unwrap();
        assert!(second.is_empty());

        let tables = store.list_tables().await.unwrap();
        for table in [
            "users",
            "question_groups",
            "languages",
            "questions",
            "solutions",
            "question_marks",
            "question_likes",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[tokio::test]
    async fn test_rollback_and_reapply() {
        let store = Store::in_memory().await.unwrap();
        run_pending(&store).await.unwrap();

        let reverted = rollback_to(&store, 3).await.unwrap();
        assert_eq!(reverted, vec![9, 8, 7, 6, 5, 4]);
        assert_eq!(applied_versions(&store).await.unwrap(), vec![1, 2, 3]);

        let tables = store.list_tables().await.unwrap();
        assert!(!tables.contains(&"questions".to_string()));
        assert!(tables.contains(&"languages".to_string()));

        let reapplied = run_pending(&store).await.unwrap();
        assert_eq!(reapplied, vec![4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn test_rollback_to_current_version_is_noop() {
        let store = Store::in_memory().await.unwrap();
        run_pending(&store).await.unwrap();
        assert!(rollback_to(&store, latest_version()).await.unwrap().is_empty());
    }

    async fn has_done_time(store: &Store) -> bool {
        store
            .query_opt(
                "SELECT COUNT(*) FROM pragma_table_info('question_marks') WHERE name = 'done_time'"
                    .to_string(),
                vec![],
                |row| row.get::<_, i64>(0),
            )
            .await
            .unwrap()
            == Some(1)
    }

    #[tokio::test]
    async fn test_done_time_column_round_trip() {
        let store = Store::in_memory().await.unwrap();
        run_pending(&store).await.unwrap();
        assert!(has_done_time(&store).await);

        assert_eq!(rollback_to(&store, 8).await.unwrap(), vec![9]);
        assert!(!has_done_time(&store).await);
    }

    #[tokio::test]
    async fn test_rollback_rejects_unknown_version() {
        let store = Store::in_memory().await.unwrap();
        run_pending(&store).await.unwrap();
        assert!(rollback_to(&store, 42).await.is_err());
    }

    #[tokio::test]
    async fn test_uniqueness_migration_keeps_newest_mark() {
        let store = Store::in_memory().await.unwrap();
        run_pending(&store).await.unwrap();
        rollback_to(&store, 7).await.unwrap();

        store
            .execute_batch(
                r#"
                INSERT INTO users (username, password_hash) VALUES ('alice', 'x');
                INSERT INTO questions (name, link, posted_time, posted_by, group_id)
                    VALUES ('Two Sum', 'https://leetcode.com/problems/two-sum', '2024-01-01T00:00:00Z', 1, 1);
                INSERT INTO question_marks (done, q_id, user_id) VALUES (1, 1, 1);
                INSERT INTO question_marks (done, q_id, user_id) VALUES (0, 1, 1);
                "#
                .to_string(),
            )
            .await
            .unwrap();

        run_pending(&store).await.unwrap();

        let marks: Vec<bool> = store
            .query_rows(
                "SELECT done FROM question_marks".to_string(),
                vec![],
                |row| row.get(0),
            )
            .await
            .unwrap();
        assert_eq!(marks, vec![false]);
    }

    #[tokio::test]
    async fn test_file_backed_schema_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.db");

        {
            let store = Store::new(&path).await.unwrap();
            run_pending(&store).await.unwrap();
        }

        let store = Store::new(&path).await.unwrap();
        assert!(run_pending(&store).await.unwrap().is_empty());
        assert_eq!(applied_versions(&store).await.unwrap().len(), 9);
    }
}
