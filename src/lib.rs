//! # CodeMonkey
//!
//! Backend for a small group of people working through coding-practice
//! questions together: members post questions, mark them done, like them
//! and share solutions.
//!
//! ## Core Components
//!
//! - **Store**: SQLite connection in WAL mode behind an async handle
//! - **Migrations**: Ordered, reversible schema changes
//! - **Auth**: Argon2 password hashes and JWT bearer tokens
//! - **Questions**: Listing with per-user completion, marks and likes
//! - **Groups / Solutions**: Question grouping and posted solutions
//! - **API**: Axum router wiring it all together

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod groups;
pub mod migrations;
pub mod models;
pub mod questions;
pub mod solutions;

pub use error::{TrackerError, TrackerResult};
