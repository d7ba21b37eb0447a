//! # huddle-store
//!
//! SQLite persistence for the huddle backend.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! aggregate.  Membership rows, read-marks and reactions are keyed so that
//! concurrent writers touch individual rows atomically instead of rewriting
//! whole documents.

pub mod chats;
pub mod database;
pub mod members;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reactions;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
