//! # huddle-shared
//!
//! Types shared between the store and the server: id newtypes, domain enums,
//! the socket wire protocol, and the read-model DTOs handed to clients.

pub mod constants;
pub mod protocol;
pub mod types;
pub mod views;

pub use types::*;
