//! `db` crate — the persistence boundary.
//!
//! Graph definitions, execution records and subflow library entries are
//! handed over as serialized JSON and kept in an in-memory store.  No
//! business logic lives here; domain types live in the `engine` crate.

pub mod error;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::DbError;
pub use pool::DbPool;
