//! Repository functions — one function per storage operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! No business logic, no domain types — JSON in, JSON out.

pub mod executions;
pub mod graphs;
pub mod subflows;
