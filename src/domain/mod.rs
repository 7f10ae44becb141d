//! Domain layer types and invariants.

pub mod error;
pub mod filter;
pub mod query;
pub mod schema;
