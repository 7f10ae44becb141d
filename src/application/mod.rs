//! Application services layer.

pub mod catalog;
pub mod compiler;
pub mod error;
pub mod repos;
