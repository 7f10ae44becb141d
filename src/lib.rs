//! Storefront catalog service: allow-listed filter compilation and a
//! read-through result cache in front of a document store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
