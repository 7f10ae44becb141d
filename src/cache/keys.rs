//! Cache key derivation.
//!
//! A key is `namespace ":" canonical-descriptor`. The namespace never contains
//! a `:`, so splitting on the first separator is unambiguous and the canonical
//! part may carry any characters.

use std::fmt;

use thiserror::Error;

use crate::domain::error::ValidationError;
use crate::domain::query::QueryDescriptor;

pub const KEY_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("cache namespace must not be empty")]
    EmptyNamespace,
    #[error("cache namespace `{0}` must not contain `:`")]
    SeparatorInNamespace(String),
    #[error("cache key has no namespace separator")]
    MissingSeparator,
    #[error(transparent)]
    Descriptor(#[from] ValidationError),
}

/// Collection namespace prefixed to every key of that collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, KeyError> {
        let name = name.into();
        if name.is_empty() {
            return Err(KeyError::EmptyNamespace);
        }
        if name.contains(KEY_SEPARATOR) {
            return Err(KeyError::SeparatorInNamespace(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix matching every key in this namespace.
    pub fn prefix(&self) -> String {
        format!("{}{KEY_SEPARATOR}", self.0)
    }

    pub fn key_for(&self, descriptor: &QueryDescriptor) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.0, descriptor.canonical())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split a key back into its namespace and descriptor.
pub fn parse_key(key: &str) -> Result<(Namespace, QueryDescriptor), KeyError> {
    let (namespace, canonical) = key
        .split_once(KEY_SEPARATOR)
        .ok_or(KeyError::MissingSeparator)?;
    let namespace = Namespace::new(namespace)?;
    let descriptor = QueryDescriptor::from_canonical(canonical)?;
    Ok((namespace, descriptor))
}
