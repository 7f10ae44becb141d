//! Untrusted filter parameters as they arrive from a client.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use super::error::ValidationError;

pub const KEYWORD_PARAM: &str = "keyword";
pub const PAGE_PARAM: &str = "page";
pub const LIMIT_PARAM: &str = "limit";

/// Parameters that steer search and pagination and never act as filters.
pub const RESERVED_PARAMS: [&str; 3] = [KEYWORD_PARAM, PAGE_PARAM, LIMIT_PARAM];

pub fn is_reserved(key: &str) -> bool {
    RESERVED_PARAMS.contains(&key)
}

/// A single parameter value: either a plain string or a suffix-keyed sub-mapping
/// such as `price[gte]=20`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(String),
    Structured(BTreeMap<String, String>),
}

impl ParamValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn structured<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Structured(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Flat, string-keyed parameter mapping supplied by the client.
///
/// Keys are held in a sorted map, so the order in which a client sent them
/// never leaks into anything derived from the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterRequest {
    params: BTreeMap<String, ParamValue>,
}

impl FilterRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), ParamValue::scalar(value));
        self
    }

    pub fn with_structured<I, K, V>(mut self, key: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .insert(key.into(), ParamValue::structured(entries));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Domain filter parameters, i.e. everything except the reserved keys.
    pub fn filters(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.iter().filter(|(key, _)| !is_reserved(key))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Parse URL query-string semantics: `name=value` yields a scalar and
    /// `name[suffix]=value` an entry of a structured value.
    ///
    /// Ambiguous input is rejected rather than merged: a repeated key, a key
    /// used both plainly and with a suffix, and nested or unbalanced brackets
    /// all fail.
    pub fn from_query_str(query: &str) -> Result<Self, ValidationError> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params: BTreeMap<String, ParamValue> = BTreeMap::new();

        for (raw_key, value) in form_urlencoded::parse(query.as_bytes()) {
            let (name, suffix) = split_bracketed(&raw_key)?;
            let value = value.into_owned();

            match suffix {
                None => match params.entry(name.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(ParamValue::Scalar(value));
                    }
                    Entry::Occupied(_) => {
                        return Err(ValidationError::malformed(
                            name,
                            "parameter supplied more than once",
                        ));
                    }
                },
                Some(suffix) => {
                    let slot = params
                        .entry(name.to_string())
                        .or_insert_with(|| ParamValue::Structured(BTreeMap::new()));
                    let ParamValue::Structured(entries) = slot else {
                        return Err(ValidationError::malformed(
                            name,
                            "parameter supplied both as a value and as a structure",
                        ));
                    };
                    if entries.insert(suffix.to_string(), value).is_some() {
                        return Err(ValidationError::malformed(
                            &*raw_key,
                            "parameter supplied more than once",
                        ));
                    }
                }
            }
        }

        Ok(Self { params })
    }
}

impl<K: Into<String>> FromIterator<(K, ParamValue)> for FilterRequest {
    fn from_iter<I: IntoIterator<Item = (K, ParamValue)>>(iter: I) -> Self {
        Self {
            params: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

fn split_bracketed(raw: &str) -> Result<(&str, Option<&str>), ValidationError> {
    let Some(open) = raw.find('[') else {
        if raw.contains(']') {
            return Err(ValidationError::malformed(raw, "unbalanced brackets"));
        }
        if raw.is_empty() {
            return Err(ValidationError::malformed(raw, "parameter name is empty"));
        }
        return Ok((raw, None));
    };

    let name = &raw[..open];
    if name.is_empty() {
        return Err(ValidationError::malformed(raw, "parameter name is empty"));
    }

    let rest = &raw[open + 1..];
    let Some(suffix) = rest.strip_suffix(']') else {
        return Err(ValidationError::malformed(raw, "unbalanced brackets"));
    };
    if suffix.is_empty() {
        return Err(ValidationError::malformed(raw, "empty bracket suffix"));
    }
    if suffix.contains(['[', ']']) {
        return Err(ValidationError::malformed(raw, "nested brackets are not supported"));
    }

    Ok((name, Some(suffix)))
}
