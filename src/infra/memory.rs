//! In-process document store.

use std::cmp::Ordering;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::application::repos::{DocumentStore, StoreError};
use crate::domain::query::{Predicate, QueryDescriptor, Scalar, search_terms};
use crate::domain::schema::CollectionSchema;

use super::error::InfraError;

/// Field added to returned documents when results are ranked by relevance.
pub const SCORE_FIELD: &str = "score";

/// Documents held in insertion order and queried by linear scan.
///
/// Keyword search matches a document when any search term occurs in one of
/// the schema's text-search fields; relevance is the number of term
/// occurrences.
pub struct MemoryDocumentStore {
    schema: CollectionSchema,
    documents: RwLock<Vec<Value>>,
}

impl MemoryDocumentStore {
    pub fn new(schema: CollectionSchema, documents: Vec<Value>) -> Self {
        Self {
            schema,
            documents: RwLock::new(documents),
        }
    }

    pub fn empty(schema: CollectionSchema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Load a JSON array of documents.
    pub async fn from_json_file(
        schema: CollectionSchema,
        path: impl AsRef<Path>,
    ) -> Result<Self, InfraError> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path).await?;
        let documents: Vec<Value> = serde_json::from_slice(&raw).map_err(|err| {
            InfraError::configuration(format!(
                "seed file `{}` is not a JSON array of documents: {err}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), documents = documents.len(), "Seeded in-memory catalog");
        Ok(Self::new(schema, documents))
    }

    pub async fn insert(&self, document: Value) {
        self.documents.write().await.push(document);
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Relevance of `document` for `text`, or `None` when no term matches.
    fn relevance(&self, document: &Value, text: &str) -> Option<u32> {
        let terms: Vec<String> = search_terms(text).collect();
        let mut score = 0u32;
        for field in self.schema.text_fields() {
            let Some(Value::String(content)) = document.get(field) else {
                continue;
            };
            for token in search_terms(content) {
                score += terms.iter().filter(|term| **term == token).count() as u32;
            }
        }
        (score > 0).then_some(score)
    }

    /// Matching documents with their relevance, in result order.
    fn select(&self, documents: &[Value], query: &QueryDescriptor) -> Vec<(Value, Option<u32>)> {
        let mut matched: Vec<(Value, Option<u32>)> = documents
            .iter()
            .filter(|document| {
                query
                    .predicates()
                    .iter()
                    .all(|predicate| matches(document, predicate))
            })
            .filter_map(|document| match query.text_search() {
                Some(text) => self
                    .relevance(document, text)
                    .map(|score| (document.clone(), Some(score))),
                None => Some((document.clone(), None)),
            })
            .collect();

        if query.sorts_by_relevance() {
            // Stable, so ties keep insertion order.
            matched.sort_by(|(_, a), (_, b)| b.cmp(a));
        }
        matched
    }
}

fn matches(document: &Value, predicate: &Predicate) -> bool {
    let ordering = match (document.get(&predicate.field), &predicate.value) {
        (Some(Value::Number(actual)), Scalar::Number(expected)) => actual
            .as_f64()
            .and_then(|actual| actual.partial_cmp(expected)),
        (Some(Value::String(actual)), Scalar::Text(expected)) => {
            Some(actual.as_str().cmp(expected.as_str()))
        }
        _ => None,
    };
    ordering.is_some_and(|ordering: Ordering| predicate.operator.accepts(ordering))
}

fn with_score(document: Value, score: u32) -> Value {
    match document {
        Value::Object(mut fields) => {
            fields.insert(SCORE_FIELD.to_string(), Value::from(score));
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("value".to_string(), other);
            fields.insert(SCORE_FIELD.to_string(), Value::from(score));
            Value::Object(fields)
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find(&self, query: &QueryDescriptor) -> Result<Vec<Value>, StoreError> {
        let documents = self.documents.read().await;
        let skip = usize::try_from(query.skip()).unwrap_or(usize::MAX);
        let limit = query.page_size().get() as usize;

        Ok(self
            .select(&documents, query)
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|(document, score)| match score {
                Some(score) if query.sorts_by_relevance() => with_score(document, score),
                _ => document,
            })
            .collect())
    }

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError> {
        let documents = self.documents.read().await;
        Ok(self.select(&documents, query).len() as u64)
    }
}
