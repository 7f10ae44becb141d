use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, types::Json};

use crate::application::repos::{DocumentStore, StoreError};
use crate::domain::query::{Operator, QueryDescriptor, Scalar, search_terms};
use crate::domain::schema::FieldKind;

use super::{PostgresDocumentStore, map_sqlx_error};

const TS_CONFIG: &str = "'simple'";

/// Keyword search as a `to_tsquery` operand matching any of its terms.
///
/// Terms are alphanumeric runs, so none of them can carry tsquery syntax.
fn any_term_query(text: &str) -> String {
    search_terms(text).collect::<Vec<_>>().join(" | ")
}

fn comparison(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => " = ",
        Operator::Gt => " > ",
        Operator::Gte => " >= ",
        Operator::Lt => " < ",
        Operator::Lte => " <= ",
    }
}

impl PostgresDocumentStore {
    /// `WHERE` clause shared by `find` and `count`. Field names and operands
    /// are always bound; only operator symbols from the closed [`Operator`]
    /// set are written into the statement.
    fn push_conditions<'q>(
        &'q self,
        qb: &mut QueryBuilder<'q, Postgres>,
        query: &'q QueryDescriptor,
    ) {
        qb.push(" WHERE d.collection = ");
        qb.push_bind(self.collection.as_str());

        if let Some(text) = query.text_search() {
            let terms = any_term_query(text);
            if terms.is_empty() {
                qb.push(" AND FALSE");
            } else {
                qb.push(" AND d.search @@ to_tsquery(");
                qb.push(TS_CONFIG);
                qb.push(", ");
                qb.push_bind(terms);
                qb.push(")");
            }
        }

        for predicate in query.predicates() {
            let field = predicate.field.as_str();
            match &predicate.value {
                Scalar::Number(value) => {
                    qb.push(" AND (CASE WHEN jsonb_typeof(d.body -> ");
                    qb.push_bind(field);
                    qb.push(") = 'number' THEN (d.body ->> ");
                    qb.push_bind(field);
                    qb.push(")::float8 END)");
                    qb.push(comparison(predicate.operator));
                    qb.push_bind(*value);
                }
                Scalar::Text(value) => {
                    qb.push(" AND jsonb_typeof(d.body -> ");
                    qb.push_bind(field);
                    qb.push(") = 'string' AND (d.body ->> ");
                    qb.push_bind(field);
                    qb.push(")");
                    qb.push(comparison(predicate.operator));
                    qb.push_bind(value.as_str());
                }
            }
        }
    }

    fn push_rank(qb: &mut QueryBuilder<'_, Postgres>, text: &str) {
        qb.push("ts_rank(d.search, to_tsquery(");
        qb.push(TS_CONFIG);
        qb.push(", ");
        qb.push_bind(any_term_query(text));
        qb.push("))");
    }

    fn build_find<'q>(&'q self, query: &'q QueryDescriptor) -> QueryBuilder<'q, Postgres> {
        let mut qb = QueryBuilder::new("SELECT ");
        match query.text_search() {
            Some(text) if query.sorts_by_relevance() => {
                qb.push("d.body || jsonb_build_object('score', ");
                Self::push_rank(&mut qb, text);
                qb.push(")");
            }
            _ => {
                qb.push("d.body");
            }
        }
        qb.push(" FROM documents d");
        self.push_conditions(&mut qb, query);

        qb.push(" ORDER BY ");
        if let (Some(text), true) = (query.text_search(), query.sorts_by_relevance()) {
            Self::push_rank(&mut qb, text);
            qb.push(" DESC, ");
        }
        qb.push("d.id ASC");

        qb.push(" LIMIT ");
        qb.push_bind(i64::from(query.page_size().get()));
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(query.skip()).unwrap_or(i64::MAX));
        qb
    }

    fn build_count<'q>(&'q self, query: &'q QueryDescriptor) -> QueryBuilder<'q, Postgres> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM documents d");
        self.push_conditions(&mut qb, query);
        qb
    }

    /// Reject predicates on fields this store's schema does not declare.
    fn check_fields(&self, query: &QueryDescriptor) -> Result<(), StoreError> {
        for predicate in query.predicates() {
            let expected = match predicate.value {
                Scalar::Number(_) => FieldKind::Number,
                Scalar::Text(_) => FieldKind::Text,
            };
            if self.schema.field_kind(&predicate.field) != Some(expected) {
                return Err(StoreError::query(format!(
                    "field `{}` is not a {expected:?} field of collection `{}`",
                    predicate.field, self.collection
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find(&self, query: &QueryDescriptor) -> Result<Vec<Value>, StoreError> {
        self.check_fields(query)?;
        let mut qb = self.build_find(query);
        let rows: Vec<Json<Value>> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(body)| body).collect())
    }

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError> {
        self.check_fields(query)?;
        let mut qb = self.build_count(query);
        let total: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        u64::try_from(total).map_err(|_| StoreError::Decode("negative row count".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::compiler::compile;
    use crate::domain::filter::FilterRequest;
    use crate::domain::schema::CollectionSchema;
    use sqlx::postgres::PgPoolOptions;
    use std::num::NonZeroU32;

    fn store() -> PostgresDocumentStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/shopfront")
            .expect("lazy pool");
        PostgresDocumentStore::new(pool, "products", CollectionSchema::products())
    }

    fn descriptor(query: &str) -> QueryDescriptor {
        let request = FilterRequest::from_query_str(query).expect("valid query");
        compile(
            &CollectionSchema::products(),
            &request,
            NonZeroU32::new(8).expect("non-zero"),
        )
        .expect("compiles")
    }

    #[tokio::test]
    async fn find_binds_fields_and_values() {
        let store = store();
        let query = descriptor("category=shoes%27%3B+DROP+TABLE+documents&price[gte]=20&page=2");
        let qb = store.build_find(&query);
        let sql = qb.sql();

        assert!(!sql.contains("DROP TABLE"));
        assert!(!sql.contains("'price'"));
        assert!(!sql.contains("'category'"));
        assert!(sql.contains(" >= $"));
        assert!(sql.contains("ORDER BY d.id ASC LIMIT $"));
        assert!(!sql.contains("ts_rank"));
    }

    #[tokio::test]
    async fn text_search_orders_by_rank() {
        let store = store();
        let query = descriptor("keyword=running+shoe");
        let qb = store.build_find(&query);
        let sql = qb.sql();

        assert!(sql.starts_with("SELECT d.body || jsonb_build_object('score', ts_rank("));
        assert!(sql.contains("d.search @@ to_tsquery('simple', $"));
        assert!(sql.contains("DESC, d.id ASC"));
        assert!(!sql.contains("running"));
    }

    #[test]
    fn keyword_terms_are_alternatives() {
        assert_eq!(any_term_query("Running  shoe"), "running | shoe");
        assert_eq!(any_term_query("a&b|!c:*"), "a | b | c");
        assert_eq!(any_term_query("!!!"), "");
    }

    #[tokio::test]
    async fn keyword_without_terms_matches_nothing() {
        let store = store();
        let query = descriptor("keyword=%21%21");
        let qb = store.build_count(&query);
        assert!(qb.sql().contains(" AND FALSE"));
    }

    #[tokio::test]
    async fn count_has_no_window() {
        let store = store();
        let query = descriptor("ratings[gt]=3&page=4");
        let qb = store.build_count(&query);
        let sql = qb.sql();

        assert!(sql.starts_with("SELECT COUNT(*) FROM documents d WHERE d.collection = $1"));
        assert!(!sql.contains("LIMIT"));
        assert!(!sql.contains("ORDER BY"));
    }
}
