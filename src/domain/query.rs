//! Compiled, canonical store query.

use std::cmp::Ordering;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Comparison applied by a predicate.
///
/// Only these five exist; there is no path from client input to any other
/// store operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    /// Translate a structured-filter suffix. `eq` is deliberately absent: equality
    /// is expressed with a plain value.
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    pub fn is_range(self) -> bool {
        !matches!(self, Self::Eq)
    }

    /// Evaluate `left <op> right` for an already computed ordering.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Lowercased alphanumeric terms of a keyword search. A document matches
/// when any term occurs in one of its text-search fields.
pub fn search_terms(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
}

/// Typed predicate operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Number(f64),
    Text(String),
}

/// A single `field <operator> value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub value: Scalar,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operator: Operator, value: Scalar) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Canonical ordering: range predicates first, then equality predicates;
    /// within each group by field name, then by operator.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        let rank = |p: &Predicate| !p.operator.is_range();
        rank(self)
            .cmp(&rank(other))
            .then_with(|| self.field.cmp(&other.field))
            .then_with(|| self.operator.cmp(&other.operator))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Text-search relevance score computed by the store.
    Relevance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortKey {
    pub field: SortField,
    pub direction: Direction,
}

impl SortKey {
    pub const RELEVANCE_DESC: SortKey = SortKey {
        field: SortField::Relevance,
        direction: Direction::Desc,
    };
}

/// Immutable result of compiling a filter request.
///
/// Identical inputs yield identical descriptors, and [`QueryDescriptor::canonical`]
/// is the byte-stable encoding cache keys are derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDescriptor {
    text_search: Option<String>,
    predicates: Vec<Predicate>,
    sort: Vec<SortKey>,
    page: NonZeroU32,
    page_size: NonZeroU32,
}

impl QueryDescriptor {
    /// Assemble a descriptor, putting predicates into canonical order and
    /// deriving the sort from the text search.
    pub(crate) fn new(
        text_search: Option<String>,
        mut predicates: Vec<Predicate>,
        page: NonZeroU32,
        page_size: NonZeroU32,
    ) -> Self {
        predicates.sort_by(Predicate::canonical_cmp);
        let sort = if text_search.is_some() {
            vec![SortKey::RELEVANCE_DESC]
        } else {
            Vec::new()
        };
        Self {
            text_search,
            predicates,
            sort,
            page,
            page_size,
        }
    }

    pub fn text_search(&self) -> Option<&str> {
        self.text_search.as_deref()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn page(&self) -> NonZeroU32 {
        self.page
    }

    pub fn page_size(&self) -> NonZeroU32 {
        self.page_size
    }

    /// Number of matching documents preceding this page.
    pub fn skip(&self) -> u64 {
        u64::from(self.page_size.get()) * u64::from(self.page.get() - 1)
    }

    pub fn sorts_by_relevance(&self) -> bool {
        self.sort.iter().any(|key| key.field == SortField::Relevance)
    }

    /// Canonical JSON encoding. Field order is fixed by the struct layout and
    /// predicate order by [`QueryDescriptor::new`].
    pub fn canonical(&self) -> String {
        serde_json::to_string(self).expect("query descriptor always serializes to JSON")
    }

    /// Parse a canonical encoding back, refusing anything the compiler could
    /// not have produced.
    pub fn from_canonical(encoded: &str) -> Result<Self, ValidationError> {
        let descriptor: Self = serde_json::from_str(encoded)
            .map_err(|err| ValidationError::malformed_descriptor(err.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self
            .text_search
            .as_deref()
            .is_some_and(|text| text.is_empty() || text.trim() != text)
        {
            return Err(ValidationError::malformed_descriptor(
                "text search must be trimmed and non-empty",
            ));
        }
        let expected_sort: &[SortKey] = if self.text_search.is_some() {
            &[SortKey::RELEVANCE_DESC]
        } else {
            &[]
        };
        if self.sort != expected_sort {
            return Err(ValidationError::malformed_descriptor(
                "sort does not match text search",
            ));
        }
        let ordered = self
            .predicates
            .windows(2)
            .all(|pair| pair[0].canonical_cmp(&pair[1]) == Ordering::Less);
        if !ordered {
            return Err(ValidationError::malformed_descriptor(
                "predicates are not in canonical order",
            ));
        }
        for predicate in &self.predicates {
            if let Scalar::Number(value) = predicate.value {
                if !value.is_finite() {
                    return Err(ValidationError::malformed_descriptor(
                        "numeric operands must be finite",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).expect("non-zero")
    }

    #[test]
    fn predicates_are_ordered_ranges_first() {
        let descriptor = QueryDescriptor::new(
            None,
            vec![
                Predicate::new("category", Operator::Eq, Scalar::Text("shoes".into())),
                Predicate::new("price", Operator::Lte, Scalar::Number(100.0)),
                Predicate::new("price", Operator::Gte, Scalar::Number(20.0)),
            ],
            page(1),
            page(8),
        );

        let order: Vec<(&str, Operator)> = descriptor
            .predicates()
            .iter()
            .map(|p| (p.field.as_str(), p.operator))
            .collect();
        assert_eq!(
            order,
            vec![
                ("price", Operator::Gte),
                ("price", Operator::Lte),
                ("category", Operator::Eq),
            ]
        );
    }

    #[test]
    fn skip_is_computed_from_page() {
        let descriptor = QueryDescriptor::new(None, Vec::new(), page(3), page(8));
        assert_eq!(descriptor.skip(), 16);

        let first = QueryDescriptor::new(None, Vec::new(), page(1), page(8));
        assert_eq!(first.skip(), 0);
    }

    #[test]
    fn skip_does_not_overflow_on_extreme_pages() {
        let descriptor = QueryDescriptor::new(None, Vec::new(), page(u32::MAX), page(u32::MAX));
        assert_eq!(
            descriptor.skip(),
            u64::from(u32::MAX) * u64::from(u32::MAX - 1)
        );
    }

    #[test]
    fn canonical_round_trip_preserves_descriptor() {
        let descriptor = QueryDescriptor::new(
            Some("running shoe".into()),
            vec![
                Predicate::new("price", Operator::Gt, Scalar::Number(19.5)),
                Predicate::new("category", Operator::Eq, Scalar::Text("a\"b:c".into())),
            ],
            page(2),
            page(8),
        );

        let encoded = descriptor.canonical();
        let decoded = QueryDescriptor::from_canonical(&encoded).expect("round trip");
        assert_eq!(decoded, descriptor);
        assert_eq!(decoded.canonical(), encoded);
    }

    #[test]
    fn number_and_text_operands_encode_differently() {
        let number = QueryDescriptor::new(
            None,
            vec![Predicate::new("stock", Operator::Eq, Scalar::Number(5.0))],
            page(1),
            page(8),
        );
        let text = QueryDescriptor::new(
            None,
            vec![Predicate::new("stock", Operator::Eq, Scalar::Text("5".into()))],
            page(1),
            page(8),
        );
        assert_ne!(number.canonical(), text.canonical());
    }

    #[test]
    fn from_canonical_rejects_reordered_predicates() {
        let encoded = r#"{"text_search":null,"predicates":[
            {"field":"category","operator":"eq","value":{"type":"text","value":"x"}},
            {"field":"price","operator":"gt","value":{"type":"number","value":1.0}}
        ],"sort":[],"page":1,"page_size":8}"#;
        assert!(matches!(
            QueryDescriptor::from_canonical(encoded),
            Err(ValidationError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn from_canonical_rejects_zero_page_and_sort_mismatch() {
        let zero_page = r#"{"text_search":null,"predicates":[],"sort":[],"page":0,"page_size":8}"#;
        assert!(QueryDescriptor::from_canonical(zero_page).is_err());

        let stray_sort = r#"{"text_search":null,"predicates":[],"sort":[{"field":"relevance","direction":"desc"}],"page":1,"page_size":8}"#;
        assert!(QueryDescriptor::from_canonical(stray_sort).is_err());
    }

    #[test]
    fn operator_accepts_orderings() {
        assert!(Operator::Gte.accepts(Ordering::Equal));
        assert!(!Operator::Gt.accepts(Ordering::Equal));
        assert!(Operator::Lte.accepts(Ordering::Less));
        assert!(!Operator::Lt.accepts(Ordering::Greater));
        assert!(Operator::Eq.accepts(Ordering::Equal));
    }

    #[test]
    fn eq_is_not_a_structured_suffix() {
        assert_eq!(Operator::from_suffix("eq"), None);
        assert_eq!(Operator::from_suffix("ne"), None);
        assert_eq!(Operator::from_suffix("$gt"), None);
        assert_eq!(Operator::from_suffix("gte"), Some(Operator::Gte));
    }
}
