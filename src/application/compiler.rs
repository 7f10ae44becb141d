//! Filter request to store query translation.
//!
//! Translation is an explicit allow-list: only declared fields and the four
//! comparison suffixes reach the store, everything else is rejected.

use std::num::NonZeroU32;

use metrics::counter;
use tracing::debug;

use crate::domain::error::ValidationError;
use crate::domain::filter::{
    FilterRequest, KEYWORD_PARAM, LIMIT_PARAM, PAGE_PARAM, ParamValue,
};
use crate::domain::query::{Operator, Predicate, QueryDescriptor, Scalar};
use crate::domain::schema::{CollectionSchema, FieldKind};

const METRIC_COMPILE_REJECTED: &str = "shopfront_compile_rejected_total";

/// Stateless compiler bound to one collection schema.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    schema: CollectionSchema,
}

impl QueryCompiler {
    pub fn new(schema: CollectionSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    pub fn compile(
        &self,
        request: &FilterRequest,
        default_page_size: NonZeroU32,
    ) -> Result<QueryDescriptor, ValidationError> {
        compile(&self.schema, request, default_page_size).inspect_err(|err| {
            counter!(METRIC_COMPILE_REJECTED).increment(1);
            debug!(
                target = "shopfront::compiler",
                subject = err.subject().unwrap_or(""),
                error = %err,
                "Rejected filter request"
            );
        })
    }
}

/// Compile `request` against `schema`.
///
/// The page size is fixed by the caller; a client-supplied `limit` is checked
/// for shape but never widens the result window.
pub fn compile(
    schema: &CollectionSchema,
    request: &FilterRequest,
    default_page_size: NonZeroU32,
) -> Result<QueryDescriptor, ValidationError> {
    let text_search = keyword(request)?;
    let page = positive_param(request, PAGE_PARAM)?.unwrap_or(NonZeroU32::MIN);
    positive_param(request, LIMIT_PARAM)?;

    let mut predicates = Vec::new();
    for (field, value) in request.filters() {
        let kind = schema
            .field_kind(field)
            .ok_or_else(|| ValidationError::unknown_field(field))?;

        match value {
            ParamValue::Scalar(raw) => {
                predicates.push(Predicate::new(field, Operator::Eq, operand(field, kind, raw)?));
            }
            ParamValue::Structured(entries) => {
                if entries.is_empty() {
                    return Err(ValidationError::malformed(
                        field,
                        "structured filter has no comparisons",
                    ));
                }
                for (suffix, raw) in entries {
                    let operator = Operator::from_suffix(suffix)
                        .ok_or_else(|| ValidationError::unsupported_operator(field, suffix))?;
                    if kind == FieldKind::Text {
                        return Err(ValidationError::unsupported_operator(field, suffix));
                    }
                    predicates.push(Predicate::new(field, operator, operand(field, kind, raw)?));
                }
            }
        }
    }

    Ok(QueryDescriptor::new(
        text_search,
        predicates,
        page,
        default_page_size,
    ))
}

fn keyword(request: &FilterRequest) -> Result<Option<String>, ValidationError> {
    match request.get(KEYWORD_PARAM) {
        None => Ok(None),
        Some(ParamValue::Scalar(raw)) => {
            let trimmed = raw.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(ParamValue::Structured(_)) => Err(ValidationError::malformed(
            KEYWORD_PARAM,
            "expected a plain value",
        )),
    }
}

/// Absent means "use the default"; present-but-invalid is an error.
fn positive_param(
    request: &FilterRequest,
    key: &'static str,
) -> Result<Option<NonZeroU32>, ValidationError> {
    let raw = match request.get(key) {
        None => return Ok(None),
        Some(ParamValue::Scalar(raw)) => raw,
        Some(ParamValue::Structured(_)) => {
            return Err(ValidationError::malformed(key, "expected a plain value"));
        }
    };

    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::malformed(key, format!("`{raw}` is not an integer")))?;
    if value <= 0 {
        return Err(ValidationError::malformed(key, "must be greater than zero"));
    }
    let value = u32::try_from(value)
        .map_err(|_| ValidationError::malformed(key, "value exceeds supported range"))?;
    Ok(NonZeroU32::new(value))
}

fn operand(field: &str, kind: FieldKind, raw: &str) -> Result<Scalar, ValidationError> {
    match kind {
        FieldKind::Text => {
            if raw.is_empty() {
                return Err(ValidationError::invalid_value(field, "value must not be empty"));
            }
            Ok(Scalar::Text(raw.to_string()))
        }
        FieldKind::Number => {
            let trimmed = raw.trim();
            let value: f64 = trimmed.parse().map_err(|_| {
                ValidationError::invalid_value(field, format!("`{raw}` is not a number"))
            })?;
            if !value.is_finite() {
                return Err(ValidationError::invalid_value(
                    field,
                    format!("`{raw}` is not a finite number"),
                ));
            }
            // -0 and 0 must encode identically.
            Ok(Scalar::Number(if value == 0.0 { 0.0 } else { value }))
        }
    }
}
