use thiserror::Error;

/// Client-input fault raised while compiling a filter request.
///
/// Compilation is all-or-nothing: the first offending parameter aborts it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed parameter `{key}`: {reason}")]
    MalformedParameter { key: String, reason: String },
    #[error("unknown filter field `{field}`")]
    UnknownField { field: String },
    #[error("unsupported operator `{operator}` on field `{field}`")]
    UnsupportedOperator { field: String, operator: String },
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("malformed query descriptor: {reason}")]
    MalformedDescriptor { reason: String },
}

impl ValidationError {
    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedParameter {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    pub fn unsupported_operator(field: impl Into<String>, operator: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            field: field.into(),
            operator: operator.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_descriptor(reason: impl Into<String>) -> Self {
        Self::MalformedDescriptor {
            reason: reason.into(),
        }
    }

    /// Parameter or field the error refers to, when there is one.
    pub fn subject(&self) -> Option<&str> {
        match self {
            Self::MalformedParameter { key, .. } => Some(key),
            Self::UnknownField { field }
            | Self::UnsupportedOperator { field, .. }
            | Self::InvalidValue { field, .. } => Some(field),
            Self::MalformedDescriptor { .. } => None,
        }
    }
}
