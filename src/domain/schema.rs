//! Per-collection allow-list of filterable fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value type a filterable field holds in stored documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Number,
    Text,
}

/// Fields a client may filter on, and the fields covered by keyword search.
///
/// Anything not declared here is rejected during compilation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSchema {
    fields: BTreeMap<String, FieldKind>,
    text_fields: Vec<String>,
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Declare a text field that keyword search matches against.
    pub fn with_text_search_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), FieldKind::Text);
        if !self.text_fields.contains(&name) {
            self.text_fields.push(name);
        }
        self
    }

    /// Storefront product catalog.
    pub fn products() -> Self {
        Self::new()
            .with_text_search_field("name")
            .with_text_search_field("description")
            .with_text_search_field("category")
            .with_field("price", FieldKind::Number)
            .with_field("ratings", FieldKind::Number)
            .with_field("stock", FieldKind::Number)
            .with_field("num_of_reviews", FieldKind::Number)
    }

    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }

    pub fn text_fields(&self) -> &[String] {
        &self.text_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_schema_declares_catalog_fields() {
        let schema = CollectionSchema::products();
        assert_eq!(schema.field_kind("price"), Some(FieldKind::Number));
        assert_eq!(schema.field_kind("category"), Some(FieldKind::Text));
        assert_eq!(schema.field_kind("$where"), None);
        assert_eq!(schema.text_fields(), ["name", "description", "category"]);
    }

    #[test]
    fn text_search_fields_are_not_duplicated() {
        let schema = CollectionSchema::new()
            .with_text_search_field("title")
            .with_text_search_field("title");
        assert_eq!(schema.text_fields().len(), 1);
    }
}
