// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Indexed field descriptors.
//!
//! A model declares what gets indexed with a list of descriptors:
//!
//! ```rust
//! use search_bridge::index::IndexField;
//!
//! let fields = vec![
//!     IndexField::search("title").boost(2.0),
//!     IndexField::autocomplete("title"),
//!     IndexField::filter("publication_date"),
//!     IndexField::related("authors", vec![IndexField::search("name")]),
//! ];
//! assert!(fields[0].is_searchable());
//! ```

use serde_json::{Map, Value};

/// Descriptor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Search,
    Autocomplete,
    Filter,
    Related,
}

/// One indexed field of a model
#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub kind: FieldKind,
    /// Attribute name on the domain object
    pub name: String,
    /// Only meaningful for `Search` fields
    pub boost: Option<f64>,
    /// Nested descriptors of a `Related` field
    pub fields: Vec<IndexField>,
    /// Raw mapping properties merged over the generated ones (cluster only)
    pub es_extra: Map<String, Value>,
}

impl IndexField {
    fn with_kind(kind: FieldKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            boost: None,
            fields: Vec::new(),
            es_extra: Map::new(),
        }
    }

    /// Full-text searchable field
    pub fn search(name: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Search, name)
    }

    /// Field indexed with edge-n-grams for prefix completion
    pub fn autocomplete(name: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Autocomplete, name)
    }

    /// Exact-value field usable in filters, ordering and facets
    pub fn filter(name: impl Into<String>) -> Self {
        Self::with_kind(FieldKind::Filter, name)
    }

    /// Related object(s) flattened into nested sub-documents
    pub fn related(name: impl Into<String>, fields: Vec<IndexField>) -> Self {
        let mut field = Self::with_kind(FieldKind::Related, name);
        field.fields = fields;
        field
    }

    #[must_use]
    pub fn boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    #[must_use]
    pub fn es_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.es_extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_searchable(&self) -> bool {
        self.kind == FieldKind::Search
    }

    #[must_use]
    pub fn is_filterable(&self) -> bool {
        self.kind == FieldKind::Filter
    }

    #[must_use]
    pub fn is_autocomplete(&self) -> bool {
        self.kind == FieldKind::Autocomplete
    }

    #[must_use]
    pub fn is_related(&self) -> bool {
        self.kind == FieldKind::Related
    }

    /// Declared boost, unless it is zero. A zero boost counts as undeclared.
    #[must_use]
    pub fn ranking_boost(&self) -> Option<f64> {
        self.boost.filter(|boost| *boost != 0.0)
    }

    /// Declared boost, or 1.0
    #[must_use]
    pub fn effective_boost(&self) -> f64 {
        self.ranking_boost().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_field_with_boost() {
        let field = IndexField::search("title").boost(2.0);
        assert!(field.is_searchable());
        assert!(!field.is_filterable());
        assert_eq!(field.effective_boost(), 2.0);
    }

    #[test]
    fn test_default_boost_is_one() {
        assert_eq!(IndexField::search("body").effective_boost(), 1.0);
        assert_eq!(IndexField::search("body").boost, None);

        let zero = IndexField::search("body").boost(0.0);
        assert_eq!(zero.ranking_boost(), None);
        assert_eq!(zero.effective_boost(), 1.0);
    }

    #[test]
    fn test_related_fields_keep_nested() {
        let field = IndexField::related("authors", vec![IndexField::search("name"), IndexField::filter("id")]);
        assert!(field.is_related());
        assert_eq!(field.fields.len(), 2);
        assert!(field.fields[1].is_filterable());
    }

    #[test]
    fn test_es_extra() {
        let field = IndexField::filter("tags").es_extra("index", false);
        assert_eq!(field.es_extra.get("index"), Some(&json!(false)));
    }
}
