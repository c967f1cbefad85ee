// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Field mapping registry.
//!
//! - [`IndexField`]: what a model indexes (search, autocomplete, filter, related)
//! - [`ModelRegistry`]: statically declared models, hierarchy and attribute kinds
//! - [`ModelMapping`]: column naming, backend schema and document building
//! - [`Indexable`]: attribute access on domain objects

mod fields;
mod mapping;
mod registry;

pub use fields::{FieldKind, IndexField};
pub use mapping::{ModelMapping, TextContent, ALL_FIELD_NAME, EDGENGRAMS_FIELD_NAME};
pub use registry::{AttributeKind, ModelRegistry, ModelSpec};

use serde_json::Value;

/// Value of one attribute of a domain object
pub enum AttributeValue<'a> {
    /// Scalar, list or null
    Value(Value),
    /// Single related object
    One(&'a dyn Indexable),
    /// To-many relation
    Many(Vec<&'a dyn Indexable>),
}

impl AttributeValue<'_> {
    pub fn from_value(value: impl Into<Value>) -> Self {
        AttributeValue::Value(value.into())
    }
}

/// A domain object that can be written to a search index.
pub trait Indexable: Send + Sync {
    /// Content-type label of the concrete model, e.g. `"searchtests.Novel"`
    fn model(&self) -> &str;

    /// Primary key in string form
    fn pk(&self) -> String;

    /// Read an attribute by name. `None` when the object has no such attribute.
    fn attribute(&self, name: &str) -> Option<AttributeValue<'_>>;

    /// Receive the relevance score of a search hit under the given attribute name.
    fn set_score(&mut self, _attribute: &str, _score: Option<f64>) {}

    /// Short description used in log output
    fn describe(&self) -> String {
        format!("<{}: {}>", self.model(), self.pk())
    }
}
