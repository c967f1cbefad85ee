// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Model registry
//!
//! Explicit, statically declared description of every indexable model: its
//! attributes (with storage kinds), its parent in the type hierarchy and its
//! search field descriptors. Built once at startup, then shared read-only.
//! Derived per-model data (index schema, boost buckets) is computed on first
//! use and cached until the next registration.
//!
//! ```text
//! searchtests.Book            (root: owns the index)
//!   └─ searchtests.Novel      (columns prefixed "searchtests_novel__")
//! ```

use std::collections::HashMap;

use dashmap::DashMap;
use serde_json::Value;

use super::fields::IndexField;
use crate::error::{Result, SearchError};

/// Storage kind of a model attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    AutoId,
    BigAutoId,
    Integer,
    BigInteger,
    Boolean,
    Char,
    Text,
    Slug,
    Url,
    Date,
    DateTime,
    Time,
    Decimal,
    Float,
    Binary,
    /// Reference to another model, single (`many = false`) or to-many
    Relation { target: String, many: bool },
}

impl AttributeKind {
    /// Cluster mapping type. Unknown kinds map to `"string"`.
    #[must_use]
    pub fn storage_type(&self) -> &'static str {
        match self {
            AttributeKind::AutoId | AttributeKind::Integer => "integer",
            AttributeKind::BigAutoId | AttributeKind::BigInteger => "long",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Char | AttributeKind::Text | AttributeKind::Slug | AttributeKind::Url => "string",
            AttributeKind::Date | AttributeKind::DateTime | AttributeKind::Time => "date",
            AttributeKind::Decimal | AttributeKind::Float => "double",
            AttributeKind::Binary => "binary",
            AttributeKind::Relation { .. } => "string",
        }
    }

    #[must_use]
    pub fn is_date(&self) -> bool {
        matches!(self, AttributeKind::Date | AttributeKind::DateTime)
    }
}

/// Declaration of one model
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub app_label: String,
    pub name: String,
    /// Label (`app.Name`) of the indexed parent model, if any
    pub parent: Option<String>,
    pub attributes: Vec<(String, AttributeKind)>,
    pub search_fields: Vec<IndexField>,
}

impl ModelSpec {
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            parent: None,
            attributes: Vec::new(),
            search_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn parent(mut self, label: impl Into<String>) -> Self {
        self.parent = Some(label.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push((name.into(), kind));
        self
    }

    #[must_use]
    pub fn search_field(mut self, field: IndexField) -> Self {
        self.search_fields.push(field);
        self
    }

    #[must_use]
    pub fn search_fields(mut self, fields: impl IntoIterator<Item = IndexField>) -> Self {
        self.search_fields.extend(fields);
        self
    }

    /// Content-type label, e.g. `"searchtests.Book"`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    fn declares(&self, attribute: &str) -> Option<&AttributeKind> {
        self.attributes
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, kind)| kind)
    }
}

/// Registry of all models known to the search layer, in registration order.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: Vec<ModelSpec>,
    by_label: HashMap<String, usize>,
    mappings: DashMap<String, Value>,
    hierarchy_boosts: DashMap<String, Vec<f64>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model. Parents must be registered first and every search
    /// field must name a declared attribute of the model or one of its ancestors.
    pub fn register(&mut self, spec: ModelSpec) -> Result<()> {
        let label = spec.label();
        if self.by_label.contains_key(&label) {
            return Err(SearchError::Configuration(format!(
                "model {label} is already registered"
            )));
        }
        if let Some(parent) = &spec.parent {
            if !self.by_label.contains_key(parent) {
                return Err(SearchError::Configuration(format!(
                    "parent model {parent} of {label} must be registered first"
                )));
            }
        }
        for field in &spec.search_fields {
            let declared = spec.declares(&field.name).is_some()
                || spec
                    .parent
                    .as_deref()
                    .and_then(|parent| self.attribute_kind(parent, &field.name))
                    .is_some();
            if !declared {
                return Err(SearchError::Configuration(format!(
                    "search field \"{}\" of {label} is not a declared attribute",
                    field.name
                )));
            }
        }

        self.by_label.insert(label, self.models.len());
        self.models.push(spec);
        self.mappings.clear();
        self.hierarchy_boosts.clear();
        Ok(())
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&ModelSpec> {
        self.by_label.get(label).map(|&idx| &self.models[idx])
    }

    /// Registered and declares at least one search field (own or inherited).
    #[must_use]
    pub fn is_indexed(&self, label: &str) -> bool {
        self.ancestry(label)
            .iter()
            .any(|model| !model.search_fields.is_empty())
    }

    /// All registered models in registration order
    pub fn models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }

    /// Indexed models in registration order
    pub fn indexed_models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models
            .iter()
            .filter(move |model| self.is_indexed(&model.label()))
    }

    #[must_use]
    pub fn parent_of(&self, label: &str) -> Option<&ModelSpec> {
        self.get(label)
            .and_then(|model| model.parent.as_deref())
            .and_then(|parent| self.get(parent))
    }

    /// The model followed by its ancestors, nearest first.
    #[must_use]
    pub fn ancestry(&self, label: &str) -> Vec<&ModelSpec> {
        let mut chain = Vec::new();
        let mut current = self.get(label);
        while let Some(model) = current {
            chain.push(model);
            current = model.parent.as_deref().and_then(|parent| self.get(parent));
        }
        chain
    }

    /// Topmost ancestor. The model itself when it has no parent.
    #[must_use]
    pub fn root_of(&self, label: &str) -> Option<&ModelSpec> {
        self.ancestry(label).last().copied()
    }

    /// True if `label` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn is_subtype(&self, label: &str, ancestor: &str) -> bool {
        self.ancestry(label)
            .iter()
            .any(|model| model.label() == ancestor)
    }

    /// Effective search fields: inherited ones first (root first), then own.
    #[must_use]
    pub fn search_fields(&self, label: &str) -> Vec<&IndexField> {
        self.ancestry(label)
            .into_iter()
            .rev()
            .flat_map(|model| model.search_fields.iter())
            .collect()
    }

    pub fn searchable_fields(&self, label: &str) -> Vec<&IndexField> {
        self.search_fields(label)
            .into_iter()
            .filter(|f| f.is_searchable())
            .collect()
    }

    pub fn filterable_fields(&self, label: &str) -> Vec<&IndexField> {
        self.search_fields(label)
            .into_iter()
            .filter(|f| f.is_filterable())
            .collect()
    }

    pub fn autocomplete_fields(&self, label: &str) -> Vec<&IndexField> {
        self.search_fields(label)
            .into_iter()
            .filter(|f| f.is_autocomplete())
            .collect()
    }

    /// Storage kind of an attribute, looked up on the model then its ancestors.
    #[must_use]
    pub fn attribute_kind(&self, label: &str, attribute: &str) -> Option<&AttributeKind> {
        self.ancestry(label)
            .into_iter()
            .find_map(|model| model.declares(attribute))
    }

    /// Index schema of `label`, built by `build` on first use.
    pub(crate) fn cached_mapping(&self, label: &str, build: impl FnOnce() -> Result<Value>) -> Result<Value> {
        if let Some(mapping) = self.mappings.get(label) {
            return Ok(mapping.clone());
        }
        let mapping = build()?;
        self.mappings.insert(label.to_string(), mapping.clone());
        Ok(mapping)
    }

    /// Distinct non-zero boosts of the searchable fields of `label` and every
    /// indexed subtype, in registration order.
    pub fn hierarchy_boosts(&self, label: &str) -> Vec<f64> {
        if let Some(boosts) = self.hierarchy_boosts.get(label) {
            return boosts.clone();
        }

        let mut boosts: Vec<f64> = Vec::new();
        for model in self.indexed_models() {
            let model_label = model.label();
            if !self.is_subtype(&model_label, label) {
                continue;
            }
            for boost in self
                .searchable_fields(&model_label)
                .into_iter()
                .filter_map(IndexField::ranking_boost)
            {
                if !boosts.contains(&boost) {
                    boosts.push(boost);
                }
            }
        }
        self.hierarchy_boosts.insert(label.to_string(), boosts.clone());
        boosts
    }

    /// Nearest model in the ancestry (self included) that declares `attribute`.
    #[must_use]
    pub fn definition_model(&self, label: &str, attribute: &str) -> Option<&ModelSpec> {
        self.ancestry(label)
            .into_iter()
            .find(|model| model.declares(attribute).is_some())
    }
}
