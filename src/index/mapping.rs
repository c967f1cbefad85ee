// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Model mapping
//!
//! Derives backend column names, the index schema and index documents from the
//! registry declarations of one model.
//!
//! # Column naming
//!
//! ```text
//! field declared on the root model     title, title_filter
//! field declared on a subtype          searchtests_novel__setting
//! autocomplete field                   title_edgengrams
//! boosted text bucket                  _all_text_boost_2_0
//! ```

use serde_json::{json, Map, Value};

use super::fields::{FieldKind, IndexField};
use super::registry::{AttributeKind, ModelRegistry, ModelSpec};
use super::{AttributeValue, Indexable};
use crate::error::{Result, SearchError};

/// Aggregate column every searchable field is copied into
pub const ALL_FIELD_NAME: &str = "_all_text";
/// Aggregate edge-n-gram column for autocomplete
pub const EDGENGRAMS_FIELD_NAME: &str = "_edgengrams";

const KEYWORD_TYPE: &str = "keyword";
const TEXT_TYPE: &str = "text";

fn edgengram_analyzer_config() -> Map<String, Value> {
    let mut config = Map::new();
    config.insert("analyzer".into(), json!("edgengram_analyzer"));
    config.insert("search_analyzer".into(), json!("standard"));
    config
}

/// Column naming relative to an optional registered model.
fn column_name(registry: &ModelRegistry, model: Option<&ModelSpec>, field: &IndexField) -> String {
    let prefix = model
        .and_then(|model| {
            let label = model.label();
            let definition = registry.definition_model(&label, &field.name)?;
            let root = registry.root_of(&label)?;
            (definition.label() != root.label()).then(|| {
                format!(
                    "{}_{}__",
                    definition.app_label.to_lowercase(),
                    definition.name.to_lowercase()
                )
            })
        })
        .unwrap_or_default();

    match field.kind {
        FieldKind::Filter => format!("{prefix}{}_filter", field.name),
        FieldKind::Autocomplete => format!("{prefix}{}_edgengrams", field.name),
        FieldKind::Search | FieldKind::Related => format!("{prefix}{}", field.name),
    }
}

/// Related objects collapse to their primary keys.
fn attribute_json(value: Option<AttributeValue<'_>>) -> Value {
    match value {
        Some(AttributeValue::Value(value)) => value,
        Some(AttributeValue::One(obj)) => Value::String(obj.pk()),
        Some(AttributeValue::Many(objs)) => {
            Value::Array(objs.into_iter().map(|obj| Value::String(obj.pk())).collect())
        }
        None => Value::Null,
    }
}

fn push_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|item| push_text(item, out)),
        Value::Object(map) => map.values().for_each(|item| push_text(item, out)),
        _ => {}
    }
}

/// Searchable text of one object, as fed to full-text engines without a schema
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TextContent {
    /// Search field values, boost ignored
    pub body: Vec<String>,
    /// Autocomplete field values
    pub autocomplete: Vec<String>,
}

/// Mapping view of one registered model
#[derive(Debug, Clone, Copy)]
pub struct ModelMapping<'r> {
    registry: &'r ModelRegistry,
    model: &'r ModelSpec,
}

impl<'r> ModelMapping<'r> {
    pub fn new(registry: &'r ModelRegistry, label: &str) -> Result<Self> {
        let model = registry
            .get(label)
            .ok_or_else(|| SearchError::Configuration(format!("model {label} is not registered")))?;
        Ok(Self { registry, model })
    }

    #[must_use]
    pub fn model(&self) -> &'r ModelSpec {
        self.model
    }

    #[must_use]
    pub fn registry(&self) -> &'r ModelRegistry {
        self.registry
    }

    /// Backend column of `field`. Stable for a given (model, field).
    #[must_use]
    pub fn field_column_name(&self, field: &IndexField) -> String {
        column_name(self.registry, Some(self.model), field)
    }

    /// Name of the aggregate column holding all fields boosted by `boost`
    #[must_use]
    pub fn boost_field_name(boost: f64) -> String {
        let boost = format!("{boost:?}").replace('.', "_");
        format!("{ALL_FIELD_NAME}_boost_{boost}")
    }

    /// e.g. `"searchtests.Novel"`
    #[must_use]
    pub fn content_type(&self) -> String {
        self.model.label()
    }

    /// This model's content type followed by its ancestors'
    #[must_use]
    pub fn all_content_types(&self) -> Vec<String> {
        self.registry
            .ancestry(&self.model.label())
            .iter()
            .map(|model| model.label())
            .collect()
    }

    fn field_mapping(&self, field: &IndexField) -> Result<(String, Value)> {
        let label = self.model.label();
        let column = self.field_column_name(field);

        if field.is_related() {
            let target = match self.registry.attribute_kind(&label, &field.name) {
                Some(AttributeKind::Relation { target, .. }) => target.clone(),
                _ => {
                    return Err(SearchError::Configuration(format!(
                        "RelatedFields(\"{}\") of {label} must refer to a relation attribute",
                        field.name
                    )))
                }
            };
            let nested = ModelMapping::new(self.registry, &target)?;
            let mut properties = Map::new();
            for sub_field in &field.fields {
                let (name, mapping) = nested.field_mapping(sub_field)?;
                properties.insert(name, mapping);
            }
            return Ok((column, json!({"type": "nested", "properties": properties})));
        }

        let storage_type = self
            .registry
            .attribute_kind(&label, &field.name)
            .map_or("string", AttributeKind::storage_type);
        let mut mapping = Map::new();
        mapping.insert("type".into(), json!(storage_type));

        match field.kind {
            FieldKind::Search => {
                if storage_type == "string" {
                    mapping.insert("type".into(), json!(TEXT_TYPE));
                }
                if let Some(boost) = field.ranking_boost() {
                    mapping.insert("boost".into(), json!(boost));
                }
                mapping.insert("include_in_all".into(), json!(true));
            }
            FieldKind::Autocomplete => {
                mapping.insert("type".into(), json!(TEXT_TYPE));
                mapping.extend(edgengram_analyzer_config());
            }
            FieldKind::Filter => {
                if storage_type == "string" {
                    mapping.insert("type".into(), json!(KEYWORD_TYPE));
                }
            }
            FieldKind::Related => {}
        }

        for (key, value) in &field.es_extra {
            mapping.insert(key.clone(), value.clone());
        }

        Ok((column, Value::Object(mapping)))
    }

    /// Index schema (`{"properties": {...}}`) for this model, built once per
    /// model and then served from the registry.
    ///
    /// `include_in_all` flags are rewritten into `copy_to` lists, with one
    /// aggregate column per distinct boost value.
    pub fn get_mapping(&self) -> Result<Value> {
        self.registry
            .cached_mapping(&self.model.label(), || self.build_mapping())
    }

    fn build_mapping(&self) -> Result<Value> {
        let mut fields = Map::new();
        fields.insert("pk".into(), json!({"type": KEYWORD_TYPE, "store": true}));
        fields.insert("content_type".into(), json!({"type": KEYWORD_TYPE}));
        let mut edgengrams = Map::new();
        edgengrams.insert("type".into(), json!(TEXT_TYPE));
        edgengrams.extend(edgengram_analyzer_config());
        fields.insert(EDGENGRAMS_FIELD_NAME.into(), Value::Object(edgengrams));

        for field in self.registry.search_fields(&self.model.label()) {
            let (key, value) = self.field_mapping(field)?;
            fields.insert(key, value);
        }

        fields.insert(ALL_FIELD_NAME.into(), json!({"type": TEXT_TYPE}));

        let mut unique_boosts: Vec<f64> = Vec::new();
        replace_include_in_all(&mut fields, &mut unique_boosts);
        for boost in unique_boosts {
            fields.insert(Self::boost_field_name(boost), json!({"type": TEXT_TYPE}));
        }

        Ok(json!({ "properties": fields }))
    }

    #[must_use]
    pub fn document_id(obj: &dyn Indexable) -> String {
        obj.pk()
    }

    /// Index document for `obj`: every declared field under its column name,
    /// related objects as nested documents, autocomplete values gathered into
    /// the edge-n-gram column.
    #[must_use]
    pub fn get_document(&self, obj: &dyn Indexable) -> Value {
        let mut doc = Map::new();
        doc.insert("pk".into(), Value::String(obj.pk()));
        doc.insert("content_type".into(), json!(self.all_content_types()));
        let mut edgengrams = Vec::new();

        for field in self.registry.search_fields(&self.model.label()) {
            let value = if field.is_related() {
                match obj.attribute(&field.name) {
                    Some(AttributeValue::One(related)) => {
                        Value::Object(self.nested_document(&field.fields, related, &mut edgengrams))
                    }
                    Some(AttributeValue::Many(related)) => Value::Array(
                        related
                            .into_iter()
                            .map(|item| Value::Object(self.nested_document(&field.fields, item, &mut edgengrams)))
                            .collect(),
                    ),
                    other => attribute_json(other),
                }
            } else {
                attribute_json(obj.attribute(&field.name))
            };

            if field.is_autocomplete() {
                edgengrams.push(value.clone());
            }
            doc.insert(self.field_column_name(field), value);
        }

        doc.insert(EDGENGRAMS_FIELD_NAME.into(), Value::Array(edgengrams));
        Value::Object(doc)
    }

    fn nested_document(
        &self,
        fields: &[IndexField],
        obj: &dyn Indexable,
        edgengrams: &mut Vec<Value>,
    ) -> Map<String, Value> {
        let nested_model = self.registry.get(obj.model());
        let mut doc = Map::new();
        for field in fields {
            let value = attribute_json(obj.attribute(&field.name));
            if field.is_autocomplete() {
                edgengrams.push(value.clone());
            }
            doc.insert(column_name(self.registry, nested_model, field), value);
        }
        doc
    }

    /// Plain text of the searchable and autocomplete fields, nested ones included.
    #[must_use]
    pub fn text_content(&self, obj: &dyn Indexable) -> TextContent {
        let mut content = TextContent::default();
        for field in self.registry.search_fields(&self.model.label()) {
            match field.kind {
                FieldKind::Search => push_text(&attribute_json(obj.attribute(&field.name)), &mut content.body),
                FieldKind::Autocomplete => {
                    push_text(&attribute_json(obj.attribute(&field.name)), &mut content.autocomplete)
                }
                FieldKind::Related => {
                    let related: Vec<&dyn Indexable> = match obj.attribute(&field.name) {
                        Some(AttributeValue::One(item)) => vec![item],
                        Some(AttributeValue::Many(items)) => items,
                        _ => Vec::new(),
                    };
                    for item in related {
                        for sub_field in &field.fields {
                            let value = attribute_json(item.attribute(&sub_field.name));
                            match sub_field.kind {
                                FieldKind::Search => push_text(&value, &mut content.body),
                                FieldKind::Autocomplete => push_text(&value, &mut content.autocomplete),
                                _ => {}
                            }
                        }
                    }
                }
                FieldKind::Filter => {}
            }
        }
        content
    }
}

fn replace_include_in_all(properties: &mut Map<String, Value>, unique_boosts: &mut Vec<f64>) {
    for field_mapping in properties.values_mut() {
        let Some(mapping) = field_mapping.as_object_mut() else {
            continue;
        };

        if let Some(include) = mapping.remove("include_in_all") {
            if include.as_bool() == Some(true) {
                match mapping
                    .remove("boost")
                    .and_then(|b| b.as_f64())
                    .filter(|boost| *boost != 0.0)
                {
                    Some(boost) => {
                        if !unique_boosts.contains(&boost) {
                            unique_boosts.push(boost);
                        }
                        mapping.insert(
                            "copy_to".into(),
                            json!([ALL_FIELD_NAME, ModelMapping::boost_field_name(boost)]),
                        );
                    }
                    None => {
                        mapping.insert("copy_to".into(), json!(ALL_FIELD_NAME));
                    }
                }
            }
        }

        if mapping.get("type").and_then(Value::as_str) == Some("nested") {
            if let Some(nested) = mapping.get_mut("properties").and_then(Value::as_object_mut) {
                replace_include_in_all(nested, unique_boosts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ModelSpec;

    struct Author {
        id: u32,
        name: &'static str,
    }

    impl Indexable for Author {
        fn model(&self) -> &str {
            "searchtests.Author"
        }
        fn pk(&self) -> String {
            self.id.to_string()
        }
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            match name {
                "name" => Some(AttributeValue::from_value(self.name)),
                _ => None,
            }
        }
    }

    struct Novel {
        id: u32,
        title: &'static str,
        setting: &'static str,
        authors: Vec<Author>,
    }

    impl Indexable for Novel {
        fn model(&self) -> &str {
            "searchtests.Novel"
        }
        fn pk(&self) -> String {
            self.id.to_string()
        }
        fn attribute(&self, name: &str) -> Option<AttributeValue<'_>> {
            match name {
                "title" => Some(AttributeValue::from_value(self.title)),
                "setting" => Some(AttributeValue::from_value(self.setting)),
                "publication_date" => Some(AttributeValue::from_value("2001-02-03")),
                "authors" => Some(AttributeValue::Many(
                    self.authors.iter().map(|a| a as &dyn Indexable).collect(),
                )),
                _ => None,
            }
        }
    }

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("searchtests", "Author")
                    .attribute("name", AttributeKind::Char)
                    .search_field(IndexField::search("name"))
                    .search_field(IndexField::autocomplete("name")),
            )
            .unwrap();
        registry
            .register(
                ModelSpec::new("searchtests", "Book")
                    .attribute("title", AttributeKind::Char)
                    .attribute("publication_date", AttributeKind::Date)
                    .attribute(
                        "authors",
                        AttributeKind::Relation { target: "searchtests.Author".into(), many: true },
                    )
                    .search_field(IndexField::search("title").boost(2.0))
                    .search_field(IndexField::autocomplete("title"))
                    .search_field(IndexField::filter("publication_date"))
                    .search_field(IndexField::related(
                        "authors",
                        vec![IndexField::search("name"), IndexField::autocomplete("name")],
                    )),
            )
            .unwrap();
        registry
            .register(
                ModelSpec::new("searchtests", "Novel")
                    .parent("searchtests.Book")
                    .attribute("setting", AttributeKind::Text)
                    .search_field(IndexField::search("setting").boost(2.0)),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_column_names() {
        let registry = registry();
        let mapping = ModelMapping::new(&registry, "searchtests.Novel").unwrap();
        assert_eq!(mapping.field_column_name(&IndexField::search("title")), "title");
        assert_eq!(
            mapping.field_column_name(&IndexField::filter("publication_date")),
            "publication_date_filter"
        );
        assert_eq!(
            mapping.field_column_name(&IndexField::search("setting")),
            "searchtests_novel__setting"
        );
        assert_eq!(
            mapping.field_column_name(&IndexField::autocomplete("title")),
            "title_edgengrams"
        );
    }

    #[test]
    fn test_boost_field_name() {
        assert_eq!(ModelMapping::boost_field_name(2.0), "_all_text_boost_2_0");
        assert_eq!(ModelMapping::boost_field_name(0.5), "_all_text_boost_0_5");
    }

    #[test]
    fn test_content_types() {
        let registry = registry();
        let mapping = ModelMapping::new(&registry, "searchtests.Novel").unwrap();
        assert_eq!(mapping.content_type(), "searchtests.Novel");
        assert_eq!(
            mapping.all_content_types(),
            vec!["searchtests.Novel".to_string(), "searchtests.Book".to_string()]
        );
    }

    #[test]
    fn test_mapping_rewrites_include_in_all_once_per_boost() {
        let registry = registry();
        let mapping = ModelMapping::new(&registry, "searchtests.Novel")
            .unwrap()
            .get_mapping()
            .unwrap();
        let props = &mapping["properties"];

        assert_eq!(props["pk"], json!({"type": "keyword", "store": true}));
        assert_eq!(
            props["title"],
            json!({"type": "text", "copy_to": ["_all_text", "_all_text_boost_2_0"]})
        );
        assert_eq!(
            props["searchtests_novel__setting"],
            json!({"type": "text", "copy_to": ["_all_text", "_all_text_boost_2_0"]})
        );
        assert_eq!(props["publication_date_filter"], json!({"type": "date"}));
        assert_eq!(
            props["title_edgengrams"],
            json!({"type": "text", "analyzer": "edgengram_analyzer", "search_analyzer": "standard"})
        );
        assert_eq!(
            props["authors"]["properties"]["name"],
            json!({"type": "text", "copy_to": "_all_text"})
        );
        assert_eq!(props["_all_text_boost_2_0"], json!({"type": "text"}));

        let boost_columns = props
            .as_object()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with("_all_text_boost_"))
            .count();
        assert_eq!(boost_columns, 1);
    }

    #[test]
    fn test_zero_boost_gets_no_bucket() {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("searchtests", "Note")
                    .attribute("body", AttributeKind::Text)
                    .search_field(IndexField::search("body").boost(0.0)),
            )
            .unwrap();
        let mapping = ModelMapping::new(&registry, "searchtests.Note")
            .unwrap()
            .get_mapping()
            .unwrap();
        let props = &mapping["properties"];
        assert_eq!(props["body"], json!({"type": "text", "copy_to": "_all_text"}));
        assert!(props.get("_all_text_boost_0_0").is_none());
    }

    #[test]
    fn test_mapping_is_cached_per_model() {
        let registry = registry();
        let novel = ModelMapping::new(&registry, "searchtests.Novel").unwrap();
        let first = novel.get_mapping().unwrap();
        assert_eq!(novel.get_mapping().unwrap(), first);
        assert_eq!(registry.cached_mapping("searchtests.Novel", || unreachable!()).unwrap(), first);
    }

    #[test]
    fn test_document() {
        let registry = registry();
        let novel = Novel {
            id: 7,
            title: "The Fellowship",
            setting: "Middle-earth",
            authors: vec![Author { id: 1, name: "J. R. R. Tolkien" }],
        };
        let mapping = ModelMapping::new(&registry, novel.model()).unwrap();
        let doc = mapping.get_document(&novel);

        assert_eq!(doc["pk"], json!("7"));
        assert_eq!(doc["content_type"], json!(["searchtests.Novel", "searchtests.Book"]));
        assert_eq!(doc["title"], json!("The Fellowship"));
        assert_eq!(doc["publication_date_filter"], json!("2001-02-03"));
        assert_eq!(doc["searchtests_novel__setting"], json!("Middle-earth"));
        assert_eq!(doc["authors"], json!([{"name": "J. R. R. Tolkien", "name_edgengrams": "J. R. R. Tolkien"}]));
        assert_eq!(doc["_edgengrams"], json!(["The Fellowship", "J. R. R. Tolkien"]));
    }

    #[test]
    fn test_text_content() {
        let registry = registry();
        let novel = Novel {
            id: 1,
            title: "Dune",
            setting: "Arrakis",
            authors: vec![Author { id: 2, name: "Frank Herbert" }],
        };
        let content = ModelMapping::new(&registry, novel.model()).unwrap().text_content(&novel);
        assert_eq!(content.body, vec!["Dune", "Frank Herbert", "Arrakis"]);
        assert_eq!(content.autocomplete, vec!["Dune", "Frank Herbert"]);
    }

    #[test]
    fn test_unknown_model() {
        let registry = registry();
        assert!(ModelMapping::new(&registry, "nope.Nothing").is_err());
    }
}
