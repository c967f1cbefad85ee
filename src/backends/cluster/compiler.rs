// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query compiler for the cluster backend.
//!
//! Builds the JSON query DSL body for one request:
//!
//! ```text
//! {"bool": {"must": <inner query>, "filter": <content type> | [<content type>, <filters>]}}
//! ```
//!
//! The inner query targets either the requested fields (remapped to their
//! columns, with field boosts) or the aggregate `_all_text` column plus one
//! `_all_text_boost_*` column per distinct boost in the model hierarchy.

use serde_json::{json, Map, Value};

use crate::backends::compiler::{CompileRequest, CompilerMode, FilterDialect, QueryCompiler};
use crate::error::{Result, SearchError};
use crate::index::{ModelMapping, ModelRegistry, ALL_FIELD_NAME, EDGENGRAMS_FIELD_NAME};
use crate::query::{Connector, Operator, SearchQuery};

/// A target column with its boost
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub boost: f64,
}

impl Field {
    pub fn new(name: impl Into<String>, boost: f64) -> Self {
        Self {
            name: name.into(),
            boost,
        }
    }

    /// `name^boost` as used by `multi_match`
    #[must_use]
    pub fn name_with_boost(&self) -> String {
        if self.boost == 1.0 {
            self.name.clone()
        } else {
            format!("{}^{:?}", self.name, self.boost)
        }
    }
}

fn match_none() -> Value {
    json!({"bool": {"must_not": {"match_all": {}}}})
}

/// Filters as JSON query clauses
pub struct ClusterDialect;

impl FilterDialect for ClusterDialect {
    type Filter = Value;

    fn process_lookup(&self, column: &str, lookup: &str, value: &Value) -> Result<Option<Value>> {
        let filter = match lookup {
            "exact" if value.is_null() => json!({"bool": {"must_not": {"exists": {"field": column}}}}),
            "exact" => json!({"term": {column: value}}),
            "isnull" => {
                let exists = json!({"exists": {"field": column}});
                if is_truthy(value) {
                    json!({"bool": {"must_not": exists}})
                } else {
                    exists
                }
            }
            "startswith" | "prefix" => json!({"prefix": {column: value}}),
            "gt" | "gte" | "lt" | "lte" => json!({"range": {column: {lookup: value}}}),
            "range" => {
                let (lower, upper) = match value.as_array().map(Vec::as_slice) {
                    Some([lower, upper]) => (lower, upper),
                    _ => {
                        return Err(SearchError::Filter(format!(
                            "\"range\" lookup on {column} needs a [lower, upper] pair, got {value}."
                        )))
                    }
                };
                json!({"range": {column: {"gte": lower, "lte": upper}}})
            }
            "in" => {
                let values = match value {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                json!({"terms": {column: values}})
            }
            _ => return Ok(None),
        };
        Ok(Some(filter))
    }

    fn match_none(&self) -> Value {
        match_none()
    }

    fn connect_filters(&self, mut filters: Vec<Value>, connector: Connector, negated: bool) -> Option<Value> {
        if filters.is_empty() {
            return None;
        }
        let joined = if filters.len() == 1 {
            filters.remove(0)
        } else {
            match connector {
                Connector::And => json!({"bool": {"must": filters}}),
                Connector::Or => json!({"bool": {"should": filters}}),
            }
        };
        Some(if negated {
            json!({"bool": {"must_not": joined}})
        } else {
            joined
        })
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn plain_text_query(text: &str, operator: Operator, fields: &[Field], boost: f64) -> Value {
    let mut match_query = Map::new();
    match_query.insert("query".into(), json!(text));
    if operator != Operator::Or {
        match_query.insert("operator".into(), json!(operator.as_str()));
    }

    if let [field] = fields {
        if boost != 1.0 || field.boost != 1.0 {
            match_query.insert("boost".into(), json!(boost * field.boost));
        }
        return json!({"match": {field.name.as_str(): match_query}});
    }

    if boost != 1.0 {
        match_query.insert("boost".into(), json!(boost));
    }
    match_query.insert("fields".into(), fields_with_boost(fields));
    json!({ "multi_match": match_query })
}

fn fuzzy_query(text: &str, operator: Operator, fields: &[Field]) -> Value {
    let mut match_query = Map::new();
    match_query.insert("query".into(), json!(text));
    match_query.insert("fuzziness".into(), json!("AUTO"));
    if operator != Operator::Or {
        match_query.insert("operator".into(), json!(operator.as_str()));
    }

    if let [field] = fields {
        if field.boost != 1.0 {
            match_query.insert("boost".into(), json!(field.boost));
        }
        return json!({"match": {field.name.as_str(): match_query}});
    }

    match_query.insert("fields".into(), fields_with_boost(fields));
    json!({ "multi_match": match_query })
}

fn phrase_query(text: &str, fields: &[Field]) -> Value {
    match fields {
        [field] if field.boost != 1.0 => {
            json!({"match_phrase": {field.name.as_str(): {"query": text, "boost": field.boost}}})
        }
        [field] => json!({"match_phrase": {field.name.as_str(): text}}),
        _ => json!({"multi_match": {
            "query": text,
            "fields": fields_with_boost(fields),
            "type": "phrase",
        }}),
    }
}

fn fields_with_boost(fields: &[Field]) -> Value {
    Value::Array(fields.iter().map(|f| json!(f.name_with_boost())).collect())
}

/// Compile `query` against one field; boosts multiply on the way down.
fn compile_query(query: &SearchQuery, field: &Field, boost: f64) -> Value {
    let fields = std::slice::from_ref(field);
    match query {
        SearchQuery::MatchAll => {
            let mut match_all = Map::new();
            if boost != 1.0 {
                match_all.insert("boost".into(), json!(boost));
            }
            json!({ "match_all": match_all })
        }
        SearchQuery::And(children) => json!({"bool": {"must": children
            .iter()
            .map(|child| compile_query(child, field, boost))
            .collect::<Vec<_>>()}}),
        SearchQuery::Or(children) => json!({"bool": {"should": children
            .iter()
            .map(|child| compile_query(child, field, boost))
            .collect::<Vec<_>>()}}),
        SearchQuery::Not(child) => json!({"bool": {"must_not": compile_query(child, field, boost)}}),
        SearchQuery::PlainText { text, operator } => plain_text_query(text, *operator, fields, boost),
        SearchQuery::Fuzzy { text, operator } => fuzzy_query(text, *operator, fields),
        SearchQuery::Phrase { text } => phrase_query(text, fields),
        SearchQuery::Boost { query, factor } => compile_query(query, field, boost * factor),
    }
}

/// Compiled request body parts
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Label of the searched model
    pub model: String,
    pub query: Value,
    /// `None` orders by relevance
    pub sort: Option<Value>,
    /// (field name, column) of every filterable field, for faceting
    pub filter_columns: Vec<(String, String)>,
}

/// Cluster compiler for search and autocomplete requests
pub struct ClusterCompiler<'a> {
    base: QueryCompiler<'a>,
    remapped_fields: Vec<Field>,
}

impl<'a> ClusterCompiler<'a> {
    pub fn new(registry: &'a ModelRegistry, request: &'a CompileRequest) -> Result<Self> {
        let base = QueryCompiler::new(registry, request)?;
        let remapped_fields = match request.mode {
            CompilerMode::Search => Self::remap_search_fields(&base),
            CompilerMode::Autocomplete => Self::remap_autocomplete_fields(&base),
        };
        Ok(Self { base, remapped_fields })
    }

    /// Explicit fields become (column, boost); no fields means the aggregate columns.
    fn remap_search_fields(base: &QueryCompiler<'_>) -> Vec<Field> {
        match base.request.fields.as_deref() {
            Some(names) if !names.is_empty() => {
                let searchable = base.searchable_fields();
                names
                    .iter()
                    .filter_map(|name| searchable.iter().find(|field| &field.name == name))
                    .map(|field| Field::new(base.mapping.field_column_name(field), field.effective_boost()))
                    .collect()
            }
            _ => {
                let mut fields = vec![Field::new(ALL_FIELD_NAME, 1.0)];
                fields.extend(
                    base.hierarchy_boosts()
                        .into_iter()
                        .map(|boost| Field::new(ModelMapping::boost_field_name(boost), boost)),
                );
                fields
            }
        }
    }

    /// Autocomplete names map to their edge-n-gram columns; others pass through.
    fn remap_autocomplete_fields(base: &QueryCompiler<'_>) -> Vec<Field> {
        match base.request.fields.as_deref() {
            Some(names) if !names.is_empty() => {
                let autocomplete = base.autocomplete_fields();
                names
                    .iter()
                    .map(|name| {
                        let column = autocomplete
                            .iter()
                            .find(|field| &field.name == name)
                            .map_or_else(|| name.clone(), |field| base.mapping.field_column_name(field));
                        Field::new(column, 1.0)
                    })
                    .collect()
            }
            _ => vec![Field::new(EDGENGRAMS_FIELD_NAME, 1.0)],
        }
    }

    #[must_use]
    pub fn remapped_fields(&self) -> &[Field] {
        &self.remapped_fields
    }

    /// Validate fields, filters and ordering before any request is built.
    pub fn check(&self) -> Result<()> {
        self.base.check(false)
    }

    pub fn get_inner_query(&self) -> Result<Value> {
        let fields = self.remapped_fields.as_slice();
        if fields.is_empty() {
            return Ok(match_none());
        }
        let query = &self.base.request.query;

        if self.base.request.mode == CompilerMode::Autocomplete {
            return match query {
                SearchQuery::PlainText { text, operator } => Ok(plain_text_query(text, *operator, fields, 1.0)),
                SearchQuery::MatchAll => Ok(json!({"match_all": {}})),
                other => Err(SearchError::NotSupported(format!(
                    "`{}` is not supported for autocomplete queries.",
                    other.kind()
                ))),
            };
        }

        Ok(match query {
            SearchQuery::MatchAll => json!({"match_all": {}}),
            SearchQuery::PlainText { text, operator } => plain_text_query(text, *operator, fields, 1.0),
            SearchQuery::Phrase { text } => phrase_query(text, fields),
            SearchQuery::Fuzzy { text, operator } => fuzzy_query(text, *operator, fields),
            SearchQuery::Not(child) => json!({"bool": {"must_not": fields
                .iter()
                .map(|field| compile_query(child, field, 1.0))
                .collect::<Vec<_>>()}}),
            other => match fields {
                [field] => compile_query(other, field, 1.0),
                _ => json!({"dis_max": {"queries": fields
                    .iter()
                    .map(|field| compile_query(other, field, 1.0))
                    .collect::<Vec<_>>()}}),
            },
        })
    }

    /// Content-type filter first, then the translated predicate if any.
    pub fn get_filters(&self) -> Result<Vec<Value>> {
        let mut filters = vec![json!({"match": {"content_type": self.base.mapping.content_type()}})];
        if let Some(filter) = self.base.translate_filters(&ClusterDialect)? {
            filters.push(filter);
        }
        Ok(filters)
    }

    pub fn get_query(&self) -> Result<Value> {
        let inner = self.get_inner_query()?;
        let mut filters = self.get_filters()?;
        Ok(match filters.len() {
            0 => inner,
            1 => json!({"bool": {"must": inner, "filter": filters.remove(0)}}),
            _ => json!({"bool": {"must": inner, "filter": filters}}),
        })
    }

    /// `None` when ordering by relevance; primary key descending when unordered.
    pub fn get_sort(&self) -> Result<Option<Value>> {
        if self.base.request.order_by_relevance {
            return Ok(None);
        }
        if self.base.request.ordering.is_empty() {
            return Ok(Some(json!([{"pk": "desc"}])));
        }

        let sort: Vec<Value> = self
            .base
            .order_by(false)?
            .into_iter()
            .map(|(descending, field)| {
                let column = self.base.mapping.field_column_name(field);
                json!({ column: if descending { "desc" } else { "asc" } })
            })
            .collect();
        Ok(Some(Value::Array(sort)))
    }

    pub fn compile(&self) -> Result<CompiledQuery> {
        Ok(CompiledQuery {
            model: self.base.request.model.clone(),
            query: self.get_query()?,
            sort: self.get_sort()?,
            filter_columns: self.base.filter_columns(),
        })
    }
}
