// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend-independent half of query compilation.
//!
//! [`QueryCompiler`] resolves a [`CompileRequest`] against the model registry:
//! it validates the requested fields, walks the predicate tree through a
//! backend [`FilterDialect`] and resolves the requested ordering to filterable
//! fields. Backends build their native query from the pieces.
//!
//! # Year rewrite
//!
//! ```text
//! year(d) exact 2020  →  d >= 2020-01-01 AND d < 2021-01-01
//! year(d) gte 2020    →  d >= 2020-01-01
//! year(d) gt 2020     →  d >= 2021-01-01
//! year(d) lte 2020    →  d <  2021-01-01
//! year(d) lt 2020     →  d <  2020-01-01
//! ```

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::{Result, SearchError};
use crate::index::{IndexField, ModelMapping, ModelRegistry, ModelSpec};
use crate::query::{Connector, DatePart, Lookup, OrderBy, Predicate, SearchQuery, PARENT_POINTER_SUFFIX};

/// Which compiler a request is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompilerMode {
    #[default]
    Search,
    Autocomplete,
}

/// Everything a backend needs to compile one search call
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Label of the searched model
    pub model: String,
    pub predicate: Option<Predicate>,
    pub ordering: Vec<OrderBy>,
    pub query: SearchQuery,
    /// Restrict matching to these field names
    pub fields: Option<Vec<String>>,
    pub order_by_relevance: bool,
    pub mode: CompilerMode,
}

/// Backend rendering of filter clauses
pub trait FilterDialect {
    type Filter;

    /// Render one comparison against a resolved column. `Ok(None)` means the
    /// lookup is not recognised.
    fn process_lookup(&self, column: &str, lookup: &str, value: &Value) -> Result<Option<Self::Filter>>;

    /// Clause matching no document
    fn match_none(&self) -> Self::Filter;

    /// Join already translated children. `None` when there is nothing to join.
    fn connect_filters(
        &self,
        filters: Vec<Self::Filter>,
        connector: Connector,
        negated: bool,
    ) -> Option<Self::Filter>;
}

/// Accepts every lookup and renders nothing; used by [`QueryCompiler::check`].
struct CheckOnly;

impl FilterDialect for CheckOnly {
    type Filter = ();

    fn process_lookup(&self, _column: &str, _lookup: &str, _value: &Value) -> Result<Option<()>> {
        Ok(Some(()))
    }

    fn match_none(&self) {}

    fn connect_filters(&self, _filters: Vec<()>, _connector: Connector, _negated: bool) -> Option<()> {
        None
    }
}

/// Shared compiler state bound to one request
pub struct QueryCompiler<'a> {
    pub registry: &'a ModelRegistry,
    pub request: &'a CompileRequest,
    pub mapping: ModelMapping<'a>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(registry: &'a ModelRegistry, request: &'a CompileRequest) -> Result<Self> {
        let mapping = ModelMapping::new(registry, &request.model)?;
        Ok(Self {
            registry,
            request,
            mapping,
        })
    }

    #[must_use]
    pub fn model(&self) -> &'a ModelSpec {
        self.mapping.model()
    }

    pub fn searchable_fields(&self) -> Vec<&'a IndexField> {
        self.registry.searchable_fields(&self.request.model)
    }

    pub fn autocomplete_fields(&self) -> Vec<&'a IndexField> {
        self.registry.autocomplete_fields(&self.request.model)
    }

    /// Filterable field declared under `name`, own or inherited.
    #[must_use]
    pub fn filterable_field(&self, name: &str) -> Option<&'a IndexField> {
        self.registry
            .filterable_fields(&self.request.model)
            .into_iter()
            .find(|field| field.name == name)
    }

    /// Distinct boosts of the searchable fields of the model and every indexed
    /// subtype, in registration order.
    #[must_use]
    pub fn hierarchy_boosts(&self) -> Vec<f64> {
        self.registry.hierarchy_boosts(&self.request.model)
    }

    /// Validate the request without rendering anything: field subset, every
    /// filter predicate and every ordering entry.
    pub fn check(&self, handles_order_by_expressions: bool) -> Result<()> {
        if let Some(fields) = &self.request.fields {
            let allowed = match self.request.mode {
                CompilerMode::Search => self.searchable_fields(),
                CompilerMode::Autocomplete => self.autocomplete_fields(),
            };
            for field_name in fields {
                if !allowed.iter().any(|field| &field.name == field_name) {
                    return Err(SearchError::SearchField {
                        field_name: field_name.clone(),
                        model: self.model().name.clone(),
                    });
                }
            }
        }

        self.translate_filters(&CheckOnly)?;
        self.order_by(handles_order_by_expressions)?;
        Ok(())
    }

    /// Translate the queryset predicate through `dialect`.
    pub fn translate_filters<D: FilterDialect>(&self, dialect: &D) -> Result<Option<D::Filter>> {
        match &self.request.predicate {
            Some(predicate) => self.filters_from_predicate(predicate, dialect),
            None => Ok(None),
        }
    }

    fn filters_from_predicate<D: FilterDialect>(
        &self,
        predicate: &Predicate,
        dialect: &D,
    ) -> Result<Option<D::Filter>> {
        match predicate {
            Predicate::Lookup(lookup) => self.filter_from_lookup(lookup, dialect),
            Predicate::Nothing => Ok(Some(dialect.match_none())),
            Predicate::Group {
                connector,
                children,
                negated,
            } => {
                let mut filters = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(filter) = self.filters_from_predicate(child, dialect)? {
                        filters.push(filter);
                    }
                }
                Ok(dialect.connect_filters(filters, *connector, *negated))
            }
        }
    }

    fn filter_from_lookup<D: FilterDialect>(&self, lookup: &Lookup, dialect: &D) -> Result<Option<D::Filter>> {
        // Parent pointers carry no filter semantics
        if lookup.field.ends_with(PARENT_POINTER_SUFFIX) {
            return Ok(None);
        }

        match lookup.transform {
            None => self
                .process_filter(&lookup.field, &lookup.lookup, &lookup.value, dialect)
                .map(Some),
            Some(DatePart::Year) => {
                let year = parse_year(&lookup.value)?;
                let (name, value) = match lookup.lookup.as_str() {
                    "gte" => ("gte", year_start(year)?),
                    "gt" => ("gte", year_start(year + 1)?),
                    "lte" => ("lt", year_start(year + 1)?),
                    "lt" => ("lt", year_start(year)?),
                    "exact" => {
                        let from = self.process_filter(&lookup.field, "gte", &year_start(year)?, dialect)?;
                        let to = self.process_filter(&lookup.field, "lt", &year_start(year + 1)?, dialect)?;
                        return Ok(dialect.connect_filters(vec![from, to], Connector::And, false));
                    }
                    _ => {
                        return Err(SearchError::Filter(
                            "\"year\" queries are not supported.".to_string(),
                        ))
                    }
                };
                self.process_filter(&lookup.field, name, &value, dialect).map(Some)
            }
            Some(part) => Err(SearchError::Filter(format!(
                "\"{}\" queries are not supported.",
                part.lookup_name()
            ))),
        }
    }

    fn process_filter<D: FilterDialect>(
        &self,
        field_name: &str,
        lookup: &str,
        value: &Value,
        dialect: &D,
    ) -> Result<D::Filter> {
        let field = self
            .filterable_field(field_name)
            .ok_or_else(|| SearchError::FilterField {
                field_name: field_name.to_string(),
                model: self.model().name.clone(),
            })?;
        let column = self.mapping.field_column_name(field);

        dialect.process_lookup(&column, lookup, value)?.ok_or_else(|| {
            SearchError::Filter(format!(
                "\"{field_name}__{lookup} = {value}\". Lookup \"{lookup}\" not recognised."
            ))
        })
    }

    /// Requested ordering as (descending, field) pairs. Empty when ordering by relevance.
    pub fn order_by(&self, handles_expressions: bool) -> Result<Vec<(bool, &'a IndexField)>> {
        if self.request.order_by_relevance {
            return Ok(Vec::new());
        }

        let mut resolved = Vec::with_capacity(self.request.ordering.len());
        for entry in &self.request.ordering {
            match entry {
                OrderBy::Expression(expr) => {
                    if handles_expressions {
                        continue;
                    }
                    return Err(SearchError::OrderByField {
                        field_name: expr.clone(),
                        model: self.model().name.clone(),
                    });
                }
                OrderBy::Field { name, descending } => {
                    let field = self
                        .filterable_field(name)
                        .ok_or_else(|| SearchError::OrderByField {
                            field_name: name.clone(),
                            model: self.model().name.clone(),
                        })?;
                    resolved.push((*descending, field));
                }
            }
        }
        Ok(resolved)
    }

    /// Column names of the filterable fields, keyed by field name. Captured by
    /// executors that facet after compilation.
    #[must_use]
    pub fn filter_columns(&self) -> Vec<(String, String)> {
        self.registry
            .filterable_fields(&self.request.model)
            .into_iter()
            .map(|field| (field.name.clone(), self.mapping.field_column_name(field)))
            .collect()
    }
}

fn parse_year(value: &Value) -> Result<i32> {
    let year = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    year.and_then(|y| i32::try_from(y).ok())
        .ok_or_else(|| SearchError::Filter(format!("\"{value}\" is not a valid year.")))
}

fn year_start(year: i32) -> Result<Value> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
        .ok_or_else(|| SearchError::Filter(format!("year {year} is out of range.")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AttributeKind, ModelSpec};
    use serde_json::json;

    /// Renders filters as readable strings
    struct Debugging;

    impl FilterDialect for Debugging {
        type Filter = String;

        fn process_lookup(&self, column: &str, lookup: &str, value: &Value) -> Result<Option<String>> {
            Ok(match lookup {
                "exact" | "gte" | "lt" | "gt" | "lte" | "in" => Some(format!("{column} {lookup} {value}")),
                _ => None,
            })
        }

        fn match_none(&self) -> String {
            "NOTHING".into()
        }

        fn connect_filters(&self, filters: Vec<String>, connector: Connector, negated: bool) -> Option<String> {
            if filters.is_empty() {
                return None;
            }
            let joined = if filters.len() == 1 {
                filters.into_iter().next()?
            } else {
                format!("({})", filters.join(&format!(" {} ", connector.as_str())))
            };
            Some(if negated { format!("NOT {joined}") } else { joined })
        }
    }

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry
            .register(
                ModelSpec::new("searchtests", "Book")
                    .attribute("title", AttributeKind::Char)
                    .attribute("author", AttributeKind::Char)
                    .attribute("publication_date", AttributeKind::Date)
                    .attribute("number_of_pages", AttributeKind::Integer)
                    .search_field(IndexField::search("title").boost(2.0))
                    .search_field(IndexField::filter("publication_date"))
                    .search_field(IndexField::filter("number_of_pages")),
            )
            .unwrap();
        registry
            .register(
                ModelSpec::new("searchtests", "Novel")
                    .parent("searchtests.Book")
                    .attribute("setting", AttributeKind::Text)
                    .search_field(IndexField::search("setting").boost(1.5)),
            )
            .unwrap();
        registry
    }

    fn request(predicate: Option<Predicate>) -> CompileRequest {
        CompileRequest {
            model: "searchtests.Book".into(),
            predicate,
            ordering: Vec::new(),
            query: SearchQuery::MatchAll,
            fields: None,
            order_by_relevance: true,
            mode: CompilerMode::Search,
        }
    }

    fn translate(predicate: Predicate) -> Result<Option<String>> {
        let registry = registry();
        let req = request(Some(predicate));
        let compiler = QueryCompiler::new(&registry, &req)?;
        compiler.translate_filters(&Debugging)
    }

    #[test]
    fn test_year_exact_becomes_half_open_range() {
        let out = translate(Predicate::year("publication_date", "exact", 2020)).unwrap();
        assert_eq!(
            out.as_deref(),
            Some("(publication_date_filter gte \"2020-01-01\" AND publication_date_filter lt \"2021-01-01\")")
        );
    }

    #[test]
    fn test_year_comparisons() {
        let cases = [
            ("gte", "publication_date_filter gte \"2020-01-01\""),
            ("gt", "publication_date_filter gte \"2021-01-01\""),
            ("lte", "publication_date_filter lt \"2021-01-01\""),
            ("lt", "publication_date_filter lt \"2020-01-01\""),
        ];
        for (lookup, expected) in cases {
            let out = translate(Predicate::year("publication_date", lookup, 2020)).unwrap();
            assert_eq!(out.as_deref(), Some(expected), "lookup {lookup}");
        }
    }

    #[test]
    fn test_non_year_date_part_is_rejected() {
        let err = translate(Predicate::date_part("publication_date", DatePart::Month, "exact", 3)).unwrap_err();
        assert!(err.to_string().contains("\"month\" queries are not supported"));
    }

    #[test]
    fn test_unfilterable_field_names_field() {
        let err = translate(Predicate::exact("title", "x")).unwrap_err();
        assert_eq!(err.field_name(), Some("title"));
        assert!(matches!(err, SearchError::FilterField { .. }));
    }

    #[test]
    fn test_unknown_lookup_is_not_recognised() {
        let err = translate(Predicate::lookup("number_of_pages", "regex", ".*")).unwrap_err();
        assert!(err.to_string().contains("Lookup \"regex\" not recognised"));
    }

    #[test]
    fn test_parent_pointer_fields_are_ignored() {
        let out = translate(
            Predicate::exact("book_ptr_id", 3).and(Predicate::exact("number_of_pages", 100)),
        )
        .unwrap();
        assert_eq!(out.as_deref(), Some("number_of_pages_filter exact 100"));
    }

    #[test]
    fn test_nothing_and_negation() {
        let out = translate(Predicate::Nothing.or(Predicate::exact("number_of_pages", 1)).negate()).unwrap();
        assert_eq!(out.as_deref(), Some("NOT (NOTHING OR number_of_pages_filter exact 1)"));
    }

    #[test]
    fn test_check_rejects_unknown_search_field() {
        let registry = registry();
        let mut req = request(None);
        req.fields = Some(vec!["title".into(), "author".into()]);
        let err = QueryCompiler::new(&registry, &req).unwrap().check(false).unwrap_err();
        assert!(matches!(err, SearchError::SearchField { .. }));
        assert_eq!(err.field_name(), Some("author"));
    }

    #[test]
    fn test_check_rejects_unfilterable_order() {
        let registry = registry();
        let mut req = request(None);
        req.order_by_relevance = false;
        req.ordering = vec![OrderBy::parse("-title")];
        let err = QueryCompiler::new(&registry, &req).unwrap().check(false).unwrap_err();
        assert!(matches!(err, SearchError::OrderByField { .. }));
        assert_eq!(err.field_name(), Some("title"));
    }

    #[test]
    fn test_order_expressions_need_backend_support() {
        let registry = registry();
        let mut req = request(None);
        req.order_by_relevance = false;
        req.ordering = vec![OrderBy::expression("Lower(title)"), OrderBy::asc("number_of_pages")];
        let compiler = QueryCompiler::new(&registry, &req).unwrap();
        assert!(compiler.order_by(false).is_err());
        let resolved = compiler.order_by(true).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1.name, "number_of_pages");
    }

    #[test]
    fn test_relevance_ignores_ordering() {
        let registry = registry();
        let mut req = request(None);
        req.ordering = vec![OrderBy::asc("title")];
        let compiler = QueryCompiler::new(&registry, &req).unwrap();
        assert!(compiler.order_by(false).unwrap().is_empty());
    }

    #[test]
    fn test_hierarchy_boosts_include_subtypes() {
        let registry = registry();
        let req = request(None);
        let compiler = QueryCompiler::new(&registry, &req).unwrap();
        assert_eq!(compiler.hierarchy_boosts(), vec![2.0, 1.5]);
    }

    #[test]
    fn test_year_from_string_value() {
        let out = translate(Predicate::date_part("publication_date", DatePart::Year, "gte", json!("1999"))).unwrap();
        assert_eq!(out.as_deref(), Some("publication_date_filter gte \"1999-01-01\""));
    }
}
