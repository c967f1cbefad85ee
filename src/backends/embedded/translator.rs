// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL Translator
//!
//! Translates queryset filters to parameterised SQLite WHERE fragments over
//! the JSON `document` column of `search_index_entry`.
//!
//! # SQL Syntax Generated
//!
//! ```sql
//! EXISTS (SELECT 1 FROM json_each(e.document, '$."genre_filter"') WHERE value = ?)   -- exact / in
//! json_extract(e.document, '$."genre_filter"') IS NULL                              -- isnull
//! instr(json_extract(e.document, '$."title_filter"'), ?) = 1                        -- prefix
//! json_extract(e.document, '$."pages_filter"') BETWEEN ? AND ?                      -- range
//! ```
//!
//! `json_each` over a scalar yields that scalar, so exact matches behave the
//! same for single values and to-many lists.

use serde_json::Value;

use crate::backends::compiler::FilterDialect;
use crate::error::{Result, SearchError};
use crate::query::Connector;

/// SQL fragment with parameterized placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    /// The fragment (without "WHERE" keyword)
    pub clause: String,
    /// The parameter values in order
    pub params: Vec<SqlParam>,
}

impl SqlQuery {
    pub fn new(clause: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            clause: clause.into(),
            params,
        }
    }

    fn literal(clause: &str) -> Self {
        Self::new(clause, Vec::new())
    }

    /// Render with inline values.
    ///
    /// Warning: Only use for debugging, not for actual queries (SQL injection risk)
    #[must_use]
    pub fn inline(&self) -> String {
        let mut result = self.clause.clone();
        for param in &self.params {
            let value = match param {
                SqlParam::Text(s) => format!("'{}'", s.replace('\'', "''")),
                SqlParam::Integer(n) => n.to_string(),
                SqlParam::Numeric(n) => n.to_string(),
                SqlParam::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            };
            result = result.replacen('?', &value, 1);
        }
        result
    }
}

/// SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Integer(i64),
    Numeric(f64),
    Boolean(bool),
}

impl SqlParam {
    /// Parameter for a JSON scalar. `None` for null.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(SqlParam::Boolean(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => SqlParam::Integer(i),
                None => SqlParam::Numeric(n.as_f64().unwrap_or_default()),
            }),
            Value::String(s) => Some(SqlParam::Text(s.clone())),
            other => Some(SqlParam::Text(other.to_string())),
        }
    }
}

/// JSON path of a document column
#[must_use]
pub fn json_path(column: &str) -> String {
    format!("$.\"{}\"", column.replace('"', "\"\"").replace('\'', "''"))
}

/// `json_extract` of a document column
#[must_use]
pub fn column_expr(column: &str) -> String {
    format!("json_extract(e.document, '{}')", json_path(column))
}

fn each_expr(column: &str, condition: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM json_each(e.document, '{}') WHERE value {condition})",
        json_path(column)
    )
}

fn required(value: &Value, lookup: &str) -> Result<SqlParam> {
    SqlParam::from_json(value)
        .ok_or_else(|| SearchError::Filter(format!("\"{lookup}\" lookup needs a non-null value.")))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Filters as SQLite fragments
pub struct SqliteDialect;

impl FilterDialect for SqliteDialect {
    type Filter = SqlQuery;

    fn process_lookup(&self, column: &str, lookup: &str, value: &Value) -> Result<Option<SqlQuery>> {
        let filter = match lookup {
            "exact" if value.is_null() => SqlQuery::literal(&format!("{} IS NULL", column_expr(column))),
            "exact" => SqlQuery::new(each_expr(column, "= ?"), vec![required(value, lookup)?]),
            "isnull" => {
                let test = if truthy(value) { "IS NULL" } else { "IS NOT NULL" };
                SqlQuery::literal(&format!("{} {test}", column_expr(column)))
            }
            "startswith" | "prefix" => SqlQuery::new(
                format!("instr({}, ?) = 1", column_expr(column)),
                vec![required(value, lookup)?],
            ),
            "gt" | "gte" | "lt" | "lte" => {
                let op = match lookup {
                    "gt" => ">",
                    "gte" => ">=",
                    "lt" => "<",
                    _ => "<=",
                };
                SqlQuery::new(format!("{} {op} ?", column_expr(column)), vec![required(value, lookup)?])
            }
            "range" => match value.as_array().map(Vec::as_slice) {
                Some([lower, upper]) => SqlQuery::new(
                    format!("{} BETWEEN ? AND ?", column_expr(column)),
                    vec![required(lower, lookup)?, required(upper, lookup)?],
                ),
                _ => {
                    return Err(SearchError::Filter(format!(
                        "\"range\" lookup needs a [lower, upper] pair, got {value}."
                    )))
                }
            },
            "in" => {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                let params: Vec<SqlParam> = items.iter().filter_map(SqlParam::from_json).collect();
                if params.is_empty() {
                    SqlQuery::literal("0 = 1")
                } else {
                    let placeholders = vec!["?"; params.len()].join(", ");
                    SqlQuery::new(each_expr(column, &format!("IN ({placeholders})")), params)
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(filter))
    }

    fn match_none(&self) -> SqlQuery {
        SqlQuery::literal("0 = 1")
    }

    fn connect_filters(&self, filters: Vec<SqlQuery>, connector: Connector, negated: bool) -> Option<SqlQuery> {
        let joined = match filters.len() {
            0 => return None,
            1 => filters.into_iter().next()?,
            _ => {
                let separator = match connector {
                    Connector::And => " AND ",
                    Connector::Or => " OR ",
                };
                let mut params = Vec::new();
                let parts: Vec<String> = filters
                    .into_iter()
                    .map(|filter| {
                        params.extend(filter.params);
                        filter.clause
                    })
                    .collect();
                SqlQuery::new(format!("({})", parts.join(separator)), params)
            }
        };

        Some(if negated {
            SqlQuery::new(format!("NOT ({})", joined.clause), joined.params)
        } else {
            joined
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(column: &str, lookup: &str, value: Value) -> SqlQuery {
        SqliteDialect.process_lookup(column, lookup, &value).unwrap().unwrap()
    }

    #[test]
    fn test_exact() {
        let sql = lookup("genre_filter", "exact", json!("fantasy"));
        assert_eq!(
            sql.clause,
            "EXISTS (SELECT 1 FROM json_each(e.document, '$.\"genre_filter\"') WHERE value = ?)"
        );
        assert_eq!(sql.params, vec![SqlParam::Text("fantasy".into())]);
    }

    #[test]
    fn test_exact_null_and_isnull() {
        assert_eq!(
            lookup("genre_filter", "exact", Value::Null).clause,
            "json_extract(e.document, '$.\"genre_filter\"') IS NULL"
        );
        assert_eq!(
            lookup("genre_filter", "isnull", json!(false)).clause,
            "json_extract(e.document, '$.\"genre_filter\"') IS NOT NULL"
        );
    }

    #[test]
    fn test_comparisons_and_range() {
        let sql = lookup("number_of_pages_filter", "gte", json!(300));
        assert_eq!(sql.clause, "json_extract(e.document, '$.\"number_of_pages_filter\"') >= ?");
        assert_eq!(sql.params, vec![SqlParam::Integer(300)]);

        let sql = lookup("publication_date_filter", "range", json!(["2000-01-01", "2010-12-31"]));
        assert_eq!(
            sql.inline(),
            "json_extract(e.document, '$.\"publication_date_filter\"') BETWEEN '2000-01-01' AND '2010-12-31'"
        );

        let err = SqliteDialect
            .process_lookup("x_filter", "range", &json!([1]))
            .unwrap_err();
        assert!(matches!(err, SearchError::Filter(_)));
    }

    #[test]
    fn test_prefix_is_case_sensitive_instr() {
        let sql = lookup("title_filter", "startswith", json!("The %"));
        assert_eq!(sql.clause, "instr(json_extract(e.document, '$.\"title_filter\"'), ?) = 1");
        assert_eq!(sql.params, vec![SqlParam::Text("The %".into())]);
    }

    #[test]
    fn test_in() {
        let sql = lookup("id_filter", "in", json!([1, 2, 3]));
        assert_eq!(
            sql.inline(),
            "EXISTS (SELECT 1 FROM json_each(e.document, '$.\"id_filter\"') WHERE value IN (1, 2, 3))"
        );
        assert_eq!(lookup("id_filter", "in", json!([])).clause, "0 = 1");
    }

    #[test]
    fn test_unknown_lookup() {
        assert!(SqliteDialect
            .process_lookup("x_filter", "contains", &json!("a"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_connect_filters() {
        let a = lookup("a_filter", "gt", json!(1));
        let b = lookup("b_filter", "lt", json!(2.5));
        let sql = SqliteDialect
            .connect_filters(vec![a.clone(), b], Connector::Or, true)
            .unwrap();
        assert_eq!(
            sql.inline(),
            "NOT ((json_extract(e.document, '$.\"a_filter\"') > 1 OR json_extract(e.document, '$.\"b_filter\"') < 2.5))"
        );
        assert_eq!(SqliteDialect.connect_filters(vec![a.clone()], Connector::And, false), Some(a));
        assert_eq!(SqliteDialect.connect_filters(Vec::new(), Connector::And, true), None);
    }

    #[test]
    fn test_json_path_quotes() {
        assert_eq!(json_path("it's"), "$.\"it''s\"");
    }
}
