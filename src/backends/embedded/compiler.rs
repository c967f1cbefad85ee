// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query compiler for the embedded backend.
//!
//! Query expressions become one FTS5 MATCH expression scoped to the `body`
//! column (or `autocomplete`, with prefix tokens):
//!
//! ```text
//! PlainText("rust book", And)    body : ("rust" AND "book")
//! Phrase("borrow checker")       body : ("borrow checker")
//! And(a, Not(b))                 (a) NOT (b)
//! Not(a) at the top              e.id NOT IN (SELECT rowid ... MATCH a)
//! ```
//!
//! FTS5 has no unary NOT, so a negation may only appear next to a positive
//! sibling under `And`, or at the top of the query.

use super::translator::{column_expr, SqlParam, SqlQuery, SqliteDialect};
use crate::backends::compiler::{CompileRequest, CompilerMode, QueryCompiler};
use crate::error::{Result, SearchError};
use crate::index::ModelRegistry;
use crate::query::{Operator, SearchQuery};

pub const ENTRY_TABLE: &str = "search_index_entry";
pub const FTS_TABLE: &str = "search_index_fts";

/// FTS5 rendering of a query subtree
#[derive(Debug, Clone, PartialEq)]
pub enum Fts {
    /// Matches everything
    All,
    /// Matches nothing
    Nothing,
    Expr(String),
    /// Everything except the expression
    Not(String),
}

/// Split text into the words the `unicode61` tokenizer indexes
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn quote(token: &str) -> String {
    format!("\"{}\"", token.replace('"', "\"\""))
}

fn scoped(column: &str, expr: &str) -> String {
    format!("{column} : ({expr})")
}

fn join_operator(parts: &[String], operator: Operator) -> String {
    let separator = match operator {
        Operator::And => " AND ",
        Operator::Or => " OR ",
    };
    parts.join(separator)
}

/// Compiled SQL pieces
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    /// Label of the searched model
    pub model: String,
    /// `FROM ... WHERE ...` shared by fetch, count and facet
    pub from_where: SqlQuery,
    /// True when a MATCH is present and bm25 can rank
    pub ranked: bool,
    pub order_by: String,
    /// (field name, column) of every filterable field, for faceting
    pub filter_columns: Vec<(String, String)>,
}

impl CompiledSql {
    /// Select list expression for the relevance score
    #[must_use]
    pub fn score_expr(&self) -> String {
        if self.ranked {
            format!("-bm25({FTS_TABLE})")
        } else {
            "NULL".to_string()
        }
    }
}

/// Embedded compiler for search and autocomplete requests
pub struct EmbeddedCompiler<'a> {
    base: QueryCompiler<'a>,
    index_name: &'a str,
}

impl<'a> EmbeddedCompiler<'a> {
    pub fn new(registry: &'a ModelRegistry, request: &'a CompileRequest, index_name: &'a str) -> Result<Self> {
        Ok(Self {
            base: QueryCompiler::new(registry, request)?,
            index_name,
        })
    }

    /// Validate fields, filters and ordering, then make sure the query renders.
    pub fn check(&self) -> Result<()> {
        self.base.check(false)?;
        self.get_match().map(|_| ())
    }

    fn leaf(&self, query: &SearchQuery) -> Result<Fts> {
        let autocomplete = self.base.request.mode == CompilerMode::Autocomplete;
        let (column, tokens, operator) = match query {
            SearchQuery::PlainText { text, operator } => {
                let tokens: Vec<String> = tokenize(text)
                    .iter()
                    .map(|token| {
                        if autocomplete {
                            format!("{}*", quote(token))
                        } else {
                            quote(token)
                        }
                    })
                    .collect();
                let column = if autocomplete { "autocomplete" } else { "body" };
                (column, tokens, *operator)
            }
            SearchQuery::Phrase { text } => {
                let tokens = tokenize(text);
                if tokens.is_empty() {
                    return Ok(Fts::Nothing);
                }
                return Ok(Fts::Expr(scoped("body", &quote(&tokens.join(" ")))));
            }
            other => {
                return Err(SearchError::NotSupported(format!(
                    "`{}` is not supported by the embedded search backend.",
                    other.kind()
                )))
            }
        };

        if tokens.is_empty() {
            return Ok(Fts::Nothing);
        }
        Ok(Fts::Expr(scoped(column, &join_operator(&tokens, operator))))
    }

    /// Render a query subtree
    pub fn render(&self, query: &SearchQuery) -> Result<Fts> {
        if self.base.request.mode == CompilerMode::Autocomplete {
            return match query {
                SearchQuery::MatchAll => Ok(Fts::All),
                SearchQuery::PlainText { .. } => self.leaf(query),
                other => Err(SearchError::NotSupported(format!(
                    "`{}` is not supported for autocomplete queries.",
                    other.kind()
                ))),
            };
        }

        match query {
            SearchQuery::MatchAll => Ok(Fts::All),
            SearchQuery::PlainText { .. } | SearchQuery::Phrase { .. } | SearchQuery::Fuzzy { .. } => self.leaf(query),
            // Ranking ignores boosts
            SearchQuery::Boost { query, .. } => self.render(query),
            SearchQuery::Not(child) => Ok(match self.render(child)? {
                Fts::All => Fts::Nothing,
                Fts::Nothing => Fts::All,
                Fts::Expr(expr) => Fts::Not(expr),
                Fts::Not(expr) => Fts::Expr(expr),
            }),
            SearchQuery::And(children) => {
                let mut positive = Vec::new();
                let mut negative = Vec::new();
                for child in children {
                    match self.render(child)? {
                        Fts::Nothing => return Ok(Fts::Nothing),
                        Fts::All => {}
                        Fts::Expr(expr) => positive.push(format!("({expr})")),
                        Fts::Not(expr) => negative.push(format!("({expr})")),
                    }
                }
                Ok(match (positive.is_empty(), negative.is_empty()) {
                    (true, true) => Fts::All,
                    (true, false) => Fts::Not(negative.join(" OR ")),
                    (false, true) => Fts::Expr(positive.join(" AND ")),
                    (false, false) => Fts::Expr(format!(
                        "{} NOT ({})",
                        positive.join(" AND "),
                        negative.join(" OR ")
                    )),
                })
            }
            SearchQuery::Or(children) => {
                let mut parts = Vec::new();
                for child in children {
                    match self.render(child)? {
                        Fts::All => return Ok(Fts::All),
                        Fts::Nothing => {}
                        Fts::Expr(expr) => parts.push(format!("({expr})")),
                        Fts::Not(_) => {
                            return Err(SearchError::NotSupported(
                                "`Not` inside `Or` is not supported by the embedded search backend.".to_string(),
                            ))
                        }
                    }
                }
                Ok(if parts.is_empty() {
                    Fts::Nothing
                } else {
                    Fts::Expr(parts.join(" OR "))
                })
            }
        }
    }

    pub fn get_match(&self) -> Result<Fts> {
        self.render(&self.base.request.query)
    }

    /// Index scope, content type, full-text match and predicate
    pub fn get_from_where(&self) -> Result<(SqlQuery, bool)> {
        let fts = self.get_match()?;
        let ranked = matches!(fts, Fts::Expr(_));

        let mut params = vec![SqlParam::Text(self.index_name.to_string())];
        let mut clause = if ranked {
            format!("FROM {FTS_TABLE} JOIN {ENTRY_TABLE} e ON e.id = {FTS_TABLE}.rowid WHERE e.index_name = ?")
        } else {
            format!("FROM {ENTRY_TABLE} e WHERE e.index_name = ?")
        };

        clause.push_str(" AND EXISTS (SELECT 1 FROM json_each(e.content_types) WHERE value = ?)");
        params.push(SqlParam::Text(self.base.mapping.content_type()));

        match fts {
            Fts::All => {}
            Fts::Nothing => clause.push_str(" AND 0 = 1"),
            Fts::Expr(expr) => {
                clause.push_str(&format!(" AND {FTS_TABLE} MATCH ?"));
                params.push(SqlParam::Text(expr));
            }
            Fts::Not(expr) => {
                clause.push_str(&format!(
                    " AND e.id NOT IN (SELECT rowid FROM {FTS_TABLE} WHERE {FTS_TABLE} MATCH ?)"
                ));
                params.push(SqlParam::Text(expr));
            }
        }

        if let Some(filter) = self.base.translate_filters(&SqliteDialect)? {
            clause.push_str(&format!(" AND {}", filter.clause));
            params.extend(filter.params);
        }
        Ok((SqlQuery::new(clause, params), ranked))
    }

    /// ORDER BY list. Unranked relevance keeps index order.
    pub fn get_order_by(&self, ranked: bool) -> Result<String> {
        if self.base.request.order_by_relevance {
            return Ok(if ranked {
                format!("bm25({FTS_TABLE}), e.id")
            } else {
                "e.id".to_string()
            });
        }
        if self.base.request.ordering.is_empty() {
            return Ok("CAST(e.object_id AS INTEGER) DESC, e.object_id DESC".to_string());
        }

        let order: Vec<String> = self
            .base
            .order_by(false)?
            .into_iter()
            .map(|(descending, field)| {
                let column = column_expr(&self.base.mapping.field_column_name(field));
                format!("{column} {}", if descending { "DESC" } else { "ASC" })
            })
            .collect();
        Ok(order.join(", "))
    }

    pub fn compile(&self) -> Result<CompiledSql> {
        let (from_where, ranked) = self.get_from_where()?;
        Ok(CompiledSql {
            model: self.base.request.model.clone(),
            from_where,
            ranked,
            order_by: self.get_order_by(ranked)?,
            filter_columns: self.base.filter_columns(),
        })
    }
}
