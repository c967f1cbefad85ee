// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query expression AST.
//!
//! Backend-agnostic representation of a full-text query. Compilers in
//! [`crate::backends`] translate it into cluster JSON DSL or SQLite FTS5 syntax.
//!
//! # Example
//!
//! ```rust
//! use search_bridge::query::{Operator, QueryBuilder, SearchQuery};
//!
//! // Simple text query
//! let query = SearchQuery::plain_text("rust programming");
//!
//! // Boolean combinations
//! let query = SearchQuery::phrase("hello world")
//!     .or(SearchQuery::fuzzy("helo"))
//!     .and(SearchQuery::plain_text("draft").negate());
//!
//! // Builder
//! let query = QueryBuilder::new()
//!     .plain_text_with("rust", Operator::And)
//!     .phrase("borrow checker")
//!     .build_and();
//! ```

use serde::{Deserialize, Serialize};

/// Boolean operator joining the terms of a text query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    And,
    #[default]
    Or,
}

impl Operator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search query AST node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchQuery {
    /// Matches every indexed object
    MatchAll,
    /// Whole-word match of each term, joined by `operator`
    PlainText { text: String, operator: Operator },
    /// Terms must appear adjacent and in order
    Phrase { text: String },
    /// Edit-distance tolerant match
    Fuzzy { text: String, operator: Operator },
    /// All children must match
    And(Vec<SearchQuery>),
    /// Any child may match
    Or(Vec<SearchQuery>),
    /// Child must not match
    Not(Box<SearchQuery>),
    /// Scales the score of the child. Nested boosts multiply.
    Boost { query: Box<SearchQuery>, factor: f64 },
}

impl SearchQuery {
    /// Plain text query with the default (`or`) operator
    pub fn plain_text(text: impl Into<String>) -> Self {
        Self::plain_text_with(text, Operator::default())
    }

    pub fn plain_text_with(text: impl Into<String>, operator: Operator) -> Self {
        SearchQuery::PlainText {
            text: text.into(),
            operator,
        }
    }

    pub fn phrase(text: impl Into<String>) -> Self {
        SearchQuery::Phrase { text: text.into() }
    }

    pub fn fuzzy(text: impl Into<String>) -> Self {
        Self::fuzzy_with(text, Operator::default())
    }

    pub fn fuzzy_with(text: impl Into<String>, operator: Operator) -> Self {
        SearchQuery::Fuzzy {
            text: text.into(),
            operator,
        }
    }

    /// Combine with AND
    pub fn and(self, other: SearchQuery) -> Self {
        SearchQuery::And(vec![self, other])
    }

    /// Combine with OR
    pub fn or(self, other: SearchQuery) -> Self {
        SearchQuery::Or(vec![self, other])
    }

    /// Negate query
    pub fn negate(self) -> Self {
        SearchQuery::Not(Box::new(self))
    }

    /// Wrap in a boost
    pub fn boost(self, factor: f64) -> Self {
        SearchQuery::Boost {
            query: Box::new(self),
            factor,
        }
    }

    /// Node name used in "not supported" errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SearchQuery::MatchAll => "MatchAll",
            SearchQuery::PlainText { .. } => "PlainText",
            SearchQuery::Phrase { .. } => "Phrase",
            SearchQuery::Fuzzy { .. } => "Fuzzy",
            SearchQuery::And(_) => "And",
            SearchQuery::Or(_) => "Or",
            SearchQuery::Not(_) => "Not",
            SearchQuery::Boost { .. } => "Boost",
        }
    }
}

/// What a caller hands to `search()`/`autocomplete()`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// Raw text, turned into `PlainText` with the requested or default operator
    Text(String),
    Query(SearchQuery),
    /// Deprecated: treated as `MatchAll` with a warning
    Null,
}

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        QueryInput::Text(text.to_string())
    }
}

impl From<String> for QueryInput {
    fn from(text: String) -> Self {
        QueryInput::Text(text)
    }
}

impl From<SearchQuery> for QueryInput {
    fn from(query: SearchQuery) -> Self {
        QueryInput::Query(query)
    }
}

impl From<Option<SearchQuery>> for QueryInput {
    fn from(query: Option<SearchQuery>) -> Self {
        query.map_or(QueryInput::Null, QueryInput::Query)
    }
}

/// Builder for compound queries
#[derive(Default)]
pub struct QueryBuilder {
    nodes: Vec<SearchQuery>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn plain_text(mut self, text: impl Into<String>) -> Self {
        self.nodes.push(SearchQuery::plain_text(text));
        self
    }

    pub fn plain_text_with(mut self, text: impl Into<String>, operator: Operator) -> Self {
        self.nodes.push(SearchQuery::plain_text_with(text, operator));
        self
    }

    pub fn phrase(mut self, text: impl Into<String>) -> Self {
        self.nodes.push(SearchQuery::phrase(text));
        self
    }

    pub fn fuzzy(mut self, text: impl Into<String>) -> Self {
        self.nodes.push(SearchQuery::fuzzy(text));
        self
    }

    pub fn exclude(mut self, query: SearchQuery) -> Self {
        self.nodes.push(query.negate());
        self
    }

    pub fn query(mut self, query: SearchQuery) -> Self {
        self.nodes.push(query);
        self
    }

    /// Build query with AND semantics (all constraints must match)
    pub fn build_and(self) -> SearchQuery {
        Self::build(self.nodes, SearchQuery::And)
    }

    /// Build query with OR semantics (any constraint can match)
    pub fn build_or(self) -> SearchQuery {
        Self::build(self.nodes, SearchQuery::Or)
    }

    fn build(mut nodes: Vec<SearchQuery>, combine: fn(Vec<SearchQuery>) -> SearchQuery) -> SearchQuery {
        match nodes.len() {
            // Empty builder matches everything
            0 => SearchQuery::MatchAll,
            1 => nodes.remove(0),
            _ => combine(nodes),
        }
    }
}
