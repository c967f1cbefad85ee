// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generic relational predicate tree.
//!
//! Object-store adapters describe the filtering and ordering of a queryset with
//! these types; search compilers translate them into backend filter clauses.
//! The tree mirrors ORM `WHERE` trees: leaf comparisons, AND/OR groups with a
//! negation flag, and an "always false" marker.
//!
//! ```text
//! Group(AND)
//!   ├─ Lookup(genre exact "fantasy")
//!   └─ Lookup(year(publication_date) gte 2001)
//! ```
//!
//! Sub-queries (`pk__in=<queryset>`) are materialized into a JSON array by the
//! store adapter before they reach this tree.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Suffix of the parent-pointer columns emitted by type-hierarchy joins.
/// Lookups on them carry no filter semantics and are dropped.
pub const PARENT_POINTER_SUFFIX: &str = "_ptr_id";

/// Boolean connector of a predicate group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// Date-part extraction applied to the left-hand side of a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatePart {
    Year,
    IsoYear,
    Quarter,
    Month,
    Week,
    WeekDay,
    IsoWeekDay,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    #[must_use]
    pub fn lookup_name(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::IsoYear => "iso_year",
            DatePart::Quarter => "quarter",
            DatePart::Month => "month",
            DatePart::Week => "week",
            DatePart::WeekDay => "week_day",
            DatePart::IsoWeekDay => "iso_week_day",
            DatePart::Day => "day",
            DatePart::Hour => "hour",
            DatePart::Minute => "minute",
            DatePart::Second => "second",
        }
    }
}

/// Leaf comparison: `<transform>(field) <lookup> value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    pub field: String,
    /// Lookup name (`exact`, `isnull`, `startswith`, `prefix`, `gt`, `gte`, `lt`,
    /// `lte`, `range`, `in`). Anything else is rejected by the compilers.
    pub lookup: String,
    pub value: Value,
    pub transform: Option<DatePart>,
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.transform {
            Some(part) => write!(
                f,
                "{}__{}__{} = {}",
                self.field,
                part.lookup_name(),
                self.lookup,
                self.value
            ),
            None => write!(f, "{}__{} = {}", self.field, self.lookup, self.value),
        }
    }
}

/// Predicate tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Lookup(Lookup),
    Group {
        connector: Connector,
        children: Vec<Predicate>,
        negated: bool,
    },
    /// Matches nothing (e.g. `pk__in=[]` short-circuited by the store)
    Nothing,
}

impl Predicate {
    pub fn lookup(field: impl Into<String>, lookup: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lookup(Lookup {
            field: field.into(),
            lookup: lookup.into(),
            value: value.into(),
            transform: None,
        })
    }

    pub fn exact(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::lookup(field, "exact", value)
    }

    /// Lookup against an extracted date part, e.g. `publication_date__year__gte`
    pub fn date_part(
        field: impl Into<String>,
        part: DatePart,
        lookup: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Predicate::Lookup(Lookup {
            field: field.into(),
            lookup: lookup.into(),
            value: value.into(),
            transform: Some(part),
        })
    }

    pub fn year(field: impl Into<String>, lookup: impl Into<String>, year: i32) -> Self {
        Self::date_part(field, DatePart::Year, lookup, year)
    }

    pub fn all(children: Vec<Predicate>) -> Self {
        Predicate::Group {
            connector: Connector::And,
            children,
            negated: false,
        }
    }

    pub fn any(children: Vec<Predicate>) -> Self {
        Predicate::Group {
            connector: Connector::Or,
            children,
            negated: false,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Self::all(vec![self, other])
    }

    pub fn or(self, other: Predicate) -> Self {
        Self::any(vec![self, other])
    }

    /// Negate. A group flips its flag; anything else is wrapped in a negated group.
    pub fn negate(self) -> Self {
        match self {
            Predicate::Group {
                connector,
                children,
                negated,
            } => Predicate::Group {
                connector,
                children,
                negated: !negated,
            },
            other => Predicate::Group {
                connector: Connector::And,
                children: vec![other],
                negated: true,
            },
        }
    }
}

/// One entry of a queryset ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBy {
    Field { name: String, descending: bool },
    /// Store-native ordering expression (e.g. `Lower("title")`); only backends that
    /// declare support for expressions accept it.
    Expression(String),
}

impl OrderBy {
    pub fn asc(name: impl Into<String>) -> Self {
        OrderBy::Field {
            name: name.into(),
            descending: false,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        OrderBy::Field {
            name: name.into(),
            descending: true,
        }
    }

    /// Parse `"title"` / `"-title"`
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(name) => Self::desc(name),
            None => Self::asc(spec),
        }
    }

    pub fn expression(expr: impl Into<String>) -> Self {
        OrderBy::Expression(expr.into())
    }
}

impl From<&str> for OrderBy {
    fn from(spec: &str) -> Self {
        Self::parse(spec)
    }
}

impl std::fmt::Display for OrderBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderBy::Field { name, descending: true } => write!(f, "-{name}"),
            OrderBy::Field { name, .. } => f.write_str(name),
            OrderBy::Expression(expr) => f.write_str(expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_display() {
        let pred = Predicate::lookup("title", "startswith", "Lord");
        match pred {
            Predicate::Lookup(lookup) => {
                assert_eq!(lookup.to_string(), "title__startswith = \"Lord\"");
            }
            _ => panic!("Expected Lookup node"),
        }
    }

    #[test]
    fn test_year_lookup_display() {
        let pred = Predicate::year("publication_date", "exact", 2020);
        match pred {
            Predicate::Lookup(lookup) => {
                assert_eq!(lookup.transform, Some(DatePart::Year));
                assert_eq!(lookup.to_string(), "publication_date__year__exact = 2020");
            }
            _ => panic!("Expected Lookup node"),
        }
    }

    #[test]
    fn test_negate_group_flips_flag() {
        let pred = Predicate::exact("a", 1).or(Predicate::exact("b", 2)).negate();
        match pred {
            Predicate::Group {
                connector, negated, ..
            } => {
                assert_eq!(connector, Connector::Or);
                assert!(negated);
            }
            _ => panic!("Expected Group node"),
        }
    }

    #[test]
    fn test_negate_leaf_wraps() {
        let pred = Predicate::exact("a", json!(null)).negate();
        match pred {
            Predicate::Group { children, negated, .. } => {
                assert!(negated);
                assert_eq!(children.len(), 1);
            }
            _ => panic!("Expected Group node"),
        }
    }

    #[test]
    fn test_order_by_parse() {
        assert_eq!(OrderBy::parse("-title"), OrderBy::desc("title"));
        assert_eq!(OrderBy::parse("title"), OrderBy::asc("title"));
        assert_eq!(OrderBy::desc("title").to_string(), "-title");
    }
}
