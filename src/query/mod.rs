// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query inputs.
//!
//! - [`SearchQuery`]: full-text expression tree
//! - [`Predicate`] / [`OrderBy`]: relational filtering and ordering of the searched set
//! - [`QuerySet`]: model + store + predicate + ordering

pub mod expression;
pub mod predicate;
pub mod queryset;

pub use expression::{Operator, QueryBuilder, QueryInput, SearchQuery};
pub use predicate::{Connector, DatePart, Lookup, OrderBy, Predicate, PARENT_POINTER_SUFFIX};
pub use queryset::QuerySet;
