// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for search-bridge.
//!
//! Configuration errors (`SearchField`, `FilterField`, `OrderByField`,
//! `FacetField`, `Filter`, `NotSupported`, `Configuration`) are raised by query validation before any
//! backend call is made. Collaborator failures (`Transport`, `Store`, `Sql`) are
//! passed through unchanged.

use thiserror::Error;

use crate::backends::cluster::transport::TransportError;
use crate::storage::traits::StoreError;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Cannot search with field \"{field_name}\". Please add SearchField(\"{field_name}\") to the search fields of {model}.")]
    SearchField { field_name: String, model: String },

    #[error("Cannot filter search results with field \"{field_name}\". Please add FilterField(\"{field_name}\") to the search fields of {model}.")]
    FilterField { field_name: String, model: String },

    #[error("Cannot sort search results with field \"{field_name}\". Please add FilterField(\"{field_name}\") to the search fields of {model}.")]
    OrderByField { field_name: String, model: String },

    #[error("Cannot facet search results with field \"{field_name}\". Please add FilterField(\"{field_name}\") to the search fields of {model}.")]
    FacetField { field_name: String, model: String },

    #[error("Could not apply filter on search results: {0}")]
    Filter(String),

    #[error("{0}")]
    NotSupported(String),

    #[error("Search backend configuration is invalid: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

impl SearchError {
    /// Name of the offending field for the field-level configuration errors.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::SearchField { field_name, .. }
            | Self::FilterField { field_name, .. }
            | Self::OrderByField { field_name, .. }
            | Self::FacetField { field_name, .. } => Some(field_name),
            _ => None,
        }
    }

    /// True for errors raised while validating or compiling a query.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Store(_) | Self::Sql(_))
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_names_field_and_fix() {
        let err = SearchError::FilterField {
            field_name: "genre".into(),
            model: "tests.Book".into(),
        };
        assert_eq!(err.field_name(), Some("genre"));
        let msg = err.to_string();
        assert!(msg.contains("\"genre\""));
        assert!(msg.contains("FilterField(\"genre\")"));
        assert!(msg.contains("tests.Book"));
    }

    #[test]
    fn test_transport_errors_are_not_configuration() {
        let err = SearchError::Transport(TransportError::NotFound("idx".into()));
        assert!(!err.is_configuration());
        assert!(SearchError::Filter("x".into()).is_configuration());
    }
}
