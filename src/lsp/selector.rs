// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Document selector: which editor documents are in scope for the server.

use lsp_types::Uri;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One `(scheme, language)` filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// URI scheme, e.g. `file` or `untitled`.
    pub scheme: String,
    /// Language identifier, e.g. `javascript`.
    pub language: String,
}

impl DocumentFilter {
    /// Creates a filter.
    pub fn new(scheme: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            language: language.into(),
        }
    }

    /// Exact scheme equality and exact language-id equality.
    #[must_use]
    pub fn matches(&self, scheme: &str, language_id: &str) -> bool {
        self.scheme == scheme && self.language == language_id
    }
}

/// A set of filters combined by logical OR.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSelector {
    filters: HashSet<DocumentFilter>,
}

impl DocumentSelector {
    /// Creates an empty selector. An empty selector matches nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter.
    pub fn insert(&mut self, filter: DocumentFilter) {
        self.filters.insert(filter);
    }

    /// Returns true if any filter matches the scheme and language id.
    #[must_use]
    pub fn matches(&self, scheme: &str, language_id: &str) -> bool {
        self.filters.iter().any(|f| f.matches(scheme, language_id))
    }

    /// Returns true if any filter matches the document.
    #[must_use]
    pub fn matches_document(&self, uri: &Uri, language_id: &str) -> bool {
        uri_scheme(uri).is_some_and(|scheme| self.matches(scheme, language_id))
    }

    /// Number of distinct filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns true if the selector has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FromIterator<DocumentFilter> for DocumentSelector {
    fn from_iter<I: IntoIterator<Item = DocumentFilter>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

/// Extracts the scheme of a URI (the part before the first `:`).
#[must_use]
pub fn uri_scheme(uri: &Uri) -> Option<&str> {
    uri.as_str()
        .split_once(':')
        .map(|(scheme, _)| scheme)
        .filter(|scheme| !scheme.is_empty())
}
