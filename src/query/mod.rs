//! Filtered, paginated reads over the record store.
//!
//! A request combines an optional free-text term (matched against title,
//! authors and abstract) with an optional set of category filters (any one
//! must match). Results are always newest first with undated records last.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::storage::{codec, Column, OrderBy, Predicate, PublicationRecord, RecordStore, StorageError};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub search_term: String,
    pub category_filters: Vec<String>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl QueryRequest {
    pub fn new(search_term: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self {
            search_term: search_term.into(),
            category_filters: Vec::new(),
            page,
            page_size,
        }
    }

    /// Set the category filters, dropping blanks and repeats.
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        self.category_filters = filters
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .collect();
        self
    }

    /// Set the filters from a comma-separated list such as `"cs.AI,cs.LG"`.
    pub fn with_filter_list(self, raw: &str) -> Self {
        self.with_filters(raw.split(','))
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// `max_page_size` is an optional deployment cap; without one any
    /// positive limit is accepted.
    pub fn validate(&self, max_page_size: Option<u32>) -> Result<(), QueryError> {
        if self.page < 1 {
            return Err(QueryError::Validation("page must be at least 1".to_string()));
        }
        if self.page_size < 1 {
            return Err(QueryError::Validation("limit must be positive".to_string()));
        }
        if let Some(max) = max_page_size.filter(|max| self.page_size > *max) {
            return Err(QueryError::Validation(format!("limit must not exceed {max}")));
        }
        Ok(())
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub records: Vec<PublicationRecord>,
    pub page: u32,
    pub page_size: u32,
    /// True when the page came back full. A result set that ends exactly on
    /// a page boundary reports `true` once more before an empty page.
    pub has_more: bool,
}

/// Build the row filter for a request.
pub fn build_predicate(request: &QueryRequest) -> Predicate {
    // Blank terms mean no text filter; others are matched exactly as given.
    let term = request.search_term.as_str();
    let text = (!term.trim().is_empty()).then(|| {
        Predicate::Any(vec![
            Predicate::contains(Column::Title, term),
            Predicate::contains(Column::Authors, term),
            Predicate::contains(Column::Abstract, term),
        ])
    });

    let categories = (!request.category_filters.is_empty()).then(|| {
        Predicate::Any(
            request
                .category_filters
                .iter()
                .map(|f| Predicate::contains(Column::Categories, f.as_str()))
                .collect(),
        )
    });

    match (text, categories) {
        (Some(text), Some(categories)) => Predicate::Every(vec![text, categories]),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => Predicate::All,
    }
}

/// Split stored category strings into a sorted, de-duplicated vocabulary.
pub fn category_vocabulary<I, S>(stored: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    stored
        .into_iter()
        .flat_map(|value| codec::decode_list(Some(value.as_ref())))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    max_page_size: Option<u32>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            max_page_size: None,
        }
    }

    pub fn with_max_page_size(mut self, max_page_size: Option<u32>) -> Self {
        self.max_page_size = max_page_size;
        self
    }

    pub async fn search(&self, request: &QueryRequest) -> Result<SearchPage, QueryError> {
        request.validate(self.max_page_size)?;

        let predicate = build_predicate(request);
        debug!(?predicate, page = request.page, limit = request.limit(), "running search");

        let records = self
            .store
            .query(&predicate, OrderBy::newest_first(), request.limit(), request.offset())
            .await?;

        let has_more = records.len() == request.page_size as usize;
        Ok(SearchPage {
            records,
            page: request.page,
            page_size: request.page_size,
            has_more,
        })
    }

    /// Every category tag present in the store, ascending.
    pub async fn categories(&self) -> Result<Vec<String>, QueryError> {
        let stored = self.store.distinct_values(Column::Categories).await?;
        Ok(category_vocabulary(stored))
    }

    /// Distinct values of a single-label column such as `primary_category`.
    pub async fn distinct(&self, column: Column) -> Result<Vec<String>, QueryError> {
        Ok(self.store.distinct_values(column).await?)
    }
}
