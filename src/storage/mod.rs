//! Record store.
//!
//! [`RecordStore`] is the only thing the ingestion and query paths share.
//! Reads take a small typed [`Predicate`] instead of SQL text, so the set of
//! columns a caller can touch is fixed by [`Column`].

pub mod codec;
pub mod database;
pub mod models;

use async_trait::async_trait;
use thiserror::Error;

pub use database::SqliteStore;
pub use models::PublicationRecord;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database unavailable: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("transaction could not commit: {0}")]
    Transaction(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Columns reachable from predicates, ordering and distinct listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Title,
    Authors,
    Abstract,
    Categories,
    PrimaryCategory,
    PredictedCategory,
    PublicationDate,
}

impl Column {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Authors => "authors",
            Self::Abstract => "abstract",
            Self::Categories => "categories",
            Self::PrimaryCategory => "primary_category",
            Self::PredictedCategory => "predicted_category",
            Self::PublicationDate => "publication_date",
        }
    }
}

/// Row filter. `Contains` is a case-insensitive literal substring test.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    Contains { column: Column, needle: String },
    Any(Vec<Predicate>),
    Every(Vec<Predicate>),
}

impl Predicate {
    pub fn contains(column: Column, needle: impl Into<String>) -> Self {
        Self::Contains {
            column,
            needle: needle.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Column,
    pub direction: Direction,
    pub nulls_last: bool,
}

impl OrderBy {
    /// Newest first; undated records go to the end.
    pub fn newest_first() -> Self {
        Self {
            column: Column::PublicationDate,
            direction: Direction::Desc,
            nulls_last: true,
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or fully replace every record in one transaction.
    async fn upsert_many(&self, records: &[PublicationRecord]) -> StorageResult<u64>;

    async fn query(
        &self,
        predicate: &Predicate,
        order_by: OrderBy,
        limit: u32,
        offset: u64,
    ) -> StorageResult<Vec<PublicationRecord>>;

    /// Distinct non-null values of `column`, ascending.
    async fn distinct_values(&self, column: Column) -> StorageResult<Vec<String>>;

    async fn count(&self) -> StorageResult<u64>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    use super::{PublicationRecord, SqliteStore};

    pub fn record(id: &str, title: &str, date: Option<&str>, categories: &[&str]) -> PublicationRecord {
        let fetched: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        PublicationRecord {
            id: id.to_string(),
            title: title.to_string(),
            abstract_text: Some(format!("Abstract of {title}")),
            authors: vec!["Ada Lovelace".to_string()],
            categories: categories.iter().map(|c| c.to_string()).collect(),
            primary_category: None,
            link: format!("http://arxiv.org/abs/{id}"),
            pdf_link: None,
            doi: None,
            publication_date: date.map(str::to_string),
            source: "arxiv".to_string(),
            date_fetched: fetched,
            predicted_category: None,
        }
    }

    pub async fn temp_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("test.db").display());
        let store = SqliteStore::connect_with(&url, 2, Duration::from_secs(5))
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (dir, store)
    }
}
