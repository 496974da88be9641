//! Feed clients.
//!
//! A feed is pulled one page at a time. Every call yields a [`FeedPage`],
//! which is either the page's entries or the reason the call failed. The
//! ingestion loop treats a failure like an exhausted feed, but the tag is kept
//! so that policy can change without touching the clients.

pub mod arxiv;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::models::PublicationRecord;

pub use arxiv::ArxivClient;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("feed answered with status {0}")]
    Status(u16),

    #[error("feed is rate limiting requests")]
    RateLimited,

    #[error("malformed feed document: {0}")]
    Decode(String),
}

impl From<quick_xml::Error> for FetchError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    SubmittedDate,
    LastUpdatedDate,
    Relevance,
}

impl SortField {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Self::SubmittedDate => "submittedDate",
            Self::LastUpdatedDate => "lastUpdatedDate",
            Self::Relevance => "relevance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for FeedSort {
    fn default() -> Self {
        Self {
            field: SortField::SubmittedDate,
            direction: SortDirection::Descending,
        }
    }
}

/// One entry as it came off the wire. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub link: Option<String>,
    pub pdf_link: Option<String>,
    pub doi: Option<String>,
}

impl RawEntry {
    /// Map to a storable record. Returns `None` when the entry has no id,
    /// since such an entry cannot be keyed.
    pub fn normalize(self, source: &str, fetched_at: DateTime<Utc>) -> Option<PublicationRecord> {
        let raw_id = self.id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        let id = short_id(raw_id).to_string();
        let link = self.link.unwrap_or_else(|| raw_id.to_string());

        Some(PublicationRecord {
            id,
            title: self.title.as_deref().map(collapse_whitespace).unwrap_or_default(),
            abstract_text: self
                .summary
                .as_deref()
                .map(collapse_whitespace)
                .filter(|s| !s.is_empty()),
            authors: clean_list(self.authors),
            categories: clean_list(self.categories),
            primary_category: non_blank(self.primary_category),
            link,
            pdf_link: non_blank(self.pdf_link),
            doi: non_blank(self.doi),
            publication_date: non_blank(self.published),
            source: source.to_string(),
            date_fetched: fetched_at,
            predicted_category: None,
        })
    }
}

/// Result of a single feed call.
#[derive(Debug)]
pub enum FeedPage {
    Page {
        entries: Vec<PublicationRecord>,
        /// Entries on the wire, counting any dropped during normalization.
        /// Paging decisions use this, not `entries.len()`.
        received: usize,
    },
    Failure(FetchError),
}

impl FeedPage {
    /// Entries of the page; a failed call reads as an empty page.
    pub fn entries(&self) -> &[PublicationRecord] {
        match self {
            Self::Page { entries, .. } => entries,
            Self::Failure(_) => &[],
        }
    }

    pub fn into_entries(self) -> Vec<PublicationRecord> {
        match self {
            Self::Page { entries, .. } => entries,
            Self::Failure(_) => Vec::new(),
        }
    }

    /// Wire entry count; zero for a failed call.
    pub fn received(&self) -> usize {
        match self {
            Self::Page { received, .. } => *received,
            Self::Failure(_) => 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Name stored in each record's `source` column.
    fn source_name(&self) -> &str;

    async fn fetch_page(&self, offset: u32, page_size: u32, sort: FeedSort) -> FeedPage;
}

fn short_id(id: &str) -> &str {
    ["http://arxiv.org/abs/", "https://arxiv.org/abs/"]
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix))
        .unwrap_or(id)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| collapse_whitespace(&item))
        .filter(|item| !item.is_empty())
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
