use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::codec;

/// One indexed publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub primary_category: Option<String>,
    pub link: String,
    pub pdf_link: Option<String>,
    pub doi: Option<String>,
    /// ISO-8601, as the feed reported it.
    pub publication_date: Option<String>,
    pub source: String,
    pub date_fetched: DateTime<Utc>,
    pub predicted_category: Option<String>,
}

/// Row shape of the `publications` table.
#[derive(Debug, Clone, FromRow)]
pub struct PublicationRow {
    pub id: String,
    pub title: String,
    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Option<String>,
    pub categories: Option<String>,
    pub primary_category: Option<String>,
    pub link: String,
    pub pdf_link: Option<String>,
    pub doi: Option<String>,
    pub publication_date: Option<String>,
    pub source: String,
    pub date_fetched: DateTime<Utc>,
    pub predicted_category: Option<String>,
}

impl From<PublicationRow> for PublicationRecord {
    fn from(row: PublicationRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            abstract_text: row.abstract_text,
            authors: codec::decode_list(row.authors.as_deref()),
            categories: codec::decode_list(row.categories.as_deref()),
            primary_category: row.primary_category,
            link: row.link,
            pdf_link: row.pdf_link,
            doi: row.doi,
            publication_date: row.publication_date,
            source: row.source,
            date_fetched: row.date_fetched,
            predicted_category: row.predicted_category,
        }
    }
}
