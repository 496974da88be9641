use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use super::{FeedPage, FeedSort, FeedSource, FetchError, RawEntry};
use crate::config::FeedConfig;

pub const SOURCE_NAME: &str = "arxiv";

/// Client for the arXiv Atom query API.
pub struct ArxivClient {
    client: Client,
    base_url: String,
    search_query: String,
}

impl ArxivClient {
    pub fn new(config: &FeedConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            search_query: config.search_query.clone(),
        })
    }

    async fn try_fetch(
        &self,
        offset: u32,
        page_size: u32,
        sort: FeedSort,
    ) -> Result<FeedPage, FetchError> {
        let start = offset.to_string();
        let max_results = page_size.to_string();

        debug!(url = %self.base_url, offset, page_size, "querying arXiv");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", self.search_query.as_str()),
                ("start", start.as_str()),
                ("max_results", max_results.as_str()),
                ("sortBy", sort.field.as_query_value()),
                ("sortOrder", sort.direction.as_query_value()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        if body.contains("Rate exceeded") {
            return Err(FetchError::RateLimited);
        }

        let fetched_at = Utc::now();
        let raw_entries = parse_feed(&body)?;
        let received = raw_entries.len();
        let mut records = Vec::with_capacity(received);
        for raw in raw_entries {
            let atom_id = raw.id.clone();
            match raw.normalize(SOURCE_NAME, fetched_at) {
                Some(record) => records.push(record),
                None => warn!(?atom_id, "skipping feed entry without an id"),
            }
        }

        info!(offset, received, kept = records.len(), "arXiv page fetched");
        Ok(FeedPage::Page {
            entries: records,
            received,
        })
    }
}

#[async_trait]
impl FeedSource for ArxivClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_page(&self, offset: u32, page_size: u32, sort: FeedSort) -> FeedPage {
        match self.try_fetch(offset, page_size, sort).await {
            Ok(page) => page,
            Err(err) => {
                warn!(offset, error = %err, "arXiv fetch failed");
                FeedPage::Failure(err)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TextField {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
    Doi,
}

/// Parse an Atom document into raw entries. Element names are matched on
/// their local part, so the `arxiv:` extension elements need no namespace
/// handling.
pub fn parse_feed(xml: &str) -> Result<Vec<RawEntry>, FetchError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut in_author = false;
    let mut field: Option<TextField> = None;
    let mut buffer = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if current.is_none() {
                    if e.local_name().as_ref() == b"entry" {
                        current = Some(RawEntry::default());
                    }
                    continue;
                }
                field = match e.local_name().as_ref() {
                    b"author" => {
                        in_author = true;
                        None
                    }
                    b"name" if in_author => Some(TextField::AuthorName),
                    b"id" => Some(TextField::Id),
                    b"title" => Some(TextField::Title),
                    b"summary" => Some(TextField::Summary),
                    b"published" => Some(TextField::Published),
                    b"doi" => Some(TextField::Doi),
                    _ => {
                        if let Some(entry) = current.as_mut() {
                            read_attributes(&e, entry)?;
                        }
                        None
                    }
                };
                buffer.clear();
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    read_attributes(&e, entry)?;
                }
            }
            Event::Text(t) => {
                if field.is_some() {
                    let text = t.unescape().map_err(|e| FetchError::Decode(e.to_string()))?;
                    buffer.push_str(&text);
                }
            }
            Event::CData(c) => {
                if field.is_some() {
                    buffer.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            check_api_error(&entry)?;
                            entries.push(entry);
                        }
                    }
                    b"author" => in_author = false,
                    _ => {
                        if let (Some(f), Some(entry)) = (field.take(), current.as_mut()) {
                            let value = std::mem::take(&mut buffer);
                            match f {
                                TextField::Id => entry.id = Some(value),
                                TextField::Title => entry.title = Some(value),
                                TextField::Summary => entry.summary = Some(value),
                                TextField::Published => entry.published = Some(value),
                                TextField::AuthorName => entry.authors.push(value),
                                TextField::Doi => entry.doi = Some(value),
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// `link`, `category` and `primary_category` carry their data in attributes.
fn read_attributes(e: &BytesStart<'_>, entry: &mut RawEntry) -> Result<(), FetchError> {
    match e.local_name().as_ref() {
        b"category" => {
            if let Some(term) = attribute(e, "term")? {
                entry.categories.push(term);
            }
        }
        b"primary_category" => {
            entry.primary_category = attribute(e, "term")?;
        }
        b"link" => {
            let href = attribute(e, "href")?;
            let rel = attribute(e, "rel")?;
            let title = attribute(e, "title")?;
            match (rel.as_deref(), title.as_deref()) {
                (Some("alternate"), _) => entry.link = href,
                (_, Some("pdf")) => entry.pdf_link = href,
                _ => {}
            }
        }
        _ => {}
    }
    Ok(())
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, FetchError> {
    let Some(attr) = e
        .try_get_attribute(name)
        .map_err(|err| FetchError::Decode(err.to_string()))?
    else {
        return Ok(None);
    };
    let value = attr
        .unescape_value()
        .map_err(|err| FetchError::Decode(err.to_string()))?;
    Ok(Some(value.into_owned()))
}

/// arXiv reports bad queries as a feed with a single error entry.
fn check_api_error(entry: &RawEntry) -> Result<(), FetchError> {
    match entry.id.as_deref() {
        Some(id) if id.contains("/api/errors") => Err(FetchError::Decode(format!(
            "arXiv API error: {}",
            entry.summary.as_deref().unwrap_or("unknown")
        ))),
        _ => Ok(()),
    }
}
