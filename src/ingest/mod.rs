//! Batch ingestion.
//!
//! Pages through a feed from offset 0 until a page comes back empty, short,
//! or failed, then writes everything it collected in a single `upsert_many`.
//! Nothing is written before the loop ends, so an interrupted run leaves the
//! store untouched and can simply be repeated.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::crawler::{FeedPage, FeedSort, FeedSource};
use crate::storage::{PublicationRecord, RecordStore, StorageError};

pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("page size must be positive")]
    InvalidPageSize,

    #[error("failed to commit {attempted} records: {source}")]
    Commit {
        attempted: usize,
        #[source]
        source: StorageError,
    },
}

/// Why the fetch loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The feed returned an empty page.
    Exhausted,
    /// The feed returned fewer entries than requested.
    LastPage,
    /// The feed call failed; treated like exhaustion.
    FetchFailed(String),
    /// The configured page cap was reached.
    PageLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestState {
    Fetching { offset: u32 },
    Done(StopReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub pages_fetched: u32,
    pub entries_fetched: usize,
    pub records_written: u64,
    pub total_stored: u64,
    pub stop_reason: StopReason,
}

pub struct IngestionPipeline<'a> {
    feed: &'a dyn FeedSource,
    store: &'a dyn RecordStore,
    page_size: u32,
    sort: FeedSort,
    request_delay: Duration,
    max_pages: Option<u32>,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(feed: &'a dyn FeedSource, store: &'a dyn RecordStore) -> Self {
        Self {
            feed,
            store,
            page_size: DEFAULT_PAGE_SIZE,
            sort: FeedSort::default(),
            request_delay: Duration::ZERO,
            max_pages: None,
        }
    }

    pub fn with_config(mut self, config: &IngestConfig) -> Self {
        self.page_size = config.page_size;
        self.request_delay = config.request_delay();
        self.max_pages = config.max_pages;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sort(mut self, sort: FeedSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        if self.page_size == 0 {
            return Err(IngestError::InvalidPageSize);
        }

        info!(source = self.feed.source_name(), page_size = self.page_size, "ingestion started");

        let mut accumulator: Vec<PublicationRecord> = Vec::new();
        let mut pages_fetched = 0u32;
        let mut state = IngestState::Fetching { offset: 0 };

        let stop_reason = loop {
            let offset = match state {
                IngestState::Fetching { offset } => offset,
                IngestState::Done(reason) => break reason,
            };
            if self.max_pages.is_some_and(|max| pages_fetched >= max) {
                state = IngestState::Done(StopReason::PageLimit);
                continue;
            }
            if pages_fetched > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            let page = self.feed.fetch_page(offset, self.page_size, self.sort).await;
            pages_fetched += 1;
            state = self.advance(offset, page, &mut accumulator);
        };

        let attempted = accumulator.len();
        let records_written = self
            .store
            .upsert_many(&accumulator)
            .await
            .map_err(|source| IngestError::Commit { attempted, source })?;

        let total_stored = match self.store.count().await {
            Ok(total) => total,
            Err(err) => {
                warn!(error = %err, "could not count stored records");
                0
            }
        };

        let report = IngestReport {
            pages_fetched,
            entries_fetched: attempted,
            records_written,
            total_stored,
            stop_reason,
        };
        info!(
            pages = report.pages_fetched,
            fetched = report.entries_fetched,
            written = report.records_written,
            total = report.total_stored,
            reason = ?report.stop_reason,
            "ingestion finished"
        );
        Ok(report)
    }

    /// One transition of the fetch loop.
    fn advance(
        &self,
        offset: u32,
        page: FeedPage,
        accumulator: &mut Vec<PublicationRecord>,
    ) -> IngestState {
        let (entries, received) = match page {
            FeedPage::Page { entries, received } => (entries, received),
            FeedPage::Failure(err) => {
                warn!(offset, error = %err, "stopping at failed page");
                return IngestState::Done(StopReason::FetchFailed(err.to_string()));
            }
        };

        if received == 0 {
            return IngestState::Done(StopReason::Exhausted);
        }

        accumulator.extend(entries);
        info!(offset, received, total = accumulator.len(), "page accumulated");

        if received < self.page_size as usize {
            IngestState::Done(StopReason::LastPage)
        } else {
            IngestState::Fetching {
                offset: offset.saturating_add(self.page_size),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::crawler::FetchError;
    use crate::storage::test_support::{record, temp_store};
    use crate::storage::{Column, OrderBy, Predicate, StorageResult};

    /// Serves pages of the given sizes, then empty pages.
    struct ScriptedFeed {
        sizes: Vec<usize>,
        fail_at: Option<usize>,
        dropped: usize,
        calls: Mutex<Vec<(u32, u32)>>,
    }

    impl ScriptedFeed {
        fn new(sizes: &[usize]) -> Self {
            Self {
                sizes: sizes.to_vec(),
                fail_at: None,
                dropped: 0,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_at(mut self, call: usize) -> Self {
            self.fail_at = Some(call);
            self
        }

        /// Each page loses this many wire entries to normalization.
        fn dropping(mut self, dropped: usize) -> Self {
            self.dropped = dropped;
            self
        }

        fn calls(&self) -> Vec<(u32, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        fn source_name(&self) -> &str {
            "scripted"
        }

        async fn fetch_page(&self, offset: u32, page_size: u32, _sort: FeedSort) -> FeedPage {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((offset, page_size));
                calls.len() - 1
            };
            if self.fail_at == Some(call) {
                return FeedPage::Failure(FetchError::Status(502));
            }
            let received = self.sizes.get(call).copied().unwrap_or(0);
            let kept = received.saturating_sub(self.dropped);
            FeedPage::Page {
                entries: (0..kept)
                    .map(|i| record(&format!("{}", offset as usize + i), "t", None, &["cs.AI"]))
                    .collect(),
                received,
            }
        }
    }

    /// Records every batch instead of storing it.
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl RecordStore for RecordingStore {
        async fn upsert_many(&self, records: &[PublicationRecord]) -> StorageResult<u64> {
            if self.fail {
                return Err(StorageError::Transaction("disk full".to_string()));
            }
            self.batches.lock().unwrap().push(records.len());
            Ok(records.len() as u64)
        }

        async fn query(
            &self,
            _predicate: &Predicate,
            _order_by: OrderBy,
            _limit: u32,
            _offset: u64,
        ) -> StorageResult<Vec<PublicationRecord>> {
            Ok(Vec::new())
        }

        async fn distinct_values(&self, _column: Column) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn count(&self) -> StorageResult<u64> {
            Ok(self.batches.lock().unwrap().iter().sum::<usize>() as u64)
        }
    }

    #[tokio::test]
    async fn short_page_ends_the_run_and_commits_once() {
        let feed = ScriptedFeed::new(&[100, 100, 37]);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store).run().await.unwrap();

        assert_eq!(feed.calls(), vec![(0, 100), (100, 100), (200, 100)]);
        assert_eq!(*store.batches.lock().unwrap(), vec![237]);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.records_written, 237);
        assert_eq!(report.stop_reason, StopReason::LastPage);
    }

    #[tokio::test]
    async fn dropped_entries_do_not_shorten_a_full_page() {
        let feed = ScriptedFeed::new(&[100, 50]).dropping(1);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store).run().await.unwrap();

        assert_eq!(feed.calls(), vec![(0, 100), (100, 100)]);
        assert_eq!(*store.batches.lock().unwrap(), vec![148]);
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.stop_reason, StopReason::LastPage);
    }

    #[tokio::test]
    async fn page_of_only_dropped_entries_keeps_going() {
        let feed = ScriptedFeed::new(&[2, 2, 1]).dropping(2);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store)
            .page_size(2)
            .run()
            .await
            .unwrap();

        assert_eq!(feed.calls().len(), 3);
        assert_eq!(report.entries_fetched, 0);
        assert_eq!(report.stop_reason, StopReason::LastPage);
    }

    #[tokio::test]
    async fn empty_page_ends_the_run() {
        let feed = ScriptedFeed::new(&[10, 10]);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store)
            .page_size(10)
            .run()
            .await
            .unwrap();

        assert_eq!(feed.calls().len(), 3);
        assert_eq!(*store.batches.lock().unwrap(), vec![20]);
        assert_eq!(report.stop_reason, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn failed_page_stops_but_keeps_earlier_pages() {
        let feed = ScriptedFeed::new(&[100, 100, 100]).failing_at(1);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store).run().await.unwrap();

        assert_eq!(feed.calls().len(), 2);
        assert_eq!(*store.batches.lock().unwrap(), vec![100]);
        assert!(matches!(report.stop_reason, StopReason::FetchFailed(_)));
    }

    #[tokio::test]
    async fn page_cap_stops_the_loop() {
        let feed = ScriptedFeed::new(&[5, 5, 5, 5]);
        let store = RecordingStore::default();

        let report = IngestionPipeline::new(&feed, &store)
            .page_size(5)
            .max_pages(Some(2))
            .run()
            .await
            .unwrap();

        assert_eq!(feed.calls().len(), 2);
        assert_eq!(report.entries_fetched, 10);
        assert_eq!(report.stop_reason, StopReason::PageLimit);
    }

    #[tokio::test]
    async fn commit_failure_is_fatal() {
        let feed = ScriptedFeed::new(&[3]);
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };

        let err = IngestionPipeline::new(&feed, &store)
            .page_size(10)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Commit { attempted: 3, .. }));
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let feed = ScriptedFeed::new(&[]);
        let store = RecordingStore::default();

        let err = IngestionPipeline::new(&feed, &store)
            .page_size(0)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidPageSize));
        assert!(feed.calls().is_empty());
    }

    #[tokio::test]
    async fn rerunning_against_sqlite_converges() {
        let (_dir, store) = temp_store().await;

        for _ in 0..2 {
            let feed = ScriptedFeed::new(&[4, 2]);
            let report = IngestionPipeline::new(&feed, &store)
                .page_size(4)
                .run()
                .await
                .unwrap();
            assert_eq!(report.records_written, 6);
            assert_eq!(report.total_stored, 6);
        }

        let stored = store
            .query(&Predicate::All, OrderBy::newest_first(), 100, 0)
            .await
            .unwrap();
        assert_eq!(stored.len(), 6);
    }
}
