//! Publication index: pulls arXiv metadata into SQLite and serves filtered,
//! paginated search over it.
//!
//! - [`crawler`]: feed clients, one page per call
//! - [`ingest`]: the batch job that drains a feed into the store
//! - [`storage`]: the record store and its SQLite implementation
//! - [`query`]: search requests and category listings
//! - [`server`]: HTTP endpoints over the query engine

pub mod config;
pub mod crawler;
pub mod ingest;
pub mod query;
pub mod server;
pub mod storage;
pub mod utils;

pub use config::AppConfig;
pub use crawler::{ArxivClient, FeedPage, FeedSource};
pub use ingest::{IngestReport, IngestionPipeline};
pub use query::{QueryEngine, QueryRequest, SearchPage};
pub use storage::{PublicationRecord, RecordStore, SqliteStore};
