pub mod logger;
pub mod scheduler;

use thiserror::Error;

use crate::crawler::FetchError;
use crate::ingest::IngestError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("configuration serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("feed error: {0}")]
    Fetch(#[from] FetchError),

    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
