use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::crawler::{FeedSort, SortDirection, SortField};
use crate::{ingest, query};
use crate::utils::AppResult;

pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    pub base_url: String,
    pub search_query: String,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    pub page_size: u32,
    /// Pause between consecutive feed calls; arXiv asks for about three seconds.
    pub request_delay_ms: u64,
    /// Hard stop on the number of pages per run; unlimited when absent.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_path: String,
    pub max_connections: u32,
    pub operation_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub default_page_size: u32,
    /// Upper bound on `limit`; any positive limit is served when absent.
    #[serde(default)]
    pub max_page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    pub cron: String,
}

impl AppConfig {
    /// Defaults, then `config/settings.toml` if present, then `PUBFINDER__*`
    /// environment variables. `ARXIV_DB_PATH` overrides the database path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_string_lossy().into_owned();
        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix("PUBFINDER").separator("__"))
            .set_override_option("storage.database_path", std::env::var("ARXIV_DB_PATH").ok())?
            .build()?
            .try_deserialize()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl FeedConfig {
    pub fn sort(&self) -> FeedSort {
        FeedSort {
            field: self.sort_field,
            direction: self.sort_direction,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl IngestConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl StorageConfig {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig {
                base_url: "https://export.arxiv.org/api/query".to_string(),
                search_query: "cat:cs.*".to_string(),
                sort_field: SortField::SubmittedDate,
                sort_direction: SortDirection::Descending,
                timeout_secs: 60,
                user_agent: "pubfinder/0.1 (publication index)".to_string(),
            },
            ingest: IngestConfig {
                page_size: ingest::DEFAULT_PAGE_SIZE,
                request_delay_ms: 3000,
                max_pages: None,
            },
            storage: StorageConfig {
                database_path: "./data/arxiv.db".to_string(),
                max_connections: 5,
                operation_timeout_secs: 30,
            },
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                default_page_size: query::DEFAULT_PAGE_SIZE,
                max_page_size: None,
            },
            scheduler: SchedulerConfig {
                cron: "0 0 8 * * *".to_string(),
            },
        }
    }
}
