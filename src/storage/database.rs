use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

use super::models::{PublicationRecord, PublicationRow};
use super::{codec, Column, Direction, OrderBy, Predicate, RecordStore, StorageError, StorageResult};
use crate::config::StorageConfig;

const COLUMNS: &str = "id, title, abstract, authors, categories, primary_category, link, \
                       pdf_link, doi, publication_date, source, date_fetched, predicted_category";

const UPSERT_SQL: &str = r#"
    INSERT INTO publications (
        id, title, abstract, authors, categories, primary_category, link,
        pdf_link, doi, publication_date, source, date_fetched, predicted_category
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        title = excluded.title,
        abstract = excluded.abstract,
        authors = excluded.authors,
        categories = excluded.categories,
        primary_category = excluded.primary_category,
        link = excluded.link,
        pdf_link = excluded.pdf_link,
        doi = excluded.doi,
        publication_date = excluded.publication_date,
        source = excluded.source,
        date_fetched = excluded.date_fetched,
        predicted_category = excluded.predicted_category
"#;

/// SQLite-backed record store. Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    op_timeout: Duration,
}

impl SqliteStore {
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        if let Some(parent) = Path::new(&config.database_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::Connection(e.to_string()))?;
            }
        }
        Self::connect_with(
            &config.database_url(),
            config.max_connections,
            config.operation_timeout(),
        )
        .await
    }

    pub async fn connect_with(
        database_url: &str,
        max_connections: u32,
        op_timeout: Duration,
    ) -> StorageResult<Self> {
        let options = database_url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(op_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(op_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url = database_url, "database connected");
        Ok(Self { pool, op_timeout })
    }

    /// Create the table and index if they are missing.
    pub async fn init_schema(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publications (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                abstract TEXT,
                authors TEXT,
                categories TEXT,
                primary_category TEXT,
                link TEXT NOT NULL,
                pdf_link TEXT,
                doi TEXT,
                publication_date TEXT,
                source TEXT NOT NULL,
                date_fetched TEXT NOT NULL,
                predicted_category TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_publications_date ON publications(publication_date)",
        )
        .execute(&self.pool)
        .await?;

        info!("database schema ready");
        Ok(())
    }

    /// Wait for checked-out connections and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("database closed");
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .unwrap_or(Err(StorageError::Timeout {
                operation,
                secs: self.op_timeout.as_secs(),
            }))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_many(&self, records: &[PublicationRecord]) -> StorageResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(bad) = records.iter().find(|r| r.id.trim().is_empty()) {
            return Err(StorageError::InvalidRecord(format!(
                "empty id (title: {:?})",
                bad.title
            )));
        }

        self.bounded("upsert_many", async {
            let mut tx = self.pool.begin().await?;
            for record in records {
                sqlx::query(UPSERT_SQL)
                    .bind(&record.id)
                    .bind(&record.title)
                    .bind(&record.abstract_text)
                    .bind(codec::encode_list(&record.authors))
                    .bind(codec::encode_list(&record.categories))
                    .bind(&record.primary_category)
                    .bind(&record.link)
                    .bind(&record.pdf_link)
                    .bind(&record.doi)
                    .bind(&record.publication_date)
                    .bind(&record.source)
                    .bind(record.date_fetched)
                    .bind(&record.predicted_category)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit()
                .await
                .map_err(|e| StorageError::Transaction(e.to_string()))?;

            debug!(count = records.len(), "batch committed");
            Ok(records.len() as u64)
        })
        .await
    }

    async fn query(
        &self,
        predicate: &Predicate,
        order_by: OrderBy,
        limit: u32,
        offset: u64,
    ) -> StorageResult<Vec<PublicationRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {COLUMNS} FROM publications WHERE "));
        push_predicate(&mut builder, predicate);
        push_order(&mut builder, order_by);
        builder
            .push(" LIMIT ")
            .push_bind(i64::from(limit))
            .push(" OFFSET ")
            .push_bind(offset as i64);

        self.bounded("query", async {
            let rows = builder
                .build_query_as::<PublicationRow>()
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.into_iter().map(PublicationRecord::from).collect())
        })
        .await
    }

    async fn distinct_values(&self, column: Column) -> StorageResult<Vec<String>> {
        let col = column.as_sql();
        let sql = format!(
            "SELECT DISTINCT {col} FROM publications WHERE {col} IS NOT NULL ORDER BY {col} ASC"
        );

        self.bounded("distinct_values", async {
            let values = sqlx::query_scalar::<_, String>(&sql)
                .fetch_all(&self.pool)
                .await?;
            Ok(values)
        })
        .await
    }

    async fn count(&self) -> StorageResult<u64> {
        self.bounded("count", async {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM publications")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        })
        .await
    }
}

fn push_predicate(builder: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::All => {
            builder.push("1 = 1");
        }
        Predicate::Contains { column, needle } => {
            builder
                .push(column.as_sql())
                .push(" LIKE ")
                .push_bind(like_pattern(needle))
                .push(" ESCAPE '\\'");
        }
        Predicate::Any(parts) => push_group(builder, parts, " OR ", "0 = 1"),
        Predicate::Every(parts) => push_group(builder, parts, " AND ", "1 = 1"),
    }
}

fn push_group(
    builder: &mut QueryBuilder<'_, Sqlite>,
    parts: &[Predicate],
    joiner: &str,
    when_empty: &str,
) {
    if parts.is_empty() {
        builder.push(when_empty);
        return;
    }
    builder.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            builder.push(joiner);
        }
        push_predicate(builder, part);
    }
    builder.push(")");
}

fn push_order(builder: &mut QueryBuilder<'_, Sqlite>, order_by: OrderBy) {
    let col = order_by.column.as_sql();
    builder.push(" ORDER BY ");
    if order_by.nulls_last {
        builder.push(col).push(" IS NULL, ");
    }
    builder.push(col).push(match order_by.direction {
        Direction::Asc => " ASC",
        Direction::Desc => " DESC",
    });
    // id breaks ties so that paging is stable
    if order_by.column != Column::Id {
        builder.push(", id ASC");
    }
}

/// `%needle%` with LIKE metacharacters escaped by `\`.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
