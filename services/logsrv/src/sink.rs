//! Persistence sink.
//!
//! The sink executes whatever query text it is handed and reports the
//! outcome; query selection and parameter construction happen upstream.
//! Queries arrive with `@Name` placeholders and a name → value map. SQL
//! drivers bind positionally, so the sink rewrites placeholders to `?` in
//! order of appearance (quote-aware, and a name may appear more than once)
//! and binds the mapped values in that order.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{LogSrvError, Result};

/// Executes persistence writes for registered loggers.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Executes a query with the given named parameters.
    async fn execute(&self, query: &str, params: &HashMap<String, String>) -> Result<()>;

    /// Confirms that a target table exists.
    async fn table_exists(&self, table: &str) -> Result<bool>;
}

/// SQLite-backed sink over an sqlx connection pool.
///
/// The connection string from the register configuration is handed to the
/// driver unmodified.
pub struct SqliteSink {
    pool: SqlitePool,
    connection_string: String,
}

impl SqliteSink {
    /// Connects a pool for the given connection string.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        info!("Persistence pool connected: {connection_string}");
        Ok(Self {
            pool,
            connection_string: connection_string.to_string(),
        })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The connection string this sink was opened with.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn execute(&self, query: &str, params: &HashMap<String, String>) -> Result<()> {
        let (sql, names) = to_positional(query);

        let mut prepared = sqlx::query(&sql);
        for name in &names {
            let value = params.get(name).ok_or_else(|| {
                LogSrvError::Persistence(format!("query references unknown parameter @{name}"))
            })?;
            prepared = prepared.bind(value);
        }

        prepared.execute(&self.pool).await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }
}

/// Shares one sink per distinct connection string across all registers.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: tokio::sync::Mutex<HashMap<String, std::sync::Arc<dyn PersistenceSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sink for a connection string, connecting it on first use.
    pub async fn get_or_connect(
        &self,
        connection_string: &str,
    ) -> Result<std::sync::Arc<dyn PersistenceSink>> {
        let mut sinks = self.sinks.lock().await;
        if let Some(sink) = sinks.get(connection_string) {
            return Ok(sink.clone());
        }
        let sink: std::sync::Arc<dyn PersistenceSink> =
            std::sync::Arc::new(SqliteSink::connect(connection_string).await?);
        sinks.insert(connection_string.to_string(), sink.clone());
        Ok(sink)
    }

    /// Preloads a sink, shadowing whatever the connection string would open.
    #[cfg(test)]
    pub(crate) async fn preload(
        &self,
        connection_string: &str,
        sink: std::sync::Arc<dyn PersistenceSink>,
    ) {
        self.sinks
            .lock()
            .await
            .insert(connection_string.to_string(), sink);
    }
}

/// Rewrites `@Name` placeholders to positional `?` marks, returning the
/// rewritten query and the parameter names in bind order. Placeholders
/// inside quoted literals are left untouched.
fn to_positional(query: &str) -> (String, Vec<String>) {
    let mut sql = String::with_capacity(query.len());
    let mut names = Vec::new();
    let mut in_single = false;
    let mut in_double = false;

    let mut chars = query.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                sql.push(c);
            },
            '"' if !in_single => {
                in_double = !in_double;
                sql.push(c);
            },
            '@' if !in_single && !in_double => {
                let start = pos + 1;
                let mut end = start;
                while let Some(&(next_pos, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = next_pos + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                if end > start {
                    names.push(query[start..end].to_string());
                    sql.push('?');
                } else {
                    sql.push(c);
                }
            },
            _ => sql.push(c),
        }
    }
    (sql, names)
}
