//! Wiping allow-listed tables before an end-to-end test run

use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::DatabaseConfig;
use crate::error::{ApiError, ControlError};

/// Rows removed per table by one wipe
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WipeReport {
    pub tables: Vec<String>,
    pub rows_deleted: BTreeMap<String, u64>,
}

pub struct Maintenance {
    pool: SqlitePool,
    allow_list: Vec<String>,
    wipe_lock: Mutex<()>,
}

impl Maintenance {
    pub fn new(pool: SqlitePool, allow_list: Vec<String>) -> Self {
        Self {
            pool,
            allow_list,
            wipe_lock: Mutex::new(()),
        }
    }

    /// Build the pool without connecting; the first wipe opens the connection
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, ControlError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_lazy(&config.url)
            .map_err(|e| {
                ControlError::DatabaseError(format!("Invalid database url: {}", e))
            })?;
        info!(
            "Maintenance wipe enabled for tables: {}",
            config.tables.join(", ")
        );
        Ok(Self::new(pool, config.tables.clone()))
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    /// Resolve a caller selection against the allow-list. `None` selects every
    /// allow-listed table. The result follows allow-list order.
    pub fn select(&self, requested: Option<&[String]>) -> Result<Vec<String>, ApiError> {
        let Some(requested) = requested else {
            return Ok(self.allow_list.clone());
        };
        if requested.is_empty() {
            return Err(ApiError::validation("no tables selected"));
        }

        let unknown: Vec<&str> = requested
            .iter()
            .filter(|name| !self.allow_list.contains(*name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            warn!("Rejected wipe of tables outside the allow-list: {:?}", unknown);
            return Err(ApiError::validation(format!(
                "unknown table(s): {}",
                unknown.join(", ")
            )));
        }

        Ok(self
            .allow_list
            .iter()
            .filter(|name| requested.contains(*name))
            .cloned()
            .collect())
    }

    /// Delete every row of `tables` in one transaction. Callers must pass a
    /// selection produced by [`Maintenance::select`].
    pub async fn wipe(&self, tables: &[String]) -> Result<WipeReport, ControlError> {
        // Overlapping wipes would observe each other's partial deletes
        let _guard = self.wipe_lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(|e| {
            ControlError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let mut rows_deleted = BTreeMap::new();
        for table in tables {
            debug_assert!(self.allow_list.contains(table));
            let sql = format!("DELETE FROM \"{}\"", table);
            let result = sqlx::query(&sql).execute(&mut *tx).await.map_err(|e| {
                ControlError::DatabaseError(format!("Failed to wipe table '{}': {}", table, e))
            })?;
            rows_deleted.insert(table.clone(), result.rows_affected());
        }

        tx.commit().await.map_err(|e| {
            ControlError::DatabaseError(format!("Failed to commit wipe: {}", e))
        })?;

        info!("Wiped tables {:?}: {:?}", tables, rows_deleted);
        Ok(WipeReport {
            tables: tables.to_vec(),
            rows_deleted,
        })
    }
}

/// Plain SQL identifier: `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `a, b,a` into `["a", "b"]`
pub fn parse_table_selector(raw: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for table in ["chats", "messages", "users"] {
            sqlx::query(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", table))
                .execute(&pool)
                .await
                .unwrap();
            sqlx::query(&format!("INSERT INTO {} (id) VALUES (1), (2), (3)", table))
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn maintenance(pool: SqlitePool) -> Maintenance {
        Maintenance::new(pool, vec!["messages".to_string(), "chats".to_string()])
    }

    #[tokio::test]
    async fn wipes_every_allow_listed_table_by_default() {
        let pool = seeded_pool().await;
        let maintenance = maintenance(pool.clone());

        let tables = maintenance.select(None).unwrap();
        let report = maintenance.wipe(&tables).await.unwrap();

        assert_eq!(report.tables, vec!["messages", "chats"]);
        assert_eq!(report.rows_deleted["chats"], 3);
        assert_eq!(count(&pool, "chats").await, 0);
        assert_eq!(count(&pool, "messages").await, 0);
        assert_eq!(count(&pool, "users").await, 3);
    }

    #[tokio::test]
    async fn wipes_only_selected_tables() {
        let pool = seeded_pool().await;
        let maintenance = maintenance(pool.clone());

        let tables = maintenance.select(Some(&["chats".to_string()][..])).unwrap();
        maintenance.wipe(&tables).await.unwrap();

        assert_eq!(count(&pool, "chats").await, 0);
        assert_eq!(count(&pool, "messages").await, 3);
    }

    #[tokio::test]
    async fn unknown_table_is_rejected_before_any_delete() {
        let pool = seeded_pool().await;
        let maintenance = maintenance(pool.clone());

        let result = maintenance.select(Some(&["chats".to_string(), "users".to_string()][..]));

        assert!(matches!(result, Err(ApiError::Validation(msg)) if msg.contains("users")));
        assert_eq!(count(&pool, "chats").await, 3);
        assert_eq!(count(&pool, "users").await, 3);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let maintenance = maintenance(seeded_pool().await);
        let nothing: &[String] = &[];
        assert!(maintenance.select(Some(nothing)).is_err());
    }

    #[tokio::test]
    async fn failed_delete_rolls_back_earlier_tables() {
        let pool = seeded_pool().await;
        let maintenance = Maintenance::new(
            pool.clone(),
            vec!["chats".to_string(), "missing_table".to_string()],
        );

        let tables = maintenance.select(None).unwrap();
        let result = maintenance.wipe(&tables).await;

        assert!(matches!(result, Err(ControlError::DatabaseError(_))));
        assert_eq!(count(&pool, "chats").await, 3);
    }

    #[tokio::test]
    async fn wipe_waits_for_the_one_in_progress() {
        let pool = seeded_pool().await;
        let maintenance = std::sync::Arc::new(maintenance(pool.clone()));
        let in_progress = maintenance.wipe_lock.lock().await;

        let waiting = tokio::spawn({
            let maintenance = maintenance.clone();
            async move { maintenance.wipe(&["chats".to_string()]).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert!(!waiting.is_finished());
        assert_eq!(count(&pool, "chats").await, 3);

        drop(in_progress);
        let report = waiting.await.unwrap().unwrap();
        assert_eq!(report.rows_deleted["chats"], 3);
        assert_eq!(count(&pool, "chats").await, 0);
    }

    #[tokio::test]
    async fn concurrent_wipes_do_not_interleave() {
        let pool = seeded_pool().await;
        let maintenance = maintenance(pool.clone());
        let everything = maintenance.select(None).unwrap();
        let chats = vec!["chats".to_string()];

        let (first, second) = tokio::join!(maintenance.wipe(&everything), maintenance.wipe(&chats));
        let (first, second) = (first.unwrap(), second.unwrap());

        // One of them ran entirely before the other
        assert_eq!(first.rows_deleted["chats"] + second.rows_deleted["chats"], 3);
        assert_eq!(first.rows_deleted["messages"], 3);
        assert_eq!(count(&pool, "chats").await, 0);
        assert_eq!(count(&pool, "messages").await, 0);
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("chat_messages"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("chats; DROP TABLE users"));
        assert!(!is_identifier("a\"b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn selector_is_split_trimmed_and_deduplicated() {
        assert_eq!(parse_table_selector(" a, b ,a,,"), vec!["a", "b"]);
        assert!(parse_table_selector(" , ").is_empty());
    }
}
