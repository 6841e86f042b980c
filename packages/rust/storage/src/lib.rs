//! libSQL storage layer for run metadata (offline, local file).
//!
//! The [`Storage`] struct wraps a libSQL database holding one row per crawl
//! run: its parameters, live progress counts, terminal status, exported
//! file name and expiry.
//!
//! **Access rules:**
//! - `marketcrawl run`: read-write via [`Storage::open`]
//! - listing and inspection commands: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database, params};
use marketcrawl_shared::{MarketCrawlError, Result, RunId, RunParameters, RunStatus};
use serde::{Deserialize, Serialize};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// A persisted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub proxies: Vec<String>,
    pub categories: Vec<String>,
    pub cities: Vec<String>,
    pub collected_links: u64,
    pub collected_items: u64,
    /// Exported file path, once the run has produced one.
    pub filename: Option<String>,
    pub expire_at: DateTime<Utc>,
    /// Free-form metadata; holds `error` for failed runs.
    pub meta: serde_json::Value,
}

impl RunRecord {
    /// Error message recorded for a failed run.
    pub fn error(&self) -> Option<&str> {
        self.meta.get("error").and_then(|v| v.as_str())
    }
}

const RUN_COLUMNS: &str = "id, name, status, created_at, proxies_json, categories_json, \
     cities_json, collected_links, collected_items, filename, expire_at, meta_json";

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MarketCrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        MarketCrawlError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MarketCrawlError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Record a new run in `running` state, expiring `retention_days` from now.
    pub async fn insert_run(
        &self,
        id: &RunId,
        params: &RunParameters,
        retention_days: u64,
    ) -> Result<RunRecord> {
        self.check_writable()?;

        let created_at = Utc::now();
        let days = i64::try_from(retention_days).unwrap_or(i64::MAX);
        let expire_at = created_at
            .checked_add_signed(Duration::try_days(days).unwrap_or(Duration::MAX))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let categories: Vec<String> = params
            .categories
            .iter()
            .map(|c| c.url.to_string())
            .collect();

        let record = RunRecord {
            id: id.clone(),
            name: params.name.clone(),
            status: RunStatus::Running,
            created_at,
            proxies: params.proxies.clone(),
            categories,
            cities: params.cities.clone(),
            collected_links: 0,
            collected_items: 0,
            filename: None,
            expire_at,
            meta: serde_json::json!({}),
        };

        self.conn
            .execute(
                "INSERT INTO runs (id, name, status, created_at, proxies_json, categories_json,
                                   cities_json, expire_at, meta_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id.to_string(),
                    record.name.as_str(),
                    record.status.as_str(),
                    created_at.to_rfc3339(),
                    to_json(&record.proxies)?,
                    to_json(&record.categories)?,
                    to_json(&record.cities)?,
                    expire_at.to_rfc3339(),
                    record.meta.to_string()
                ],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        tracing::debug!(run_id = %id, "run recorded");
        Ok(record)
    }

    /// Overwrite a run's progress counts.
    pub async fn update_progress(
        &self,
        id: &RunId,
        collected_links: u64,
        collected_items: u64,
    ) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE runs SET collected_links = ?1, collected_items = ?2 WHERE id = ?3",
                params![
                    to_sql_count(collected_links),
                    to_sql_count(collected_items),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Store a run's terminal state. `error` lands in the run's metadata.
    pub async fn finish_run(
        &self,
        id: &RunId,
        status: RunStatus,
        collected_links: u64,
        collected_items: u64,
        filename: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let meta = match error {
            Some(message) => serde_json::json!({ "error": message }),
            None => serde_json::json!({}),
        };

        self.conn
            .execute(
                "UPDATE runs
                 SET status = ?1, collected_links = ?2, collected_items = ?3,
                     filename = ?4, meta_json = ?5
                 WHERE id = ?6",
                params![
                    status.as_str(),
                    to_sql_count(collected_links),
                    to_sql_count(collected_items),
                    filename,
                    meta.to_string(),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Flag a still-running run as stopped. Returns whether a row changed.
    pub async fn mark_stopped(&self, id: &RunId) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![
                    RunStatus::Stopped.as_str(),
                    id.to_string(),
                    RunStatus::Running.as_str()
                ],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &RunId) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(MarketCrawlError::Storage(e.to_string())),
        }
    }

    /// List all runs, newest first.
    pub async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY created_at DESC, id DESC"),
                params![],
            )
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// Delete a run. Returns whether it existed.
    pub async fn delete_run(&self, id: &RunId) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute("DELETE FROM runs WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }
}

fn to_json(values: &[String]) -> Result<String> {
    serde_json::to_string(values).map_err(|e| MarketCrawlError::Storage(e.to_string()))
}

fn to_sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MarketCrawlError::Storage(format!("invalid date: {e}")))
}

fn parse_list(s: &str) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| MarketCrawlError::Storage(format!("invalid list: {e}")))
}

/// Convert a database row to a [`RunRecord`].
fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    let text = |i: i32| {
        row.get::<String>(i)
            .map_err(|e| MarketCrawlError::Storage(e.to_string()))
    };

    Ok(RunRecord {
        id: text(0)?
            .parse()
            .map_err(|e| MarketCrawlError::Storage(format!("invalid run id: {e}")))?,
        name: text(1)?,
        status: text(2)?.parse()?,
        created_at: parse_time(&text(3)?)?,
        proxies: parse_list(&text(4)?)?,
        categories: parse_list(&text(5)?)?,
        cities: parse_list(&text(6)?)?,
        collected_links: row.get::<i64>(7).map(|v| v.max(0) as u64).unwrap_or(0),
        collected_items: row.get::<i64>(8).map(|v| v.max(0) as u64).unwrap_or(0),
        filename: row.get::<String>(9).ok(),
        expire_at: parse_time(&text(10)?)?,
        meta: serde_json::from_str(&text(11)?)
            .map_err(|e| MarketCrawlError::Storage(format!("invalid metadata: {e}")))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("mc_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn params(name: &str) -> RunParameters {
        RunParameters {
            name: name.into(),
            categories: vec!["https://shop.example.com/c/rings".parse().unwrap()],
            cities: vec!["Almaty".into(), "Astana".into()],
            proxies: vec!["10.0.0.1:3128".into()],
            max_workers: 8,
            price_split: true,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("mc_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn run_lifecycle() {
        let storage = test_storage().await;
        let id = RunId::new();

        let inserted = storage
            .insert_run(&id, &params("Rings"), 7)
            .await
            .expect("insert run");
        assert_eq!(inserted.status, RunStatus::Running);
        assert_eq!(inserted.expire_at - inserted.created_at, Duration::days(7));

        storage.update_progress(&id, 120, 40).await.expect("progress");
        storage.update_progress(&id, 240, 95).await.expect("progress");

        let run = storage.get_run(&id).await.unwrap().expect("run exists");
        assert_eq!(run.name, "Rings");
        assert_eq!(run.collected_links, 240);
        assert_eq!(run.collected_items, 95);
        assert_eq!(run.cities, vec!["Almaty", "Astana"]);
        assert_eq!(run.categories, vec!["https://shop.example.com/c/rings"]);
        assert_eq!(run.proxies, vec!["10.0.0.1:3128"]);
        assert_eq!(run.filename, None);

        storage
            .finish_run(&id, RunStatus::Finished, 240, 95, Some("data/Rings.xlsx"), None)
            .await
            .expect("finish");
        let run = storage.get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(run.filename.as_deref(), Some("data/Rings.xlsx"));
        assert_eq!(run.error(), None);
    }

    #[tokio::test]
    async fn failed_run_keeps_error() {
        let storage = test_storage().await;
        let id = RunId::new();
        storage.insert_run(&id, &params("Chains"), 7).await.unwrap();
        storage
            .finish_run(&id, RunStatus::Error, 10, 3, None, Some("export error: disk full"))
            .await
            .unwrap();

        let run = storage.get_run(&id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Error);
        assert_eq!(run.collected_items, 3);
        assert_eq!(run.error(), Some("export error: disk full"));
    }

    #[tokio::test]
    async fn mark_stopped_only_touches_running() {
        let storage = test_storage().await;
        let running = RunId::new();
        let finished = RunId::new();
        storage.insert_run(&running, &params("a"), 7).await.unwrap();
        storage.insert_run(&finished, &params("b"), 7).await.unwrap();
        storage
            .finish_run(&finished, RunStatus::Finished, 0, 0, None, None)
            .await
            .unwrap();

        assert!(storage.mark_stopped(&running).await.unwrap());
        assert!(!storage.mark_stopped(&finished).await.unwrap());
        assert_eq!(
            storage.get_run(&running).await.unwrap().unwrap().status,
            RunStatus::Stopped
        );
    }

    #[tokio::test]
    async fn list_newest_first_and_delete() {
        let storage = test_storage().await;
        let first = RunId::new();
        storage.insert_run(&first, &params("first"), 7).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = RunId::new();
        storage.insert_run(&second, &params("second"), 7).await.unwrap();

        let runs = storage.list_runs().await.expect("list");
        let names: Vec<_> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);

        assert!(storage.delete_run(&first).await.unwrap());
        assert!(!storage.delete_run(&first).await.unwrap());
        assert!(storage.get_run(&first).await.unwrap().is_none());
        assert_eq!(storage.list_runs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("mc_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let id = RunId::new();
        rw.insert_run(&id, &params("kept"), 7).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_runs().await.unwrap().len(), 1);
        let result = ro.update_progress(&id, 1, 1).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
