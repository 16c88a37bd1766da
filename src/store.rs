//! Durable store - SQLite-backed mirror of repositories and dependencies
//!
//! The sync engine depends only on the narrow [`Store`] trait: two find
//! operations and two upserts. `SqliteStore` is the shipped backend; the
//! database lives in XDG_DATA_HOME/depsentry/state.db.
//!
//! Records are never deleted by this system. A repository removed on the
//! remote side, or a dependency removed from a manifest, stays in the
//! store as history.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SyncError;

/// One mirrored remote repository.
///
/// `full_name` is the reconciliation key: unique, never mutated after
/// creation. Every other attribute is refreshed on each pass that inspects
/// the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRecord {
    pub id: i64,
    pub full_name: String,
    pub name: String,
    pub html_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub owner: String,
    pub updated_at: DateTime<Utc>,
}

/// Desired repository state computed by the reconciler.
#[derive(Debug, Clone)]
pub struct NewRepository<'a> {
    pub full_name: &'a str,
    pub name: &'a str,
    pub html_url: &'a str,
    pub description: Option<&'a str>,
    pub language: Option<&'a str>,
    pub owner: &'a str,
}

/// One declared dependency of one repository.
///
/// Unique on (`name`, `repository_id`). `outdated` is derived: true iff
/// the latest version is known and differs from the declared version by
/// exact string comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRecord {
    pub id: i64,
    pub repository_id: i64,
    pub name: String,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub outdated: bool,
    pub updated_at: DateTime<Utc>,
}

/// Desired dependency state computed by the reconciler.
#[derive(Debug, Clone)]
pub struct NewDependency<'a> {
    pub repository_id: i64,
    pub name: &'a str,
    pub current_version: &'a str,
    pub latest_version: &'a str,
    pub outdated: bool,
}

/// Narrow store interface the sync engine reconciles against.
///
/// Implementations must make upserts idempotent: running the identical
/// upsert twice yields the same stored state and no duplicate records.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_repository(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, SyncError>;

    async fn upsert_repository(
        &self,
        repo: &NewRepository<'_>,
    ) -> Result<RepositoryRecord, SyncError>;

    async fn find_dependency(
        &self,
        name: &str,
        repository_id: i64,
    ) -> Result<Option<DependencyRecord>, SyncError>;

    async fn upsert_dependency(
        &self,
        dep: &NewDependency<'_>,
    ) -> Result<DependencyRecord, SyncError>;

    /// All stored repositories, for status reporting.
    async fn repositories(&self) -> Result<Vec<RepositoryRecord>, SyncError>;

    /// All dependencies owned by one repository.
    async fn dependencies_for(
        &self,
        repository_id: i64,
    ) -> Result<Vec<DependencyRecord>, SyncError>;
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at the default XDG data location.
    pub fn open_default() -> Result<Self> {
        Self::open_at(Self::default_db_path()?)
    }

    /// Open or create the store at a specific path.
    pub fn open_at(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::initialize(&conn)?;

        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the default database path.
    fn default_db_path() -> Result<PathBuf> {
        let data_dir = if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(data_home)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".local/share")
        } else {
            PathBuf::from("/tmp")
        };

        Ok(data_dir.join("depsentry").join("state.db"))
    }

    /// Initialize the database schema.
    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Mirrored repositories, keyed by full_name
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                full_name TEXT UNIQUE NOT NULL,
                name TEXT NOT NULL,
                html_url TEXT NOT NULL,
                description TEXT,
                language TEXT,
                owner TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Declared dependencies, one row per (name, repository)
            CREATE TABLE IF NOT EXISTS dependencies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repository_id INTEGER NOT NULL REFERENCES repositories(id),
                name TEXT NOT NULL,
                current_version TEXT NOT NULL,
                latest_version TEXT,
                outdated INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                UNIQUE(name, repository_id)
            );

            -- Indexes for efficient queries
            CREATE INDEX IF NOT EXISTS idx_repos_full_name ON repositories(full_name);
            CREATE INDEX IF NOT EXISTS idx_deps_repo ON dependencies(repository_id);
            CREATE INDEX IF NOT EXISTS idx_deps_outdated ON dependencies(outdated);
            "#,
        )
        .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn row_to_repository(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepositoryRecord> {
        Ok(RepositoryRecord {
            id: row.get(0)?,
            full_name: row.get(1)?,
            name: row.get(2)?,
            html_url: row.get(3)?,
            description: row.get(4)?,
            language: row.get(5)?,
            owner: row.get(6)?,
            updated_at: row
                .get::<_, String>(7)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }

    fn row_to_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<DependencyRecord> {
        Ok(DependencyRecord {
            id: row.get(0)?,
            repository_id: row.get(1)?,
            name: row.get(2)?,
            current_version: row.get(3)?,
            latest_version: row.get(4)?,
            outdated: row.get::<_, i32>(5)? != 0,
            updated_at: row
                .get::<_, String>(6)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
        })
    }
}

const REPO_COLUMNS: &str =
    "id, full_name, name, html_url, description, language, owner, updated_at";
const DEP_COLUMNS: &str =
    "id, repository_id, name, current_version, latest_version, outdated, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn find_repository(
        &self,
        full_name: &str,
    ) -> Result<Option<RepositoryRecord>, SyncError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM repositories WHERE full_name = ?1",
                    REPO_COLUMNS
                ),
                params![full_name],
                Self::row_to_repository,
            )
            .optional()?;

        Ok(result)
    }

    async fn upsert_repository(
        &self,
        repo: &NewRepository<'_>,
    ) -> Result<RepositoryRecord, SyncError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;

        // full_name is never rewritten; everything else is refreshed.
        // ON CONFLICT also resolves the rare create-race between passes.
        conn.execute(
            r#"
            INSERT INTO repositories (full_name, name, html_url, description, language, owner, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(full_name) DO UPDATE SET
                name = ?2,
                html_url = ?3,
                description = ?4,
                language = ?5,
                owner = ?6,
                updated_at = ?7
            "#,
            params![
                repo.full_name,
                repo.name,
                repo.html_url,
                repo.description,
                repo.language,
                repo.owner,
                now,
            ],
        )?;

        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM repositories WHERE full_name = ?1",
                    REPO_COLUMNS
                ),
                params![repo.full_name],
                Self::row_to_repository,
            )
            .map_err(|e| {
                SyncError::StoreOperationFailed(format!(
                    "repository {} missing after upsert: {}",
                    repo.full_name, e
                ))
            })?;

        debug!("Upserted repository record: {}", record.full_name);
        Ok(record)
    }

    async fn find_dependency(
        &self,
        name: &str,
        repository_id: i64,
    ) -> Result<Option<DependencyRecord>, SyncError> {
        let conn = self.conn.lock().await;
        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM dependencies WHERE name = ?1 AND repository_id = ?2",
                    DEP_COLUMNS
                ),
                params![name, repository_id],
                Self::row_to_dependency,
            )
            .optional()?;

        Ok(result)
    }

    async fn upsert_dependency(
        &self,
        dep: &NewDependency<'_>,
    ) -> Result<DependencyRecord, SyncError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().await;

        conn.execute(
            r#"
            INSERT INTO dependencies (repository_id, name, current_version, latest_version, outdated, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(name, repository_id) DO UPDATE SET
                current_version = ?3,
                latest_version = ?4,
                outdated = ?5,
                updated_at = ?6
            "#,
            params![
                dep.repository_id,
                dep.name,
                dep.current_version,
                dep.latest_version,
                dep.outdated as i32,
                now,
            ],
        )?;

        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM dependencies WHERE name = ?1 AND repository_id = ?2",
                    DEP_COLUMNS
                ),
                params![dep.name, dep.repository_id],
                Self::row_to_dependency,
            )
            .map_err(|e| {
                SyncError::StoreOperationFailed(format!(
                    "dependency {} missing after upsert: {}",
                    dep.name, e
                ))
            })?;

        debug!(
            "Upserted dependency record: {} (repo {})",
            record.name, record.repository_id
        );
        Ok(record)
    }

    async fn repositories(&self) -> Result<Vec<RepositoryRecord>, SyncError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY full_name",
            REPO_COLUMNS
        ))?;

        let repos = stmt
            .query_map([], Self::row_to_repository)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    async fn dependencies_for(
        &self,
        repository_id: i64,
    ) -> Result<Vec<DependencyRecord>, SyncError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM dependencies WHERE repository_id = ?1 ORDER BY name",
            DEP_COLUMNS
        ))?;

        let deps = stmt
            .query_map(params![repository_id], Self::row_to_dependency)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(deps)
    }
}
