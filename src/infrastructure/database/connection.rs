//! Database connection pool manager.
//!
//! SQLite with WAL mode for concurrent readers alongside the single
//! writer. The schema is created on first connect, so a fresh path (or
//! `sqlite::memory:`) is immediately usable.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::errors::{EngineError, EngineResult};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS rules (
    id            TEXT NOT NULL,
    organization  TEXT NOT NULL,
    name          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    enabled       INTEGER NOT NULL DEFAULT 1,
    priority      INTEGER NOT NULL DEFAULT 0,
    conditions    TEXT NOT NULL,
    actions       TEXT NOT NULL,
    schedule      TEXT,
    metadata      TEXT NOT NULL,
    tags          TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    created_by    TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (organization, id)
);
CREATE INDEX IF NOT EXISTS idx_rules_org_priority
    ON rules(organization, priority DESC, created_at ASC);

CREATE TABLE IF NOT EXISTS rule_sets (
    id            TEXT NOT NULL,
    organization  TEXT NOT NULL,
    name          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    enabled       INTEGER NOT NULL DEFAULT 1,
    rule_ids      TEXT NOT NULL DEFAULT '[]',
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (organization, id)
);

CREATE TABLE IF NOT EXISTS templates (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    variables     TEXT NOT NULL DEFAULT '[]',
    rule          TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
    id               TEXT PRIMARY KEY,
    rule_id          TEXT NOT NULL,
    trigger_event_id TEXT NOT NULL,
    status           TEXT NOT NULL,
    trigger_type     TEXT NOT NULL,
    started_at       TEXT NOT NULL,
    completed_at     TEXT,
    context          TEXT NOT NULL,
    actions          TEXT NOT NULL DEFAULT '[]',
    error            TEXT,
    duration_ns      INTEGER NOT NULL DEFAULT 0,
    metadata         TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_executions_rule
    ON executions(rule_id, started_at DESC);
";

/// SQLite connection pool with the schema applied.
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if missing) a database at the given URL, e.g.
    /// `sqlite:hookflow.db` or `sqlite::memory:`.
    pub async fn new(database_url: &str, max_connections: u32) -> EngineResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| EngineError::Store(format!("invalid database URL: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        // sqlite prepares one statement at a time
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if !statement.is_empty() {
                sqlx::query(statement).execute(&pool).await?;
            }
        }

        Ok(Self { pool })
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}
