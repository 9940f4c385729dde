//! SQL migration definitions for the paper-discussion database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: checkpoint, leases, papers",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Run checkpoint (one row per named stream)
CREATE TABLE IF NOT EXISTS checkpoint (
    name               TEXT PRIMARY KEY,
    schema_version     INTEGER NOT NULL,
    last_processed_id  TEXT NOT NULL,
    last_run_timestamp TEXT NOT NULL
);

-- Run leases; expires_at is epoch milliseconds
CREATE TABLE IF NOT EXISTS leases (
    name        TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL
);

-- arXiv metadata cache
CREATE TABLE IF NOT EXISTS papers (
    arxiv_id         TEXT PRIMARY KEY,
    title            TEXT NOT NULL,
    authors_json     TEXT NOT NULL,
    has_more_authors INTEGER NOT NULL DEFAULT 0,
    abstract         TEXT NOT NULL,
    fetched_at       TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
