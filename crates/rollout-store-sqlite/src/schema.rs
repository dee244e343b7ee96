//! SQL schema for the rollout SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per deployment document, keyed by its natural key.
CREATE TABLE IF NOT EXISTS deployments (
    market        TEXT NOT NULL,
    deployment_id TEXT NOT NULL,
    id            TEXT NOT NULL UNIQUE,   -- document id
    doc           TEXT NOT NULL,          -- JSON document
    etag          TEXT NOT NULL,          -- SHA-256 of doc
    updated_at    TEXT NOT NULL,          -- ISO 8601 UTC
    PRIMARY KEY (market, deployment_id)
);

CREATE TABLE IF NOT EXISTS workflows (
    id                TEXT PRIMARY KEY,
    workflow_template TEXT,
    doc               TEXT NOT NULL,
    etag              TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS workflows_template_idx ON workflows(workflow_template);

PRAGMA user_version = 1;
";
