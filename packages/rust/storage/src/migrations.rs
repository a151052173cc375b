//! SQL migration definitions for the opengov database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

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
        description: "Initial schema: raw_documents, policy_documents, feed_entries",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Verbatim upstream captures. Append-only; the only mutation ever applied
-- is setting linked_document_id, exactly once, during canonicalization.
CREATE TABLE IF NOT EXISTS raw_documents (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    source_key         TEXT NOT NULL,
    external_id        TEXT NOT NULL,
    payload            TEXT NOT NULL,
    fetched_at         TEXT NOT NULL,
    linked_document_id INTEGER REFERENCES policy_documents(id),
    created_at         TEXT NOT NULL,
    UNIQUE(source_key, external_id)
);

CREATE INDEX IF NOT EXISTS idx_raw_unlinked
    ON raw_documents(created_at) WHERE linked_document_id IS NULL;
CREATE INDEX IF NOT EXISTS idx_raw_linked ON raw_documents(linked_document_id);

-- One row per real-world document. Identity/content columns are owned by
-- canonicalization; the derived columns (summary, key_points, impact_score,
-- political_score) are owned by enrichment and only ever move null -> value.
CREATE TABLE IF NOT EXISTS policy_documents (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    unique_key      TEXT NOT NULL UNIQUE,
    document_number TEXT NOT NULL,
    title           TEXT NOT NULL,
    agency          TEXT,
    source_url      TEXT NOT NULL,
    published_at    TEXT NOT NULL,
    document_type   TEXT,
    pdf_url         TEXT,
    summary         TEXT,
    key_points      TEXT,
    impact_score    TEXT CHECK (impact_score IN ('low', 'medium', 'high')),
    political_score INTEGER CHECK (political_score BETWEEN -100 AND 100),
    feed_entry_id   INTEGER REFERENCES feed_entries(id),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_policy_published ON policy_documents(published_at);

-- Read-optimized feed projection, overwritten in full on each
-- materialization. At most one entry per policy document.
CREATE TABLE IF NOT EXISTS feed_entries (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    policy_document_id INTEGER NOT NULL UNIQUE REFERENCES policy_documents(id),
    title              TEXT NOT NULL,
    short_text         TEXT NOT NULL,
    key_points         TEXT NOT NULL,
    political_score    INTEGER,
    impact_score       TEXT,
    source_url         TEXT NOT NULL,
    published_at       TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feed_published ON feed_entries(published_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
