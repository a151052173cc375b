//! libSQL storage layer for the opengov document pipeline.
//!
//! The [`Storage`] struct wraps a libSQL database holding the three pipeline
//! tables: `raw_documents`, `policy_documents`, and `feed_entries`.
//!
//! **Serialization model:** the uniqueness constraints on
//! `(source_key, external_id)` and `unique_key` are the sole serialization
//! points — not application-level locking. Every write here is an
//! insert-or-ignore or insert-or-update, so concurrent stage invocations are
//! commutative. A uniqueness-constraint hit is an expected outcome, never an
//! error. The link-back writes (raw → canonical, canonical → feed) run in
//! the same transaction as their upsert, so a crash never leaves an upsert
//! without its link.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use opengov_shared::{
    CanonicalFields, EnrichmentPatch, FeedEntry, ImpactScore, OpenGovError, PolicyDocument,
    RawDocument, Result,
};

/// A policy document awaiting enrichment, paired with its most recent raw
/// payload (the body text for the analyzer lives there, not in the
/// canonical row).
#[derive(Debug, Clone)]
pub struct EnrichCandidate {
    pub document: PolicyDocument,
    pub payload: Option<String>,
}

/// Row counts per pipeline table/state, for the `status` command.
#[derive(Debug, Clone, Default)]
pub struct StorageCounts {
    pub raw_documents: u64,
    pub unlinked_raw: u64,
    pub policy_documents: u64,
    pub needing_enrichment: u64,
    pub feed_entries: u64,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// The fixed column list used by every `policy_documents` SELECT, so one
/// row-mapping function serves all of them.
const POLICY_COLUMNS: &str = "d.id, d.unique_key, d.document_number, d.title, d.agency, \
     d.source_url, d.published_at, d.document_type, d.pdf_url, d.summary, d.key_points, \
     d.impact_score, d.political_score, d.feed_entry_id, d.created_at, d.updated_at";

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| OpenGovError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for the feed query layer).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

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
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    OpenGovError::Storage(format!(
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
            return Err(OpenGovError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw document operations (raw ingestion stage)
    // -----------------------------------------------------------------------

    /// Insert a raw upstream capture, keyed by `(source_key, external_id)`.
    ///
    /// Returns `true` if a new row was created, `false` if the document was
    /// already ingested (the existing payload is never overwritten). Safe to
    /// call repeatedly and from concurrent processes.
    pub async fn insert_raw_document(
        &self,
        source_key: &str,
        external_id: &str,
        payload: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                "INSERT INTO raw_documents (source_key, external_id, payload, fetched_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(source_key, external_id) DO NOTHING",
                params![
                    source_key,
                    external_id,
                    payload,
                    fetched_at.to_rfc3339(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Get a raw document by its upstream identity.
    pub async fn get_raw_document(
        &self,
        source_key: &str,
        external_id: &str,
    ) -> Result<Option<RawDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_key, external_id, payload, fetched_at, linked_document_id, created_at
                 FROM raw_documents WHERE source_key = ?1 AND external_id = ?2",
                params![source_key, external_id],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_raw_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenGovError::Storage(e.to_string())),
        }
    }

    /// List raw documents not yet linked to a canonical document, oldest
    /// first (FIFO — older backlog is never starved by new arrivals).
    pub async fn list_unlinked_raw(&self, limit: u32) -> Result<Vec<RawDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_key, external_id, payload, fetched_at, linked_document_id, created_at
                 FROM raw_documents
                 WHERE linked_document_id IS NULL
                 ORDER BY created_at ASC, id ASC
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_raw_document(&row)?);
        }
        Ok(results)
    }

    /// Clear a raw row's canonical link. Manual repair hook: a re-run of
    /// canonicalization will then reprocess the row (converging on the same
    /// `unique_key`, not duplicating it).
    pub async fn unlink_raw(&self, raw_id: i64) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE raw_documents SET linked_document_id = NULL WHERE id = ?1",
                params![raw_id],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Canonicalization
    // -----------------------------------------------------------------------

    /// Upsert the canonical document for `fields` and link `raw_id` to it,
    /// atomically. Returns the canonical document id.
    ///
    /// Identity/content columns are always overwritten with the latest
    /// payload's values (upstream is authoritative for non-derived fields);
    /// the derived columns are never touched here. The link write is guarded
    /// by `linked_document_id IS NULL` so an already-linked row (crash
    /// recovery, concurrent run) is a no-op rather than a relink.
    pub async fn upsert_canonical_and_link(
        &self,
        raw_id: i64,
        fields: &CanonicalFields,
    ) -> Result<i64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let mut rows = tx
            .query(
                "INSERT INTO policy_documents
                   (unique_key, document_number, title, agency, source_url, published_at,
                    document_type, pdf_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(unique_key) DO UPDATE SET
                   document_number = excluded.document_number,
                   title           = excluded.title,
                   agency          = excluded.agency,
                   source_url      = excluded.source_url,
                   published_at    = excluded.published_at,
                   document_type   = excluded.document_type,
                   pdf_url         = excluded.pdf_url,
                   updated_at      = excluded.updated_at
                 RETURNING id",
                params![
                    fields.unique_key.as_str(),
                    fields.document_number.as_str(),
                    fields.title.as_str(),
                    fields.agency.as_deref(),
                    fields.source_url.as_str(),
                    fields.published_at.to_rfc3339(),
                    fields.document_type.as_deref(),
                    fields.pdf_url.as_deref(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let document_id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
            Ok(None) => {
                return Err(OpenGovError::Storage(
                    "canonical upsert returned no id".into(),
                ));
            }
            Err(e) => return Err(OpenGovError::Storage(e.to_string())),
        };
        drop(rows);

        tx.execute(
            "UPDATE raw_documents SET linked_document_id = ?1
             WHERE id = ?2 AND linked_document_id IS NULL",
            params![document_id, raw_id],
        )
        .await
        .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        Ok(document_id)
    }

    /// Get a canonical document by its unique key.
    pub async fn get_policy_document(&self, unique_key: &str) -> Result<Option<PolicyDocument>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policy_documents d WHERE d.unique_key = ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![unique_key])
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_policy_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenGovError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Enrichment
    // -----------------------------------------------------------------------

    /// List documents with at least one null derived field, oldest
    /// `published_at` first, each paired with its latest linked raw payload.
    pub async fn list_needing_enrichment(&self, limit: u32) -> Result<Vec<EnrichCandidate>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS},
                    (SELECT r.payload FROM raw_documents r
                      WHERE r.linked_document_id = d.id
                      ORDER BY r.fetched_at DESC LIMIT 1) AS payload
             FROM policy_documents d
             WHERE d.summary IS NULL
                OR d.key_points IS NULL
                OR d.impact_score IS NULL
                OR d.political_score IS NULL
             ORDER BY d.published_at ASC, d.id ASC
             LIMIT ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![limit])
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(EnrichCandidate {
                document: row_to_policy_document(&row)?,
                payload: row.get::<String>(16).ok(),
            });
        }
        Ok(results)
    }

    /// Apply an enrichment patch: only fields currently null are filled,
    /// fields already populated are left untouched (`COALESCE`). Re-applying
    /// a patch, or applying a conflicting later patch, can therefore never
    /// alter an existing derived value — only a full re-enrichment could.
    pub async fn apply_enrichment(&self, document_id: i64, patch: &EnrichmentPatch) -> Result<()> {
        self.check_writable()?;
        let key_points_json = match &patch.key_points {
            Some(points) => Some(
                serde_json::to_string(points)
                    .map_err(|e| OpenGovError::Storage(format!("key_points encode: {e}")))?,
            ),
            None => None,
        };
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "UPDATE policy_documents SET
                   summary         = COALESCE(summary, ?1),
                   key_points      = COALESCE(key_points, ?2),
                   impact_score    = COALESCE(impact_score, ?3),
                   political_score = COALESCE(political_score, ?4),
                   updated_at      = ?5
                 WHERE id = ?6",
                params![
                    patch.summary.as_deref(),
                    key_points_json.as_deref(),
                    patch.impact_score.map(|s| s.as_str()),
                    patch.political_score.map(i64::from),
                    now.as_str(),
                    document_id
                ],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Materialization
    // -----------------------------------------------------------------------

    /// List fully-enriched documents whose feed entry is missing or stale
    /// (document changed since it was last projected).
    pub async fn list_needing_materialization(&self, limit: u32) -> Result<Vec<PolicyDocument>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS}
             FROM policy_documents d
             LEFT JOIN feed_entries f ON f.policy_document_id = d.id
             WHERE d.summary IS NOT NULL
               AND d.key_points IS NOT NULL
               AND d.impact_score IS NOT NULL
               AND d.political_score IS NOT NULL
               AND (f.id IS NULL OR d.updated_at > f.updated_at)
             ORDER BY d.published_at ASC, d.id ASC
             LIMIT ?1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![limit])
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_policy_document(&row)?);
        }
        Ok(results)
    }

    /// Project `doc` into its feed entry, atomically. Returns the feed
    /// entry id.
    ///
    /// The projection is a full overwrite keyed by `policy_document_id` —
    /// no partial-field semantics, this table has no independent state. The
    /// same transaction records `feed_entry_id` on the document, set once
    /// (`COALESCE` keeps the first value on re-materialization).
    pub async fn materialize_document(&self, doc: &PolicyDocument) -> Result<i64> {
        self.check_writable()?;
        let key_points_json = serde_json::to_string(
            doc.key_points.as_deref().unwrap_or_default(),
        )
        .map_err(|e| OpenGovError::Storage(format!("key_points encode: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let mut rows = tx
            .query(
                "INSERT INTO feed_entries
                   (policy_document_id, title, short_text, key_points, political_score,
                    impact_score, source_url, published_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT(policy_document_id) DO UPDATE SET
                   title           = excluded.title,
                   short_text      = excluded.short_text,
                   key_points      = excluded.key_points,
                   political_score = excluded.political_score,
                   impact_score    = excluded.impact_score,
                   source_url      = excluded.source_url,
                   published_at    = excluded.published_at,
                   updated_at      = excluded.updated_at
                 RETURNING id",
                params![
                    doc.id,
                    doc.title.as_str(),
                    doc.summary.as_deref().unwrap_or_default(),
                    key_points_json.as_str(),
                    doc.political_score.map(i64::from),
                    doc.impact_score.map(|s| s.as_str()),
                    doc.source_url.as_str(),
                    doc.published_at.to_rfc3339(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        let feed_entry_id: i64 = match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
            Ok(None) => {
                return Err(OpenGovError::Storage("feed upsert returned no id".into()));
            }
            Err(e) => return Err(OpenGovError::Storage(e.to_string())),
        };
        drop(rows);

        tx.execute(
            "UPDATE policy_documents SET feed_entry_id = COALESCE(feed_entry_id, ?1)
             WHERE id = ?2",
            params![feed_entry_id, doc.id],
        )
        .await
        .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        Ok(feed_entry_id)
    }

    /// Get the feed entry projected from a given policy document.
    pub async fn get_feed_entry_by_document(
        &self,
        policy_document_id: i64,
    ) -> Result<Option<FeedEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, policy_document_id, title, short_text, key_points, political_score,
                        impact_score, source_url, published_at, created_at, updated_at
                 FROM feed_entries WHERE policy_document_id = ?1",
                params![policy_document_id],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_feed_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OpenGovError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Row counts per pipeline state.
    pub async fn counts(&self) -> Result<StorageCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                   (SELECT COUNT(*) FROM raw_documents),
                   (SELECT COUNT(*) FROM raw_documents WHERE linked_document_id IS NULL),
                   (SELECT COUNT(*) FROM policy_documents),
                   (SELECT COUNT(*) FROM policy_documents
                     WHERE summary IS NULL OR key_points IS NULL
                        OR impact_score IS NULL OR political_score IS NULL),
                   (SELECT COUNT(*) FROM feed_entries)",
                params![],
            )
            .await
            .map_err(|e| OpenGovError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(StorageCounts {
                raw_documents: row.get::<i64>(0).unwrap_or(0) as u64,
                unlinked_raw: row.get::<i64>(1).unwrap_or(0) as u64,
                policy_documents: row.get::<i64>(2).unwrap_or(0) as u64,
                needing_enrichment: row.get::<i64>(3).unwrap_or(0) as u64,
                feed_entries: row.get::<i64>(4).unwrap_or(0) as u64,
            }),
            Ok(None) => Ok(StorageCounts::default()),
            Err(e) => Err(OpenGovError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Parse an RFC 3339 column value.
fn parse_ts(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OpenGovError::Storage(format!("invalid timestamp: {e}")))
}

/// Convert a database row to a [`RawDocument`].
fn row_to_raw_document(row: &libsql::Row) -> Result<RawDocument> {
    Ok(RawDocument {
        id: row
            .get::<i64>(0)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        source_key: row
            .get::<String>(1)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        external_id: row
            .get::<String>(2)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        payload: row
            .get::<String>(3)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        fetched_at: parse_ts(
            row.get::<String>(4)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
        linked_document_id: row.get::<i64>(5).ok(),
        created_at: parse_ts(
            row.get::<String>(6)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
    })
}

/// Convert a database row (in [`POLICY_COLUMNS`] order) to a [`PolicyDocument`].
fn row_to_policy_document(row: &libsql::Row) -> Result<PolicyDocument> {
    let key_points = match row.get::<String>(10).ok() {
        Some(raw) => Some(
            serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|e| OpenGovError::Storage(format!("key_points decode: {e}")))?,
        ),
        None => None,
    };

    Ok(PolicyDocument {
        id: row
            .get::<i64>(0)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        unique_key: row
            .get::<String>(1)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        document_number: row
            .get::<String>(2)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        title: row
            .get::<String>(3)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        agency: row.get::<String>(4).ok(),
        source_url: row
            .get::<String>(5)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        published_at: parse_ts(
            row.get::<String>(6)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
        document_type: row.get::<String>(7).ok(),
        pdf_url: row.get::<String>(8).ok(),
        summary: row.get::<String>(9).ok(),
        key_points,
        impact_score: row
            .get::<String>(11)
            .ok()
            .and_then(|s| ImpactScore::parse(&s)),
        political_score: row.get::<i64>(12).ok().map(|v| v as i32),
        feed_entry_id: row.get::<i64>(13).ok(),
        created_at: parse_ts(
            row.get::<String>(14)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_ts(
            row.get::<String>(15)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
    })
}

/// Convert a database row to a [`FeedEntry`].
fn row_to_feed_entry(row: &libsql::Row) -> Result<FeedEntry> {
    let key_points_raw = row
        .get::<String>(4)
        .map_err(|e| OpenGovError::Storage(e.to_string()))?;
    let key_points = serde_json::from_str::<Vec<String>>(&key_points_raw)
        .map_err(|e| OpenGovError::Storage(format!("key_points decode: {e}")))?;

    Ok(FeedEntry {
        id: row
            .get::<i64>(0)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        policy_document_id: row
            .get::<i64>(1)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        title: row
            .get::<String>(2)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        short_text: row
            .get::<String>(3)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        key_points,
        political_score: row.get::<i64>(5).ok().map(|v| v as i32),
        impact_score: row
            .get::<String>(6)
            .ok()
            .and_then(|s| ImpactScore::parse(&s)),
        source_url: row
            .get::<String>(7)
            .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        published_at: parse_ts(
            row.get::<String>(8)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
        created_at: parse_ts(
            row.get::<String>(9)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
        updated_at: parse_ts(
            row.get::<String>(10)
                .map_err(|e| OpenGovError::Storage(e.to_string()))?,
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!(
            "opengov_test_{}_{}.db",
            std::process::id(),
            rand_suffix()
        ));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn rand_suffix() -> u128 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    }

    fn fields(unique_key: &str, title: &str) -> CanonicalFields {
        CanonicalFields {
            unique_key: unique_key.into(),
            document_number: unique_key.split(':').next_back().unwrap().into(),
            title: title.into(),
            agency: Some("Department of Examples".into()),
            source_url: "https://example.gov/doc".into(),
            published_at: Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap(),
            document_type: Some("Notice".into()),
            pdf_url: None,
        }
    }

    fn full_patch() -> EnrichmentPatch {
        EnrichmentPatch {
            summary: Some("A summary.".into()),
            key_points: Some(vec!["point one".into(), "point two".into()]),
            impact_score: Some(ImpactScore::Medium),
            political_score: Some(-20),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("opengov_mig_{}.db", rand_suffix()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn raw_insert_is_idempotent() {
        let storage = test_storage().await;

        let first = storage
            .insert_raw_document("federal_register", "2025-01234", r#"{"a":1}"#, Utc::now())
            .await
            .expect("first insert");
        assert!(first);

        // Second fetch of the same document is a no-op, payload kept as-is.
        let second = storage
            .insert_raw_document("federal_register", "2025-01234", r#"{"a":2}"#, Utc::now())
            .await
            .expect("second insert");
        assert!(!second);

        let raw = storage
            .get_raw_document("federal_register", "2025-01234")
            .await
            .expect("get raw")
            .expect("raw exists");
        assert_eq!(raw.payload, r#"{"a":1}"#);
        assert!(raw.linked_document_id.is_none());

        let counts = storage.counts().await.expect("counts");
        assert_eq!(counts.raw_documents, 1);
        assert_eq!(counts.unlinked_raw, 1);
    }

    #[tokio::test]
    async fn same_external_id_different_source_is_distinct() {
        let storage = test_storage().await;
        assert!(storage
            .insert_raw_document("federal_register", "doc-1", "{}", Utc::now())
            .await
            .unwrap());
        assert!(storage
            .insert_raw_document("state_register", "doc-1", "{}", Utc::now())
            .await
            .unwrap());
        assert_eq!(storage.counts().await.unwrap().raw_documents, 2);
    }

    #[tokio::test]
    async fn unlinked_selection_is_fifo_and_excludes_linked() {
        let storage = test_storage().await;
        for n in 1..=3 {
            storage
                .insert_raw_document("federal_register", &format!("doc-{n}"), "{}", Utc::now())
                .await
                .unwrap();
        }

        let unlinked = storage.list_unlinked_raw(10).await.expect("list");
        assert_eq!(unlinked.len(), 3);
        assert_eq!(unlinked[0].external_id, "doc-1");
        assert_eq!(unlinked[2].external_id, "doc-3");

        storage
            .upsert_canonical_and_link(unlinked[0].id, &fields("federal_register:doc-1", "T"))
            .await
            .expect("link first");

        let remaining = storage.list_unlinked_raw(10).await.expect("list again");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].external_id, "doc-2");
    }

    #[tokio::test]
    async fn canonical_upsert_converges_and_preserves_derived_fields() {
        let storage = test_storage().await;
        storage
            .insert_raw_document("federal_register", "2025-01234", "{}", Utc::now())
            .await
            .unwrap();
        let raw = storage
            .get_raw_document("federal_register", "2025-01234")
            .await
            .unwrap()
            .unwrap();

        let id1 = storage
            .upsert_canonical_and_link(raw.id, &fields("federal_register:2025-01234", "Notice X"))
            .await
            .expect("first upsert");

        storage
            .apply_enrichment(id1, &full_patch())
            .await
            .expect("enrich");

        // Re-canonicalizing (e.g. after a manual unlink) hits the same row
        // and refreshes identity fields without touching derived fields.
        storage.unlink_raw(raw.id).await.expect("unlink");
        let id2 = storage
            .upsert_canonical_and_link(
                raw.id,
                &fields("federal_register:2025-01234", "Notice X (rev)"),
            )
            .await
            .expect("second upsert");
        assert_eq!(id1, id2);

        let doc = storage
            .get_policy_document("federal_register:2025-01234")
            .await
            .unwrap()
            .expect("doc exists");
        assert_eq!(doc.title, "Notice X (rev)");
        assert_eq!(doc.summary.as_deref(), Some("A summary."));
        assert_eq!(doc.impact_score, Some(ImpactScore::Medium));
        assert_eq!(doc.political_score, Some(-20));
        assert_eq!(storage.counts().await.unwrap().policy_documents, 1);

        let raw = storage
            .get_raw_document("federal_register", "2025-01234")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw.linked_document_id, Some(id1));
    }

    #[tokio::test]
    async fn enrichment_patch_only_fills_null_fields() {
        let storage = test_storage().await;
        storage
            .insert_raw_document("federal_register", "d1", "{}", Utc::now())
            .await
            .unwrap();
        let raw = storage
            .get_raw_document("federal_register", "d1")
            .await
            .unwrap()
            .unwrap();
        let doc_id = storage
            .upsert_canonical_and_link(raw.id, &fields("federal_register:d1", "T"))
            .await
            .unwrap();

        // Partial success: only the summary came back.
        storage
            .apply_enrichment(
                doc_id,
                &EnrichmentPatch {
                    summary: Some("first".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // A later full result must not overwrite the existing summary.
        storage
            .apply_enrichment(
                doc_id,
                &EnrichmentPatch {
                    summary: Some("second".into()),
                    key_points: Some(vec!["kp".into()]),
                    impact_score: Some(ImpactScore::High),
                    political_score: Some(40),
                },
            )
            .await
            .unwrap();

        let doc = storage
            .get_policy_document("federal_register:d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.summary.as_deref(), Some("first"));
        assert_eq!(doc.key_points.as_deref(), Some(&["kp".to_string()][..]));
        assert_eq!(doc.impact_score, Some(ImpactScore::High));
        assert_eq!(doc.political_score, Some(40));
    }

    #[tokio::test]
    async fn enrichment_selection_reports_partial_documents() {
        let storage = test_storage().await;
        storage
            .insert_raw_document("federal_register", "d1", r#"{"abstract":"body"}"#, Utc::now())
            .await
            .unwrap();
        let raw = storage
            .get_raw_document("federal_register", "d1")
            .await
            .unwrap()
            .unwrap();
        let doc_id = storage
            .upsert_canonical_and_link(raw.id, &fields("federal_register:d1", "T"))
            .await
            .unwrap();

        let candidates = storage.list_needing_enrichment(10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].payload.as_deref(), Some(r#"{"abstract":"body"}"#));

        // Summary alone leaves the document a candidate.
        storage
            .apply_enrichment(
                doc_id,
                &EnrichmentPatch {
                    summary: Some("S".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(storage.list_needing_enrichment(10).await.unwrap().len(), 1);

        storage.apply_enrichment(doc_id, &full_patch()).await.unwrap();
        assert!(storage.list_needing_enrichment(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn materialization_selection_excludes_partial_and_fresh() {
        let storage = test_storage().await;
        storage
            .insert_raw_document("federal_register", "d1", "{}", Utc::now())
            .await
            .unwrap();
        let raw = storage
            .get_raw_document("federal_register", "d1")
            .await
            .unwrap()
            .unwrap();
        let doc_id = storage
            .upsert_canonical_and_link(raw.id, &fields("federal_register:d1", "T"))
            .await
            .unwrap();

        // Not enriched yet: never selected.
        assert!(storage
            .list_needing_materialization(10)
            .await
            .unwrap()
            .is_empty());

        storage.apply_enrichment(doc_id, &full_patch()).await.unwrap();
        let due = storage.list_needing_materialization(10).await.unwrap();
        assert_eq!(due.len(), 1);

        storage.materialize_document(&due[0]).await.expect("materialize");

        // Projected and unchanged since: no longer selected.
        assert!(storage
            .list_needing_materialization(10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn feed_upsert_overwrites_in_full_and_links_once() {
        let storage = test_storage().await;
        storage
            .insert_raw_document("federal_register", "d1", "{}", Utc::now())
            .await
            .unwrap();
        let raw = storage
            .get_raw_document("federal_register", "d1")
            .await
            .unwrap()
            .unwrap();
        let doc_id = storage
            .upsert_canonical_and_link(raw.id, &fields("federal_register:d1", "T"))
            .await
            .unwrap();
        storage.apply_enrichment(doc_id, &full_patch()).await.unwrap();

        let doc = storage
            .get_policy_document("federal_register:d1")
            .await
            .unwrap()
            .unwrap();
        let feed_id1 = storage.materialize_document(&doc).await.unwrap();

        // Projection equality: every feed field mirrors the document.
        let entry = storage
            .get_feed_entry_by_document(doc_id)
            .await
            .unwrap()
            .expect("feed entry");
        assert_eq!(entry.title, doc.title);
        assert_eq!(entry.short_text, doc.summary.clone().unwrap());
        assert_eq!(Some(entry.key_points.clone()), doc.key_points);
        assert_eq!(entry.political_score, doc.political_score);
        assert_eq!(entry.impact_score, doc.impact_score);
        assert_eq!(entry.source_url, doc.source_url);
        assert_eq!(entry.published_at, doc.published_at);

        // Second materialization updates in place: same row, same link.
        let feed_id2 = storage.materialize_document(&doc).await.unwrap();
        assert_eq!(feed_id1, feed_id2);

        let doc = storage
            .get_policy_document("federal_register:d1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.feed_entry_id, Some(feed_id1));
        assert_eq!(storage.counts().await.unwrap().feed_entries, 1);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("opengov_ro_{}.db", rand_suffix()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_raw_document("federal_register", "d1", "{}", Utc::now())
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro
            .insert_raw_document("federal_register", "d2", "{}", Utc::now())
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
