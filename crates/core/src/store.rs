//! Postgres persistence for the archive → file → normalized-file → snippet
//! graph, plus the pgvector HNSW index over snippet embeddings.
//!
//! Everything is content-addressed and append-only: inserts are
//! `ON CONFLICT DO NOTHING`, rows are never updated after insertion, and the
//! single exception is `snippet.embedding`, which transitions once from NULL
//! to a concrete vector. Ingestion writes go through one transaction per
//! archive; readers never see a partially ingested archive.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchiveRow {
    pub hash: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub canonical_name: Option<String>,
    pub version: Option<String>,
}

impl ArchiveRow {
    /// Last path component of the source URL.
    pub fn filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

/// One `file_in_archive` edge joined with its archive, the shape every
/// lookup tier returns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileMatch {
    pub archive_hash: String,
    pub url: String,
    pub sample_name: String,
    pub vendor_level: i32,
}

impl FileMatch {
    pub fn archive_filename(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SnippetRow {
    pub hash: String,
    pub text: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArchiveFileEntry {
    pub normalized_hash: String,
    pub sample_name: String,
}

/// A tier-3 neighbor: the snippet, its distance, and one placement.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SimilarSnippet {
    pub archive_hash: String,
    pub url: String,
    pub sample_name: String,
    pub vendor_level: i32,
    pub normalized_file_hash: String,
    pub snippet_hash: String,
    pub snippet_text: String,
    pub distance: f64,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
    dim: usize,
}

impl Store {
    /// Connect with the embedding dimension the schema was (or will be)
    /// created with.
    pub async fn connect(database_url: &str, dim: usize) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(database_url).await?;
        Ok(Self { pool, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    pub async fn create_schema(&self, clear: bool) -> Result<()> {
        if clear {
            sqlx::query(
                "DROP TABLE IF EXISTS snippet_in_normalized_file, file_in_archive, file, \
                 normalized_file, snippet, archive CASCADE",
            )
            .execute(&self.pool)
            .await?;
        }
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector").execute(&self.pool).await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS archive (
                hash TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                canonical_name TEXT,
                version TEXT
            )"
            .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_archive_url ON archive (url)".to_string(),
            "CREATE INDEX IF NOT EXISTS ix_archive_canonical_name ON archive (canonical_name)"
                .to_string(),
            "CREATE TABLE IF NOT EXISTS normalized_file (hash TEXT PRIMARY KEY)".to_string(),
            "CREATE TABLE IF NOT EXISTS file (
                hash TEXT PRIMARY KEY,
                normalized_hash TEXT NOT NULL REFERENCES normalized_file (hash)
            )"
            .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_file_normalized_hash ON file (normalized_hash)"
                .to_string(),
            "CREATE TABLE IF NOT EXISTS file_in_archive (
                id BIGSERIAL PRIMARY KEY,
                archive_hash TEXT NOT NULL REFERENCES archive (hash),
                file_hash TEXT NOT NULL REFERENCES file (hash),
                sample_name TEXT NOT NULL,
                vendor_level INTEGER NOT NULL
            )"
            .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_file_in_archive_archive_hash \
             ON file_in_archive (archive_hash)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_file_in_archive_file_hash \
             ON file_in_archive (file_hash)"
                .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS snippet (
                    hash TEXT PRIMARY KEY,
                    text TEXT NOT NULL,
                    embedding vector({})
                )",
                self.dim
            ),
            "CREATE TABLE IF NOT EXISTS snippet_in_normalized_file (
                id BIGSERIAL PRIMARY KEY,
                normalized_file_hash TEXT NOT NULL REFERENCES normalized_file (hash),
                snippet_hash TEXT NOT NULL REFERENCES snippet (hash),
                sequence INTEGER NOT NULL
            )"
            .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_snippet_in_normalized_file_normalized_file_hash \
             ON snippet_in_normalized_file (normalized_file_hash)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_snippet_in_normalized_file_snippet_hash \
             ON snippet_in_normalized_file (snippet_hash)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_snippet_embedding ON snippet \
             USING hnsw (embedding vector_l2_ops) WITH (m = 16, ef_construction = 64)"
                .to_string(),
        ];
        for statement in statements {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Point reads
    // -----------------------------------------------------------------------

    pub async fn archive_exists(&self, hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM archive WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_archive(&self, hash: &str) -> Result<Option<ArchiveRow>> {
        let row = sqlx::query_as::<_, ArchiveRow>(
            "SELECT hash, url, timestamp, canonical_name, version FROM archive WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// The normalized hash a file points at, if the file is known.
    pub async fn file_normalized_hash(&self, file_hash: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT normalized_hash FROM file WHERE hash = $1")
            .bind(file_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("normalized_hash")))
    }

    pub async fn normalized_exists(&self, hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM normalized_file WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_snippet(&self, hash: &str) -> Result<Option<SnippetRow>> {
        let row = sqlx::query_as::<_, SnippetRow>("SELECT hash, text FROM snippet WHERE hash = $1")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Upserts (insert-if-absent)
    // -----------------------------------------------------------------------

    pub async fn insert_archive(&self, conn: &mut PgConnection, row: &ArchiveRow) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO archive (hash, url, timestamp, canonical_name, version) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (hash) DO NOTHING",
        )
        .bind(&row.hash)
        .bind(&row.url)
        .bind(row.timestamp)
        .bind(&row.canonical_name)
        .bind(&row.version)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_normalized(&self, conn: &mut PgConnection, hash: &str) -> Result<bool> {
        let result =
            sqlx::query("INSERT INTO normalized_file (hash) VALUES ($1) ON CONFLICT (hash) DO NOTHING")
                .bind(hash)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_file(
        &self,
        conn: &mut PgConnection,
        file_hash: &str,
        normalized_hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO file (hash, normalized_hash) VALUES ($1, $2) \
             ON CONFLICT (hash) DO NOTHING",
        )
        .bind(file_hash)
        .bind(normalized_hash)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_file_in_archive(
        &self,
        conn: &mut PgConnection,
        archive_hash: &str,
        file_hash: &str,
        sample_name: &str,
        vendor_level: i32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO file_in_archive (archive_hash, file_hash, sample_name, vendor_level) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(archive_hash)
        .bind(file_hash)
        .bind(sample_name)
        .bind(vendor_level)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Insert one snippet; returns whether the row is new (and therefore
    /// still needs an embedding).
    pub async fn insert_snippet(
        &self,
        conn: &mut PgConnection,
        hash: &str,
        text: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO snippet (hash, text) VALUES ($1, $2) ON CONFLICT (hash) DO NOTHING",
        )
        .bind(hash)
        .bind(text)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The one-shot embedding write; only ever fills a NULL column.
    pub async fn set_snippet_embedding(
        &self,
        conn: &mut PgConnection,
        hash: &str,
        embedding: &[f32],
    ) -> Result<()> {
        sqlx::query("UPDATE snippet SET embedding = $2 WHERE hash = $1 AND embedding IS NULL")
            .bind(hash)
            .bind(Vector::from(embedding.to_vec()))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn insert_snippet_ref(
        &self,
        conn: &mut PgConnection,
        normalized_hash: &str,
        snippet_hash: &str,
        sequence: i32,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO snippet_in_normalized_file (normalized_file_hash, snippet_hash, sequence) \
             VALUES ($1, $2, $3)",
        )
        .bind(normalized_hash)
        .bind(snippet_hash)
        .bind(sequence)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enumerations
    // -----------------------------------------------------------------------

    /// Snippets of a normalized file, in sequence order.
    pub async fn normalized_snippets(&self, normalized_hash: &str) -> Result<Vec<SnippetRow>> {
        let rows = sqlx::query_as::<_, SnippetRow>(
            "SELECT s.hash, s.text FROM snippet s \
             JOIN snippet_in_normalized_file sinf ON sinf.snippet_hash = s.hash \
             WHERE sinf.normalized_file_hash = $1 ORDER BY sinf.sequence",
        )
        .bind(normalized_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Snippet hashes of a normalized file, in sequence order.
    pub async fn normalized_snippet_hashes(&self, normalized_hash: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT snippet_hash FROM snippet_in_normalized_file \
             WHERE normalized_file_hash = $1 ORDER BY sequence",
        )
        .bind(normalized_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("snippet_hash")).collect())
    }

    /// Files of an archive with their normalized hashes, in placement order.
    pub async fn archive_files(&self, archive_hash: &str) -> Result<Vec<ArchiveFileEntry>> {
        let rows = sqlx::query_as::<_, ArchiveFileEntry>(
            "SELECT f.normalized_hash, fia.sample_name FROM file_in_archive fia \
             JOIN file f ON f.hash = fia.file_hash \
             WHERE fia.archive_hash = $1 ORDER BY fia.id",
        )
        .bind(archive_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Tier 1: placements of a file hash, vendored evidence last.
    pub async fn archives_containing_file(&self, file_hash: &str) -> Result<Vec<FileMatch>> {
        let rows = sqlx::query_as::<_, FileMatch>(
            "SELECT fia.archive_hash, a.url, fia.sample_name, fia.vendor_level \
             FROM file_in_archive fia JOIN archive a ON a.hash = fia.archive_hash \
             WHERE fia.file_hash = $1 ORDER BY fia.vendor_level",
        )
        .bind(file_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Tier 2: placements of any file in a normalized equivalence class.
    pub async fn archives_containing_normalized(
        &self,
        normalized_hash: &str,
    ) -> Result<Vec<FileMatch>> {
        let rows = sqlx::query_as::<_, FileMatch>(
            "SELECT fia.archive_hash, a.url, fia.sample_name, fia.vendor_level \
             FROM file f \
             JOIN file_in_archive fia ON fia.file_hash = f.hash \
             JOIN archive a ON a.hash = fia.archive_hash \
             WHERE f.normalized_hash = $1 ORDER BY fia.vendor_level",
        )
        .bind(normalized_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Tier 3: the k nearest embedded snippets with their full ancestry.
    /// Snippets with unset embeddings never rank.
    pub async fn similar_snippets(&self, embedding: &[f32], k: i64) -> Result<Vec<SimilarSnippet>> {
        let rows = sqlx::query_as::<_, SimilarSnippet>(
            "SELECT fia.archive_hash, a.url, fia.sample_name, fia.vendor_level, \
                    sinf.normalized_file_hash, s.hash AS snippet_hash, \
                    s.text AS snippet_text, (s.embedding <-> $1) AS distance \
             FROM snippet s \
             JOIN snippet_in_normalized_file sinf ON sinf.snippet_hash = s.hash \
             JOIN file f ON f.normalized_hash = sinf.normalized_file_hash \
             JOIN file_in_archive fia ON fia.file_hash = f.hash \
             JOIN archive a ON a.hash = fia.archive_hash \
             WHERE s.embedding IS NOT NULL \
             ORDER BY distance LIMIT $2",
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(k)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct normalized files containing a snippet, lexicographic.
    pub async fn normalized_containing_snippet(&self, snippet_hash: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT normalized_file_hash FROM snippet_in_normalized_file \
             WHERE snippet_hash = $1 ORDER BY normalized_file_hash",
        )
        .bind(snippet_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("normalized_file_hash")).collect())
    }

    /// All (normalized_file, snippet) pairs sharing any of the given snippet
    /// hashes, excluding one normalized file — the partial-coverage input.
    pub async fn normalized_sharing_snippets(
        &self,
        snippet_hashes: &[String],
        exclude_normalized: &str,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT normalized_file_hash, snippet_hash \
             FROM snippet_in_normalized_file \
             WHERE snippet_hash = ANY($1) AND normalized_file_hash <> $2",
        )
        .bind(snippet_hashes)
        .bind(exclude_normalized)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get("normalized_file_hash"), r.get("snippet_hash")))
            .collect())
    }
}
