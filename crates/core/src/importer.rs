//! Ingestion: archive download, unpack, walk, and the per-file pipeline
//! (parse → normalize → segment → hash → embed → store).
//!
//! One archive is one transaction: either every file, edge, and snippet of
//! the archive becomes visible together or nothing does. Per-file parse
//! failures skip the file and keep the archive going; unpack and network
//! failures abandon the whole unit with nothing written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use ignore::WalkBuilder;
use sqlx::PgConnection;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::fingerprint::{sha256_hex, StreamingHash};
use crate::norm::normalize;
use crate::python::{parse_module, unparse_module, ParseError};
use crate::split::segment_source;
use crate::store::{ArchiveRow, Store};

/// Directory names that mark bundled third-party code.
const VENDOR_DIRS: &[&str] = &["vendor", "_vendor", "vendored", "_vendored"];

/// Directory names never walked.
const SKIP_DIRS: &[&str] = &[".venv"];

/// Timestamp used when an archive arrives without upload metadata; sorts
/// after every real upload time.
pub fn placeholder_timestamp() -> DateTime<Utc> {
    // 3000-01-01T00:00:00Z
    DateTime::<Utc>::from_timestamp(32_503_680_000, 0).unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone)]
pub struct ImportedFile {
    pub hash: String,
    pub normalized_hash: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ArchiveStats {
    pub files: usize,
    pub skipped: usize,
    pub empty: usize,
}

pub struct Importer {
    store: Store,
    embedder: Arc<dyn Embedder>,
}

impl Importer {
    pub fn new(store: Store, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Download and ingest one distribution URL. The claimed hash (from the
    /// package index) short-circuits before the download; the real hash is
    /// computed during streaming and checked again before unpacking.
    pub async fn import_url(
        &self,
        claimed_hash: Option<&str>,
        url: &str,
        timestamp: DateTime<Utc>,
        project: Option<&str>,
        version: Option<&str>,
    ) -> Result<String> {
        if let Some(hash) = claimed_hash {
            if self.store.archive_exists(hash).await? {
                debug!(hash, url, "archive already ingested (claimed hash)");
                return Ok(hash.to_string());
            }
        }

        let scratch = tempfile::tempdir()?;
        let filename = url.rsplit('/').next().unwrap_or("archive");
        let local = scratch.path().join(filename);
        let hash = self.download(url, &local).await?;
        self.import_archive(&hash, url, timestamp, project, version, &local).await?;
        Ok(hash)
    }

    /// Ingest an archive already on disk, hashing it first.
    pub async fn import_local_archive(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let hash = sha256_hex(&bytes);
        let url = path.display().to_string();
        self.import_archive(&hash, &url, placeholder_timestamp(), None, None, path).await?;
        Ok(hash)
    }

    /// Unpack and ingest one archive inside a single transaction.
    pub async fn import_archive(
        &self,
        hash: &str,
        url: &str,
        timestamp: DateTime<Utc>,
        project: Option<&str>,
        version: Option<&str>,
        local: &Path,
    ) -> Result<()> {
        if self.store.archive_exists(hash).await? {
            debug!(hash, url, "archive already ingested");
            return Ok(());
        }
        println!("[FILE] {hash} from {url}");

        let scratch = tempfile::tempdir()?;
        let archive_path = local.to_path_buf();
        let dest = scratch.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &dest))
            .await
            .map_err(|e| Error::ArchiveUnpack(e.to_string()))??;

        let mut tx = self.store.begin().await?;
        self.store
            .insert_archive(
                &mut tx,
                &ArchiveRow {
                    hash: hash.to_string(),
                    url: url.to_string(),
                    timestamp,
                    canonical_name: project.map(str::to_string),
                    version: version.map(str::to_string),
                },
            )
            .await?;

        let stats = self.import_tree(&mut tx, hash, scratch.path()).await?;
        tx.commit().await?;

        println!(
            "[DONE] {hash} files={} skipped={} empty={}",
            stats.files, stats.skipped, stats.empty
        );
        info!(
            hash,
            url,
            files = stats.files,
            skipped = stats.skipped,
            "archive ingested"
        );
        Ok(())
    }

    /// Ingest a single source file as a staging record (no archive row).
    pub async fn import_one_local_file(&self, path: &Path) -> Result<ImportedFile> {
        let bytes = tokio::fs::read(path).await?;
        self.import_file_contents(&bytes).await
    }

    /// Ingest raw source bytes as a staging record (no archive row).
    pub async fn import_file_contents(&self, bytes: &[u8]) -> Result<ImportedFile> {
        let mut tx = self.store.begin().await?;
        let imported = self.import_file_bytes(&mut tx, bytes).await?;
        tx.commit().await?;
        imported.ok_or_else(|| {
            Error::InvalidInput("file has no content after normalization".into())
        })
    }

    // -----------------------------------------------------------------------
    // Archive walk
    // -----------------------------------------------------------------------

    async fn import_tree(
        &self,
        conn: &mut PgConnection,
        archive_hash: &str,
        root: &Path,
    ) -> Result<ArchiveStats> {
        let mut stats = ArchiveStats::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (abs, rel) in collect_python_files(root) {
            let bytes = tokio::fs::read(&abs).await?;
            match self.import_file_bytes(conn, &bytes).await {
                Ok(Some(imported)) => {
                    // one representative placement per (archive, file) pair
                    if seen.insert(imported.hash.clone()) {
                        let vendor_level = vendor_level(&rel);
                        self.store
                            .insert_file_in_archive(
                                conn,
                                archive_hash,
                                &imported.hash,
                                &rel,
                                vendor_level,
                            )
                            .await?;
                    }
                    stats.files += 1;
                    println!("  [OK] {rel}");
                }
                Ok(None) => {
                    stats.empty += 1;
                    println!("  [EMPTY] {rel}");
                }
                Err(e) if e.is_file_skip() => {
                    stats.skipped += 1;
                    println!("  [SKIP] {rel}");
                    debug!(file = rel.as_str(), error = %e, "file skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Per-file pipeline (idempotent, cheapest check first)
    // -----------------------------------------------------------------------

    /// Returns `None` when the file segments to nothing — the only case
    /// where a source file produces no record at all.
    pub async fn import_file_bytes(
        &self,
        conn: &mut PgConnection,
        bytes: &[u8],
    ) -> Result<Option<ImportedFile>> {
        let file_hash = sha256_hex(bytes);
        if let Some(normalized_hash) = self.store.file_normalized_hash(&file_hash).await? {
            return Ok(Some(ImportedFile { hash: file_hash, normalized_hash }));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|_| ParseError("source is not valid utf-8".into()))?;
        let mut module = parse_module(text)?;
        normalize(&mut module);
        let serialized = unparse_module(&module);
        let normalized_hash = sha256_hex(serialized.as_bytes());

        if self.store.normalized_exists(&normalized_hash).await? {
            self.store.insert_file(conn, &file_hash, &normalized_hash).await?;
            return Ok(Some(ImportedFile { hash: file_hash, normalized_hash }));
        }

        let segments = segment_source(&serialized)?;
        if segments.is_empty() {
            return Ok(None);
        }

        let mut sequence_hashes = Vec::with_capacity(segments.len());
        let mut fresh: Vec<(String, String)> = Vec::new();
        for seg in &segments {
            let snippet_hash = sha256_hex(seg.text.as_bytes());
            if self.store.insert_snippet(conn, &snippet_hash, &seg.text).await? {
                fresh.push((snippet_hash.clone(), seg.text.clone()));
            }
            sequence_hashes.push(snippet_hash);
        }

        // Only newly inserted snippets are embedded; a failure leaves the
        // embedding unset and tier-3 skips the row until backfill.
        for (snippet_hash, snippet_text) in &fresh {
            match self.embedder.encode(snippet_text) {
                Ok(vector) => {
                    self.store.set_snippet_embedding(conn, snippet_hash, &vector).await?
                }
                Err(e) => {
                    warn!(snippet = snippet_hash.as_str(), error = %e, "embedding unset")
                }
            }
        }

        self.store.insert_normalized(conn, &normalized_hash).await?;
        for (sequence, snippet_hash) in sequence_hashes.iter().enumerate() {
            self.store
                .insert_snippet_ref(conn, &normalized_hash, snippet_hash, sequence as i32)
                .await?;
        }
        self.store.insert_file(conn, &file_hash, &normalized_hash).await?;
        Ok(Some(ImportedFile { hash: file_hash, normalized_hash }))
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    async fn download(&self, url: &str, dest: &Path) -> Result<String> {
        let response = reqwest::get(url).await?.error_for_status()?;
        let mut hasher = StreamingHash::new();
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(hasher.finish())
    }
}

// ---------------------------------------------------------------------------
// Unpack
// ---------------------------------------------------------------------------

/// Unpack by suffix: `.zip`/`.whl` via zip, everything else as a tarball
/// (gzip-compressed unless the name says otherwise).
fn unpack_archive(archive: &Path, dest: &Path) -> Result<()> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let result = if name.ends_with(".zip") || name.ends_with(".whl") {
        unpack_zip(archive, dest)
    } else {
        unpack_tar(archive, dest, name.ends_with(".gz") || name.ends_with(".tgz"))
    };
    result.map_err(|e| Error::ArchiveUnpack(format!("{name}: {e}")))
}

fn unpack_zip(archive: &Path, dest: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    zip.extract(dest).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn unpack_tar(archive: &Path, dest: &Path, gzipped: bool) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    if gzipped {
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder).unpack(dest)
    } else {
        tar::Archive::new(file).unpack(dest)
    }
}

// ---------------------------------------------------------------------------
// Walk
// ---------------------------------------------------------------------------

/// Collect `.py` files under `root` in a stable order, pruning skip dirs.
fn collect_python_files(root: &Path) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !SKIP_DIRS.contains(&name.as_ref());
            }
            true
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let abs = entry.path().to_path_buf();
        if abs.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        let rel = abs
            .strip_prefix(root)
            .unwrap_or(&abs)
            .to_string_lossy()
            .replace('\\', "/");
        files.push((abs, rel));
    }
    files
}

/// Count path components naming a bundled-dependency directory.
pub fn vendor_level(rel_path: &str) -> i32 {
    let mut parts: Vec<&str> = rel_path.split('/').collect();
    parts.pop(); // the file name itself never counts
    parts.iter().filter(|p| VENDOR_DIRS.contains(p)).count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_level() {
        assert_eq!(vendor_level("pkg/mod.py"), 0);
        assert_eq!(vendor_level("pkg/_vendor/six.py"), 1);
        assert_eq!(vendor_level("pkg/_vendor/requests/vendored/chardet.py"), 2);
        assert_eq!(vendor_level("vendor.py"), 0);
        assert_eq!(vendor_level("vendored/vendor/_vendor/_vendored/x.py"), 4);
    }

    #[test]
    fn test_collect_python_files_prunes_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg/.venv/lib")).unwrap();
        std::fs::create_dir_all(root.join("pkg/sub")).unwrap();
        std::fs::write(root.join("pkg/b.py"), "x = 1\n").unwrap();
        std::fs::write(root.join("pkg/a.py"), "x = 2\n").unwrap();
        std::fs::write(root.join("pkg/sub/c.py"), "x = 3\n").unwrap();
        std::fs::write(root.join("pkg/.venv/lib/d.py"), "x = 4\n").unwrap();
        std::fs::write(root.join("pkg/readme.txt"), "not python").unwrap();

        let rels: Vec<String> =
            collect_python_files(root).into_iter().map(|(_, rel)| rel).collect();
        assert_eq!(rels, vec!["pkg/a.py", "pkg/b.py", "pkg/sub/c.py"]);
    }

    #[test]
    fn test_placeholder_timestamp_is_far_future() {
        assert!(placeholder_timestamp() > Utc::now());
    }
}
