//! Tiered lookup: exact file hash, normalized hash, then per-segment nearest
//! neighbors — plus the greedy partial-coverage decomposition that explains a
//! normalized file as a union of other normalized files.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::importer::Importer;
use crate::store::{FileMatch, SimilarSnippet, Store};

/// Neighbors fetched per query segment.
pub const NEAR_MATCH_LIMIT: i64 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct NearMatch {
    pub snippet_hash: String,
    pub snippet_text: String,
    pub matches: Vec<SimilarSnippetInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarSnippetInfo {
    pub sample_name: String,
    pub archive: String,
    pub vendor_level: i32,
    pub distance: f64,
    pub matched_snippet_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupOutcome {
    pub hash: String,
    pub normalized_hash: String,
    pub exact_matches: Vec<MatchInfo>,
    pub normalized_matches: Vec<MatchInfo>,
    pub near_matches: Vec<NearMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchInfo {
    pub sample_name: String,
    pub archive: String,
    pub vendor_level: i32,
}

impl From<FileMatch> for MatchInfo {
    fn from(m: FileMatch) -> Self {
        MatchInfo {
            sample_name: m.sample_name.clone(),
            archive: m.archive_filename().to_string(),
            vendor_level: m.vendor_level,
        }
    }
}

fn similar_info(s: SimilarSnippet) -> SimilarSnippetInfo {
    SimilarSnippetInfo {
        sample_name: s.sample_name.clone(),
        archive: s.url.rsplit('/').next().unwrap_or(&s.url).to_string(),
        vendor_level: s.vendor_level,
        distance: s.distance,
        matched_snippet_hash: s.snippet_hash,
    }
}

/// Ingest the query file into a staging record, then run the tiers in
/// cheapest-first order. Later tiers only run when earlier tiers are empty.
pub async fn lookup_file(importer: &Importer, bytes: &[u8]) -> Result<LookupOutcome> {
    let imported = importer.import_file_contents(bytes).await?;
    let store = importer.store();
    let embedder = importer.embedder();

    let exact: Vec<MatchInfo> = store
        .archives_containing_file(&imported.hash)
        .await?
        .into_iter()
        .map(MatchInfo::from)
        .collect();

    let mut normalized = Vec::new();
    if exact.is_empty() {
        normalized = store
            .archives_containing_normalized(&imported.normalized_hash)
            .await?
            .into_iter()
            .map(MatchInfo::from)
            .collect();
    }

    let mut near = Vec::new();
    if exact.is_empty() && normalized.is_empty() {
        near = near_matches(store, embedder, &imported.normalized_hash).await?;
    }

    Ok(LookupOutcome {
        hash: imported.hash,
        normalized_hash: imported.normalized_hash,
        exact_matches: exact,
        normalized_matches: normalized,
        near_matches: near,
    })
}

/// Tier 3: embed each segment of the normalized file and pull its nearest
/// stored snippets. Segments the embedder rejects are skipped.
pub async fn near_matches(
    store: &Store,
    embedder: &Arc<dyn Embedder>,
    normalized_hash: &str,
) -> Result<Vec<NearMatch>> {
    let mut out = Vec::new();
    for snippet in store.normalized_snippets(normalized_hash).await? {
        let vector = match embedder.encode(&snippet.text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let neighbors = store.similar_snippets(&vector, NEAR_MATCH_LIMIT).await?;
        out.push(NearMatch {
            snippet_hash: snippet.hash,
            snippet_text: snippet.text,
            matches: neighbors.into_iter().map(similar_info).collect(),
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Partial-coverage decomposition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageEntry {
    pub normalized_hash: String,
    pub included_positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Coverage {
    pub found: Vec<CoverageEntry>,
    pub excluded: Option<Vec<usize>>,
}

/// Greedy set cover over snippet hashes. `ordered` is the target's snippet
/// hash sequence; `contrib` maps other normalized files to the hashes they
/// share with the target. Ties break toward the lexicographically smallest
/// normalized hash, and every position of a covered hash is recorded, so the
/// found/excluded position sets partition `0..ordered.len()`.
pub fn partial_coverage(
    ordered: &[String],
    contrib: &BTreeMap<String, BTreeSet<String>>,
) -> Coverage {
    let mut remaining: BTreeSet<&str> = ordered.iter().map(String::as_str).collect();
    let mut found = Vec::new();

    while !remaining.is_empty() {
        let mut best: Option<(&str, Vec<&str>)> = None;
        for (normalized_hash, hashes) in contrib {
            let covered: Vec<&str> =
                hashes.iter().map(String::as_str).filter(|h| remaining.contains(h)).collect();
            let better = match &best {
                None => true,
                Some((_, current)) => covered.len() > current.len(),
            };
            if better {
                best = Some((normalized_hash, covered));
            }
        }
        let (normalized_hash, covered) = match best {
            Some(b) => b,
            None => break,
        };
        // The leftover hashes only occur in already-chosen files; stop.
        if covered.is_empty() {
            break;
        }
        let covered_set: BTreeSet<&str> = covered.iter().copied().collect();
        let included_positions: Vec<usize> = ordered
            .iter()
            .enumerate()
            .filter(|(_, h)| covered_set.contains(h.as_str()))
            .map(|(i, _)| i)
            .collect();
        for h in &covered_set {
            remaining.remove(h);
        }
        found.push(CoverageEntry {
            normalized_hash: normalized_hash.to_string(),
            included_positions,
        });
    }

    let excluded = if remaining.is_empty() {
        None
    } else {
        Some(
            ordered
                .iter()
                .enumerate()
                .filter(|(_, h)| remaining.contains(h.as_str()))
                .map(|(i, _)| i)
                .collect(),
        )
    };
    Coverage { found, excluded }
}

/// Run the decomposition against the store for one normalized file.
pub async fn decompose_normalized(store: &Store, normalized_hash: &str) -> Result<Coverage> {
    let ordered = store.normalized_snippet_hashes(normalized_hash).await?;
    if ordered.is_empty() && !store.normalized_exists(normalized_hash).await? {
        return Err(Error::NotFound(format!("normalized file `{normalized_hash}`")));
    }
    let mut contrib: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (norm, snippet) in store.normalized_sharing_snippets(&ordered, normalized_hash).await? {
        contrib.entry(norm).or_default().insert(snippet);
    }
    Ok(partial_coverage(&ordered, &contrib))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn contrib(items: &[(&str, &[&str])]) -> BTreeMap<String, BTreeSet<String>> {
        items
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_full_cover_single_file() {
        let target = hashes(&["s0", "s1", "s2"]);
        let c = contrib(&[("n1", &["s0", "s1", "s2"])]);
        let cover = partial_coverage(&target, &c);
        assert_eq!(cover.found.len(), 1);
        assert_eq!(cover.found[0].normalized_hash, "n1");
        assert_eq!(cover.found[0].included_positions, vec![0, 1, 2]);
        assert_eq!(cover.excluded, None);
    }

    #[test]
    fn test_greedy_order_largest_first() {
        let target = hashes(&["s0", "s1", "s2", "s3"]);
        let c = contrib(&[("small", &["s3"]), ("big", &["s0", "s1", "s2"])]);
        let cover = partial_coverage(&target, &c);
        assert_eq!(cover.found[0].normalized_hash, "big");
        assert_eq!(cover.found[1].normalized_hash, "small");
        assert_eq!(cover.excluded, None);
    }

    #[test]
    fn test_excluded_positions() {
        let target = hashes(&["s0", "s1", "s2"]);
        let c = contrib(&[("n1", &["s1"])]);
        let cover = partial_coverage(&target, &c);
        assert_eq!(cover.found.len(), 1);
        assert_eq!(cover.found[0].included_positions, vec![1]);
        assert_eq!(cover.excluded, Some(vec![0, 2]));
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        let target = hashes(&["s0", "s1"]);
        let c = contrib(&[("bbb", &["s0"]), ("aaa", &["s0"]), ("ccc", &["s1"])]);
        let cover = partial_coverage(&target, &c);
        assert_eq!(cover.found[0].normalized_hash, "aaa");
    }

    #[test]
    fn test_no_contributors() {
        let target = hashes(&["s0", "s1"]);
        let cover = partial_coverage(&target, &BTreeMap::new());
        assert!(cover.found.is_empty());
        assert_eq!(cover.excluded, Some(vec![0, 1]));
    }

    #[test]
    fn test_duplicate_hash_positions_all_recorded() {
        let target = hashes(&["s0", "s1", "s0"]);
        let c = contrib(&[("n1", &["s0"])]);
        let cover = partial_coverage(&target, &c);
        assert_eq!(cover.found[0].included_positions, vec![0, 2]);
        assert_eq!(cover.excluded, Some(vec![1]));
    }

    #[test]
    fn test_partition_invariant() {
        let target = hashes(&["a", "b", "c", "d", "e"]);
        let c = contrib(&[
            ("n1", &["a", "b"]),
            ("n2", &["b", "c", "d"]),
            ("n3", &["e", "a"]),
        ]);
        let cover = partial_coverage(&target, &c);
        let mut all: Vec<usize> = cover
            .found
            .iter()
            .flat_map(|f| f.included_positions.iter().copied())
            .chain(cover.excluded.iter().flatten().copied())
            .collect();
        all.sort();
        // pairwise disjoint and complete
        assert_eq!(all, vec![0, 1, 2, 3, 4]);
    }
}
