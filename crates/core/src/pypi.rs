//! PyPI simple-index client and the project-level ingestion driver helpers:
//! name canonicalization, candidate ranking, newest-first version ordering,
//! and the shard spec.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::error::{Error, Result};

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";
const ACCEPT_JSON: &str = "application/vnd.pypi.simple.v1+json";

// ---------------------------------------------------------------------------
// Distribution metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageType {
    Sdist,
    Wheel,
    Other,
}

#[derive(Debug, Clone)]
pub struct DistributionPackage {
    pub filename: String,
    pub url: String,
    pub sha256: Option<String>,
    pub upload_time: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub package_type: PackageType,
}

/// PEP-503 name normalization: runs of `-`, `_`, `.` collapse to `-`.
pub fn canonicalize_name(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[-_.]+").expect("static regex"));
    re.replace_all(name, "-").to_lowercase()
}

/// Candidate preference for one released version.
pub fn rank(dp: &DistributionPackage) -> i32 {
    if dp.package_type == PackageType::Sdist {
        10
    } else if dp.filename.contains("-py3-none-any") {
        5
    } else if dp.filename.contains("-py2.py3-none-any") {
        4
    } else if dp.filename.contains("abi3") {
        2
    } else if dp.filename.contains("cp312") {
        1
    } else if dp.package_type != PackageType::Wheel {
        -1
    } else {
        0
    }
}

/// Derive `(version, package_type)` from a distribution filename.
pub fn classify_filename(filename: &str) -> (Option<String>, PackageType) {
    if let Some(stem) = filename.strip_suffix(".whl") {
        let version = stem.split('-').nth(1).map(str::to_string);
        return (version, PackageType::Wheel);
    }
    for ext in [".tar.gz", ".tgz", ".tar.bz2", ".tar.xz", ".tar", ".zip"] {
        if let Some(stem) = filename.strip_suffix(ext) {
            let version = stem.rsplit_once('-').map(|(_, v)| v.to_string());
            return (version, PackageType::Sdist);
        }
    }
    (None, PackageType::Other)
}

// ---------------------------------------------------------------------------
// Version ordering (lenient PEP 440)
// ---------------------------------------------------------------------------

/// Sort key good enough to pick newest-first: epoch, numeric release
/// components, then a pre/post tag. Unparseable versions sort lowest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionKey {
    epoch: u64,
    release: Vec<u64>,
    tag_rank: i8,
    tag_num: u64,
}

pub fn version_key(version: &str) -> VersionKey {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r"^(?:(\d+)!)?(\d+(?:\.\d+)*)(?:[._-]?(a|b|c|rc|alpha|beta|pre|preview|dev|post|r|rev)\.?(\d*))?",
        )
        .expect("static regex")
    });
    let v = version.trim().to_lowercase();
    let caps = match re.captures(&v) {
        Some(c) => c,
        None => return VersionKey { epoch: 0, release: Vec::new(), tag_rank: -5, tag_num: 0 },
    };
    let epoch = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let release = caps
        .get(2)
        .map(|m| m.as_str().split('.').filter_map(|p| p.parse().ok()).collect())
        .unwrap_or_default();
    let tag_rank = match caps.get(3).map(|m| m.as_str()) {
        Some("dev") => -4,
        Some("a") | Some("alpha") => -3,
        Some("b") | Some("beta") => -2,
        Some("c") | Some("rc") | Some("pre") | Some("preview") => -1,
        Some("post") | Some("r") | Some("rev") => 1,
        _ => 0,
    };
    let tag_num = caps.get(4).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    VersionKey { epoch, release, tag_rank, tag_num }
}

// ---------------------------------------------------------------------------
// Shard spec
// ---------------------------------------------------------------------------

/// Parse `"3,5-9"` into `{3, 5, 6, 7, 8, 9}`.
pub fn parse_shard_spec(spec: &str) -> Result<BTreeSet<u32>> {
    let mut out = BTreeSet::new();
    for term in spec.split(',') {
        let term = term.trim();
        match term.split_once('-') {
            Some((a, b)) => {
                let a: u32 = a
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad shard term `{term}`")))?;
                let b: u32 = b
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad shard term `{term}`")))?;
                out.extend(a..=b);
            }
            None => {
                let n: u32 = term
                    .parse()
                    .map_err(|_| Error::InvalidInput(format!("bad shard term `{term}`")))?;
                out.insert(n);
            }
        }
    }
    Ok(out)
}

/// Shard a URL: the sha256 digest interpreted big-endian, modulo `total`.
pub fn url_shard(url: &str, total: u32) -> u32 {
    let digest = Sha256::digest(url.as_bytes());
    let mut acc: u64 = 0;
    for byte in digest {
        acc = (acc * 256 + byte as u64) % total as u64;
    }
    acc as u32
}

// ---------------------------------------------------------------------------
// Simple-index client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProjectPageRaw {
    #[serde(default)]
    files: Vec<ProjectFileRaw>,
}

#[derive(Debug, Deserialize)]
struct ProjectFileRaw {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: HashMap<String, String>,
    #[serde(rename = "upload-time", default)]
    upload_time: Option<DateTime<Utc>>,
}

pub struct PyPiClient {
    client: reqwest::Client,
    index_url: String,
}

impl PyPiClient {
    pub fn new(index_url: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            index_url: index_url.unwrap_or(DEFAULT_INDEX_URL).trim_end_matches('/').to_string(),
        }
    }

    /// Fetch a project page as distribution packages. 404 maps to NotFound.
    pub async fn project_page(&self, project: &str) -> Result<Vec<DistributionPackage>> {
        let canonical = canonicalize_name(project);
        let url = format!("{}/{}/", self.index_url, canonical);
        let response = self.client.get(&url).header("accept", ACCEPT_JSON).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("project `{canonical}`")));
        }
        let page: ProjectPageRaw = response.error_for_status()?.json().await?;
        Ok(page
            .files
            .into_iter()
            .map(|f| {
                let (version, package_type) = classify_filename(&f.filename);
                DistributionPackage {
                    sha256: f.hashes.get("sha256").cloned(),
                    upload_time: f.upload_time,
                    version,
                    package_type,
                    filename: f.filename,
                    url: f.url,
                }
            })
            .collect())
    }
}

/// Newest version first, best-ranked candidate per version. Versions whose
/// best candidate is neither sdist nor wheel are dropped.
pub fn select_candidates(packages: &[DistributionPackage]) -> Vec<DistributionPackage> {
    let mut versions: Vec<String> = packages
        .iter()
        .filter_map(|p| p.version.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    versions.sort_by_key(|v| std::cmp::Reverse(version_key(v)));

    let mut out = Vec::new();
    for version in versions {
        // first maximum wins on rank ties
        let mut best: Option<&DistributionPackage> = None;
        for p in packages.iter().filter(|p| p.version.as_deref() == Some(version.as_str())) {
            if best.map_or(true, |b| rank(p) > rank(b)) {
                best = Some(p);
            }
        }
        if let Some(best) = best {
            if matches!(best.package_type, PackageType::Sdist | PackageType::Wheel) {
                out.push(best.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dp(package_type: PackageType, filename: &str) -> DistributionPackage {
        DistributionPackage {
            filename: filename.to_string(),
            url: format!("https://files.example/{filename}"),
            sha256: None,
            upload_time: None,
            version: classify_filename(filename).0,
            package_type,
        }
    }

    #[test]
    fn test_rank() {
        let expected = [
            (dp(PackageType::Sdist, "foo.tar.gz"), 10),
            (dp(PackageType::Wheel, "foo-py3-none-any.whl"), 5),
            (dp(PackageType::Wheel, "foo-py2.py3-none-any.whl"), 4),
            (dp(PackageType::Wheel, "foo-abi3-cp310-x86_64-any.whl"), 2),
            (dp(PackageType::Wheel, "foo-cp312-x86_64-any.whl"), 1),
            (dp(PackageType::Wheel, "foo-cp310-x86_64-any.whl"), 0),
            (dp(PackageType::Other, "foo-x86_64.tar"), -1),
        ];
        for (pkg, want) in expected {
            assert_eq!(rank(&pkg), want, "{}", pkg.filename);
        }
    }

    #[test]
    fn test_unpack_range() {
        assert_eq!(
            parse_shard_spec("3,5-9").unwrap(),
            BTreeSet::from([3, 5, 6, 7, 8, 9])
        );
        assert_eq!(parse_shard_spec("0-2").unwrap(), BTreeSet::from([0, 1, 2]));
        assert!(parse_shard_spec("a-b").is_err());
    }

    #[test]
    fn test_canonicalize_name() {
        assert_eq!(canonicalize_name("Foo.Bar_baz"), "foo-bar-baz");
        assert_eq!(canonicalize_name("six"), "six");
        assert_eq!(canonicalize_name("zope.interface"), "zope-interface");
    }

    #[test]
    fn test_classify_filename() {
        assert_eq!(
            classify_filename("six-1.16.0.tar.gz"),
            (Some("1.16.0".to_string()), PackageType::Sdist)
        );
        assert_eq!(
            classify_filename("six-1.16.0-py2.py3-none-any.whl"),
            (Some("1.16.0".to_string()), PackageType::Wheel)
        );
        assert_eq!(classify_filename("weird.egg"), (None, PackageType::Other));
    }

    #[test]
    fn test_version_ordering() {
        let mut versions = vec!["1.9", "1.10", "2.0a1", "2.0", "1.10.post1", "2.0rc1"];
        versions.sort_by_key(|v| std::cmp::Reverse(version_key(v)));
        assert_eq!(versions, vec!["2.0", "2.0rc1", "2.0a1", "1.10.post1", "1.10", "1.9"]);
    }

    #[test]
    fn test_url_shard_is_stable() {
        let shard = url_shard("https://files.example/six-1.16.0.tar.gz", 100);
        assert!(shard < 100);
        assert_eq!(shard, url_shard("https://files.example/six-1.16.0.tar.gz", 100));
        // different urls spread across shards
        let other = url_shard("https://files.example/urllib3-1.21.1.tar.gz", 100);
        assert!(other < 100);
    }

    #[test]
    fn test_select_candidates_prefers_sdist_newest_first() {
        let packages = vec![
            dp(PackageType::Wheel, "foo-1.0-py3-none-any.whl"),
            dp(PackageType::Sdist, "foo-1.0.tar.gz"),
            dp(PackageType::Sdist, "foo-2.0.tar.gz"),
        ];
        let picked = select_candidates(&packages);
        let names: Vec<&str> = picked.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["foo-2.0.tar.gz", "foo-1.0.tar.gz"]);
    }
}
