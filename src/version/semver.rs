//! Semantic version parsing and precedence ordering
//!
//! Ordering follows semver.org precedence: MAJOR, MINOR and PATCH compare
//! numerically, a release outranks any of its pre-releases, pre-release
//! identifiers compare numerically or ASCII-lexically (numeric lower), and
//! build metadata never participates.

use std::cmp::Ordering;
use std::fmt;

use semver::Version;

/// A parsed version identifier ordered by semver precedence.
///
/// Equality is precedence equality, so `1.0.0+a == 1.0.0+b`.
#[derive(Debug, Clone)]
pub struct SemVer {
    inner: Version,
    original: String,
}

impl SemVer {
    /// Parse a version string, tolerating surrounding whitespace and a leading `v`.
    ///
    /// Returns `None` for malformed input so callers can exclude the entry
    /// instead of aborting.
    pub fn parse(version: &str) -> Option<Self> {
        let trimmed = version.trim();
        let stripped = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(stripped).ok().map(|inner| Self {
            inner,
            original: version.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.inner.major
    }

    pub fn minor(&self) -> u64 {
        self.inner.minor
    }

    pub fn patch(&self) -> u64 {
        self.inner.patch
    }

    pub fn is_prerelease(&self) -> bool {
        !self.inner.pre.is_empty()
    }

    /// The string this value was parsed from.
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl PartialEq for SemVer {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SemVer {}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner
            .major
            .cmp(&other.inner.major)
            .then(self.inner.minor.cmp(&other.inner.minor))
            .then(self.inner.patch.cmp(&other.inner.patch))
            // An empty pre-release sorts above any non-empty one.
            .then_with(|| self.inner.pre.cmp(&other.inner.pre))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// Compare two version strings by precedence.
///
/// Returns `None` when either side is unparsable.
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    Some(SemVer::parse(a)?.cmp(&SemVer::parse(b)?))
}

/// Stable sort, highest precedence first. Unparsable entries are dropped.
///
/// Input that already arrives in descending order (a registry's native
/// ordering) comes out unchanged, so both paths agree.
pub fn sort_descending(versions: &[String]) -> Vec<String> {
    let mut parsed: Vec<SemVer> = versions.iter().filter_map(|v| SemVer::parse(v)).collect();
    parsed.sort_by(|a, b| b.cmp(a));
    parsed.into_iter().map(|v| v.original).collect()
}

/// Highest version without a pre-release component.
pub fn max_release<'a, I>(versions: I) -> Option<SemVer>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(SemVer::parse)
        .filter(|v| !v.is_prerelease())
        .max()
}

/// Increment PATCH of a plain `X.Y.Z` version.
///
/// Pre-release or build suffixes are rejected; a leading `v` is dropped.
/// Returns `None` when PATCH is already `u64::MAX`.
pub fn bump_patch(version: &str) -> Option<String> {
    let parsed = SemVer::parse(version)?;
    if parsed.is_prerelease() || !parsed.inner.build.is_empty() {
        return None;
    }
    let patch = parsed.patch().checked_add(1)?;
    Some(format!("{}.{}.{}", parsed.major(), parsed.minor(), patch))
}
