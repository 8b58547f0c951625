//! Tag-oriented semantic versions
//!
//! Container tags rarely follow strict SemVer (`v1.2`, `0.21.0-debian-10-r9`,
//! `latest`), so this type accepts any string and orders tags by their numeric
//! prefix and then by their metadata suffix split into digit and non-digit words.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?([0-9]+)(\.[0-9]+)?(\.[0-9]+)?(.*)$").expect("semver regex is valid")
});

/// A version parsed from an image tag.
///
/// Equality is textual: `v1.0.0` and `1.0.0` are different versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemVer {
    major: i64,
    minor: i64,
    patch: i64,
    metadata: String,
    original: String,
}

impl SemVer {
    /// Parse a tag into a version.
    ///
    /// Parsing never fails:
    /// - "v1.2.3-alpha" -> 1.2.3 with metadata "-alpha"
    /// - "1.2" -> 1.2.0
    /// - "latest" -> 0.0.0 with metadata "latest"
    pub fn parse(tag: &str) -> Self {
        let mut version = SemVer {
            major: 0,
            minor: 0,
            patch: 0,
            metadata: String::new(),
            original: tag.to_string(),
        };

        let Some(caps) = SEMVER_RE.captures(tag) else {
            version.metadata = tag.to_string();
            return version;
        };

        let number = |i: usize| {
            caps.get(i)
                .map(|m| m.as_str().trim_start_matches('.'))
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0)
        };
        version.major = number(1);
        version.minor = number(2);
        version.patch = number(3);
        version.metadata = caps
            .get(4)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        version
    }

    pub fn major(&self) -> i64 {
        self.major
    }

    pub fn minor(&self) -> i64 {
        self.minor
    }

    pub fn patch(&self) -> i64 {
        self.patch
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn has_metadata(&self) -> bool {
        !self.metadata.is_empty()
    }

    /// Textual equality of the original tags
    pub fn equal(&self, other: &SemVer) -> bool {
        self.original == other.original
    }

    /// Whether `self` sorts strictly before `other`.
    ///
    /// A tag without metadata is never less than a tag with metadata, even
    /// when its numbers are smaller. This is not a total order; callers reduce
    /// with it rather than sort.
    pub fn less_than(&self, other: &SemVer) -> bool {
        if self.original.is_empty() || other.original.is_empty() {
            return self.original.len() < other.original.len();
        }

        if !self.has_metadata() && other.has_metadata() {
            return false;
        }

        let numbers = [
            (self.major, other.major),
            (self.minor, other.minor),
            (self.patch, other.patch),
        ];
        for (a, b) in numbers {
            if a != b {
                return a < b;
            }
        }

        metadata_less_than(&self.metadata, &other.metadata)
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

/// A maximal run of digits or non-digits inside a metadata suffix
#[derive(Debug, PartialEq, Eq)]
enum Word<'a> {
    Int(&'a str),
    Str(&'a str),
}

fn words(metadata: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut start = 0;
    let mut digits = None;

    for (i, c) in metadata.char_indices() {
        let is_digit = c.is_ascii_digit();
        match digits {
            Some(prev) if prev != is_digit => {
                words.push(word(&metadata[start..i], prev));
                start = i;
            }
            _ => {}
        }
        digits = Some(is_digit);
    }
    if let Some(prev) = digits {
        words.push(word(&metadata[start..], prev));
    }

    words
}

fn word(s: &str, digits: bool) -> Word<'_> {
    if digits { Word::Int(s) } else { Word::Str(s) }
}

/// Compare two digit runs by value without overflowing
fn cmp_int(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn metadata_less_than(metadata: &str, other: &str) -> bool {
    let ours = words(metadata);
    let theirs = words(other);

    let mut i = 0;
    loop {
        let (a, b) = match (ours.get(i), theirs.get(i)) {
            (None, _) => return false,
            (Some(_), None) => return true,
            (Some(a), Some(b)) => (a, b),
        };

        let ordering = match (a, b) {
            (Word::Str(a), Word::Str(b)) => a.cmp(b),
            (Word::Int(a), Word::Int(b)) => cmp_int(a, b),
            (Word::Str(_), Word::Int(_)) => Ordering::Less,
            (Word::Int(_), Word::Str(_)) => Ordering::Greater,
        };
        if ordering != Ordering::Equal {
            return ordering == Ordering::Less;
        }
        i += 1;
    }
}
