use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

fn version_regex() -> &'static Regex {
    static VERSION_REGEX: OnceLock<Regex> = OnceLock::new();
    VERSION_REGEX.get_or_init(|| {
        Regex::new(r"^v?(\d+)\.(\d+)\.(\d+)(?:-([A-Za-z0-9.\-]+))?$").unwrap()
    })
}

/// A parsed semantic version, or the `Empty` sentinel that sorts below
/// every tagged version. `Empty` stands in for "nothing deployed yet" and
/// displays as `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PackageVersion {
    #[default]
    Empty,
    Tagged {
        major: u64,
        minor: u64,
        patch: u64,
        pre: Option<String>,
    },
}

impl PackageVersion {
    /// Parse a tag name, accepting an optional leading `v`.
    pub fn try_parse(input: &str) -> Option<Self> {
        let caps = version_regex().captures(input.trim())?;
        Some(Self::Tagged {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            pre: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// Parse, normalizing anything unparseable to `Empty`.
    pub fn parse_or_empty(input: &str) -> Self {
        Self::try_parse(input).unwrap_or(Self::Empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        use PackageVersion::*;
        match (self, other) {
            (Empty, Empty) => Ordering::Equal,
            (Empty, _) => Ordering::Less,
            (_, Empty) => Ordering::Greater,
            (
                Tagged {
                    major: a1,
                    minor: b1,
                    patch: c1,
                    pre: p1,
                },
                Tagged {
                    major: a2,
                    minor: b2,
                    patch: c2,
                    pre: p2,
                },
            ) => (a1, b1, c1).cmp(&(a2, b2, c2)).then_with(|| match (p1, p2) {
                (None, None) => Ordering::Equal,
                // A pre-release sorts before the plain version.
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(y),
            }),
        }
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "-"),
            Self::Tagged {
                major,
                minor,
                patch,
                pre: None,
            } => write!(f, "{}.{}.{}", major, minor, patch),
            Self::Tagged {
                major,
                minor,
                patch,
                pre: Some(pre),
            } => write!(f, "{}.{}.{}-{}", major, minor, patch, pre),
        }
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PackageVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw == "-" || raw.is_empty() {
            return Ok(Self::Empty);
        }
        Ok(Self::parse_or_empty(&raw))
    }
}

/// Case-insensitive package identifier. Keeps the configured spelling for
/// display; equality and hashing fold ASCII case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for PackageName {}

impl std::hash::Hash for PackageName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
