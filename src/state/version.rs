//! Manager version numbers
//!
//! Versions are compared on `(major, minor)` only. Build and revision
//! components are accepted when parsing and dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::module::AssemblyVersion;

/// Below this version a game still needs the legacy Harmony libraries
pub const LEGACY_LIBRARIES_BEFORE: Version = Version::new(0, 22);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse `major[.minor[.build[.revision]]]`
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.trim().split('.');
        let major = parts.next().and_then(parse_component)?;
        let minor = match parts.next() {
            Some(part) => parse_component(part)?,
            None => 0,
        };
        // remaining components must still be numeric
        let mut rest = 0;
        for part in parts {
            parse_component(part)?;
            rest += 1;
        }
        if rest > 2 {
            return None;
        }
        Some(Self::new(major, minor))
    }
}

fn parse_component(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl From<AssemblyVersion> for Version {
    fn from(version: AssemblyVersion) -> Self {
        Self::new(u32::from(version.major), u32::from(version.minor))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid version '{s}'"))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let ordered = [
            Version::new(0, 12),
            Version::new(0, 13),
            Version::new(0, 22),
            Version::new(1, 0),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{} < {}", pair[0], pair[1]);
        }
        // numeric, not lexical
        assert!(Version::new(0, 9) < Version::new(0, 10));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Version::parse("0.22"), Some(Version::new(0, 22)));
        assert_eq!(Version::parse("0.22.3"), Some(Version::new(0, 22)));
        assert_eq!(Version::parse("1.2.3.4"), Some(Version::new(1, 2)));
        assert_eq!(Version::parse("2"), Some(Version::new(2, 0)));
        assert_eq!(Version::parse(" 0.12 "), Some(Version::new(0, 12)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", "a.b", "0.", ".1", "1.2.3.4.5", "1.-2", "1.2beta"] {
            assert_eq!(Version::parse(input), None, "{input}");
        }
    }

    #[test]
    fn test_from_assembly_version_drops_build() {
        let version = Version::from(AssemblyVersion::new(0, 23, 4, 1));
        assert_eq!(version, Version::new(0, 23));
        assert_eq!(version.to_string(), "0.23");
    }

    #[test]
    fn test_serde_as_string() {
        let yaml = serde_yaml::to_string(&Version::new(0, 22)).unwrap();
        assert!(yaml.contains("0.22"));
        let back: Version = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, Version::new(0, 22));

        let json = serde_json::to_string(&Version::new(0, 13)).unwrap();
        assert_eq!(json, "\"0.13\"");
    }
}
