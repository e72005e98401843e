use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A `MAJOR.MINOR` Python version.
///
/// Ordering is lexicographic on `(major, minor)`, so `3.10 > 3.9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PythonVersion {
    pub major: u32,
    pub minor: u32,
}

impl PythonVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The next minor release within the same major version.
    pub fn next_minor(self) -> Self {
        Self::new(self.major, self.minor + 1)
    }

    /// Target name understood by ruff, e.g. `py39`.
    pub fn ruff_target(self) -> String {
        format!("py{}{}", self.major, self.minor)
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PythonVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidVersion(s.to_string());
        let (major, minor) = s.trim().split_once('.').ok_or_else(invalid)?;
        let major = major.parse().map_err(|_| invalid())?;
        let minor = minor.parse().map_err(|_| invalid())?;
        Ok(Self::new(major, minor))
    }
}

impl TryFrom<String> for PythonVersion {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PythonVersion> for String {
    fn from(value: PythonVersion) -> Self {
        value.to_string()
    }
}

/// Inclusive range of target versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionRange {
    min: PythonVersion,
    max: PythonVersion,
}

impl VersionRange {
    /// Validates `min <= max`. Ranges crossing a major version are rejected
    /// because the last minor release of a major line is not knowable here.
    pub fn new(min: PythonVersion, max: PythonVersion) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::EmptyRange { min, max });
        }
        if min.major != max.major {
            return Err(ConfigError::SpansMajorVersions { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> PythonVersion {
        self.min
    }

    pub fn max(&self) -> PythonVersion {
        self.max
    }

    /// Versions the oracle is asked about, in ascending order: `min+1..=max`.
    pub fn candidates(&self) -> impl Iterator<Item = PythonVersion> {
        let major = self.min.major;
        (self.min.minor + 1..=self.max.minor).map(move |minor| PythonVersion::new(major, minor))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: PythonVersion = "3.10".parse().unwrap();
        assert_eq!(v, PythonVersion::new(3, 10));
        assert_eq!(v.to_string(), "3.10");
        assert_eq!(v.ruff_target(), "py310");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("3".parse::<PythonVersion>().is_err());
        assert!("3.x".parse::<PythonVersion>().is_err());
        assert!("".parse::<PythonVersion>().is_err());
        assert!("3.9.1".parse::<PythonVersion>().is_err());
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(PythonVersion::new(3, 10) > PythonVersion::new(3, 9));
    }

    #[test]
    fn test_candidates_exclude_min() {
        let range = VersionRange::new(PythonVersion::new(3, 7), PythonVersion::new(3, 10)).unwrap();
        let candidates: Vec<String> = range.candidates().map(|v| v.to_string()).collect();
        assert_eq!(candidates, vec!["3.8", "3.9", "3.10"]);
    }

    #[test]
    fn test_single_version_range_has_no_candidates() {
        let v = PythonVersion::new(3, 11);
        let range = VersionRange::new(v, v).unwrap();
        assert_eq!(range.candidates().count(), 0);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            VersionRange::new(PythonVersion::new(3, 11), PythonVersion::new(3, 7)),
            Err(ConfigError::EmptyRange { .. })
        ));
        assert!(matches!(
            VersionRange::new(PythonVersion::new(2, 7), PythonVersion::new(3, 7)),
            Err(ConfigError::SpansMajorVersions { .. })
        ));
    }
}
