use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Returned when a raw value cannot be used as a concrete version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid version {0}: concrete versions must be >= 0 and < LATEST")]
pub struct InvalidVersion(pub i64);

/// Persisted sequence number of a stream, advanced once per committed batch.
///
/// Two values are reserved: [`Version::INITIAL`] marks an aggregate that has
/// never been persisted, and [`Version::LATEST`] means "whatever is newest"
/// wherever a version bound or expectation is accepted. Concrete versions
/// satisfy `INITIAL <= v < LATEST`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Never-yet-persisted.
    pub const INITIAL: Version = Version(0);

    /// Sentinel for "newest, don't check".
    pub const LATEST: Version = Version(i64::MAX);

    /// Creates a version from a raw value without validation.
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Creates a concrete version, rejecting negatives and the `LATEST` sentinel.
    pub fn try_new(value: i64) -> Result<Self, InvalidVersion> {
        let version = Self(value);
        if version.is_concrete() {
            Ok(version)
        } else {
            Err(InvalidVersion(value))
        }
    }

    /// The version a stream's first batch is recorded at.
    pub const fn first() -> Self {
        Self(1)
    }

    /// Returns the next version. `LATEST` saturates.
    pub fn next(&self) -> Self {
        if *self == Self::LATEST {
            Self::LATEST
        } else {
            Self(self.0 + 1)
        }
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }

    pub fn is_latest(&self) -> bool {
        *self == Self::LATEST
    }

    /// True for values usable in comparisons: `>= 0` and not the `LATEST` sentinel.
    pub fn is_concrete(&self) -> bool {
        self.0 >= 0 && self.0 < i64::MAX
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_latest() {
            f.write_str("LATEST")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl TryFrom<i64> for Version {
    type Error = InvalidVersion;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}
