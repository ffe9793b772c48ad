//! ---
//! renew_section: "14-versioning"
//! renew_subsection: "module"
//! renew_type: "source"
//! renew_scope: "code"
//! renew_description: "Parsing and ordering of dotted release versions."
//! renew_version: "v0.0.0-prealpha"
//! renew_owner: "tbd"
//! ---
//! Dotted `major.minor.build.revision` versions.
//!
//! Ordering is numeric and component-wise from the left; missing trailing
//! components count as zero, so `1.2` and `1.2.0.0` are the same version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const COMPONENTS: usize = 4;

/// Error raised when a version string is not dotted numeric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    /// The input contained no components at all.
    #[error("version string is empty")]
    Empty,
    /// More than four dotted components.
    #[error("version '{0}' has more than four components")]
    TooManyComponents(String),
    /// A component was not an unsigned integer.
    #[error("version '{input}' has non-numeric component '{component}'")]
    InvalidComponent {
        /// The full input.
        input: String,
        /// The offending component.
        component: String,
    },
}

/// A four-component release version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ReleaseVersion {
    parts: [u64; COMPONENTS],
}

impl ReleaseVersion {
    /// Build a version from its four components.
    pub const fn new(major: u64, minor: u64, build: u64, revision: u64) -> Self {
        Self {
            parts: [major, minor, build, revision],
        }
    }

    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    pub fn minor(&self) -> u64 {
        self.parts[1]
    }

    pub fn build(&self) -> u64 {
        self.parts[2]
    }

    pub fn revision(&self) -> u64 {
        self.parts[3]
    }

    /// `true` when `self` is strictly greater than `current`.
    pub fn is_newer_than(&self, current: &ReleaseVersion) -> bool {
        self > current
    }
}

impl FromStr for ReleaseVersion {
    type Err = VersionParseError;

    /// Accepts an optional leading `v` and ignores any `-prerelease` or
    /// `+build` suffix, so Cargo package versions parse as well.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        let numeric = trimmed
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if numeric.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = [0u64; COMPONENTS];
        for (index, component) in numeric.split('.').enumerate() {
            if index >= COMPONENTS {
                return Err(VersionParseError::TooManyComponents(input.to_owned()));
            }
            parts[index] =
                component
                    .parse()
                    .map_err(|_| VersionParseError::InvalidComponent {
                        input: input.to_owned(),
                        component: component.to_owned(),
                    })?;
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, build, revision] = self.parts;
        write!(f, "{major}.{minor}.{build}.{revision}")
    }
}

impl Serialize for ReleaseVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReleaseVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
