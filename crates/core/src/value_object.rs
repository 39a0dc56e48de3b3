//! Value objects: equality by value, validated on construction.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values. Once
/// constructed they are known to be valid, so callers downstream never need
/// to re-check them.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Name of an artifact uploaded for a job.
///
/// Artifact names end up as file names under a per-job directory, so they must
/// be a single path component: non-empty, no separators, no NUL, and not one
/// of the special entries `.` / `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactName(String);

impl ArtifactName {
    pub const MAX_LEN: usize = 255;

    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::validation("artifact name must not be empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(DomainError::validation(format!(
                "artifact name longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        if name == "." || name == ".." {
            return Err(DomainError::validation("artifact name must not be '.' or '..'"));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(DomainError::validation(
                "artifact name must be a single path component",
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ArtifactName {}

impl core::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ArtifactName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactName> for String {
    fn from(value: ArtifactName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_names() {
        assert_eq!(ArtifactName::new("image.qcow2").unwrap().as_str(), "image.qcow2");
        assert!(ArtifactName::new("foobar").is_ok());
    }

    #[test]
    fn rejects_path_tricks() {
        for bad in ["", ".", "..", "a/b", "../etc", "a\\b", "nul\0"] {
            assert!(ArtifactName::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn deserialize_validates() {
        let err = serde_json::from_str::<ArtifactName>("\"../x\"");
        assert!(err.is_err());
    }

    proptest! {
        #[test]
        fn any_name_with_separator_is_rejected(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let name = format!("{prefix}/{suffix}");
            prop_assert!(ArtifactName::new(name).is_err());
        }
    }
}
