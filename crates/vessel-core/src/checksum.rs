//! Content checksums attached to downloads.

use crate::error::StepError;
use std::fmt;
use std::str::FromStr;

/// Hash algorithm used to verify a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// MD5.
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Returns the lowercase algorithm name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha1" => Ok(ChecksumAlgorithm::Sha1),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(StepError::InvalidChecksum(format!(
                "unsupported algorithm '{}'",
                other
            ))),
        }
    }
}

/// Expected checksum of an artifact. Verification is done by the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumInfo {
    algorithm: ChecksumAlgorithm,
    value: String,
}

impl ChecksumInfo {
    /// Parses `algorithm` and pairs it with the expected `value`.
    pub fn new(algorithm: &str, value: impl Into<String>) -> Result<Self, StepError> {
        let algorithm = algorithm.parse()?;
        let value = value.into();
        if value.trim().is_empty() {
            return Err(StepError::InvalidChecksum(format!(
                "empty {} value",
                algorithm
            )));
        }
        Ok(Self { algorithm, value })
    }

    /// The hash algorithm.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The expected hex digest.
    pub fn value(&self) -> &str {
        &self.value
    }
}
