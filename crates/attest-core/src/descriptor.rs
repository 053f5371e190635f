//! Content descriptors: the identity of what gets signed

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Content digest in `algorithm:encoded` form (e.g. `sha256:9f86d0...`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    /// Parse and validate a digest string
    pub fn parse(value: &str) -> Result<Self> {
        let (algorithm, encoded) = value
            .split_once(':')
            .ok_or_else(|| Error::InvalidDescriptor(format!("digest '{}' has no algorithm", value)))?;

        if !valid_algorithm(algorithm) {
            return Err(Error::InvalidDescriptor(format!(
                "invalid digest algorithm '{}'",
                algorithm
            )));
        }

        if encoded.is_empty()
            || !encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '=' | '_' | '-'))
        {
            return Err(Error::InvalidDescriptor(format!(
                "invalid digest encoding in '{}'",
                value
            )));
        }

        let hex_len = match algorithm {
            "sha256" => Some(64),
            "sha512" => Some(128),
            _ => None,
        };
        if let Some(len) = hex_len {
            let lower_hex = encoded
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
            if encoded.len() != len || !lower_hex {
                return Err(Error::InvalidDescriptor(format!(
                    "{} digest must be {} lowercase hex characters",
                    algorithm, len
                )));
            }
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }

    /// Build a sha256 digest of the given content
    pub fn sha256_of(content: &[u8]) -> Self {
        use sha2::Digest as _;
        Self {
            algorithm: "sha256".into(),
            encoded: hex::encode(sha2::Sha256::digest(content)),
        }
    }

    /// Digest algorithm (e.g. `sha256`)
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Encoded portion after the colon
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

// OCI grammar: component ([+._-] component)*
fn valid_algorithm(algorithm: &str) -> bool {
    !algorithm.is_empty()
        && algorithm
            .split(&['+', '.', '_', '-'][..])
            .all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            })
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

/// Descriptor of the content signed or to be signed
///
/// `PartialEq` is full structural equality, annotations included. Use
/// [`Descriptor::content_eq`] to ask whether two descriptors point at the same
/// content regardless of annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Descriptor {
    /// Media type of the targeted content
    pub media_type: String,

    /// Digest of the targeted content
    pub digest: Digest,

    /// Size in bytes of the targeted content
    pub size: i64,

    /// Optional user defined attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Create a descriptor without annotations
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: BTreeMap::new(),
        }
    }

    /// Add an annotation (builder pattern)
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Whether both descriptors point to the same content
    ///
    /// Compares media type, digest and size only. Annotations are ignored here
    /// but are still covered by the envelope signature.
    pub fn content_eq(&self, other: &Descriptor) -> bool {
        self.media_type == other.media_type && self.digest == other.digest && self.size == other.size
    }

    /// Basic structural validation
    pub fn validate(&self) -> Result<()> {
        if self.media_type.trim().is_empty() {
            return Err(Error::InvalidDescriptor("media type is empty".into()));
        }
        if self.size < 0 {
            return Err(Error::InvalidDescriptor(format!("negative size {}", self.size)));
        }
        Ok(())
    }
}
