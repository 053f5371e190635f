//! Error types for signing and verifying descriptor envelopes

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias using the attest [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while signing or verifying an envelope
///
/// Each verification gate maps to exactly one variant so callers can tell
/// "not trusted" from "expired" from "malformed".
#[derive(Error, Debug)]
pub enum Error {
    /// The envelope failed structural decoding
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Key or signature algorithm not recognized or not allowed
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Cryptographic signature mismatch
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// No path from the signing certificate to a trust root
    #[error("Untrusted certificate chain: {0}")]
    UntrustedChain(String),

    /// No usable effective time makes the chain valid
    #[error("Certificate '{subject}' is expired or not yet valid at {at}")]
    ExpiredCertificate {
        /// Subject of the first certificate found outside its validity window
        subject: String,
        /// The effective time the chain was evaluated at
        at: DateTime<Utc>,
    },

    /// A timestamp token is present but could not be verified
    #[error("Invalid timestamp authority chain: {0}")]
    InvalidTsaChain(String),

    /// The timestamp service failed while signing
    #[error("Timestamp service error: {0}")]
    TimestampService(String),

    /// The envelope's own expiry has passed
    #[error("Signature expired at {0}")]
    SignatureExpired(String),

    /// The descriptor is not structurally valid
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Sign or verify options are not structurally valid
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Certificate or key material could not be parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// COSE encoding/decoding error
    #[error("COSE error: {0}")]
    Cose(String),
}

impl Error {
    /// Whether the error is a trust decision rather than a format or input problem
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidSignature(_)
                | Error::UntrustedChain(_)
                | Error::ExpiredCertificate { .. }
                | Error::InvalidTsaChain(_)
                | Error::SignatureExpired(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<coset::CoseError> for Error {
    fn from(err: coset::CoseError) -> Self {
        Error::Cose(format!("{:?}", err))
    }
}

impl From<x509_cert::der::Error> for Error {
    fn from(err: x509_cert::der::Error) -> Self {
        Error::Certificate(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_failures_are_grouped() {
        assert!(Error::UntrustedChain("no root".into()).is_trust_failure());
        assert!(Error::InvalidTsaChain("bad".into()).is_trust_failure());
        assert!(!Error::MalformedEnvelope("empty".into()).is_trust_failure());
        assert!(!Error::TimestampService("down".into()).is_trust_failure());
    }

    #[test]
    fn test_expired_message_names_subject() {
        let err = Error::ExpiredCertificate {
            subject: "CN=signer".into(),
            at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        assert!(err.to_string().contains("CN=signer"));
    }
}
