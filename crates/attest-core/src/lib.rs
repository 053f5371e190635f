//! # Attest Core
//!
//! Format independent building blocks for signing content descriptors and
//! verifying the resulting signature envelopes.
//!
//! ## Key Concepts
//!
//! - **Descriptor**: media type, digest and size of the content being signed
//! - **Trust roots**: caller supplied [`CertPool`]s; the signing chain and the
//!   timestamp authority chain are checked against separate pools
//! - **Timestamp token**: a countersignature proving the signature existed at
//!   a given time, so it stays verifiable after the signing certificate expires
//! - **Signer / Verifier**: one capability each, implemented per envelope format
//!
//! ## Verification guarantees
//!
//! 1. The returned descriptor is exactly the one that was signed
//! 2. The signing certificate chains to one of the caller's roots
//! 3. That chain was valid at verification time, or at a time attested by a
//!    timestamp authority the caller trusts

pub mod config;
pub mod cose;
pub mod crypto;
pub mod descriptor;
pub mod error;
pub mod options;
pub mod service;
pub mod timestamp;
pub mod x509;

pub use config::{SignerConfig, VerifierConfig};
pub use crypto::{HashAlgorithm, PublicKey, SignatureAlgorithm, SigningKey};
pub use descriptor::{Descriptor, Digest};
pub use error::{Error, Result};
pub use options::{SignOptions, TsaVerifyOptions, VerifyOptions};
pub use service::{Service, Signer, Verifier};
pub use timestamp::{
    AttestedTime, InMemoryTimestamper, SignedTimestamp, TimestampRequest, TimestampToken, Timestamper, TstInfo,
};
pub use x509::{CertPool, Certificate, CertificatePath, ChainPolicy, PathBuilder};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
