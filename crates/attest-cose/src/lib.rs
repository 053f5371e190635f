//! # Attest COSE
//!
//! Signature envelopes over content descriptors, encoded as COSE_Sign1.
//!
//! ```text
//! CoseSigner::sign ──► envelope bytes ──► CoseVerifier::verify ──► Descriptor
//!        │                                        │
//!        └─► Timestamper (optional countersignature)
//! ```
//!
//! The verifier returns the signed descriptor only when the signature is
//! valid, the signing chain leads to one of the caller's roots, and that chain
//! is valid now or at a time attested by a trusted timestamp authority.

pub mod envelope;
pub mod service;
pub mod signer;
pub mod trust;
pub mod verifier;

pub use envelope::{Envelope, EnvelopeHeader, Payload, ENVELOPE_CONTENT_TYPE};
pub use service::CoseService;
pub use signer::CoseSigner;
pub use trust::{select_trust_time, trust_times, EffectiveTime, TimestampOutcome, TrustedPath};
pub use verifier::{CoseVerifier, Verification};
