//! Signing and verification capabilities
//!
//! Each envelope format implements these traits. Callers hold them as
//! `Arc<dyn Signer>` / `Arc<dyn Verifier>` so formats can be swapped.

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::options::{SignOptions, VerifyOptions};
use async_trait::async_trait;

/// Produces signature envelopes over descriptors
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `descriptor` and return the encoded envelope
    ///
    /// Never returns a partially signed envelope.
    async fn sign(&self, descriptor: &Descriptor, options: &SignOptions) -> Result<Vec<u8>>;
}

/// Checks signature envelopes and recovers the signed descriptor
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify `envelope` and return the descriptor it signs
    ///
    /// # Returns
    /// * `Ok(Descriptor)` - exactly the descriptor that was signed
    /// * `Err(Error)` - the first gate that failed
    async fn verify(&self, envelope: &[u8], options: &VerifyOptions) -> Result<Descriptor>;
}

/// Both capabilities
pub trait Service: Signer + Verifier {}

impl<T: Signer + Verifier> Service for T {}
