//! Signer and verifier behind one handle

use crate::signer::CoseSigner;
use crate::verifier::CoseVerifier;
use async_trait::async_trait;
use attest_core::{Descriptor, Result, SignOptions, Signer, VerifyOptions, Verifier};

/// COSE signing and verification through one value
///
/// Implements [`attest_core::Service`] through the blanket impl.
#[derive(Debug)]
pub struct CoseService {
    signer: CoseSigner,
    verifier: CoseVerifier,
}

impl CoseService {
    /// Pair a signer with a verifier
    pub fn new(signer: CoseSigner, verifier: CoseVerifier) -> Self {
        Self { signer, verifier }
    }

    /// The signing half
    pub fn signer(&self) -> &CoseSigner {
        &self.signer
    }

    /// The verifying half
    pub fn verifier(&self) -> &CoseVerifier {
        &self.verifier
    }
}

#[async_trait]
impl Signer for CoseService {
    async fn sign(&self, descriptor: &Descriptor, options: &SignOptions) -> Result<Vec<u8>> {
        self.signer.sign(descriptor, options).await
    }
}

#[async_trait]
impl Verifier for CoseService {
    async fn verify(&self, envelope: &[u8], options: &VerifyOptions) -> Result<Descriptor> {
        self.verifier.verify(envelope, options).await
    }
}
