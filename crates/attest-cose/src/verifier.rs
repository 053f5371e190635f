//! Envelope verifier
//!
//! Every stage is a hard gate; the first failure is returned.
//!
//! 1. Decode the envelope structurally
//! 2. Check the algorithm against the configured allow list
//! 3. Verify the signature with the leaf certificate key, decode the payload
//! 4. Build the signing chain to a trusted root
//! 5. Reject envelopes past their own expiry
//! 6. Verify an embedded timestamp token against the TSA roots
//! 7. Pick a time the signing chain is valid at

use crate::envelope::Envelope;
use crate::trust::{select_trust_time, EffectiveTime, TimestampOutcome};
use async_trait::async_trait;
use attest_core::{
    Certificate, ChainPolicy, Descriptor, Error, PathBuilder, Result, SignedTimestamp, Verifier, VerifierConfig,
    VerifyOptions,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct Verification {
    /// The signed descriptor
    pub descriptor: Descriptor,

    /// Signing certificate path, leaf to trust anchor
    pub signer: Vec<Certificate>,

    /// Time the chain was found valid at
    pub trust_time: EffectiveTime,

    /// Signing time claimed by the signer (not attested)
    pub signing_time: DateTime<Utc>,
}

/// Verifies COSE_Sign1 envelopes
#[derive(Debug, Clone, Default)]
pub struct CoseVerifier {
    config: VerifierConfig,
}

impl CoseVerifier {
    /// Create a verifier with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verifier with `config`
    pub fn with_config(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify an envelope and report how it was trusted
    pub fn verify_envelope(&self, bytes: &[u8], options: &VerifyOptions) -> Result<Verification> {
        let envelope = Envelope::from_bytes(bytes)?;
        let header = envelope.header();
        debug!(algorithm = %header.algorithm, "Decoded envelope");

        if !self.config.allows(header.algorithm) {
            warn!(algorithm = %header.algorithm, "SECURITY: Envelope algorithm not allowed");
            return Err(Error::UnsupportedAlgorithm(format!(
                "{} is not an allowed algorithm",
                header.algorithm
            )));
        }

        let (leaf, intermediates) = envelope
            .certificate_chain()
            .split_first()
            .ok_or_else(|| Error::MalformedEnvelope("missing certificate chain".into()))?;

        leaf.public_key()
            .verify(header.algorithm, &envelope.tbs_data(), envelope.signature())
            .map_err(|e| {
                warn!(signer = %leaf.subject(), error = %e, "SECURITY: Envelope signature rejected");
                e
            })?;
        let payload = envelope.decode_payload()?;
        debug!(signer = %leaf.subject(), "Signature verified");

        // An untrusted signer is reported as such before anything it claims
        let policy = ChainPolicy::code_signing(self.config.max_chain_depth);
        let builder = PathBuilder::new(leaf, intermediates, &options.roots, &policy);
        let path = builder.build().map_err(|e| {
            warn!(signer = %leaf.subject(), error = %e, "SECURITY: Signing chain not trusted");
            e
        })?;

        let default_time = options.effective_time();
        if let Some(expiry) = header.expiry {
            if expiry < default_time {
                return Err(Error::SignatureExpired(expiry.to_rfc3339()));
            }
        }

        let outcome = self.timestamp_outcome(&envelope, options, default_time);
        let trusted = select_trust_time(&builder, path, default_time, &outcome)?;
        let trust_time = trusted.time;

        info!(
            digest = %payload.target_artifact.digest,
            signer = %leaf.subject(),
            trust_time = %trust_time.time(),
            attested = trust_time.is_attested(),
            "Verified envelope"
        );

        Ok(Verification {
            descriptor: payload.target_artifact,
            signer: trusted.path.certificates().to_vec(),
            trust_time,
            signing_time: header.signing_time,
        })
    }

    fn timestamp_outcome(
        &self,
        envelope: &Envelope,
        options: &VerifyOptions,
        at: DateTime<Utc>,
    ) -> TimestampOutcome {
        let token = match envelope.timestamp_token() {
            Some(token) => token,
            None => return TimestampOutcome::Absent,
        };

        let tsa_roots = match &options.tsa_roots {
            Some(roots) if !roots.is_empty() => roots,
            _ => {
                debug!("Timestamp present but no TSA roots configured");
                return TimestampOutcome::Rejected("no timestamp authority roots configured".into());
            }
        };

        // Time-stamping EKU only; the signing roots are never consulted here
        let policy = ChainPolicy::time_stamping(&[], self.config.max_chain_depth);
        let verified = SignedTimestamp::parse(token).and_then(|timestamp| {
            timestamp.verify_imprint(envelope.signature())?;
            timestamp.verify(tsa_roots, &policy, at)
        });

        match verified {
            Ok(attested) => {
                debug!(gen_time = %attested.time, "Timestamp token verified");
                TimestampOutcome::Verified(attested)
            }
            Err(e) => {
                warn!(error = %e, "SECURITY: Timestamp token rejected");
                let reason = match e {
                    Error::InvalidTsaChain(reason) => reason,
                    other => other.to_string(),
                };
                TimestampOutcome::Rejected(reason)
            }
        }
    }
}

#[async_trait]
impl Verifier for CoseVerifier {
    async fn verify(&self, envelope: &[u8], options: &VerifyOptions) -> Result<Descriptor> {
        self.verify_envelope(envelope, options)
            .map(|verification| verification.descriptor)
    }
}
