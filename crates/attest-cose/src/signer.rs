//! Envelope signer

use crate::envelope::{Envelope, EnvelopeHeader, Payload};
use async_trait::async_trait;
use attest_core::x509::DEFAULT_MAX_CHAIN_DEPTH;
use attest_core::{
    Certificate, ChainPolicy, Descriptor, Error, Result, SignOptions, SignatureAlgorithm, SignedTimestamp,
    Signer, SignerConfig, SigningKey, TimestampRequest, TimestampToken, Timestamper, TsaVerifyOptions,
};
use chrono::Utc;
use tracing::{debug, info, warn};

/// Signs descriptors into COSE_Sign1 envelopes
#[derive(Debug)]
pub struct CoseSigner {
    key: SigningKey,
    algorithm: SignatureAlgorithm,
    chain: Vec<Certificate>,
    config: SignerConfig,
}

impl CoseSigner {
    /// Create a signer for `key`, certified by `chain` (leaf first)
    ///
    /// Refuses an empty chain, a leaf that does not certify `key`, and keys
    /// without a supported algorithm.
    pub fn new(key: SigningKey, chain: Vec<Certificate>) -> Result<Self> {
        let algorithm = key.algorithm()?;

        let leaf = chain
            .first()
            .ok_or_else(|| Error::InvalidOptions("certificate chain is empty".into()))?;
        if *leaf.public_key() != key.public_key() {
            return Err(Error::Certificate(format!(
                "signing key does not match leaf certificate '{}'",
                leaf.subject()
            )));
        }

        debug!(algorithm = %algorithm, signer = %leaf.subject(), chain = chain.len(), "Created signer");

        Ok(Self {
            key,
            algorithm,
            chain,
            config: SignerConfig::default(),
        })
    }

    /// Replace the configuration (builder pattern)
    pub fn with_config(mut self, config: SignerConfig) -> Self {
        self.config = config;
        self
    }

    /// Signature algorithm derived from the key
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Certificate chain embedded in every envelope
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Obtain a token over `signature` and check it before it is embedded
    async fn countersign(
        &self,
        tsa: &dyn Timestamper,
        signature: &[u8],
        verify_options: &TsaVerifyOptions,
    ) -> Result<TimestampToken> {
        let request = TimestampRequest::new(signature);

        let response = match self.config.timestamp_timeout {
            Some(limit) => tokio::time::timeout(limit, tsa.timestamp(&request))
                .await
                .map_err(|_| Error::TimestampService(format!("no response within {:?}", limit)))?,
            None => tsa.timestamp(&request).await,
        };
        let token = response.map_err(|e| match e {
            Error::TimestampService(reason) => Error::TimestampService(reason),
            other => Error::TimestampService(other.to_string()),
        })?;

        let parsed = SignedTimestamp::parse(&token)?;
        if parsed.info().message_imprint != request.message_imprint() {
            return Err(Error::InvalidTsaChain(
                "timestamp token covers a different message".into(),
            ));
        }
        if parsed.info().nonce != request.nonce {
            return Err(Error::InvalidTsaChain("timestamp token nonce mismatch".into()));
        }

        let at = verify_options.current_time.unwrap_or_else(Utc::now);
        let policy = ChainPolicy::time_stamping(&verify_options.key_usages, DEFAULT_MAX_CHAIN_DEPTH);
        parsed.verify(&verify_options.roots, &policy, at)?;

        debug!(
            serial = %parsed.info().serial_number,
            gen_time = %parsed.info().gen_time,
            "Timestamp token accepted"
        );

        Ok(token)
    }
}

#[async_trait]
impl Signer for CoseSigner {
    async fn sign(&self, descriptor: &Descriptor, options: &SignOptions) -> Result<Vec<u8>> {
        options.validate()?;
        descriptor.validate()?;

        let header = EnvelopeHeader::new(self.algorithm, Utc::now()).with_expiry(options.expiry);
        let payload = Payload {
            target_artifact: descriptor.clone(),
        };

        let mut envelope = Envelope::sign(header, &payload, self.chain.clone(), |data| self.key.sign(data))?;

        if let Some(tsa) = &options.tsa {
            let token = self
                .countersign(tsa.as_ref(), envelope.signature(), &options.tsa_verify_options)
                .await
                .map_err(|e| {
                    warn!(error = %e, "Timestamp countersignature failed");
                    e
                })?;
            envelope = envelope.with_timestamp(token);
        }

        let bytes = envelope.to_bytes()?;

        info!(
            digest = %descriptor.digest,
            algorithm = %self.algorithm,
            timestamped = options.tsa.is_some(),
            "Signed descriptor"
        );

        Ok(bytes)
    }
}
