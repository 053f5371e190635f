//! Timestamp tokens and the timestamp authority seam
//!
//! A timestamp token is a COSE_Sign1 structure whose payload is a JSON
//! [`TstInfo`] carrying the RFC 3161 field set, and whose unprotected header
//! carries the TSA certificate chain. The token attests that the hashed
//! message existed at `genTime`.
//!
//! Tokens are obtained through the [`Timestamper`] trait. Signers call it with
//! the hash of their signature value; verifiers never talk to a TSA, they only
//! check the token embedded in the envelope.

use crate::cose::{content_type, header_algorithm, x5chain_from_header, x5chain_value, X5CHAIN_LABEL};
use crate::crypto::{HashAlgorithm, SignatureAlgorithm, SigningKey};
use crate::error::{Error, Result};
use crate::x509::{verify_chain, CertPool, Certificate, ChainPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder, TaggedCborSerializable};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Content type of timestamp token payloads
pub const TIMESTAMP_CONTENT_TYPE: &str = "application/vnd.attest.timestamp.v1+json";

/// Policy OID stamped by [`InMemoryTimestamper`] unless configured otherwise
pub const DEFAULT_POLICY: &str = "1.2.3.4.1";

/// TstInfo structure version
pub const TST_INFO_VERSION: u32 = 1;

const NONCE_LEN: usize = 16;

/// Request sent to a timestamp authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    /// Hash algorithm of `hashed_message`
    pub hash_algorithm: HashAlgorithm,
    /// Hash of the data to timestamp
    pub hashed_message: Vec<u8>,
    /// Random nonce the authority must echo
    pub nonce: Vec<u8>,
}

impl TimestampRequest {
    /// Request a timestamp over the SHA-256 hash of `message`
    pub fn new(message: &[u8]) -> Self {
        Self::with_algorithm(HashAlgorithm::Sha256, message)
    }

    /// Request a timestamp over `message` hashed with `hash_algorithm`
    pub fn with_algorithm(hash_algorithm: HashAlgorithm, message: &[u8]) -> Self {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            hash_algorithm,
            hashed_message: hash_algorithm.digest(message),
            nonce,
        }
    }

    /// The imprint a matching token must carry
    pub fn message_imprint(&self) -> MessageImprint {
        MessageImprint {
            hash_algorithm: self.hash_algorithm,
            hashed_message: self.hashed_message.clone(),
        }
    }
}

/// Raw timestamp token bytes as returned by a timestamp authority
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampToken(Vec<u8>);

impl TimestampToken {
    /// Wrap raw token bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Token bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into token bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Hash of the timestamped data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageImprint {
    /// Hash algorithm
    pub hash_algorithm: HashAlgorithm,
    /// Hash value
    #[serde(with = "serde_bytes_hex")]
    pub hashed_message: Vec<u8>,
}

impl MessageImprint {
    /// Whether this imprint is the hash of `message`
    pub fn matches(&self, message: &[u8]) -> bool {
        self.hash_algorithm.digest(message) == self.hashed_message
    }
}

/// Accuracy of the generation time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Accuracy {
    /// Whole seconds
    #[serde(default)]
    pub seconds: u32,
    /// 0..=999
    #[serde(default)]
    pub millis: u32,
    /// 0..=999
    #[serde(default)]
    pub micros: u32,
}

impl Accuracy {
    /// Accuracy of whole seconds
    pub fn from_seconds(seconds: u32) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    /// Accuracy as a duration
    pub fn to_duration(&self) -> Duration {
        Duration::seconds(i64::from(self.seconds))
            + Duration::milliseconds(i64::from(self.millis))
            + Duration::microseconds(i64::from(self.micros))
    }
}

/// Timestamp token content (RFC 3161 TSTInfo field set)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TstInfo {
    /// Structure version, always [`TST_INFO_VERSION`]
    pub version: u32,
    /// TSA policy OID the token was issued under
    pub policy: String,
    /// Hash of the timestamped data
    pub message_imprint: MessageImprint,
    /// Hex encoded serial number, unique per authority
    pub serial_number: String,
    /// Time the token was generated
    pub gen_time: DateTime<Utc>,
    /// Accuracy of `gen_time`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<Accuracy>,
    /// Nonce echoed from the request
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "serde_bytes_hex")]
    pub nonce: Vec<u8>,
}

/// A generation time proven by a verified timestamp token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestedTime {
    /// The token's generation time
    pub time: DateTime<Utc>,
    /// Accuracy around `time`; zero when the token states none
    pub accuracy: Duration,
}

impl AttestedTime {
    /// Create an attested time
    pub fn new(time: DateTime<Utc>, accuracy: Duration) -> Self {
        Self { time, accuracy }
    }

    /// Earliest instant the signature may have been made
    pub fn earliest(&self) -> DateTime<Utc> {
        self.time - self.accuracy
    }

    /// Latest instant the signature may have been made
    pub fn latest(&self) -> DateTime<Utc> {
        self.time + self.accuracy
    }
}

/// A parsed, not yet trusted, timestamp token
#[derive(Debug, Clone)]
pub struct SignedTimestamp {
    cose: CoseSign1,
    algorithm: SignatureAlgorithm,
    info: TstInfo,
    certificates: Vec<Certificate>,
}

impl SignedTimestamp {
    /// Parse a token
    ///
    /// Fails with [`Error::InvalidTsaChain`] when the token is malformed.
    pub fn parse(token: &TimestampToken) -> Result<Self> {
        Self::decode(token.as_bytes())
            .map_err(|e| Error::InvalidTsaChain(format!("malformed timestamp token: {}", e)))
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_tagged_slice(bytes)?;
        let algorithm = header_algorithm(&cose.protected.header)?;

        if content_type(&cose.protected.header) != Some(TIMESTAMP_CONTENT_TYPE) {
            return Err(Error::Cose("unexpected timestamp content type".into()));
        }

        let payload = cose
            .payload
            .as_deref()
            .ok_or_else(|| Error::Cose("timestamp token has no payload".into()))?;
        let info: TstInfo = serde_json::from_slice(payload)?;
        if info.version != TST_INFO_VERSION {
            return Err(Error::Cose(format!("unsupported TstInfo version {}", info.version)));
        }

        let certificates = x5chain_from_header(&cose.unprotected)?;
        if certificates.is_empty() {
            return Err(Error::Certificate("timestamp token carries no certificates".into()));
        }

        Ok(Self {
            cose,
            algorithm,
            info,
            certificates,
        })
    }

    /// Token content
    pub fn info(&self) -> &TstInfo {
        &self.info
    }

    /// TSA certificates, leaf first
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Signature algorithm of the token
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// The attested generation time with its accuracy
    pub fn attested_time(&self) -> AttestedTime {
        let accuracy = self
            .info
            .accuracy
            .map(|a| a.to_duration())
            .unwrap_or_else(Duration::zero);
        AttestedTime::new(self.info.gen_time, accuracy)
    }

    /// Check that the token timestamps `message`
    pub fn verify_imprint(&self, message: &[u8]) -> Result<()> {
        if self.info.message_imprint.matches(message) {
            Ok(())
        } else {
            Err(Error::InvalidTsaChain(
                "timestamp message imprint does not match the signature".into(),
            ))
        }
    }

    /// Verify the token signature and its certificate chain at `at`
    ///
    /// The chain must lead to `roots` under `policy`, every certificate must
    /// be valid at `at`, and the generation time must fall inside the TSA
    /// leaf's validity window. Any failure is [`Error::InvalidTsaChain`].
    pub fn verify(&self, roots: &CertPool, policy: &ChainPolicy, at: DateTime<Utc>) -> Result<AttestedTime> {
        self.check(roots, policy, at).map_err(|e| match e {
            Error::InvalidTsaChain(reason) => Error::InvalidTsaChain(reason),
            other => Error::InvalidTsaChain(other.to_string()),
        })
    }

    fn check(&self, roots: &CertPool, policy: &ChainPolicy, at: DateTime<Utc>) -> Result<AttestedTime> {
        let (leaf, intermediates) = self
            .certificates
            .split_first()
            .ok_or_else(|| Error::InvalidTsaChain("timestamp token carries no certificates".into()))?;

        leaf.public_key()
            .verify(self.algorithm, &self.cose.tbs_data(&[]), &self.cose.signature)?;

        verify_chain(leaf, intermediates, roots, policy, at)?;

        let gen_time = self.info.gen_time;
        if !leaf.is_valid_at(gen_time) {
            return Err(Error::InvalidTsaChain(format!(
                "generation time {} outside the validity of '{}'",
                gen_time,
                leaf.subject()
            )));
        }

        debug!(
            tsa = %leaf.subject(),
            gen_time = %gen_time,
            serial = %self.info.serial_number,
            "Verified timestamp token"
        );

        Ok(self.attested_time())
    }
}

/// Client seam for a timestamp authority
#[async_trait]
pub trait Timestamper: Send + Sync {
    /// Obtain a token for the request
    ///
    /// Implementations report authority or transport failures as
    /// [`Error::TimestampService`].
    async fn timestamp(&self, request: &TimestampRequest) -> Result<TimestampToken>;
}

/// Timestamp authority running in-process
///
/// Signs tokens with a local key. Suitable for tests and for offline signing
/// setups that operate their own TSA key.
#[derive(Debug)]
pub struct InMemoryTimestamper {
    key: SigningKey,
    algorithm: SignatureAlgorithm,
    chain: Vec<Certificate>,
    policy: String,
    accuracy: Option<Accuracy>,
    gen_time: Option<DateTime<Utc>>,
    serial: AtomicU64,
}

impl InMemoryTimestamper {
    /// Create an authority signing with `key`, certified by `chain` (leaf first)
    pub fn new(key: SigningKey, chain: Vec<Certificate>) -> Result<Self> {
        let algorithm = key.algorithm()?;
        let leaf = chain
            .first()
            .ok_or_else(|| Error::InvalidOptions("timestamp authority needs a certificate".into()))?;
        if *leaf.public_key() != key.public_key() {
            return Err(Error::Certificate(format!(
                "timestamp key does not match certificate '{}'",
                leaf.subject()
            )));
        }

        Ok(Self {
            key,
            algorithm,
            chain,
            policy: DEFAULT_POLICY.to_string(),
            accuracy: Some(Accuracy::from_seconds(1)),
            gen_time: None,
            serial: AtomicU64::new(0),
        })
    }

    /// Stamp every token with a fixed generation time
    pub fn with_gen_time(mut self, gen_time: DateTime<Utc>) -> Self {
        self.gen_time = Some(gen_time);
        self
    }

    /// Set the stated accuracy
    pub fn with_accuracy(mut self, accuracy: Option<Accuracy>) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Set the policy OID
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    /// Issue a token synchronously
    pub fn issue(&self, request: &TimestampRequest) -> Result<TimestampToken> {
        if request.hashed_message.len() != request.hash_algorithm.output_len() {
            return Err(Error::TimestampService(format!(
                "hashed message length {} does not match {:?}",
                request.hashed_message.len(),
                request.hash_algorithm
            )));
        }

        let serial = self.serial.fetch_add(1, Ordering::Relaxed) + 1;
        let info = TstInfo {
            version: TST_INFO_VERSION,
            policy: self.policy.clone(),
            message_imprint: request.message_imprint(),
            serial_number: format!("{:x}", serial),
            gen_time: self.gen_time.unwrap_or_else(Utc::now),
            accuracy: self.accuracy,
            nonce: request.nonce.clone(),
        };
        let payload = serde_json::to_vec(&info)?;

        let protected = HeaderBuilder::new()
            .algorithm(self.algorithm.to_cose())
            .content_type(TIMESTAMP_CONTENT_TYPE.to_string())
            .build();
        let unprotected = HeaderBuilder::new()
            .value(X5CHAIN_LABEL, x5chain_value(&self.chain))
            .build();

        let cose = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .payload(payload)
            .try_create_signature(&[], |data| self.key.sign(data))?
            .build();

        debug!(serial = %info.serial_number, gen_time = %info.gen_time, "Issued timestamp token");

        Ok(TimestampToken::from_bytes(cose.to_tagged_vec()?))
    }
}

#[async_trait]
impl Timestamper for InMemoryTimestamper {
    async fn timestamp(&self, request: &TimestampRequest) -> Result<TimestampToken> {
        self.issue(request)
    }
}

/// Hex serialization for bytes
mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
