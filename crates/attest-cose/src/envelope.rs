//! COSE_Sign1 envelope codec
//!
//! Layout of an encoded envelope (tagged COSE_Sign1):
//!
//! | part        | content |
//! |-------------|---------|
//! | protected   | `alg`, content type, `attest.version`, `attest.signingTime`, `attest.expiry`? |
//! | unprotected | `x5chain` (33, leaf first), `attest.timestamp`? |
//! | payload     | JSON `{"targetArtifact": Descriptor}` |
//! | signature   | signature over the Sig_structure |
//!
//! Decoding is purely structural and never evaluates trust.

use attest_core::cose::{
    content_type, find_text_value, header_algorithm, int_value, time_from_value, time_value, x5chain_from_header,
    x5chain_value, X5CHAIN_LABEL,
};
use attest_core::{Certificate, Descriptor, Error, Result, SignatureAlgorithm, TimestampToken};
use chrono::{DateTime, SubsecRound, Utc};
use coset::cbor::value::Value;
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder, TaggedCborSerializable};
use serde::{Deserialize, Serialize};

/// Content type of envelope payloads
pub const ENVELOPE_CONTENT_TYPE: &str = "application/vnd.attest.descriptor.v1+json";

/// Envelope format version written and accepted
pub const ENVELOPE_VERSION: i64 = 1;

/// Protected header label: envelope format version
pub const VERSION_LABEL: &str = "attest.version";

/// Protected header label: claimed signing time (Unix seconds)
pub const SIGNING_TIME_LABEL: &str = "attest.signingTime";

/// Protected header label: envelope expiry (Unix seconds)
pub const EXPIRY_LABEL: &str = "attest.expiry";

/// Unprotected header label: timestamp token
pub const TIMESTAMP_LABEL: &str = "attest.timestamp";

/// Signed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Payload {
    /// The descriptor being signed
    pub target_artifact: Descriptor,
}

/// Signed envelope attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Signature algorithm
    pub algorithm: SignatureAlgorithm,
    /// Claimed signing time, whole seconds
    pub signing_time: DateTime<Utc>,
    /// Optional expiry, whole seconds
    pub expiry: Option<DateTime<Utc>>,
}

impl EnvelopeHeader {
    /// Header without expiry; times are truncated to whole seconds
    pub fn new(algorithm: SignatureAlgorithm, signing_time: DateTime<Utc>) -> Self {
        Self {
            algorithm,
            signing_time: signing_time.trunc_subsecs(0),
            expiry: None,
        }
    }

    /// Set the expiry (builder pattern)
    pub fn with_expiry(mut self, expiry: Option<DateTime<Utc>>) -> Self {
        self.expiry = expiry.map(|e| e.trunc_subsecs(0));
        self
    }
}

/// A signature envelope
#[derive(Debug, Clone)]
pub struct Envelope {
    cose: CoseSign1,
    header: EnvelopeHeader,
    chain: Vec<Certificate>,
    timestamp: Option<TimestampToken>,
}

impl Envelope {
    /// Build and sign an envelope
    ///
    /// `sign_fn` receives the COSE Sig_structure and returns the signature.
    pub fn sign<F>(header: EnvelopeHeader, payload: &Payload, chain: Vec<Certificate>, sign_fn: F) -> Result<Self>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        if chain.is_empty() {
            return Err(Error::InvalidOptions("certificate chain is empty".into()));
        }

        let mut protected = HeaderBuilder::new()
            .algorithm(header.algorithm.to_cose())
            .content_type(ENVELOPE_CONTENT_TYPE.to_string())
            .text_value(VERSION_LABEL.to_string(), Value::Integer(ENVELOPE_VERSION.into()))
            .text_value(SIGNING_TIME_LABEL.to_string(), time_value(header.signing_time));
        if let Some(expiry) = header.expiry {
            protected = protected.text_value(EXPIRY_LABEL.to_string(), time_value(expiry));
        }

        let cose = CoseSign1Builder::new()
            .protected(protected.build())
            .payload(serde_json::to_vec(payload)?)
            .try_create_signature(&[], sign_fn)?
            .build();

        Ok(Self {
            cose,
            header,
            chain,
            timestamp: None,
        })
    }

    /// Attach a timestamp token (builder pattern)
    ///
    /// The token sits in the unprotected header and does not change the
    /// signature.
    pub fn with_timestamp(mut self, token: TimestampToken) -> Self {
        self.timestamp = Some(token);
        self
    }

    /// Encode as a tagged COSE_Sign1
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut unprotected = HeaderBuilder::new().value(X5CHAIN_LABEL, x5chain_value(&self.chain));
        if let Some(token) = &self.timestamp {
            unprotected = unprotected.text_value(TIMESTAMP_LABEL.to_string(), Value::Bytes(token.as_bytes().to_vec()));
        }

        let mut cose = self.cose.clone();
        cose.unprotected = unprotected.build();
        Ok(cose.to_tagged_vec()?)
    }

    /// Decode an envelope
    ///
    /// Structural failures are [`Error::MalformedEnvelope`]; an algorithm that
    /// is present but not implemented is [`Error::UnsupportedAlgorithm`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_tagged_slice(bytes)
            .map_err(|e| malformed(format!("not a tagged COSE_Sign1: {:?}", e)))?;
        let protected = &cose.protected.header;

        if protected.alg.is_none() {
            return Err(malformed("missing algorithm"));
        }
        let algorithm = header_algorithm(protected)?;

        if content_type(protected) != Some(ENVELOPE_CONTENT_TYPE) {
            return Err(malformed("unexpected content type"));
        }

        match find_text_value(protected, VERSION_LABEL).and_then(int_value) {
            Some(ENVELOPE_VERSION) => {}
            Some(other) => return Err(malformed(format!("unsupported envelope version {}", other))),
            None => return Err(malformed("missing envelope version")),
        }

        let signing_time = find_text_value(protected, SIGNING_TIME_LABEL)
            .and_then(time_from_value)
            .ok_or_else(|| malformed("missing or invalid signing time"))?;

        let expiry = match find_text_value(protected, EXPIRY_LABEL) {
            Some(value) => Some(time_from_value(value).ok_or_else(|| malformed("invalid expiry"))?),
            None => None,
        };

        match cose.payload.as_deref() {
            Some(payload) if !payload.is_empty() => {}
            _ => return Err(malformed("missing payload")),
        }
        if cose.signature.is_empty() {
            return Err(malformed("missing signature"));
        }

        let chain = x5chain_from_header(&cose.unprotected)
            .map_err(|e| malformed(format!("invalid certificate chain: {}", e)))?;
        if chain.is_empty() {
            return Err(malformed("missing certificate chain"));
        }

        let timestamp = match find_text_value(&cose.unprotected, TIMESTAMP_LABEL) {
            Some(Value::Bytes(token)) if !token.is_empty() => Some(TimestampToken::from_bytes(token.clone())),
            Some(_) => return Err(malformed("timestamp attribute is not a non-empty byte string")),
            None => None,
        };

        Ok(Self {
            header: EnvelopeHeader {
                algorithm,
                signing_time,
                expiry,
            },
            cose,
            chain,
            timestamp,
        })
    }

    /// Signed attributes
    pub fn header(&self) -> &EnvelopeHeader {
        &self.header
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &[u8] {
        self.cose.payload.as_deref().unwrap_or_default()
    }

    /// Decode the payload strictly
    pub fn decode_payload(&self) -> Result<Payload> {
        let payload: Payload = serde_json::from_slice(self.payload())
            .map_err(|e| malformed(format!("invalid payload: {}", e)))?;
        payload
            .target_artifact
            .validate()
            .map_err(|e| malformed(format!("invalid payload: {}", e)))?;
        Ok(payload)
    }

    /// Signature value
    pub fn signature(&self) -> &[u8] {
        &self.cose.signature
    }

    /// Certificate chain, leaf first
    pub fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Embedded timestamp token, if any
    pub fn timestamp_token(&self) -> Option<&TimestampToken> {
        self.timestamp.as_ref()
    }

    /// The bytes the signature covers
    pub fn tbs_data(&self) -> Vec<u8> {
        self.cose.tbs_data(&[])
    }
}

fn malformed(reason: impl Into<String>) -> Error {
    Error::MalformedEnvelope(reason.into())
}
