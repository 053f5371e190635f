//! Shared fixtures: certificate hierarchies minted with rcgen

#![allow(dead_code)]

use attest_core::{CertPool, Certificate, Descriptor, Digest, InMemoryTimestamper, SigningKey};
use attest_cose::CoseSigner;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    SerialNumber, SignatureAlgorithm as KeyAlgorithm, PKCS_ECDSA_P256_SHA256, PKCS_ED25519,
};
use time::{Duration, OffsetDateTime};

pub const MEDIA_TYPE: &str = "application/vnd.test";

/// Install a test-writer subscriber once per test binary
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Validity window relative to now, in hours
pub fn hours(from: i64, to: i64) -> (OffsetDateTime, OffsetDateTime) {
    let now = OffsetDateTime::now_utc();
    (now + Duration::hours(from), now + Duration::hours(to))
}

fn params(cn: &str, window: (OffsetDateTime, OffsetDateTime)) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.not_before = window.0;
    params.not_after = window.1;
    params
}

/// A certificate authority able to issue further certificates
pub struct Authority {
    cert: rcgen::Certificate,
    key: KeyPair,
    parsed: Certificate,
    chain: Vec<Certificate>,
}

impl Authority {
    /// Self-signed root valid for a year
    pub fn root(cn: &str) -> Self {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = params(cn, hours(-24, 24 * 365));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        let parsed = Certificate::from_der(cert.der()).unwrap();
        Self {
            cert,
            key,
            parsed,
            chain: Vec::new(),
        }
    }

    /// Intermediate CA issued by this authority
    pub fn intermediate(&self, cn: &str) -> Self {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = params(cn, hours(-24, 24 * 180));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        let parsed = Certificate::from_der(cert.der()).unwrap();

        let mut chain = vec![parsed.clone()];
        chain.extend(self.chain.iter().cloned());
        Self {
            cert,
            key,
            parsed,
            chain,
        }
    }

    /// Another certificate for this authority's name and key, issued by `parent`
    pub fn recertify(&self, parent: &Authority, window: (OffsetDateTime, OffsetDateTime)) -> Certificate {
        let mut params = self.cert.params().clone();
        params.not_before = window.0;
        params.not_after = window.1;
        let cert = params.signed_by(&self.key, &parent.cert, &parent.key).unwrap();
        Certificate::from_der(cert.der()).unwrap()
    }

    /// Self-signed certificates for this authority's name and key, each with
    /// its own serial number
    pub fn self_signed_copies(&self, count: u64) -> Vec<Certificate> {
        (1..=count)
            .map(|serial| {
                let mut params = self.cert.params().clone();
                params.serial_number = Some(SerialNumber::from(serial));
                let cert = params.self_signed(&self.key).unwrap();
                Certificate::from_der(cert.der()).unwrap()
            })
            .collect()
    }

    /// This authority's certificate
    pub fn certificate(&self) -> &Certificate {
        &self.parsed
    }

    /// Pool holding only this authority
    pub fn pool(&self) -> CertPool {
        CertPool::new().with(self.parsed.clone())
    }

    /// Issue an end-entity certificate
    pub fn issue(
        &self,
        cn: &str,
        usages: Vec<ExtendedKeyUsagePurpose>,
        window: (OffsetDateTime, OffsetDateTime),
    ) -> Identity {
        self.issue_with(cn, usages, window, false)
    }

    /// Issue a certificate, optionally flagged as a CA
    pub fn issue_with(
        &self,
        cn: &str,
        usages: Vec<ExtendedKeyUsagePurpose>,
        window: (OffsetDateTime, OffsetDateTime),
        ca: bool,
    ) -> Identity {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = params(cn, window);
        params.extended_key_usages = usages;
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        let parsed = Certificate::from_der(cert.der()).unwrap();

        let mut chain = vec![parsed.clone()];
        chain.extend(self.chain.iter().cloned());
        Identity {
            key: SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap(),
            cert: parsed,
            chain,
            rcgen: Some((cert, key)),
        }
    }

    /// Code signing leaf valid from an hour ago for a day
    pub fn signer(&self, cn: &str) -> Identity {
        self.issue(cn, vec![ExtendedKeyUsagePurpose::CodeSigning], hours(-1, 24))
    }

    /// Timestamp authority valid from an hour ago for thirty days
    pub fn timestamper(&self, cn: &str) -> InMemoryTimestamper {
        let identity = self.issue(cn, vec![ExtendedKeyUsagePurpose::TimeStamping], hours(-1, 24 * 30));
        InMemoryTimestamper::new(identity.key, identity.chain).unwrap()
    }
}

/// A signing key with its certificate chain (leaf first, root excluded)
pub struct Identity {
    pub key: SigningKey,
    pub cert: Certificate,
    pub chain: Vec<Certificate>,
    rcgen: Option<(rcgen::Certificate, KeyPair)>,
}

impl Identity {
    /// Self-signed code signing certificate
    pub fn self_signed(cn: &str, alg: &'static KeyAlgorithm) -> Self {
        let key = KeyPair::generate_for(alg).unwrap();
        let mut params = params(cn, hours(-1, 24));
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::CodeSigning];
        let cert = params.self_signed(&key).unwrap();
        let parsed = Certificate::from_der(cert.der()).unwrap();
        Self {
            key: SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap(),
            cert: parsed.clone(),
            chain: vec![parsed],
            rcgen: None,
        }
    }

    /// Self-signed Ed25519 code signing certificate
    pub fn ed25519(cn: &str) -> Self {
        Self::self_signed(cn, &PKCS_ED25519)
    }

    /// Signer over this identity's key and chain
    pub fn signer(&self) -> CoseSigner {
        CoseSigner::new(self.key.clone(), self.chain.clone()).unwrap()
    }

    /// Treat this identity as an issuer (to mint certificates under a non-CA)
    pub fn issue(&self, cn: &str, usages: Vec<ExtendedKeyUsagePurpose>) -> Identity {
        let (issuer_cert, issuer_key) = self.rcgen.as_ref().unwrap();
        let key = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = params(cn, hours(-1, 24));
        params.extended_key_usages = usages;
        let cert = params.signed_by(&key, issuer_cert, issuer_key).unwrap();
        let parsed = Certificate::from_der(cert.der()).unwrap();

        let mut chain = vec![parsed.clone()];
        chain.extend(self.chain.iter().cloned());
        Identity {
            key: SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap(),
            cert: parsed,
            chain,
            rcgen: Some((cert, key)),
        }
    }
}

/// Descriptor of `content` with the test media type
pub fn descriptor(content: &[u8]) -> Descriptor {
    Descriptor::new(MEDIA_TYPE, Digest::sha256_of(content), content.len() as i64)
}

/// The descriptor used by the end-to-end scenario
pub fn scenario_descriptor() -> Descriptor {
    Descriptor::new(
        MEDIA_TYPE,
        Digest::parse("sha256:9834876dcfb05cb167a5c24953eba58c4ac89b1adf57f28f2f9d09af107ee8f0").unwrap(),
        100,
    )
}
