//! X.509 certificates, trust pools and chain validation
//!
//! Chain validation is split in two so the verifier can evaluate one path at
//! several instants:
//!
//! 1. [`PathBuilder`] searches for a path leaf → intermediates → trust
//!    anchor, checking issuer signatures, CA basic constraints, path length,
//!    key usage and critical extensions on every candidate. A search can be
//!    restricted to certificates valid at given instants, so a renewed
//!    intermediate is found even when an expired copy is listed first.
//! 2. [`CertificatePath::check_validity_at`] checks every certificate's
//!    validity window at a given effective time.
//!
//! A search performs at most [`MAX_SIGNATURE_CHECKS`] issuer signature
//! verifications; chains that need more are reported as untrusted.

use crate::crypto::PublicKey;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use const_oid::ObjectIdentifier;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use x509_cert::der::{Decode, Encode};
use x509_cert::ext::pkix::{BasicConstraints, ExtendedKeyUsage};

/// Extended key usage: code signing (1.3.6.1.5.5.7.3.3)
pub const ID_KP_CODE_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.3");

/// Extended key usage: time stamping (1.3.6.1.5.5.7.3.8)
pub const ID_KP_TIME_STAMPING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.8");

/// Extended key usage: any purpose (2.5.29.37.0)
pub const ANY_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");

const ID_CE_BASIC_CONSTRAINTS: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.19");
const ID_CE_EXT_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37");
const ID_CE_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const ID_CE_SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

// Extensions a certificate may mark critical and still be used
const HANDLED_CRITICAL_EXTENSIONS: [ObjectIdentifier; 4] = [
    ID_CE_BASIC_CONSTRAINTS,
    ID_CE_EXT_KEY_USAGE,
    ID_CE_KEY_USAGE,
    ID_CE_SUBJECT_ALT_NAME,
];

/// Default limit on certificates in a path, leaf and anchor included
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

/// Upper bound on issuer signature verifications in one path search
pub const MAX_SIGNATURE_CHECKS: usize = 100;

/// A parsed X.509 certificate together with its DER encoding
#[derive(Clone)]
pub struct Certificate {
    der: Vec<u8>,
    cert: x509_cert::Certificate,
    subject: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    public_key: PublicKey,
    basic_constraints: Option<BasicConstraints>,
    extended_key_usage: Option<Vec<ObjectIdentifier>>,
    unhandled_critical: Vec<ObjectIdentifier>,
}

impl Certificate {
    /// Parse a DER encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let cert = x509_cert::Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("failed to parse certificate: {}", e)))?;

        let tbs = &cert.tbs_certificate;
        let subject = tbs.subject.to_string();
        let not_before = to_utc(&tbs.validity.not_before)?;
        let not_after = to_utc(&tbs.validity.not_after)?;
        let public_key = PublicKey::from_spki(&tbs.subject_public_key_info)?;

        let mut basic_constraints = None;
        let mut extended_key_usage = None;
        let mut unhandled_critical = Vec::new();
        for ext in tbs.extensions.iter().flatten() {
            if ext.critical && !HANDLED_CRITICAL_EXTENSIONS.contains(&ext.extn_id) {
                unhandled_critical.push(ext.extn_id);
            }
            if ext.extn_id == ID_CE_BASIC_CONSTRAINTS {
                basic_constraints = Some(BasicConstraints::from_der(ext.extn_value.as_bytes())?);
            } else if ext.extn_id == ID_CE_EXT_KEY_USAGE {
                extended_key_usage = Some(ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())?.0);
            }
        }

        Ok(Self {
            der: der.to_vec(),
            cert,
            subject,
            not_before,
            not_after,
            public_key,
            basic_constraints,
            extended_key_usage,
            unhandled_critical,
        })
    }

    /// Parse a single PEM encoded certificate
    pub fn from_pem(pem_text: &str) -> Result<Self> {
        let mut certs = Self::from_pem_bundle(pem_text)?;
        match certs.len() {
            1 => Ok(certs.remove(0)),
            n => Err(Error::Certificate(format!("expected one certificate, found {}", n))),
        }
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle, in order
    pub fn from_pem_bundle(pem_text: &str) -> Result<Vec<Self>> {
        let blocks = pem::parse_many(pem_text)
            .map_err(|e| Error::Certificate(format!("invalid PEM: {}", e)))?;
        blocks
            .iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| Self::from_der(block.contents()))
            .collect()
    }

    /// DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name (RFC 4514 string)
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name (RFC 4514 string)
    pub fn issuer(&self) -> String {
        self.cert.tbs_certificate.issuer.to_string()
    }

    /// Hex encoded serial number
    pub fn serial_hex(&self) -> String {
        hex::encode(self.cert.tbs_certificate.serial_number.as_bytes())
    }

    /// Start of the validity window
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `at` lies inside the validity window (bounds inclusive)
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Subject public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Whether the basic constraints extension marks this as a CA
    pub fn is_ca(&self) -> bool {
        self.basic_constraints.as_ref().map(|bc| bc.ca).unwrap_or(false)
    }

    /// Extended key usages, `None` when the extension is absent
    pub fn extended_key_usages(&self) -> Option<&[ObjectIdentifier]> {
        self.extended_key_usage.as_deref()
    }

    /// Whether the certificate may be used for any of `required`
    ///
    /// A certificate without the extension is unrestricted.
    pub fn permits_usage(&self, required: &[ObjectIdentifier]) -> bool {
        match &self.extended_key_usage {
            None => true,
            Some(usages) => usages
                .iter()
                .any(|usage| *usage == ANY_EXTENDED_KEY_USAGE || required.contains(usage)),
        }
    }

    /// Critical extensions this crate does not process
    ///
    /// A certificate with any of these is never used in a path.
    pub fn unhandled_critical_extensions(&self) -> &[ObjectIdentifier] {
        &self.unhandled_critical
    }

    /// Same subject name and same key, e.g. a renewed CA certificate
    pub fn same_identity(&self, other: &Certificate) -> bool {
        self.cert.tbs_certificate.subject == other.cert.tbs_certificate.subject
            && self.public_key == other.public_key
    }

    /// Whether subject and issuer names are equal
    pub fn is_self_issued(&self) -> bool {
        self.cert.tbs_certificate.subject == self.cert.tbs_certificate.issuer
    }

    /// Whether this certificate's issuer name is `issuer`'s subject
    pub fn names_issuer(&self, issuer: &Certificate) -> bool {
        self.cert.tbs_certificate.issuer == issuer.cert.tbs_certificate.subject
    }

    /// Check that `issuer` names and signed this certificate
    pub fn verify_issued_by(&self, issuer: &Certificate) -> Result<()> {
        if !self.names_issuer(issuer) {
            return Err(Error::UntrustedChain(format!(
                "'{}' is not the issuer of '{}'",
                issuer.subject, self.subject
            )));
        }

        let tbs = self.cert.tbs_certificate.to_der()?;
        let signature = self
            .cert
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("certificate signature is not octet aligned".into()))?;

        issuer
            .public_key
            .verify_x509(self.cert.signature_algorithm.oid, &tbs, signature)
    }

    fn path_len_constraint(&self) -> Option<u8> {
        self.basic_constraints.as_ref().and_then(|bc| bc.path_len_constraint)
    }

    fn is_valid_at_all(&self, instants: &[DateTime<Utc>]) -> bool {
        instants.iter().all(|at| self.is_valid_at(*at))
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("serial", &self.serial_hex())
            .field("not_after", &self.not_after)
            .finish()
    }
}

fn to_utc(time: &x509_cert::time::Time) -> Result<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs())
        .map_err(|_| Error::Certificate("certificate time out of range".into()))?;
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Certificate("certificate time out of range".into()))
}

/// Read-only set of trust anchors
///
/// Cloning is cheap; clones share storage, so one pool can back any number of
/// concurrent verifications.
#[derive(Debug, Clone, Default)]
pub struct CertPool {
    certs: Arc<Vec<Certificate>>,
}

impl CertPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool from certificates, dropping duplicates
    pub fn from_certificates(certs: impl IntoIterator<Item = Certificate>) -> Self {
        let mut pool = Self::new();
        for cert in certs {
            pool.add(cert);
        }
        pool
    }

    /// Create a pool from a PEM bundle
    pub fn from_pem_bundle(pem_text: &str) -> Result<Self> {
        Ok(Self::from_certificates(Certificate::from_pem_bundle(pem_text)?))
    }

    /// Add a certificate (builder pattern)
    pub fn with(mut self, cert: Certificate) -> Self {
        self.add(cert);
        self
    }

    /// Add a certificate if not already present
    ///
    /// Copy-on-write: pools already shared with other holders are unaffected.
    pub fn add(&mut self, cert: Certificate) {
        if !self.contains(&cert) {
            Arc::make_mut(&mut self.certs).push(cert);
        }
    }

    /// Whether the exact certificate is in the pool
    pub fn contains(&self, cert: &Certificate) -> bool {
        self.certs.iter().any(|c| c == cert)
    }

    /// Number of certificates
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Iterate over the certificates
    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certs.iter()
    }
}

/// Requirements a path must satisfy, independent of time
#[derive(Debug, Clone)]
pub struct ChainPolicy {
    /// Accepted extended key usages; certificates carrying the extension must
    /// list one of these
    pub required_usages: Vec<ObjectIdentifier>,

    /// Maximum number of certificates in the path, leaf and anchor included
    pub max_depth: usize,
}

impl ChainPolicy {
    /// Policy for envelope signing certificates
    pub fn code_signing(max_depth: usize) -> Self {
        Self {
            required_usages: vec![ID_KP_CODE_SIGNING],
            max_depth,
        }
    }

    /// Policy for timestamp authority certificates
    ///
    /// An empty `usages` list means time stamping.
    pub fn time_stamping(usages: &[ObjectIdentifier], max_depth: usize) -> Self {
        let required_usages = if usages.is_empty() {
            vec![ID_KP_TIME_STAMPING]
        } else {
            usages.to_vec()
        };
        Self {
            required_usages,
            max_depth,
        }
    }
}

/// A path from a leaf certificate to a trust anchor
#[derive(Debug, Clone)]
pub struct CertificatePath {
    certs: Vec<Certificate>,
}

impl CertificatePath {
    /// Certificates from leaf to anchor
    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    /// The leaf certificate
    pub fn leaf(&self) -> &Certificate {
        &self.certs[0]
    }

    /// The trust anchor the path ends at
    pub fn anchor(&self) -> &Certificate {
        &self.certs[self.certs.len() - 1]
    }

    /// Number of certificates in the path
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Always false; a path holds at least the leaf
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Check every certificate's validity window at `at`
    pub fn check_validity_at(&self, at: DateTime<Utc>) -> Result<()> {
        match self.certs.iter().find(|cert| !cert.is_valid_at(at)) {
            Some(cert) => Err(Error::ExpiredCertificate {
                subject: cert.subject().to_string(),
                at,
            }),
            None => Ok(()),
        }
    }
}

/// Searches for certificate paths from one leaf to a trust pool
#[derive(Debug, Clone)]
pub struct PathBuilder<'a> {
    leaf: &'a Certificate,
    intermediates: &'a [Certificate],
    roots: &'a CertPool,
    policy: &'a ChainPolicy,
}

impl<'a> PathBuilder<'a> {
    /// Search from `leaf` through `intermediates` to a certificate in `roots`
    pub fn new(
        leaf: &'a Certificate,
        intermediates: &'a [Certificate],
        roots: &'a CertPool,
        policy: &'a ChainPolicy,
    ) -> Self {
        Self {
            leaf,
            intermediates,
            roots,
            policy,
        }
    }

    /// The leaf every path starts at
    pub fn leaf(&self) -> &Certificate {
        self.leaf
    }

    /// First acceptable path, regardless of validity windows
    ///
    /// Fails with [`Error::UntrustedChain`] when no acceptable path exists.
    pub fn build(&self) -> Result<CertificatePath> {
        self.find(&[])?.ok_or_else(|| {
            Error::UntrustedChain(format!("no path from '{}' to a trusted root", self.leaf.subject()))
        })
    }

    /// First acceptable path whose certificates are all valid at every instant
    ///
    /// `Ok(None)` means paths may exist, but none is valid at `instants`.
    pub fn build_valid_at(&self, instants: &[DateTime<Utc>]) -> Result<Option<CertificatePath>> {
        self.find(instants)
    }

    fn find(&self, instants: &[DateTime<Utc>]) -> Result<Option<CertificatePath>> {
        if self.roots.is_empty() {
            return Err(Error::UntrustedChain("no trust roots configured".into()));
        }

        if !self.leaf.unhandled_critical_extensions().is_empty() {
            return Err(Error::UntrustedChain(format!(
                "'{}' has an unhandled critical extension",
                self.leaf.subject()
            )));
        }
        if !self.leaf.permits_usage(&self.policy.required_usages) {
            return Err(Error::UntrustedChain(format!(
                "'{}' is not valid for the required key usage",
                self.leaf.subject()
            )));
        }
        if !self.leaf.is_valid_at_all(instants) {
            return Ok(None);
        }

        let mut search = Search::new(self, instants);
        let mut path = vec![0];
        if !search.extend(&mut path)? {
            return Ok(None);
        }

        let certs: Vec<Certificate> = path.iter().map(|&i| search.nodes[i].clone()).collect();
        debug!(
            leaf = %self.leaf.subject(),
            anchor = %certs[certs.len() - 1].subject(),
            depth = certs.len(),
            signature_checks = search.checks,
            "Built certificate path"
        );

        Ok(Some(CertificatePath { certs }))
    }
}

// Depth-first search over indices into `nodes`: the leaf, then the roots,
// then intermediates not already among the roots.
struct Search<'a> {
    nodes: Vec<&'a Certificate>,
    roots: &'a CertPool,
    policy: &'a ChainPolicy,
    instants: &'a [DateTime<Utc>],
    issued_by: HashMap<(usize, usize), bool>,
    checks: usize,
}

impl<'a> Search<'a> {
    fn new(builder: &PathBuilder<'a>, instants: &'a [DateTime<Utc>]) -> Self {
        let mut nodes = vec![builder.leaf];
        nodes.extend(builder.roots.iter());
        nodes.extend(
            builder
                .intermediates
                .iter()
                .filter(|cert| !builder.roots.contains(cert)),
        );

        Self {
            nodes,
            roots: builder.roots,
            policy: builder.policy,
            instants,
            issued_by: HashMap::new(),
            checks: 0,
        }
    }

    fn extend(&mut self, path: &mut Vec<usize>) -> Result<bool> {
        let current = path[path.len() - 1];
        if self.roots.contains(self.nodes[current]) {
            return Ok(true);
        }
        if path.len() >= self.policy.max_depth {
            return Ok(false);
        }

        // Number of intermediate CAs that the next issuer would sit above
        let below = path.len() - 1;

        for candidate in 1..self.nodes.len() {
            if !self.is_usable_issuer(path, candidate, below) {
                continue;
            }
            if !self.check_issued_by(current, candidate)? {
                continue;
            }

            path.push(candidate);
            if self.extend(path)? {
                return Ok(true);
            }
            path.pop();
        }

        Ok(false)
    }

    // Checks that need no signature verification
    fn is_usable_issuer(&self, path: &[usize], candidate: usize, below: usize) -> bool {
        let issuer = self.nodes[candidate];
        let current = self.nodes[path[path.len() - 1]];

        current.names_issuer(issuer)
            && issuer.is_ca()
            && issuer.public_key().is_supported()
            && issuer.unhandled_critical_extensions().is_empty()
            && issuer.permits_usage(&self.policy.required_usages)
            && issuer.is_valid_at_all(self.instants)
            && issuer
                .path_len_constraint()
                .map(|limit| below <= usize::from(limit))
                .unwrap_or(true)
            && !path.iter().any(|&i| {
                let member = self.nodes[i];
                member == issuer || member.same_identity(issuer)
            })
    }

    fn check_issued_by(&mut self, child: usize, issuer: usize) -> Result<bool> {
        if let Some(&known) = self.issued_by.get(&(child, issuer)) {
            return Ok(known);
        }
        if self.checks >= MAX_SIGNATURE_CHECKS {
            return Err(Error::UntrustedChain(format!(
                "path search for '{}' exceeded {} signature checks",
                self.nodes[0].subject(),
                MAX_SIGNATURE_CHECKS
            )));
        }

        self.checks += 1;
        let verified = self.nodes[child].verify_issued_by(self.nodes[issuer]).is_ok();
        self.issued_by.insert((child, issuer), verified);
        Ok(verified)
    }
}

/// Build a path from `leaf` through `intermediates` to a certificate in `roots`
///
/// Validity windows are not considered. Fails with [`Error::UntrustedChain`]
/// when no acceptable path exists.
pub fn build_path(
    leaf: &Certificate,
    intermediates: &[Certificate],
    roots: &CertPool,
    policy: &ChainPolicy,
) -> Result<CertificatePath> {
    PathBuilder::new(leaf, intermediates, roots, policy).build()
}

/// Build a path whose certificates are all valid at `at`
///
/// Fails with [`Error::UntrustedChain`] when no path exists at all, and with
/// [`Error::ExpiredCertificate`] when paths exist but none is valid at `at`.
pub fn verify_chain(
    leaf: &Certificate,
    intermediates: &[Certificate],
    roots: &CertPool,
    policy: &ChainPolicy,
    at: DateTime<Utc>,
) -> Result<CertificatePath> {
    let builder = PathBuilder::new(leaf, intermediates, roots, policy);
    let first = builder.build()?;
    if first.check_validity_at(at).is_ok() {
        return Ok(first);
    }
    match builder.build_valid_at(&[at])? {
        Some(path) => Ok(path),
        None => first.check_validity_at(at).map(|_| first),
    }
}
