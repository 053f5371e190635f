//! Attack Scenario Tests
//!
//! Each test represents a way an attacker might try to get a verifier to
//! accept content it should not. All of them must be blocked.

mod common;

use std::sync::Arc;

use attest_core::{CertPool, Error, SignOptions, Signer, TsaVerifyOptions, Verifier, VerifyOptions};
use attest_cose::envelope::{Payload, EXPIRY_LABEL, TIMESTAMP_LABEL};
use attest_cose::CoseVerifier;
use chrono::{Duration, Utc};
use common::{descriptor, init_tracing, Authority, Identity};
use coset::cbor::value::Value;
use coset::{CoseSign1, Label, ProtectedHeader, TaggedCborSerializable};
use rcgen::ExtendedKeyUsagePurpose;

// =============================================================================
// Test Helpers
// =============================================================================

/// Decode, edit and re-encode an envelope without re-signing it
fn tamper(envelope: &[u8], edit: impl FnOnce(&mut CoseSign1)) -> Vec<u8> {
    let mut cose = CoseSign1::from_tagged_slice(envelope).expect("envelope decodes");
    edit(&mut cose);
    cose.to_tagged_vec().expect("envelope encodes")
}

/// Replace the protected header so that it is re-serialized
fn edit_protected(cose: &mut CoseSign1, edit: impl FnOnce(&mut coset::Header)) {
    let mut header = cose.protected.header.clone();
    edit(&mut header);
    cose.protected = ProtectedHeader {
        original_data: None,
        header,
    };
}

fn later() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::hours(48)
}

// =============================================================================
// ATTACK: Content substitution
// =============================================================================

/// The attacker swaps the signed descriptor for one pointing at malicious
/// content, keeping the original signature.
#[tokio::test]
async fn attack_descriptor_substitution_rejected() {
    init_tracing();
    let identity = Identity::ed25519("Signer");
    let roots = CertPool::new().with(identity.cert.clone());
    let envelope = identity.signer().sign(&descriptor(b"good"), &SignOptions::new()).await.unwrap();

    let forged = tamper(&envelope, |cose| {
        let payload = Payload {
            target_artifact: descriptor(b"evil"),
        };
        cose.payload = Some(serde_json::to_vec(&payload).unwrap());
    });

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(roots)).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

/// Annotations are outside `content_eq` but still signed: changing them must
/// break the signature.
#[tokio::test]
async fn attack_annotation_rewrite_rejected() {
    let identity = Identity::ed25519("Signer");
    let roots = CertPool::new().with(identity.cert.clone());
    let original = descriptor(b"x").with_annotation("org.example.approved", "false");
    let envelope = identity.signer().sign(&original, &SignOptions::new()).await.unwrap();

    let forged = tamper(&envelope, |cose| {
        let payload = Payload {
            target_artifact: descriptor(b"x").with_annotation("org.example.approved", "true"),
        };
        cose.payload = Some(serde_json::to_vec(&payload).unwrap());
    });

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(roots)).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

/// Flipping a single signature bit.
#[tokio::test]
async fn attack_signature_bitflip_rejected() {
    let identity = Identity::ed25519("Signer");
    let roots = CertPool::new().with(identity.cert.clone());
    let envelope = identity.signer().sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let forged = tamper(&envelope, |cose| cose.signature[0] ^= 0x01);

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(roots)).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

// =============================================================================
// ATTACK: Header manipulation
// =============================================================================

/// Stripping the expiry from the protected header to revive an expired
/// envelope.
#[tokio::test]
async fn attack_expiry_removal_rejected() {
    let identity = Identity::ed25519("Signer");
    let roots = CertPool::new().with(identity.cert.clone());
    let options = SignOptions::new().with_expiry(Utc::now() + Duration::minutes(5));
    let envelope = identity.signer().sign(&descriptor(b"x"), &options).await.unwrap();

    let forged = tamper(&envelope, |cose| {
        edit_protected(cose, |header| {
            header.rest.retain(|(label, _)| *label != Label::Text(EXPIRY_LABEL.into()));
        });
    });

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(roots)).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

/// Relabelling an Ed25519 envelope as ES256.
#[tokio::test]
async fn attack_algorithm_relabel_rejected() {
    let identity = Identity::ed25519("Signer");
    let roots = CertPool::new().with(identity.cert.clone());
    let envelope = identity.signer().sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let forged = tamper(&envelope, |cose| {
        edit_protected(cose, |header| {
            header.alg = Some(coset::RegisteredLabelWithPrivate::Assigned(coset::iana::Algorithm::ES256));
        });
    });

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(roots)).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

// =============================================================================
// ATTACK: Identity and trust
// =============================================================================

/// The attacker presents a trusted certificate in place of their own, keeping
/// their signature.
#[tokio::test]
async fn attack_certificate_swap_rejected() {
    let ca = Authority::root("Root CA");
    let victim = ca.signer("Trusted Signer");
    let attacker = Identity::ed25519("Attacker");

    let envelope = attacker.signer().sign(&descriptor(b"evil"), &SignOptions::new()).await.unwrap();
    let victim_chain = Value::Bytes(victim.cert.der().to_vec());
    let forged = tamper(&envelope, |cose| {
        cose.unprotected.rest = vec![(Label::Int(33), victim_chain)];
    });

    let result = CoseVerifier::new().verify(&forged, &VerifyOptions::new(ca.pool())).await;
    assert!(matches!(result, Err(Error::InvalidSignature(_))));
}

/// A self-made root carrying the same name as the trusted one.
#[tokio::test]
async fn attack_lookalike_root_rejected() {
    init_tracing();
    let trusted = Authority::root("Root CA");
    let lookalike = Authority::root("Root CA");
    let identity = lookalike.signer("Release Signer");

    let mut chain_with_fake_root = identity.chain.clone();
    chain_with_fake_root.push(lookalike.certificate().clone());
    let signer = attest_cose::CoseSigner::new(identity.key.clone(), chain_with_fake_root).unwrap();
    let envelope = signer.sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let result = CoseVerifier::new().verify(&envelope, &VerifyOptions::new(trusted.pool())).await;
    assert!(matches!(result, Err(Error::UntrustedChain(_))));
}

/// A TLS server certificate from a trusted CA used to sign content.
#[tokio::test]
async fn attack_wrong_key_usage_rejected() {
    let ca = Authority::root("Root CA");
    let server = ca.issue(
        "www.example.com",
        vec![ExtendedKeyUsagePurpose::ServerAuth],
        common::hours(-1, 24),
    );
    let envelope = server.signer().sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let result = CoseVerifier::new().verify(&envelope, &VerifyOptions::new(ca.pool())).await;
    assert!(matches!(result, Err(Error::UntrustedChain(_))));
}

/// A trusted end-entity certificate used as an issuer for the attacker's key.
#[tokio::test]
async fn attack_non_ca_issuer_rejected() {
    let ca = Authority::root("Root CA");
    let legitimate = ca.signer("Legitimate Signer");
    let minted = legitimate.issue("Minted Signer", vec![ExtendedKeyUsagePurpose::CodeSigning]);
    assert_eq!(minted.chain.len(), 2);

    let envelope = minted.signer().sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let result = CoseVerifier::new().verify(&envelope, &VerifyOptions::new(ca.pool())).await;
    assert!(matches!(result, Err(Error::UntrustedChain(_))));
}

/// Many self-signed certificates sharing one name and key, shipped in the
/// chain to make the verifier search every ordering of them.
#[tokio::test]
async fn attack_looping_ca_certificates_fail_fast() {
    init_tracing();
    let loop_ca = Authority::root("Loop CA");
    let identity = loop_ca.signer("Looped Signer");

    let mut chain = vec![identity.cert.clone()];
    chain.extend(loop_ca.self_signed_copies(10));
    chain.push(loop_ca.certificate().clone());
    let signer = attest_cose::CoseSigner::new(identity.key.clone(), chain).unwrap();
    let envelope = signer.sign(&descriptor(b"x"), &SignOptions::new()).await.unwrap();

    let roots = Authority::root("Root CA").pool();
    let started = std::time::Instant::now();
    let result = CoseVerifier::new().verify(&envelope, &VerifyOptions::new(roots)).await;

    assert!(matches!(result, Err(Error::UntrustedChain(_))));
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

// =============================================================================
// ATTACK: Timestamp abuse
// =============================================================================

/// A "TSA" chaining to the code signing root attests an old time. Timestamp
/// trust is only ever taken from the TSA roots, so the token is worthless.
#[tokio::test]
async fn attack_tsa_domain_confusion_rejected() {
    init_tracing();
    let ca = Authority::root("Root CA");
    let real_tsa_root = Authority::root("TSA Root");
    let identity = ca.signer("Signer");
    let rogue_tsa = Arc::new(ca.timestamper("Rogue TSA"));

    let options = SignOptions::new().with_timestamper(rogue_tsa, TsaVerifyOptions::new(ca.pool()));
    let envelope = identity.signer().sign(&descriptor(b"x"), &options).await.unwrap();

    let verify = VerifyOptions::new(ca.pool())
        .with_tsa_roots(real_tsa_root.pool())
        .at(later());
    let result = CoseVerifier::new().verify(&envelope, &verify).await;
    assert!(matches!(result, Err(Error::InvalidTsaChain(_))));
}

/// A valid token lifted from another envelope.
#[tokio::test]
async fn attack_transplanted_timestamp_rejected() {
    let ca = Authority::root("Root CA");
    let tsa_root = Authority::root("TSA Root");
    let identity = ca.signer("Signer");
    let tsa = Arc::new(tsa_root.timestamper("TSA"));

    let options = SignOptions::new().with_timestamper(tsa, TsaVerifyOptions::new(tsa_root.pool()));
    let donor = identity.signer().sign(&descriptor(b"donor"), &options).await.unwrap();
    let target = identity.signer().sign(&descriptor(b"target"), &SignOptions::new()).await.unwrap();

    let donor_cose = CoseSign1::from_tagged_slice(&donor).unwrap();
    let token = donor_cose
        .unprotected
        .rest
        .iter()
        .find(|(label, _)| *label == Label::Text(TIMESTAMP_LABEL.into()))
        .map(|(_, value)| value.clone())
        .unwrap();
    let forged = tamper(&target, |cose| {
        cose.unprotected.rest.push((Label::Text(TIMESTAMP_LABEL.into()), token));
    });

    let verify = VerifyOptions::new(ca.pool())
        .with_tsa_roots(tsa_root.pool())
        .at(later());
    let result = CoseVerifier::new().verify(&forged, &verify).await;
    assert!(matches!(result, Err(Error::InvalidTsaChain(_))));
}

/// Dropping the timestamp does not make an expired envelope acceptable.
#[tokio::test]
async fn attack_stripped_timestamp_rejected() {
    let ca = Authority::root("Root CA");
    let tsa_root = Authority::root("TSA Root");
    let identity = ca.signer("Signer");
    let tsa = Arc::new(tsa_root.timestamper("TSA"));

    let options = SignOptions::new().with_timestamper(tsa, TsaVerifyOptions::new(tsa_root.pool()));
    let envelope = identity.signer().sign(&descriptor(b"x"), &options).await.unwrap();

    let stripped = tamper(&envelope, |cose| {
        cose.unprotected
            .rest
            .retain(|(label, _)| *label != Label::Text(TIMESTAMP_LABEL.into()));
    });

    let verify = VerifyOptions::new(ca.pool())
        .with_tsa_roots(tsa_root.pool())
        .at(later());
    let result = CoseVerifier::new().verify(&stripped, &verify).await;
    assert!(matches!(result, Err(Error::ExpiredCertificate { .. })));
}

/// A TSA that backdates outside its own certificate's lifetime. The signer
/// refuses to embed the token.
#[tokio::test]
async fn attack_backdated_token_refused_by_signer() {
    let tsa_root = Authority::root("TSA Root");
    let identity = Identity::ed25519("Signer");
    let backdating = Arc::new(
        tsa_root
            .timestamper("TSA")
            .with_gen_time(Utc::now() - Duration::days(3)),
    );

    let options = SignOptions::new().with_timestamper(backdating, TsaVerifyOptions::new(tsa_root.pool()));
    let result = identity.signer().sign(&descriptor(b"x"), &options).await;
    assert!(matches!(result, Err(Error::InvalidTsaChain(_))));
}

/// A token whose TSA certificate lacks the time-stamping usage.
#[tokio::test]
async fn attack_tsa_without_time_stamping_usage_rejected() {
    let ca = Authority::root("Root CA");
    let tsa_root = Authority::root("TSA Root");
    let identity = ca.signer("Signer");

    let impostor = tsa_root.issue(
        "Code Signer Posing As TSA",
        vec![ExtendedKeyUsagePurpose::CodeSigning],
        common::hours(-1, 24 * 30),
    );
    let tsa = Arc::new(attest_core::InMemoryTimestamper::new(impostor.key, impostor.chain).unwrap());

    let options = SignOptions::new().with_timestamper(tsa, TsaVerifyOptions::new(tsa_root.pool()));
    let result = identity.signer().sign(&descriptor(b"x"), &options).await;
    assert!(matches!(result, Err(Error::InvalidTsaChain(_))));
}
