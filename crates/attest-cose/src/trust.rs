//! Effective trust time selection
//!
//! A signing chain is accepted if it is valid at the default verification
//! time, or failing that at a time attested by a verified timestamp token.
//! The order of candidates is decided by [`trust_times`], a pure function,
//! and [`select_trust_time`] searches for a path valid at each candidate in
//! turn.

use attest_core::{AttestedTime, CertificatePath, Error, PathBuilder, Result};
use chrono::{DateTime, Utc};

/// What became of an embedded timestamp token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampOutcome {
    /// The envelope has no token
    Absent,
    /// The token verified against the TSA roots
    Verified(AttestedTime),
    /// The token is present but could not be trusted
    Rejected(String),
}

/// An instant the signing chain was checked at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveTime {
    /// The verification time (caller override or now)
    Current(DateTime<Utc>),
    /// A timestamp-attested time; the chain must be valid across its accuracy
    Attested(AttestedTime),
}

impl EffectiveTime {
    /// Instants the chain must be valid at
    pub fn instants(&self) -> Vec<DateTime<Utc>> {
        match self {
            EffectiveTime::Current(at) => vec![*at],
            EffectiveTime::Attested(attested) if attested.earliest() == attested.latest() => vec![attested.time],
            EffectiveTime::Attested(attested) => vec![attested.earliest(), attested.latest()],
        }
    }

    /// The representative instant
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            EffectiveTime::Current(at) => *at,
            EffectiveTime::Attested(attested) => attested.time,
        }
    }

    /// Whether the time came from a timestamp token
    pub fn is_attested(&self) -> bool {
        matches!(self, EffectiveTime::Attested(_))
    }
}

/// Candidate times in the order they are tried
pub fn trust_times(default: DateTime<Utc>, outcome: &TimestampOutcome) -> Vec<EffectiveTime> {
    let mut times = vec![EffectiveTime::Current(default)];
    if let TimestampOutcome::Verified(attested) = outcome {
        times.push(EffectiveTime::Attested(*attested));
    }
    times
}

/// A trusted certificate path and the time it was found valid at
#[derive(Debug, Clone)]
pub struct TrustedPath {
    /// Leaf to trust anchor
    pub path: CertificatePath,
    /// The candidate time the path is valid at
    pub time: EffectiveTime,
}

/// First candidate time with a path valid at it
///
/// `path` is the first path found by `builder` without regard to time; it is
/// preferred when valid, otherwise `builder` searches again restricted to the
/// candidate's instants.
///
/// With no usable time the error is [`Error::InvalidTsaChain`] when a token
/// was rejected, otherwise [`Error::ExpiredCertificate`] at the default time.
pub fn select_trust_time(
    builder: &PathBuilder<'_>,
    path: CertificatePath,
    default: DateTime<Utc>,
    outcome: &TimestampOutcome,
) -> Result<TrustedPath> {
    for candidate in trust_times(default, outcome) {
        let instants = candidate.instants();
        if instants.iter().all(|at| path.check_validity_at(*at).is_ok()) {
            return Ok(TrustedPath { path, time: candidate });
        }
        if let Some(found) = builder.build_valid_at(&instants)? {
            return Ok(TrustedPath {
                path: found,
                time: candidate,
            });
        }
    }

    if let TimestampOutcome::Rejected(reason) = outcome {
        return Err(Error::InvalidTsaChain(reason.clone()));
    }

    path.check_validity_at(default)?;
    Err(Error::ExpiredCertificate {
        subject: path.leaf().subject().to_string(),
        at: default,
    })
}
