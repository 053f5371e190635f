//! Signer and verifier configuration
//!
//! Configuration is passed explicitly to constructors. `from_env` reads:
//!
//! - `ATTEST_TSA_TIMEOUT_SECS`: timestamp request timeout in seconds
//! - `ATTEST_ALLOWED_ALGORITHMS`: comma separated COSE names (e.g. `ES256,EdDSA`)
//! - `ATTEST_MAX_CHAIN_DEPTH`: maximum certificates in a path

use crate::crypto::SignatureAlgorithm;
use crate::x509::DEFAULT_MAX_CHAIN_DEPTH;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// Default timeout for a timestamp request
pub const DEFAULT_TSA_TIMEOUT: Duration = Duration::from_secs(30);

/// Signer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Bound on the timestamper round trip; `None` waits indefinitely
    pub timestamp_timeout: Option<Duration>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            timestamp_timeout: Some(DEFAULT_TSA_TIMEOUT),
        }
    }
}

impl SignerConfig {
    /// Defaults overridden by `ATTEST_TSA_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("ATTEST_TSA_TIMEOUT_SECS") {
            config.timestamp_timeout = if secs == 0 {
                None
            } else {
                Some(Duration::from_secs(secs))
            };
        }
        config
    }
}

/// Verifier configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Envelope algorithms accepted by the verifier
    pub allowed_algorithms: Vec<SignatureAlgorithm>,

    /// Maximum number of certificates in a path, leaf and anchor included
    pub max_chain_depth: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            allowed_algorithms: SignatureAlgorithm::ALL.to_vec(),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl VerifierConfig {
    /// Defaults overridden by `ATTEST_ALLOWED_ALGORITHMS` and `ATTEST_MAX_CHAIN_DEPTH`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("ATTEST_ALLOWED_ALGORITHMS") {
            match parse_algorithms(&raw) {
                Some(algorithms) => config.allowed_algorithms = algorithms,
                None => warn!(value = %raw, "Ignoring unparsable ATTEST_ALLOWED_ALGORITHMS"),
            }
        }

        if let Some(depth) = env_parse::<usize>("ATTEST_MAX_CHAIN_DEPTH") {
            if depth == 0 {
                warn!("Ignoring ATTEST_MAX_CHAIN_DEPTH=0");
            } else {
                config.max_chain_depth = depth;
            }
        }

        config
    }

    /// Whether `algorithm` is accepted
    pub fn allows(&self, algorithm: SignatureAlgorithm) -> bool {
        self.allowed_algorithms.contains(&algorithm)
    }
}

fn parse_algorithms(raw: &str) -> Option<Vec<SignatureAlgorithm>> {
    let algorithms: Vec<SignatureAlgorithm> = raw
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .map(|name| name.parse().ok())
        .collect::<Option<_>>()?;
    if algorithms.is_empty() {
        None
    } else {
        Some(algorithms)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}
