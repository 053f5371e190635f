//! Per-call options for signing and verification

use crate::error::{Error, Result};
use crate::timestamp::Timestamper;
use crate::x509::CertPool;
use chrono::{DateTime, Utc};
use const_oid::ObjectIdentifier;
use std::fmt;
use std::sync::Arc;

/// How the signer checks a token before embedding it
#[derive(Debug, Clone, Default)]
pub struct TsaVerifyOptions {
    /// Roots the TSA chain must lead to
    pub roots: CertPool,

    /// Instant to evaluate the TSA chain at; `None` means now
    pub current_time: Option<DateTime<Utc>>,

    /// Accepted extended key usages; empty means time stamping
    pub key_usages: Vec<ObjectIdentifier>,
}

impl TsaVerifyOptions {
    /// Options trusting `roots`
    pub fn new(roots: CertPool) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }
}

/// Options for one `sign` call
#[derive(Clone, Default)]
pub struct SignOptions {
    /// Instant after which verifiers reject the envelope
    pub expiry: Option<DateTime<Utc>>,

    /// Timestamp authority to countersign with
    pub tsa: Option<Arc<dyn Timestamper>>,

    /// How to check the returned token
    pub tsa_verify_options: TsaVerifyOptions,
}

impl fmt::Debug for SignOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignOptions")
            .field("expiry", &self.expiry)
            .field("tsa", &self.tsa.as_ref().map(|_| "[timestamper]"))
            .field("tsa_verify_options", &self.tsa_verify_options)
            .finish()
    }
}

impl SignOptions {
    /// Options with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the envelope expiry (builder pattern)
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Countersign with `tsa`, checking tokens against `verify_options`
    pub fn with_timestamper(mut self, tsa: Arc<dyn Timestamper>, verify_options: TsaVerifyOptions) -> Self {
        self.tsa = Some(tsa);
        self.tsa_verify_options = verify_options;
        self
    }

    /// Structural checks only
    pub fn validate(&self) -> Result<()> {
        if self.tsa.is_some() && self.tsa_verify_options.roots.is_empty() {
            return Err(Error::InvalidOptions(
                "a timestamp authority is set but no TSA roots are configured".into(),
            ));
        }
        Ok(())
    }
}

/// Options for one `verify` call
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Roots the signing chain must lead to
    pub roots: CertPool,

    /// Roots for embedded timestamp tokens; with `None` no token is trusted
    pub tsa_roots: Option<CertPool>,

    /// Instant to verify at; `None` means now
    pub current_time: Option<DateTime<Utc>>,
}

impl VerifyOptions {
    /// Options trusting `roots`
    pub fn new(roots: CertPool) -> Self {
        Self {
            roots,
            ..Default::default()
        }
    }

    /// Trust timestamp tokens leading to `tsa_roots` (builder pattern)
    pub fn with_tsa_roots(mut self, tsa_roots: CertPool) -> Self {
        self.tsa_roots = Some(tsa_roots);
        self
    }

    /// Verify as if at `time` (builder pattern)
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.current_time = Some(time);
        self
    }

    /// The default effective time: the override, or now
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.current_time.unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::{TimestampRequest, TimestampToken};
    use async_trait::async_trait;

    struct Refusing;

    #[async_trait]
    impl Timestamper for Refusing {
        async fn timestamp(&self, _request: &TimestampRequest) -> Result<TimestampToken> {
            Err(Error::TimestampService("unavailable".into()))
        }
    }

    #[test]
    fn test_sign_options_require_tsa_roots() {
        assert!(SignOptions::new().validate().is_ok());

        let options = SignOptions::new().with_timestamper(Arc::new(Refusing), TsaVerifyOptions::default());
        assert!(matches!(options.validate(), Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn test_verify_options_effective_time() {
        let fixed = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(VerifyOptions::default().at(fixed).effective_time(), fixed);

        let before = Utc::now();
        assert!(VerifyOptions::default().effective_time() >= before);
    }
}
