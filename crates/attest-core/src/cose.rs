//! COSE header helpers shared by envelopes and timestamp tokens

use crate::crypto::SignatureAlgorithm;
use crate::error::{Error, Result};
use crate::x509::Certificate;
use chrono::{DateTime, Utc};
use coset::cbor::value::Value;
use coset::{Algorithm, Header, Label, RegisteredLabelWithPrivate};

/// Header label for the X.509 certificate chain (RFC 9360)
pub const X5CHAIN_LABEL: i64 = 33;

/// Encode a certificate chain, leaf first
///
/// A single certificate is a bare byte string, longer chains an array.
pub fn x5chain_value(chain: &[Certificate]) -> Value {
    match chain {
        [single] => Value::Bytes(single.der().to_vec()),
        _ => Value::Array(chain.iter().map(|c| Value::Bytes(c.der().to_vec())).collect()),
    }
}

/// Decode the certificate chain from a header
///
/// Returns an empty vector when the header has no chain.
pub fn x5chain_from_header(header: &Header) -> Result<Vec<Certificate>> {
    let value = match find_value(header, &Label::Int(X5CHAIN_LABEL)) {
        Some(value) => value,
        None => return Ok(Vec::new()),
    };

    match value {
        Value::Bytes(der) => Ok(vec![Certificate::from_der(der)?]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Bytes(der) => Certificate::from_der(der),
                _ => Err(Error::Certificate("x5chain entry is not a byte string".into())),
            })
            .collect(),
        _ => Err(Error::Certificate("x5chain is neither bytes nor an array".into())),
    }
}

/// Look up a header parameter by label
pub fn find_value<'a>(header: &'a Header, label: &Label) -> Option<&'a Value> {
    header
        .rest
        .iter()
        .find(|(candidate, _)| candidate == label)
        .map(|(_, value)| value)
}

/// Look up a text-labelled header parameter
pub fn find_text_value<'a>(header: &'a Header, name: &str) -> Option<&'a Value> {
    find_value(header, &Label::Text(name.to_string()))
}

/// Integer value of a header parameter
pub fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => i64::try_from(*i).ok(),
        _ => None,
    }
}

/// Encode an instant as Unix seconds
pub fn time_value(time: DateTime<Utc>) -> Value {
    Value::Integer(time.timestamp().into())
}

/// Decode an instant from Unix seconds
pub fn time_from_value(value: &Value) -> Option<DateTime<Utc>> {
    int_value(value).and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
}

/// Signature algorithm named in a header
///
/// Fails with [`Error::UnsupportedAlgorithm`] when the algorithm is absent or
/// not one we implement.
pub fn header_algorithm(header: &Header) -> Result<SignatureAlgorithm> {
    match &header.alg {
        Some(RegisteredLabelWithPrivate::Assigned(alg)) => SignatureAlgorithm::from_cose(*alg)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("COSE algorithm {:?}", alg))),
        Some(other) => Err(Error::UnsupportedAlgorithm(format!("COSE algorithm {:?}", other))),
        None => Err(Error::UnsupportedAlgorithm("header has no algorithm".into())),
    }
}

/// COSE algorithm label for a signature algorithm
pub fn algorithm_label(alg: SignatureAlgorithm) -> Algorithm {
    RegisteredLabelWithPrivate::Assigned(alg.to_cose())
}

/// Text content type of a header, if any
pub fn content_type(header: &Header) -> Option<&str> {
    match &header.content_type {
        Some(coset::ContentType::Text(text)) => Some(text.as_str()),
        _ => None,
    }
}
