//! Bitget REST request signing.
//!
//! Every private endpoint expects four headers: `ACCESS-KEY`,
//! `ACCESS-PASSPHRASE`, `ACCESS-TIMESTAMP` (epoch milliseconds as a string)
//! and `ACCESS-SIGN`, computed as
//!
//! ```text
//! Base64(HMAC-SHA256(secret, timestamp + METHOD + path + ["?" + query] + body))
//! ```
//!
//! The query string must be byte-identical to the one sent on the wire, so
//! [`QueryParams`] renders a single canonical form used for both.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::prelude::*;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{Result, SweepError};

/// Bytes left as-is in keys and values: RFC 3986 unreserved plus `,` so
/// id lists stay readable. A space becomes `%20`, never `+`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',');

/// Ordered query parameters with absent values dropped.
///
/// Keys sort lexicographically; values are percent-encoded when rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    params: BTreeMap<String, String>,
}

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key=value`. Booleans render as `true`/`false`.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Display) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds `key=value` only when `value` is present.
    #[must_use]
    pub fn with_opt(self, key: &str, value: Option<impl Display>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Renders the canonical `k1=v1&k2=v2` string.
    pub fn canonical(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(k, QUERY_ENCODE_SET),
                    utf8_percent_encode(v, QUERY_ENCODE_SET)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// API credentials. The secret and passphrase are wiped on drop.
pub struct Credentials {
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
    pub passphrase: Zeroizing<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Headers attached to one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub access_key: String,
    pub signature: String,
    pub passphrase: String,
    pub timestamp: String,
}

impl SignedHeaders {
    /// Header name/value pairs in the order Bitget documents them.
    pub fn pairs(&self) -> [(&'static str, &str); 6] {
        [
            ("ACCESS-KEY", self.access_key.as_str()),
            ("ACCESS-SIGN", self.signature.as_str()),
            ("ACCESS-PASSPHRASE", self.passphrase.as_str()),
            ("ACCESS-TIMESTAMP", self.timestamp.as_str()),
            ("Content-Type", "application/json"),
            ("locale", "en-US"),
        ]
    }
}

/// Stateless request signer.
#[derive(Debug)]
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    /// Creates a signer, rejecting blank credentials up front.
    ///
    /// # Errors
    ///
    /// Returns [`SweepError::Config`] if the key, secret, or passphrase is empty.
    pub fn new(credentials: Credentials) -> Result<Self> {
        let missing: Vec<&str> = [
            ("BITGET_API_KEY", credentials.api_key.is_empty()),
            ("BITGET_API_SECRET", credentials.api_secret.is_empty()),
            ("BITGET_API_PASSPHRASE", credentials.passphrase.is_empty()),
        ]
        .into_iter()
        .filter_map(|(name, empty)| empty.then_some(name))
        .collect();

        if !missing.is_empty() {
            return Err(SweepError::Config(format!(
                "missing credentials: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { credentials })
    }

    /// Signs a request issued at `timestamp_ms`.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &QueryParams,
        body: &str,
        timestamp_ms: u64,
    ) -> Result<SignedHeaders> {
        let timestamp = timestamp_ms.to_string();
        let signature = sign(
            self.credentials.api_secret.as_str(),
            &timestamp,
            method,
            path,
            &query.canonical(),
            body,
        )?;

        Ok(SignedHeaders {
            access_key: self.credentials.api_key.clone(),
            signature,
            passphrase: self.credentials.passphrase.to_string(),
            timestamp,
        })
    }
}

/// Computes the `ACCESS-SIGN` header value.
fn sign(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    query: &str,
    body: &str,
) -> Result<String> {
    let mut prehash = format!("{timestamp}{}{path}", method.to_uppercase());
    if !query.is_empty() {
        prehash.push('?');
        prehash.push_str(query);
    }
    prehash.push_str(body);

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| SweepError::Config(format!("invalid HMAC key: {e}")))?;
    mac.update(prehash.as_bytes());

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
