//! Optional credential lookup in the system keychain.
//!
//! Sweeps normally run unattended with credentials in the environment. On
//! a workstation the same values can live in the keychain instead:
//! [`populate_env_from_keychain`] copies them into any unset variables
//! before [`crate::config::fetch_config`] runs.
//!
//! - `USE_KEYCHAIN` (default `true`) turns the lookup off entirely.
//! - `KEYCHAIN_SERVICE` (default `ordersweep`) names the keychain service.
//!
//! Hosts without a keychain backend are detected on the first lookup and
//! the rest are skipped.

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{bool_var, non_empty_var};

const DEFAULT_SERVICE: &str = "ordersweep";

/// API credentials that may be stored in the keychain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialKey {
    ApiKey,
    ApiSecret,
    Passphrase,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 3] = [Self::ApiKey, Self::ApiSecret, Self::Passphrase];

    /// Keychain account name.
    pub fn account(self) -> &'static str {
        match self {
            Self::ApiKey => "bitget_api_key",
            Self::ApiSecret => "bitget_api_secret",
            Self::Passphrase => "bitget_api_passphrase",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Self::ApiKey => "BITGET_API_KEY",
            Self::ApiSecret => "BITGET_API_SECRET",
            Self::Passphrase => "BITGET_API_PASSPHRASE",
        }
    }
}

/// Result of asking the keychain for one credential.
#[derive(Debug)]
pub enum Lookup {
    Found(Zeroizing<String>),
    Missing,
    /// No usable keychain backend on this host.
    Unavailable,
}

/// Reads `key` from the keychain under `service`.
pub fn lookup(service: &str, key: CredentialKey) -> Lookup {
    let result = keyring::Entry::new(service, key.account()).and_then(|entry| entry.get_password());
    match result {
        Ok(secret) => Lookup::Found(Zeroizing::new(secret)),
        Err(keyring::Error::NoEntry) => Lookup::Missing,
        Err(keyring::Error::PlatformFailure(e) | keyring::Error::NoStorageAccess(e)) => {
            debug!(error = %e, "no keychain backend available");
            Lookup::Unavailable
        }
        Err(e) => {
            warn!(account = key.account(), error = %e, "failed to read keychain entry");
            Lookup::Missing
        }
    }
}

/// Fills every credential for which `is_set` is false from `lookup`,
/// handing found values to `set`. Stops at the first
/// [`Lookup::Unavailable`]. Returns the credentials that were filled.
fn fill_missing(
    is_set: impl Fn(&str) -> bool,
    mut lookup: impl FnMut(CredentialKey) -> Lookup,
    mut set: impl FnMut(&str, &str),
) -> Vec<CredentialKey> {
    let mut filled = Vec::new();
    for key in CredentialKey::ALL {
        if is_set(key.env_var()) {
            continue;
        }
        match lookup(key) {
            Lookup::Found(value) => {
                set(key.env_var(), value.as_str());
                filled.push(key);
            }
            Lookup::Missing => {}
            Lookup::Unavailable => break,
        }
    }
    filled
}

/// Copies keychain credentials into unset environment variables and
/// returns which ones were filled. Variables already set always win.
///
/// Call from `main` before any task is spawned.
///
/// # Errors
///
/// Returns [`crate::SweepError::Config`] if `USE_KEYCHAIN` is not a boolean.
pub fn populate_env_from_keychain() -> crate::Result<Vec<CredentialKey>> {
    if !bool_var("USE_KEYCHAIN", true)? {
        debug!("keychain lookup disabled");
        return Ok(Vec::new());
    }
    let service = non_empty_var("KEYCHAIN_SERVICE").unwrap_or_else(|| DEFAULT_SERVICE.to_string());

    let filled = fill_missing(
        |name| non_empty_var(name).is_some(),
        |key| lookup(&service, key),
        |name, value| {
            // SAFETY: runs on the main thread before the runtime spawns tasks.
            unsafe { std::env::set_var(name, value) }
        },
    );
    if !filled.is_empty() {
        info!(service = %service, count = filled.len(), "credentials loaded from keychain");
    }
    Ok(filled)
}
