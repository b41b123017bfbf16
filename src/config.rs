//! Application configuration loaded from environment variables.
//!
//! Credentials **must** be provided via environment variables (or the
//! keychain, see [`crate::credentials`]):
//! - `BITGET_API_KEY`
//! - `BITGET_API_SECRET`
//! - `BITGET_API_PASSPHRASE`
//!
//! Everything else is optional and falls back to the component defaults.
//! Empty variables are treated as unset.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::SweepError;
use crate::auth::Credentials;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::client::ClientSettings;
use crate::fetch::FetchSettings;
use crate::models::FetchTask;
use crate::page_sizer::PageSizerConfig;
use crate::rate_limit::RateLimits;
use crate::sweep::SweepSettings;

/// Where blobs are written. Without `results_dir` nothing is offloaded.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub results_dir: Option<PathBuf>,
    pub public_base_url: Option<String>,
}

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub credentials: Credentials,
    pub client: ClientSettings,
    pub fetch: FetchSettings,
    pub page_sizer: PageSizerConfig,
    pub rate_limits: RateLimits,
    pub breaker: CircuitBreakerConfig,
    pub smart_pagination: bool,
    pub sweep: SweepSettings,
    pub storage: StorageConfig,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`SweepError::Config`] if any credential is missing or a tuning
/// variable cannot be parsed.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let credentials = credentials_from_env()?;

    let client_defaults = ClientSettings::default();
    let client = ClientSettings {
        base_url: non_empty_var("BITGET_BASE").unwrap_or(client_defaults.base_url),
        timeout: secs_var("BITGET_TIMEOUT", client_defaults.timeout)?,
        retries: parse_var("BITGET_RETRIES", client_defaults.retries)?,
    };

    let fetch_defaults = FetchSettings::default();
    let fetch = FetchSettings {
        spot_max_pages: parse_var("SPOT_MAX_PAGES", fetch_defaults.spot_max_pages)?,
        futures_max_pages: parse_var("FUTURES_MAX_PAGES", fetch_defaults.futures_max_pages)?,
        futures_page_size: parse_var("FUTURES_PAGE_SIZE", fetch_defaults.futures_page_size)?,
        max_concurrent_spot: parse_var("MAX_CONCURRENT_SPOT", fetch_defaults.max_concurrent_spot)?,
        max_concurrent_futures: parse_var(
            "MAX_CONCURRENT_FUTURES",
            fetch_defaults.max_concurrent_futures,
        )?,
        futures_suffixes: list_var("FUTURES_SUFFIXES").unwrap_or(fetch_defaults.futures_suffixes),
        default_window: fetch_defaults.default_window,
    };

    let sizer_defaults = PageSizerConfig::default();
    let page_sizer = PageSizerConfig::default()
        .with_bounds(
            parse_var("MIN_PAGE_SIZE", sizer_defaults.min_size)?,
            parse_var("MAX_PAGE_SIZE", sizer_defaults.max_size)?,
        )
        .with_default_size(parse_var("PAGE_LIMIT", sizer_defaults.default_size)?)
        .with_enabled(bool_var("ADAPTIVE_PAGE_SIZING", true)?);

    let rate_defaults = RateLimits::default();
    let rate_limits = RateLimits {
        spot: parse_var("SPOT_RATE_LIMIT", rate_defaults.spot)?,
        futures: parse_var("FUTURES_RATE_LIMIT", rate_defaults.futures)?,
    };

    let breaker = CircuitBreakerConfig::default().with_enabled(bool_var("ENABLE_CIRCUIT_BREAKER", true)?);

    let sweep_defaults = SweepSettings::default();
    let mut sweep = SweepSettings {
        max_execution: secs_var("MAX_EXECUTION_TIME", sweep_defaults.max_execution)?,
        max_concurrent_symbols: parse_var(
            "MAX_CONCURRENT_SYMBOLS",
            sweep_defaults.max_concurrent_symbols,
        )?,
        results_prefix: non_empty_var("RESULTS_PREFIX").unwrap_or(sweep_defaults.results_prefix),
        ..sweep_defaults
    };
    sweep.bounder.max_bytes = parse_var("MAX_RESPONSE_BYTES", sweep.bounder.max_bytes)?;
    if let Some(prefix) = non_empty_var("AGGREGATE_PREFIX") {
        sweep.reducer.aggregate_prefix = prefix;
    }
    sweep.reducer.max_error_examples =
        parse_var("MAX_ERROR_EXAMPLES", sweep.reducer.max_error_examples)?;
    sweep.reducer.cleanup_symbol_blobs = bool_var("CLEANUP_SYMBOL_BLOBS", false)?;

    let storage = StorageConfig {
        results_dir: non_empty_var("RESULTS_DIR").map(PathBuf::from),
        public_base_url: non_empty_var("PUBLIC_BASE_URL"),
    };

    Ok(AppConfig {
        credentials,
        client,
        fetch,
        page_sizer,
        rate_limits,
        breaker,
        smart_pagination: bool_var("ENABLE_SMART_PAGINATION", true)?,
        sweep,
        storage,
    })
}

/// Builds the task list for one run from command-line symbols, falling back
/// to `SWEEP_SYMBOLS`. `SWEEP_START_MS` / `SWEEP_END_MS` bound every task;
/// second-granularity values are accepted.
///
/// # Errors
///
/// Returns [`SweepError::Config`] if no symbol is given or a bound is not
/// an integer.
pub fn sweep_tasks(args: impl IntoIterator<Item = String>) -> crate::Result<Vec<FetchTask>> {
    let mut symbols: Vec<String> = args
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        symbols = list_var("SWEEP_SYMBOLS").unwrap_or_default();
    }
    if symbols.is_empty() {
        return Err(SweepError::Config(
            "no symbols given: pass SYMBOL arguments or set SWEEP_SYMBOLS".to_string(),
        ));
    }

    let start = opt_var::<i64>("SWEEP_START_MS")?;
    let end = opt_var::<i64>("SWEEP_END_MS")?;
    Ok(symbols
        .into_iter()
        .map(|symbol| FetchTask::new(symbol).with_window(start, end))
        .collect())
}

fn credentials_from_env() -> crate::Result<Credentials> {
    let api_key = non_empty_var("BITGET_API_KEY");
    let api_secret = non_empty_var("BITGET_API_SECRET");
    let passphrase = non_empty_var("BITGET_API_PASSPHRASE");

    match (api_key, api_secret, passphrase) {
        (Some(api_key), Some(api_secret), Some(passphrase)) => Ok(Credentials {
            api_key,
            api_secret: Zeroizing::new(api_secret),
            passphrase: Zeroizing::new(passphrase),
        }),
        (key, secret, pass) => {
            let missing: Vec<&str> = [
                ("BITGET_API_KEY", key.is_none()),
                ("BITGET_API_SECRET", secret.is_none()),
                ("BITGET_API_PASSPHRASE", pass.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            Err(SweepError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn opt_var<T>(name: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    non_empty_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| SweepError::Config(format!("invalid {name} '{raw}': {e}")))
        })
        .transpose()
}

fn parse_var<T>(name: &str, default: T) -> crate::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(opt_var(name)?.unwrap_or(default))
}

/// Accepts `true/false`, `1/0` and `yes/no`, case-insensitively.
pub(crate) fn bool_var(name: &str, default: bool) -> crate::Result<bool> {
    let Some(raw) = non_empty_var(name) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SweepError::Config(format!("invalid {name} '{raw}': expected a boolean"))),
    }
}

/// Seconds, fractional values allowed.
fn secs_var(name: &str, default: Duration) -> crate::Result<Duration> {
    let Some(secs) = opt_var::<f64>(name)? else {
        return Ok(default);
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|e| SweepError::Config(format!("invalid {name} '{secs}': {e}")))
}

/// Comma-separated list with blanks dropped; `None` when unset or empty.
fn list_var(name: &str) -> Option<Vec<String>> {
    let items: Vec<String> = non_empty_var(name)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!items.is_empty()).then_some(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

    const CREDS: [(&str, Option<&str>); 3] = [
        ("BITGET_API_KEY", Some("test-key")),
        ("BITGET_API_SECRET", Some("test-secret")),
        ("BITGET_API_PASSPHRASE", Some("test-pass")),
    ];

    /// Helper that temporarily sets env vars, runs `f`, then restores originals.
    ///
    /// Env mutation is process-wide, so callers are serialized on a lock.
    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock();
        let originals: Vec<(&str, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();

        for (k, v) in vars {
            // SAFETY: guarded by ENV_LOCK; no other test touches these vars concurrently.
            unsafe {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }

        f();

        for (k, original) in originals {
            // SAFETY: restoring original values under the same lock.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    fn creds_and(extra: &[(&'static str, Option<&'static str>)]) -> Vec<(&'static str, Option<&'static str>)> {
        CREDS.iter().copied().chain(extra.iter().copied()).collect()
    }

    #[test]
    fn defaults_with_credentials_only() {
        let vars = creds_and(&[
            ("BITGET_BASE", None),
            ("MAX_EXECUTION_TIME", None),
            ("FUTURES_SUFFIXES", None),
            ("RESULTS_DIR", None),
            ("ENABLE_SMART_PAGINATION", None),
        ]);
        with_env(&vars, || {
            let config = fetch_config().unwrap();
            assert_eq!(config.credentials.api_key, "test-key");
            assert_eq!(config.client.base_url, "https://api.bitget.com");
            assert_eq!(config.sweep.max_execution, Duration::from_secs(50));
            assert_eq!(config.fetch.futures_suffixes, vec!["UMCBL", "DMCBL", "CMCBL"]);
            assert!(config.storage.results_dir.is_none());
            assert!(config.smart_pagination);
        });
    }

    #[test]
    fn missing_credentials_are_listed() {
        with_env(
            &[
                ("BITGET_API_KEY", Some("key-only")),
                ("BITGET_API_SECRET", None),
                ("BITGET_API_PASSPHRASE", Some("")),
            ],
            || {
                let err = fetch_config().unwrap_err().to_string();
                assert!(err.contains("BITGET_API_SECRET"));
                assert!(err.contains("BITGET_API_PASSPHRASE"));
                assert!(!err.contains("BITGET_API_KEY,"));
            },
        );
    }

    #[test]
    fn overrides_are_applied() {
        let vars = creds_and(&[
            ("MAX_EXECUTION_TIME", Some("12.5")),
            ("FUTURES_SUFFIXES", Some("UMCBL, SUMCBL")),
            ("SPOT_RATE_LIMIT", Some("5")),
            ("ENABLE_CIRCUIT_BREAKER", Some("no")),
            ("RESULTS_DIR", Some("/tmp/results")),
            ("CLEANUP_SYMBOL_BLOBS", Some("1")),
        ]);
        with_env(&vars, || {
            let config = fetch_config().unwrap();
            assert_eq!(config.sweep.max_execution, Duration::from_millis(12_500));
            assert_eq!(config.fetch.futures_suffixes, vec!["UMCBL", "SUMCBL"]);
            assert_eq!(config.rate_limits.spot, 5);
            assert!(!config.breaker.enabled);
            assert_eq!(config.storage.results_dir, Some(PathBuf::from("/tmp/results")));
            assert!(config.sweep.reducer.cleanup_symbol_blobs);
        });
    }

    #[test]
    fn unparsable_values_are_config_errors() {
        let vars = creds_and(&[("BITGET_RETRIES", Some("many"))]);
        with_env(&vars, || {
            let err = fetch_config().unwrap_err();
            assert!(matches!(err, SweepError::Config(ref m) if m.contains("BITGET_RETRIES")));
        });
    }

    #[test]
    fn tasks_from_args_or_env() {
        with_env(
            &[
                ("SWEEP_SYMBOLS", Some("ETHUSDT,XRPUSDT")),
                ("SWEEP_START_MS", Some("1700000000")),
                ("SWEEP_END_MS", None),
            ],
            || {
                let tasks = sweep_tasks(vec!["BTCUSDT".to_string()]).unwrap();
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].symbol, "BTCUSDT");
                assert_eq!(tasks[0].start_ms, Some(1_700_000_000_000));

                let tasks = sweep_tasks(Vec::new()).unwrap();
                let symbols: Vec<_> = tasks.iter().map(|t| t.symbol.as_str()).collect();
                assert_eq!(symbols, vec!["ETHUSDT", "XRPUSDT"]);
            },
        );
    }

    #[test]
    fn no_symbols_is_an_error() {
        with_env(&[("SWEEP_SYMBOLS", Some(" , "))], || {
            assert!(sweep_tasks(Vec::new()).is_err());
        });
    }
}
