//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default lifetime of a cached permission map (24 hours).
pub const DEFAULT_PERMISSION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the API (without the `/api/v1` suffix).
    pub api_url: String,
    pub permission_max_age: Duration,
    pub request_timeout: Duration,
    /// SQLite store location; `None` means the per-user default path.
    pub store_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            permission_max_age: DEFAULT_PERMISSION_MAX_AGE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            store_path: None,
        }
    }

    /// Read configuration from `CODEGRADE_*` environment variables,
    /// falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("CODEGRADE_API_URL").unwrap_or_else(|| {
            tracing::warn!("CODEGRADE_API_URL not set; using {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });

        Self {
            api_url,
            permission_max_age: secs_var(
                &lookup,
                "CODEGRADE_PERMISSION_MAX_AGE_SECS",
                DEFAULT_PERMISSION_MAX_AGE,
            ),
            request_timeout: secs_var(
                &lookup,
                "CODEGRADE_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT,
            ),
            store_path: lookup("CODEGRADE_STORE_PATH").map(PathBuf::from),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

fn secs_var<F>(lookup: &F, name: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(err) => {
                tracing::warn!(%name, %raw, %err, "invalid duration; using default");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.permission_max_age, Duration::from_secs(86_400));
    }

    #[test]
    fn reads_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("CODEGRADE_API_URL", "https://codegra.de"),
            ("CODEGRADE_PERMISSION_MAX_AGE_SECS", "60"),
            ("CODEGRADE_STORE_PATH", "/tmp/cg.db"),
        ]));
        assert_eq!(config.api_url, "https://codegra.de");
        assert_eq!(config.permission_max_age, Duration::from_secs(60));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/cg.db")));
    }

    #[test]
    fn invalid_number_falls_back() {
        let config =
            ClientConfig::from_lookup(lookup(&[("CODEGRADE_REQUEST_TIMEOUT_SECS", "soon")]));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
