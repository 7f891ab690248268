//! Shared utility functions for provider adapters.

use sb_domain::config::AuthConfig;
use sb_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`].
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a non-success HTTP status onto the domain error taxonomy.
pub(crate) fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = format!("{status}: {}", truncate(body, 400));
    match status.as_u16() {
        401 | 403 => Error::ProviderAuth(format!("{provider}: {message}")),
        429 => Error::RateLimited(format!("{provider}: {message}")),
        _ => Error::Provider {
            provider: provider.to_owned(),
            message,
        },
    }
}

/// Resolve the API key from an [`AuthConfig`], preferring the explicit
/// key over the env var.
pub fn resolve_api_key(auth: &AuthConfig) -> Result<String> {
    if let Some(ref key) = auth.key {
        tracing::warn!(
            "API key loaded from plaintext config field 'key' — prefer 'env' instead"
        );
        return Ok(key.clone());
    }
    if let Some(ref env_var) = auth.env {
        return std::env::var(env_var).map_err(|_| {
            Error::ProviderAuth(format!(
                "environment variable '{env_var}' not set or not valid UTF-8"
            ))
        });
    }
    Err(Error::ProviderAuth(
        "no API key configured: set 'key' or 'env' in the provider's auth config".into(),
    ))
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_plaintext() {
        let auth = AuthConfig {
            key: Some("sk-test-123".into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "sk-test-123");
    }

    #[test]
    fn resolve_api_key_env_var() {
        let var_name = "SB_TEST_RESOLVE_ENV_KEY_1234";
        std::env::set_var(var_name, "env-secret-value");
        let auth = AuthConfig {
            env: Some(var_name.into()),
            ..Default::default()
        };
        assert_eq!(resolve_api_key(&auth).unwrap(), "env-secret-value");
        std::env::remove_var(var_name);
    }

    #[test]
    fn resolve_api_key_env_var_missing() {
        let auth = AuthConfig {
            env: Some("SB_TEST_NONEXISTENT_VAR_8888".into()),
            ..Default::default()
        };
        let err = resolve_api_key(&auth).unwrap_err();
        assert!(err.to_string().contains("SB_TEST_NONEXISTENT_VAR_8888"));
    }

    #[test]
    fn resolve_api_key_no_config() {
        let err = resolve_api_key(&AuthConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no API key configured"));
    }

    #[test]
    fn status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            from_status("p", StatusCode::UNAUTHORIZED, "bad key"),
            Error::ProviderAuth(_)
        ));
        assert!(matches!(
            from_status("p", StatusCode::TOO_MANY_REQUESTS, "slow down"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            from_status("p", StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            Error::Provider { .. }
        ));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
    }
}
