use std::{fmt::Display, str::FromStr};

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Base URL the service is reachable at, used for OAuth redirects and email links.
    pub public_url: String,
    pub oauth_clients_path: String,
    pub session_inactivity_minutes: i64,

    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
    pub auth_hook_secret: Option<String>,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn load() -> Self {
        if dotenv::dotenv().is_err() {
            info!("no .env file, reading configuration from the environment only");
        }

        Self {
            database_url: try_load("DATABASE_URL", "sqlite://campuslink.db?mode=rwc".to_owned()),
            bind_address: try_load("BIND_ADDRESS", "0.0.0.0:8080".to_owned()),
            public_url: try_load("PUBLIC_URL", "http://localhost:8080".to_owned())
                .trim_end_matches('/')
                .to_owned(),
            oauth_clients_path: try_load("OAUTH_CLIENTS_PATH", "client_secret.json".to_owned()),
            session_inactivity_minutes: try_load_at_least("SESSION_INACTIVITY_MINUTES", 1, 60),

            email_api_url: try_load("EMAIL_API_URL", "https://api.resend.com/emails".to_owned()),
            email_api_key: optional("EMAIL_API_KEY"),
            email_from: try_load("EMAIL_FROM", "Campus <no-reply@campus.local>".to_owned()),
            auth_hook_secret: optional("AUTH_HOOK_SECRET"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            bind_address: "127.0.0.1:8080".to_owned(),
            public_url: "http://localhost:8080".to_owned(),
            oauth_clients_path: "client_secret.json".to_owned(),
            session_inactivity_minutes: 60,
            email_api_url: "https://api.resend.com/emails".to_owned(),
            email_api_key: None,
            email_from: "Campus <no-reply@campus.local>".to_owned(),
            auth_hook_secret: None,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    match dotenv::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            info!("{key} not set");
            None
        }
    }
}

fn try_load<T>(key: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Ok(raw) = dotenv::var(key) else {
        info!("{key} not set, using default: {default}");
        return default;
    };

    raw.parse().unwrap_or_else(|e| {
        warn!("invalid {key} value {raw:?}: {e}, using default: {default}");
        default
    })
}

/// Like [`try_load`], but values below `min` also fall back to `default`.
fn try_load_at_least<T>(key: &str, min: T, default: T) -> T
where
    T: FromStr + Display + PartialOrd + Copy,
    T::Err: Display,
{
    let value = try_load(key, default);
    if value < min {
        warn!("{key} must be at least {min}, got {value}, using default: {default}");
        return default;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_on_missing_or_invalid() {
        let minutes: i64 = try_load("CAMPUSLINK_TEST_UNSET_VAR", 60);
        assert_eq!(minutes, 60);

        // SAFETY: only this test touches this variable
        unsafe { std::env::set_var("CAMPUSLINK_TEST_BAD_NUMBER", "sixty") };
        let minutes: i64 = try_load("CAMPUSLINK_TEST_BAD_NUMBER", 15);
        assert_eq!(minutes, 15);
    }

    #[test]
    fn out_of_range_falls_back_to_default() {
        // SAFETY: only this test touches these variables
        unsafe {
            std::env::set_var("CAMPUSLINK_TEST_NEGATIVE", "-5");
            std::env::set_var("CAMPUSLINK_TEST_ZERO", "0");
            std::env::set_var("CAMPUSLINK_TEST_IN_RANGE", "30");
        }
        assert_eq!(try_load_at_least("CAMPUSLINK_TEST_NEGATIVE", 1i64, 60), 60);
        assert_eq!(try_load_at_least("CAMPUSLINK_TEST_ZERO", 1i64, 60), 60);
        assert_eq!(try_load_at_least("CAMPUSLINK_TEST_IN_RANGE", 1i64, 60), 30);
    }

    #[test]
    fn blank_optional_is_none() {
        // SAFETY: only this test touches this variable
        unsafe { std::env::set_var("CAMPUSLINK_TEST_BLANK", "  ") };
        assert_eq!(optional("CAMPUSLINK_TEST_BLANK"), None);
    }
}
