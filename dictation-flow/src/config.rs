use std::time::Duration;

use crate::error::ConfigError;

pub const INTERPRET_URL_VAR: &str = "DICTATION_INTERPRET_URL";
pub const SUBMIT_URL_VAR: &str = "DICTATION_SUBMIT_URL";
pub const REPORT_URL_VAR: &str = "DICTATION_REPORT_URL";
pub const TIMEOUT_VAR: &str = "DICTATION_TIMEOUT_SECS";
pub const SPEECH_ENABLED_VAR: &str = "DICTATION_SPEECH_ENABLED";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Endpoints and limits for the three remote functions.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub interpret_url: String,
    pub submit_url: String,
    pub report_url: String,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(
        interpret_url: impl Into<String>,
        submit_url: impl Into<String>,
        report_url: impl Into<String>,
    ) -> Self {
        Self {
            interpret_url: interpret_url.into(),
            submit_url: submit_url.into(),
            report_url: report_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let timeout = match lookup(TIMEOUT_VAR) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Invalid {
                    name: TIMEOUT_VAR,
                    value: raw,
                })?,
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        Ok(Self::new(
            required(INTERPRET_URL_VAR)?,
            required(SUBMIT_URL_VAR)?,
            required(REPORT_URL_VAR)?,
        )
        .with_timeout(timeout))
    }
}

/// Host capabilities that shape a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub speech_available: bool,
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let speech_available = match lookup(SPEECH_ENABLED_VAR) {
            None => false,
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: SPEECH_ENABLED_VAR,
                        value: raw,
                    });
                }
            },
        };
        Ok(Self { speech_available })
    }
}
