#![forbid(unsafe_code)]

//! Scope configuration.

use std::env;

/// Default convergence bound for one digest.
pub const DEFAULT_DIGEST_TTL: u32 = 10;

/// Environment variable read by [`ScopeConfig::from_env`].
pub const DIGEST_TTL_ENV: &str = "SCOPE_DIGEST_TTL";

/// Configuration for a [`Scope`](crate::Scope).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeConfig {
    /// Number of extra dirty iterations a digest may run before it is
    /// declared non-convergent.
    /// A value of 0 is replaced by the default.
    /// Default: 10
    pub digest_ttl: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            digest_ttl: DEFAULT_DIGEST_TTL,
        }
    }
}

impl ScopeConfig {
    /// Read overrides from the environment (`SCOPE_DIGEST_TTL`).
    ///
    /// Absent or malformed values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let ttl = env::var(DIGEST_TTL_ENV).ok();
        Self::from_env_value(ttl.as_deref())
    }

    fn from_env_value(ttl: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = ttl {
            match raw.trim().parse::<u32>() {
                Ok(parsed) => config.digest_ttl = parsed,
                Err(_) => tracing::warn!(value = raw, "ignoring malformed {DIGEST_TTL_ENV}"),
            }
        }
        config.sanitized()
    }

    #[must_use]
    pub fn with_digest_ttl(mut self, ttl: u32) -> Self {
        self.digest_ttl = ttl;
        self
    }

    pub(crate) fn sanitized(&self) -> Self {
        let mut config = self.clone();
        if config.digest_ttl == 0 {
            config.digest_ttl = DEFAULT_DIGEST_TTL;
        }
        config
    }
}
