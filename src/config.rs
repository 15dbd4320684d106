// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! by the signing-request client. Configuration is loaded from the
//! environment when the embedding wallet builds its client.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SIGNING_REQUEST_TIMEOUT_SECS` | Per-request HTTP timeout in seconds | none |
//! | `SIGNING_REQUEST_REQUIRE_HTTPS` | Reject non-`https` request endpoints | `false` |
//! | `SIGNING_REQUEST_STALE_PAYLOADS` | `last-writer-wins` or `latest-request-wins` | `last-writer-wins` |
//! | `SIGNING_REQUEST_USER_AGENT` | `User-Agent` header sent to request servers | `signing-request-wallet/<version>` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::time::Duration;

use tracing::warn;

/// Environment variable for the per-request HTTP timeout, in whole seconds.
///
/// Unset means requests never time out; a hung server parks the flow.
pub const TIMEOUT_SECS_ENV: &str = "SIGNING_REQUEST_TIMEOUT_SECS";

/// Environment variable enabling the HTTPS-only endpoint check.
pub const REQUIRE_HTTPS_ENV: &str = "SIGNING_REQUEST_REQUIRE_HTTPS";

/// Environment variable selecting how stale POST responses are applied.
pub const STALE_PAYLOADS_ENV: &str = "SIGNING_REQUEST_STALE_PAYLOADS";

/// Environment variable overriding the `User-Agent` header.
pub const USER_AGENT_ENV: &str = "SIGNING_REQUEST_USER_AGENT";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!("signing-request-wallet/", env!("CARGO_PKG_VERSION"));

/// How the flow treats a POST response when a newer POST has already been
/// issued for a different account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePayloadPolicy {
    /// Apply every response in arrival order. Overlapping POSTs race and
    /// whichever lands last owns `data`/`state`.
    #[default]
    LastWriterWins,
    /// Drop any response whose request is older than the newest POST issued.
    LatestRequestWins,
}

impl StalePayloadPolicy {
    /// Parse the environment representation (`last-writer-wins`,
    /// `latest-request-wins`), case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "last-writer-wins" => Some(Self::LastWriterWins),
            "latest-request-wins" => Some(Self::LatestRequestWins),
            _ => None,
        }
    }
}

/// Settings for [`crate::client::SigningRequestClient`] and the flows it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub request_timeout: Option<Duration>,
    pub require_https: bool,
    pub stale_payloads: StalePayloadPolicy,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            require_https: false,
            stale_payloads: StalePayloadPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// Unparseable values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();

        let request_timeout = match get(TIMEOUT_SECS_ENV) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) | Err(_) => {
                    warn!(variable = TIMEOUT_SECS_ENV, value = %raw, "Ignoring invalid timeout");
                    defaults.request_timeout
                }
                Ok(secs) => Some(Duration::from_secs(secs)),
            },
            None => defaults.request_timeout,
        };

        let require_https = match get(REQUIRE_HTTPS_ENV) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn!(variable = REQUIRE_HTTPS_ENV, value = %raw, "Ignoring invalid boolean");
                defaults.require_https
            }),
            None => defaults.require_https,
        };

        let stale_payloads = match get(STALE_PAYLOADS_ENV) {
            Some(raw) => StalePayloadPolicy::parse(&raw).unwrap_or_else(|| {
                warn!(variable = STALE_PAYLOADS_ENV, value = %raw, "Ignoring unknown policy");
                defaults.stale_payloads
            }),
            None => defaults.stale_payloads,
        };

        let user_agent = get(USER_AGENT_ENV).unwrap_or(defaults.user_agent);

        Self {
            request_timeout,
            require_https,
            stale_payloads,
            user_agent,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_require_https(mut self, require_https: bool) -> Self {
        self.require_https = require_https;
        self
    }

    pub fn with_stale_payloads(mut self, policy: StalePayloadPolicy) -> Self {
        self.stale_payloads = policy;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
