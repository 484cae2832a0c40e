// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Restrict the controller to a single namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Bind address for the health probes, `None` when disabled
    pub health_probe_addr: Option<SocketAddr>,
    /// Deadline applied to every call against the cluster API
    pub request_timeout: Duration,
    pub resync_interval: Duration,
    pub validation_backoff: Duration,
    pub conflict_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            watch_namespace: None,
            health_probe_addr: Some(SocketAddr::from(([0, 0, 0, 0], 8081))),
            request_timeout: Duration::from_secs(30),
            resync_interval: Duration::from_secs(300),
            validation_backoff: Duration::from_secs(60),
            conflict_backoff: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let health_probe_addr = match lookup("HEALTH_PROBE_ADDR") {
            None => defaults.health_probe_addr,
            Some(v) if v.is_empty() || v == "disabled" => None,
            Some(v) => Some(
                v.parse()
                    .with_context(|| format!("HEALTH_PROBE_ADDR is not a socket address: {}", v))?,
            ),
        };

        Ok(Config {
            watch_namespace,
            health_probe_addr,
            request_timeout: secs(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            resync_interval: secs(&lookup, "RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            validation_backoff: secs(
                &lookup,
                "VALIDATION_BACKOFF_SECS",
                defaults.validation_backoff,
            )?,
            conflict_backoff: secs(&lookup, "CONFLICT_BACKOFF_SECS", defaults.conflict_backoff)?,
        })
    }
}

fn secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match lookup(key) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .with_context(|| format!("{} must be a number of seconds, got {}", key, v)),
    }
}
