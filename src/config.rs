// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Process configuration.
//!
//! [`Config`] is parsed once from the command line (every flag can also be supplied through
//! an environment variable). The parts the sync handlers need are copied into a
//! [`SigningConfig`], which is owned by the shared context and never mutated afterwards.

use crate::ca::CertificateAuthority;
use crate::constants::{
    DEFAULT_CERT_LIFETIME_DAYS, DEFAULT_DNS_SUFFIX, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_TIME_LEFT_SECS, DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_SIGNER_NAME_PREFIX,
    DEFAULT_WORKERS, GENERATED_CA_LIFETIME_DAYS, METRICS_SERVER_PORT,
};
use anyhow::{Context as _, Result};
use chrono::TimeDelta;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Command line / environment configuration of the controller process.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "serving-cert-controller",
    version,
    about = "Provisions and rotates TLS serving certificates for annotated Services"
)]
pub struct Config {
    /// PEM file holding the signing CA certificate
    #[arg(long, env = "SERVING_CERT_CA_CERT_FILE", requires = "ca_key_file")]
    pub ca_cert_file: Option<PathBuf>,

    /// PEM file holding the signing CA private key
    #[arg(long, env = "SERVING_CERT_CA_KEY_FILE", requires = "ca_cert_file")]
    pub ca_key_file: Option<PathBuf>,

    /// Common name of the generated signer when no CA files are given
    #[arg(long, env = "SERVING_CERT_SIGNER_NAME")]
    pub signer_name: Option<String>,

    /// Cluster DNS suffix used for the fully-qualified SAN
    #[arg(long, env = "SERVING_CERT_DNS_SUFFIX", default_value = DEFAULT_DNS_SUFFIX)]
    pub dns_suffix: String,

    /// Sync workers per controller
    #[arg(long, env = "SERVING_CERT_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Consecutive generation failures after which a Service is no longer retried
    #[arg(long, env = "SERVING_CERT_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Rotate certificates that expire within this many seconds
    #[arg(long, env = "SERVING_CERT_MIN_TIME_LEFT_SECS", default_value_t = DEFAULT_MIN_TIME_LEFT_SECS)]
    pub min_time_left_secs: u64,

    /// Lifetime of issued serving certificates in days
    #[arg(long, env = "SERVING_CERT_LIFETIME_DAYS", default_value_t = DEFAULT_CERT_LIFETIME_DAYS)]
    pub cert_lifetime_days: u32,

    /// Interval between full cache resyncs in seconds (0 disables)
    #[arg(long, env = "SERVING_CERT_RESYNC_INTERVAL_SECS", default_value_t = DEFAULT_RESYNC_INTERVAL_SECS)]
    pub resync_interval_secs: u64,

    /// Only watch Services and Secrets in this namespace
    #[arg(long, env = "SERVING_CERT_NAMESPACE")]
    pub namespace: Option<String>,

    /// Port of the metrics and health endpoint
    #[arg(long, env = "SERVING_CERT_METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,
}

impl Config {
    /// Build the read-only signing configuration shared by the sync handlers.
    #[must_use]
    pub fn signing_config(&self) -> SigningConfig {
        SigningConfig {
            dns_suffix: self.dns_suffix.clone(),
            max_retries: self.max_retries,
            min_time_left: i64::try_from(self.min_time_left_secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
            cert_lifetime_days: self.cert_lifetime_days,
        }
    }

    /// Periodic resync interval, `None` when disabled.
    #[must_use]
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// Load the configured CA, or generate a self-signed one when no files are set.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA files cannot be read or parsed, or generation fails.
    pub fn load_signer(&self) -> Result<CertificateAuthority> {
        match (&self.ca_cert_file, &self.ca_key_file) {
            (Some(cert), Some(key)) => {
                let ca = CertificateAuthority::from_files(cert, key).with_context(|| {
                    format!(
                        "failed to load signing CA from {} and {}",
                        cert.display(),
                        key.display()
                    )
                })?;
                info!(cert = %cert.display(), "Loaded serving certificate signer from disk");
                Ok(ca)
            }
            _ => {
                let name = self.signer_name.clone().unwrap_or_else(|| {
                    format!(
                        "{DEFAULT_SIGNER_NAME_PREFIX}@{}",
                        chrono::Utc::now().timestamp()
                    )
                });
                warn!(
                    signer = %name,
                    "No CA files configured, generating an in-memory signer; certificates will not survive a restart"
                );
                CertificateAuthority::generate(&name, GENERATED_CA_LIFETIME_DAYS)
                    .context("failed to generate signing CA")
            }
        }
    }
}

/// Settings consumed by the sync handlers.
///
/// Constructed once at startup and read-only thereafter.
#[derive(Clone, Debug)]
pub struct SigningConfig {
    /// Cluster DNS suffix (e.g. `cluster.local`)
    pub dns_suffix: String,
    /// Circuit-breaker threshold for consecutive generation failures
    pub max_retries: u32,
    /// Certificates expiring sooner than this are rotated
    pub min_time_left: TimeDelta,
    /// Lifetime of issued certificates in days
    pub cert_lifetime_days: u32,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            min_time_left: TimeDelta::seconds(DEFAULT_MIN_TIME_LEFT_SECS as i64),
            cert_lifetime_days: DEFAULT_CERT_LIFETIME_DAYS,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
