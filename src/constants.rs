// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the serving certificate controllers.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Controller Names
// ============================================================================

/// Name of the controller that creates serving certificate secrets
pub const CREATION_CONTROLLER_NAME: &str = "serving-cert";

/// Name of the controller that rotates serving certificates before expiry
pub const ROTATION_CONTROLLER_NAME: &str = "serving-cert-rotation";

// ============================================================================
// Certificate Lifecycle Constants
// ============================================================================

/// Consecutive generation failures after which a Service is abandoned
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Minimum remaining certificate lifetime before rotation (1 hour)
pub const DEFAULT_MIN_TIME_LEFT_SECS: u64 = 3600;

/// Lifetime of generated serving certificates (2 years)
pub const DEFAULT_CERT_LIFETIME_DAYS: u32 = 365 * 2;

/// Lifetime of a self-generated signer when no CA files are configured (5 years)
///
/// Serving certificates are capped at the signer's `NotAfter`, so leaves issued in the last
/// two years of the signer are shorter than `DEFAULT_CERT_LIFETIME_DAYS`. The signer itself is
/// never rotated; restart with a new signer before it expires.
pub const GENERATED_CA_LIFETIME_DAYS: u32 = 365 * 5;

/// Default cluster DNS suffix appended to `<service>.<namespace>.svc`
pub const DEFAULT_DNS_SUFFIX: &str = "cluster.local";

/// Prefix of the self-generated signer common name (suffixed with `@<unix-seconds>`)
pub const DEFAULT_SIGNER_NAME_PREFIX: &str = "service-serving-signer";

/// OID of the certificate extension binding a serving certificate to its Service UID
pub const SERVICE_UID_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 2312, 17, 6, 1];

// ============================================================================
// Work Queue Constants
// ============================================================================

/// Number of sync workers per controller
pub const DEFAULT_WORKERS: usize = 5;

/// Initial per-key retry delay (5 milliseconds)
pub const QUEUE_BASE_DELAY_MILLIS: u64 = 5;

/// Maximum per-key retry delay (1000 seconds)
pub const QUEUE_MAX_DELAY_SECS: u64 = 1000;

/// Backoff multiplier (exponential growth factor)
pub const QUEUE_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Periodic cache resync interval (20 minutes)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 1200;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
