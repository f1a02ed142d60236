// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the serving certificate controllers.
//!
//! This module provides specialized error types for:
//! - Kubernetes API write operations (create/get/update of Secrets and Services)
//! - Certificate authority operations (key generation, signing, PEM parsing)
//! - Sync handler outcomes, including ownership conflicts between Secrets and Services
//!
//! Every sync error is handed back to the work queue for rate-limited retry; none of them
//! panic. Ownership conflicts and generation failures are additionally recorded on the
//! Service through the `serving-cert-generation-error*` annotations.

use thiserror::Error;

/// Errors returned by the typed Kubernetes write client.
///
/// Built from [`kube::Error`] by [`ApiError::from_kube`], which maps the API status codes
/// the controllers branch on into dedicated variants.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Create failed because an object with the same name already exists (HTTP 409 `AlreadyExists`)
    #[error("{kind} \"{name}\" already exists")]
    AlreadyExists {
        /// Resource kind (e.g. `secrets`)
        kind: String,
        /// Object name
        name: String,
    },

    /// The object does not exist (HTTP 404)
    #[error("{kind} \"{name}\" not found")]
    NotFound {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Optimistic-concurrency check failed on update (HTTP 409 `Conflict`)
    #[error("operation cannot be fulfilled on {kind} \"{name}\": {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Message returned by the API server
        message: String,
    },

    /// The API server rejected the request (forbidden, quota exceeded, invalid, throttled, ...)
    #[error("{message}")]
    Rejected {
        /// HTTP status code
        code: u16,
        /// Machine-readable reason (e.g. `Forbidden`)
        reason: String,
        /// Human-readable message
        message: String,
    },

    /// Transport or client-side failure that never reached the API server
    #[error("request to {kind} \"{name}\" failed: {source}")]
    Transport {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Underlying client error
        #[source]
        source: kube::Error,
    },
}

impl ApiError {
    /// Classify a [`kube::Error`] returned for the object `kind`/`name`.
    #[must_use]
    pub fn from_kube(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                ApiError::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => ApiError::Conflict {
                kind: kind.to_string(),
                name: name.to_string(),
                message: ae.message,
            },
            kube::Error::Api(ae) if ae.code == 404 => ApiError::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) => ApiError::Rejected {
                code: ae.code,
                reason: ae.reason,
                message: ae.message,
            },
            other => ApiError::Transport {
                kind: kind.to_string(),
                name: name.to_string(),
                source: other,
            },
        }
    }

    /// Whether the failure is transient (rate limiting, server errors, transport).
    ///
    /// Picks the log level of failed syncs; every error is retried through the work queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Rejected { code, .. } => *code == 429 || (500..600).contains(code),
            ApiError::Conflict { .. } | ApiError::Transport { .. } => true,
            ApiError::AlreadyExists { .. } | ApiError::NotFound { .. } => false,
        }
    }

    /// Whether this is an `AlreadyExists` create failure.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ApiError::AlreadyExists { .. })
    }
}

/// Errors that can occur inside the certificate authority.
#[derive(Error, Debug)]
pub enum CaError {
    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Signing a certificate failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// A requested subject alternative name is not a valid DNS name
    #[error("invalid DNS name '{name}': {reason}")]
    InvalidDnsName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Certificate or key material could not be parsed
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// Reading CA material from disk failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the sync handlers to the work queue.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Kubernetes API call failed
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The certificate authority failed to produce a certificate
    #[error(transparent)]
    Signing(#[from] CaError),

    /// The target Secret exists but belongs to a different Service
    #[error("secret/{secret} references serviceUID {actual}, which does not match {expected}")]
    OwnershipConflict {
        /// Name of the conflicting Secret
        secret: String,
        /// UID recorded on the Secret
        actual: String,
        /// UID of the Service that wants the Secret
        expected: String,
    },

    /// A work queue key could not be resolved to an object
    #[error("invalid resource key: {0}")]
    InvalidKey(String),
}

impl SyncError {
    /// Short reason label used for metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::Api(_) => "api",
            SyncError::Signing(_) => "signing",
            SyncError::OwnershipConflict { .. } => "conflict",
            SyncError::InvalidKey(_) => "invalid_key",
        }
    }

    /// Whether the failure is expected to clear on its own.
    ///
    /// Transient failures are logged at debug level, everything else as a warning.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Api(e) => e.is_retryable(),
            SyncError::Signing(_) | SyncError::OwnershipConflict { .. } | SyncError::InvalidKey(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
