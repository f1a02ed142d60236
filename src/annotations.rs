// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation keys and secret layout shared by both controllers.
//!
//! These annotations are the stable contract between the controllers and anything else in the
//! cluster that wants a serving certificate. Services opt in with
//! [`SERVING_CERT_SECRET_NAME`]; everything else is written by the controllers.

// ============================================================================
// Service Annotations
// ============================================================================

/// Name of the Secret the Service wants its serving certificate stored in (opt-in signal)
pub const SERVING_CERT_SECRET_NAME: &str = "service.alpha.openshift.io/serving-cert-secret-name";

/// Common name of the signer that last produced a certificate satisfying this Service
pub const SERVING_CERT_SIGNED_BY: &str = "service.alpha.openshift.io/serving-cert-signed-by";

/// Message of the last failed generation attempt
pub const SERVING_CERT_GENERATION_ERROR: &str =
    "service.alpha.openshift.io/serving-cert-generation-error";

/// Number of consecutive failed generation attempts (string-encoded integer)
pub const SERVING_CERT_GENERATION_ERROR_NUM: &str =
    "service.alpha.openshift.io/serving-cert-generation-error-num";

// ============================================================================
// Secret Annotations
// ============================================================================

/// UID of the Service the Secret was created for
pub const ORIGINATING_SERVICE_UID: &str = "service.alpha.openshift.io/originating-service-uid";

/// Name of the Service the Secret was created for
pub const ORIGINATING_SERVICE_NAME: &str = "service.alpha.openshift.io/originating-service-name";

/// RFC3339 `NotAfter` of the certificate stored in the Secret
pub const SERVING_CERT_EXPIRY: &str = "service.alpha.openshift.io/expiry";

// ============================================================================
// Secret Layout
// ============================================================================

/// Secret type holding a TLS certificate/key pair
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// Data key of the PEM-encoded certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Data key of the PEM-encoded private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
