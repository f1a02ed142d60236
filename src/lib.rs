// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Serving Cert Controller - TLS serving certificates for Kubernetes Services
//!
//! Two controllers that give every annotated Service a TLS certificate signed by a
//! cluster-internal CA and keep it fresh.
//!
//! ## Overview
//!
//! - A Service opts in with `service.alpha.openshift.io/serving-cert-secret-name: <secret>`
//! - The creation controller signs a certificate for `<svc>.<ns>.svc` and
//!   `<svc>.<ns>.svc.<dns-suffix>` and stores it in a `kubernetes.io/tls` Secret
//! - The rotation controller re-signs the certificate in place before it expires
//!
//! Both controllers read from shared reflector caches, process keys through a
//! deduplicating rate-limited [`workqueue`], and only write results back through
//! [`api::ClusterApi`].
//!
//! ## Modules
//!
//! - [`annotations`] - Annotation keys and Secret data layout
//! - [`ca`] - Certificate authority and the signing contract
//! - [`controller`] - Worker loop shared by both controllers
//! - [`informer`] - Watch streams feeding the caches and the controllers
//! - [`reconcilers`] - Creation and rotation sync handlers
//! - [`workqueue`] - Rate-limited work queue
//! - [`server`] - Metrics and probe endpoints
//!
//! ## Example
//!
//! ```rust,no_run
//! use serving_cert_controller::ca::{CertificateAuthority, ServingCertSigner};
//! use serving_cert_controller::reconcilers::resources::service_dns_names;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ca = CertificateAuthority::generate("service-serving-signer@1700000000", 365)?;
//! let names = service_dns_names("web", "default", "cluster.local");
//! let cert = ca.make_server_cert(&names, 730, &[])?;
//! println!("certificate expires at {}", cert.not_after);
//! # Ok(())
//! # }
//! ```

pub mod annotations;
pub mod api;
pub mod ca;
pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod errors;
pub mod informer;
pub mod metrics;
pub mod reconcilers;
pub mod server;
pub mod workqueue;

#[cfg(test)]
pub(crate) mod test_support;
