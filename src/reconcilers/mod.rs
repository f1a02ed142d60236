// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Sync handlers for serving certificates.
//!
//! # Controllers
//!
//! - [`ServingCertController`] - watches Services and creates the Secret named by
//!   `serving-cert-secret-name`, recording failures on the Service
//! - [`ServingCertRotationController`] - watches managed Secrets and re-signs their
//!   certificate before it expires
//!
//! Both implement [`SyncHandler`](crate::controller::SyncHandler) and are driven by
//! [`run_controller`](crate::controller::run_controller). The annotation and Secret helpers
//! they share live in [`resources`].
//!
//! # Example
//!
//! ```rust,no_run
//! use serving_cert_controller::context::Context;
//! use serving_cert_controller::controller::ObjectKey;
//! use serving_cert_controller::reconcilers::ServingCertController;
//! use std::sync::Arc;
//!
//! async fn sync_one(ctx: Arc<Context>) -> anyhow::Result<()> {
//!     let controller = ServingCertController::new(ctx);
//!     controller.sync_service(&ObjectKey::new("default", "web")).await?;
//!     Ok(())
//! }
//! ```

pub mod resources;
pub mod rotation;
pub mod serving_cert;

pub use rotation::ServingCertRotationController;
pub use serving_cert::ServingCertController;
