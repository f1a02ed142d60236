// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for both controllers with reflector stores.
//!
//! Both controllers receive an `Arc<Context>` that contains:
//! - The typed write client for Services and Secrets
//! - Reflector stores for Services and Secrets
//! - The certificate signer
//! - The read-only signing configuration
//!
//! The context is built once in `main` and never mutated afterwards. Every decision a sync
//! handler makes is read from the stores; the API client is only used to write results back.

use crate::api::ClusterApi;
use crate::ca::ServingCertSigner;
use crate::config::SigningConfig;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::reflector::store::WriterDropped;
use kube::runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Shared context passed to both controllers.
#[derive(Clone)]
pub struct Context {
    /// Write client for Secrets and Services
    pub api: Arc<dyn ClusterApi>,

    /// Reflector stores for Services and Secrets
    pub stores: Stores,

    /// Certificate signer shared by every worker
    pub signer: Arc<dyn ServingCertSigner>,

    /// Read-only signing configuration
    pub config: SigningConfig,
}

impl Context {
    /// Assemble the context from its parts.
    #[must_use]
    pub fn new(
        api: Arc<dyn ClusterApi>,
        stores: Stores,
        signer: Arc<dyn ServingCertSigner>,
        config: SigningConfig,
    ) -> Self {
        Self {
            api,
            stores,
            signer,
            config,
        }
    }
}

/// Reflector stores shared by both controllers.
///
/// Each store is populated by a dedicated informer task and provides in-memory access to
/// objects without API calls. Objects handed out are shared with the cache and must be
/// cloned before they are modified.
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub secrets: Store<Secret>,
}

impl Stores {
    /// Look up a cached Service.
    #[must_use]
    pub fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    /// Look up a cached Secret.
    #[must_use]
    pub fn get_secret(&self, namespace: &str, name: &str) -> Option<Arc<Secret>> {
        self.secrets.get(&ObjectRef::new(name).within(namespace))
    }

    /// Wait until both stores completed their initial list.
    ///
    /// # Errors
    ///
    /// Returns an error if an informer task dropped its writer before the first sync.
    pub async fn wait_until_ready(&self) -> Result<(), WriterDropped> {
        self.services.wait_until_ready().await?;
        self.secrets.wait_until_ready().await
    }

    /// Whether both stores completed their initial list.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        futures::FutureExt::now_or_never(self.wait_until_ready()).is_some_and(|r| r.is_ok())
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
