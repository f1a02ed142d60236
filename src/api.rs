// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Typed write client for Services and Secrets.
//!
//! Sync handlers make every decision from the reflector caches and only talk to the API
//! server through [`ClusterApi`] to write their results back. Updates are full replaces of
//! a private copy of the cached object, so the `resourceVersion` carried over from the
//! cache gives optimistic-concurrency protection against concurrent writers.

use crate::errors::ApiError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

/// Write operations the controllers perform against the cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create a Secret in its own namespace.
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ApiError>;

    /// Read a Secret directly from the API server, bypassing the cache.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ApiError>;

    /// Replace a Secret, guarded by its `resourceVersion`.
    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ApiError>;

    /// Replace a Service, guarded by its `resourceVersion`.
    async fn update_service(&self, service: &Service) -> Result<Service, ApiError>;
}

/// [`ClusterApi`] backed by a `kube` client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Wrap a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ApiError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        debug!(namespace = %namespace, name = %name, "Creating secret");

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map_err(|e| ApiError::from_kube("secrets", &name, e))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| ApiError::from_kube("secrets", name, e))
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ApiError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        debug!(namespace = %namespace, name = %name, "Replacing secret");

        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| ApiError::from_kube("secrets", &name, e))
    }

    async fn update_service(&self, service: &Service) -> Result<Service, ApiError> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        debug!(namespace = %namespace, name = %name, "Replacing service");

        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), service)
            .await
            .map_err(|e| ApiError::from_kube("services", &name, e))
    }
}
