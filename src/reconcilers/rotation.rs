// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rotation controller: renews serving certificates before they expire.
//!
//! Only Secrets carrying `originating-service-name` are considered. A Secret is rotated in
//! place when it is still legitimately owned by its Service and its `expiry` annotation is
//! missing, unparsable, or closer than `min_time_left`. Errors are retried through the work
//! queue backoff without any failure counter.

use crate::annotations::{ORIGINATING_SERVICE_NAME, ORIGINATING_SERVICE_UID};
use crate::ca::CertExtension;
use crate::constants::ROTATION_CONTROLLER_NAME;
use crate::context::{Context, Stores};
use crate::controller::{ObjectKey, ResourceEvent, SyncHandler};
use crate::errors::SyncError;
use crate::metrics;
use crate::reconcilers::resources::{
    annotation, apply_certificate, parse_expiry, requested_secret_name, service_dns_names,
};
use crate::workqueue::WorkQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

/// Rotation controller for serving certificate Secrets.
pub struct ServingCertRotationController {
    ctx: Arc<Context>,
    queue: WorkQueue<ObjectKey>,
}

impl ServingCertRotationController {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            queue: WorkQueue::new(),
        }
    }

    /// Informer callback for Secrets: added or updated managed Secrets are enqueued.
    pub fn handle_secret_event(&self, event: ResourceEvent<'_, Secret>) {
        if let ResourceEvent::Applied(secret) = event {
            if annotation(secret, ORIGINATING_SERVICE_NAME).is_some() {
                self.queue.add(ObjectKey::for_resource(secret));
            }
        }
    }

    /// The cached Service that legitimately owns `secret`, if any.
    fn owning_service(&self, secret: &Secret) -> Option<Arc<Service>> {
        let service_name = annotation(secret, ORIGINATING_SERVICE_NAME)?;
        let namespace = secret.namespace().unwrap_or_default();
        let service = self.ctx.stores.get_service(&namespace, service_name)?;

        if requested_secret_name(&service) != Some(secret.name_any().as_str()) {
            return None;
        }
        if annotation(secret, ORIGINATING_SERVICE_UID) != service.uid().as_deref() {
            debug!(
                namespace = %namespace,
                secret = %secret.name_any(),
                service = %service_name,
                secret_uid = annotation(secret, ORIGINATING_SERVICE_UID).unwrap_or_default(),
                service_uid = %service.uid().unwrap_or_default(),
                "Secret claims a different service UID, not rotating"
            );
            return None;
        }
        Some(service)
    }

    /// Whether `secret` should get a fresh certificate at time `now`.
    #[must_use]
    pub fn requires_regeneration(&self, secret: &Secret, now: DateTime<Utc>) -> bool {
        if self.owning_service(secret).is_none() {
            return false;
        }
        match parse_expiry(secret) {
            Some(expiry) => now
                .checked_add_signed(self.ctx.config.min_time_left)
                .map_or(true, |deadline| deadline > expiry),
            None => true,
        }
    }

    /// Sync one Secret.
    ///
    /// # Errors
    ///
    /// Returns signing and API errors for retry with backoff.
    pub async fn sync_secret(&self, key: &ObjectKey) -> Result<(), SyncError> {
        let Some(cached) = self.ctx.stores.get_secret(key.namespace(), &key.name) else {
            debug!(key = %key, "Secret no longer exists");
            return Ok(());
        };
        if !self.requires_regeneration(&cached, Utc::now()) {
            return Ok(());
        }
        let Some(service) = self.owning_service(&cached) else {
            return Ok(());
        };

        let mut secret = Secret::clone(&cached);
        let namespace = service.namespace().unwrap_or_default();
        let dns_names =
            service_dns_names(&service.name_any(), &namespace, &self.ctx.config.dns_suffix);
        let certificate = self.ctx.signer.make_server_cert(
            &dns_names,
            self.ctx.config.cert_lifetime_days,
            &[CertExtension::ServiceUid(service.uid().unwrap_or_default())],
        )?;

        apply_certificate(&mut secret, &certificate);
        self.ctx.api.update_secret(&secret).await?;

        info!(
            namespace = %namespace,
            secret = %secret.name_any(),
            service = %service.name_any(),
            expiry = %certificate.not_after,
            "Rotated serving certificate"
        );
        metrics::record_certificate_issued(ROTATION_CONTROLLER_NAME);
        Ok(())
    }
}

#[async_trait]
impl SyncHandler for ServingCertRotationController {
    const NAME: &'static str = ROTATION_CONTROLLER_NAME;

    fn stores(&self) -> &Stores {
        &self.ctx.stores
    }

    fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    async fn sync(&self, key: &ObjectKey) -> Result<(), SyncError> {
        self.sync_secret(key).await
    }

    fn resync(&self) -> usize {
        let now = Utc::now();
        let mut keys = 0;
        for secret in self.ctx.stores.secrets.state() {
            if self.requires_regeneration(&secret, now) {
                self.queue.add(ObjectKey::for_resource(secret.as_ref()));
                keys += 1;
            }
        }
        keys
    }
}

#[cfg(test)]
#[path = "rotation_tests.rs"]
mod rotation_tests;
