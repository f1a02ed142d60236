// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Creation controller: provisions a TLS Secret for every opted-in Service.
//!
//! A Service opts in with the `serving-cert-secret-name` annotation. The controller signs a
//! certificate for the Service's cluster DNS names, stores it in the named Secret and marks
//! the Service with `serving-cert-signed-by`. Failures are recorded on the Service and
//! counted; once the count reaches `max_retries` the Service is left alone until an operator
//! clears the error annotations.
//!
//! The controller also watches Secret deletions, so a managed Secret that is deleted while
//! its Service still asks for it is recreated.

use crate::annotations::{
    ORIGINATING_SERVICE_NAME, ORIGINATING_SERVICE_UID, SERVING_CERT_SIGNED_BY,
};
use crate::ca::CertExtension;
use crate::constants::CREATION_CONTROLLER_NAME;
use crate::context::{Context, Stores};
use crate::controller::{ObjectKey, ResourceEvent, SyncHandler};
use crate::errors::SyncError;
use crate::metrics;
use crate::reconcilers::resources::{
    annotation, build_serving_secret, failure_count, mark_signed_by, record_generation_failure,
    requested_secret_name, service_dns_names,
};
use crate::workqueue::WorkQueue;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Creation controller for Service serving certificates.
pub struct ServingCertController {
    ctx: Arc<Context>,
    queue: WorkQueue<ObjectKey>,
}

impl ServingCertController {
    #[must_use]
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            queue: WorkQueue::new(),
        }
    }

    /// Informer callback for Services: every add or update is enqueued.
    pub fn handle_service_event(&self, event: ResourceEvent<'_, Service>) {
        if let ResourceEvent::Applied(service) = event {
            self.queue.add(ObjectKey::for_resource(service));
        }
    }

    /// Informer callback for Secrets: a deleted managed Secret re-enqueues its Service.
    ///
    /// The Service is only enqueued when it still names the deleted Secret, so Secrets left
    /// behind after a rename do not disturb it.
    pub fn handle_secret_event(&self, event: ResourceEvent<'_, Secret>) {
        let ResourceEvent::Deleted(secret) = event else {
            return;
        };
        let Some(service_name) = annotation(secret, ORIGINATING_SERVICE_NAME) else {
            return;
        };
        let namespace = secret.namespace().unwrap_or_default();
        let Some(service) = self.ctx.stores.get_service(&namespace, service_name) else {
            debug!(
                namespace = %namespace,
                secret = %secret.name_any(),
                "Owning service of deleted secret is gone"
            );
            return;
        };
        if requested_secret_name(&service) != Some(secret.name_any().as_str()) {
            return;
        }

        info!(
            namespace = %namespace,
            service = %service_name,
            secret = %secret.name_any(),
            "Serving certificate secret deleted, regenerating"
        );
        self.queue.add(ObjectKey::for_resource(service.as_ref()));
    }

    /// Whether `service` needs a certificate generated now.
    ///
    /// Checked in order:
    /// 1. No `serving-cert-secret-name` annotation: no
    /// 2. Failure counter at or above `max_retries`: no
    /// 3. The requested Secret is missing from the cache: yes
    /// 4. `serving-cert-signed-by` equals the current signer: no
    /// 5. Otherwise: yes
    #[must_use]
    pub fn requires_cert_generation(&self, service: &Service) -> bool {
        let Some(secret_name) = requested_secret_name(service) else {
            return false;
        };
        if failure_count(service) >= self.ctx.config.max_retries {
            return false;
        }
        let namespace = service.namespace().unwrap_or_default();
        if self.ctx.stores.get_secret(&namespace, secret_name).is_none() {
            return true;
        }
        annotation(service, SERVING_CERT_SIGNED_BY) != Some(self.ctx.signer.common_name())
    }

    /// Sync one Service.
    ///
    /// # Errors
    ///
    /// Returns the API, signing or ownership error of the attempt unless the failure tripped
    /// the retry limit, in which case the failure is recorded and `Ok` is returned.
    pub async fn sync_service(&self, key: &ObjectKey) -> Result<(), SyncError> {
        let Some(cached) = self.ctx.stores.get_service(key.namespace(), &key.name) else {
            debug!(key = %key, "Service no longer exists");
            return Ok(());
        };
        if !self.requires_cert_generation(&cached) {
            return Ok(());
        }

        let mut service = Service::clone(&cached);
        let Some(secret_name) = requested_secret_name(&service).map(str::to_string) else {
            return Ok(());
        };
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let uid = service.uid().unwrap_or_default();

        let dns_names = service_dns_names(&name, &namespace, &self.ctx.config.dns_suffix);
        let certificate = match self.ctx.signer.make_server_cert(
            &dns_names,
            self.ctx.config.cert_lifetime_days,
            &[CertExtension::ServiceUid(uid.clone())],
        ) {
            Ok(certificate) => certificate,
            Err(e) => return self.update_service_failure(service, e.into()).await,
        };

        let secret = build_serving_secret(&service, &secret_name, &certificate);
        match self.ctx.api.create_secret(&secret).await {
            Ok(_) => {
                info!(
                    namespace = %namespace,
                    service = %name,
                    secret = %secret_name,
                    expiry = %certificate.not_after,
                    "Created serving certificate secret"
                );
                metrics::record_certificate_issued(CREATION_CONTROLLER_NAME);
            }
            Err(e) if e.is_already_exists() => {
                let existing = match self.ctx.api.get_secret(&namespace, &secret_name).await {
                    Ok(existing) => existing,
                    Err(e) => return self.update_service_failure(service, e.into()).await,
                };
                let owner_uid =
                    annotation(&existing, ORIGINATING_SERVICE_UID).unwrap_or_default();
                if owner_uid != uid {
                    let conflict = SyncError::OwnershipConflict {
                        secret: secret_name,
                        actual: owner_uid.to_string(),
                        expected: uid,
                    };
                    return self.update_service_failure(service, conflict).await;
                }
                debug!(
                    namespace = %namespace,
                    service = %name,
                    secret = %secret_name,
                    "Serving certificate secret already exists for this service, adopting it"
                );
            }
            Err(e) => return self.update_service_failure(service, e.into()).await,
        }

        mark_signed_by(&mut service, self.ctx.signer.common_name());
        self.ctx.api.update_service(&service).await?;
        Ok(())
    }

    /// Record `err` on the Service and decide whether the key should be retried.
    ///
    /// Once the recorded failure count reaches `max_retries` the sync is reported as
    /// successful so the queue stops retrying.
    async fn update_service_failure(
        &self,
        mut service: Service,
        err: SyncError,
    ) -> Result<(), SyncError> {
        let count = record_generation_failure(&mut service, &err.to_string());
        metrics::record_generation_failure(err.reason());
        if err.is_retryable() {
            debug!(
                namespace = %service.namespace().unwrap_or_default(),
                service = %service.name_any(),
                failures = count,
                error = %err,
                "Serving certificate generation hit a transient failure"
            );
        } else {
            warn!(
                namespace = %service.namespace().unwrap_or_default(),
                service = %service.name_any(),
                failures = count,
                error = %err,
                "Serving certificate generation failed"
            );
        }

        match self.ctx.api.update_service(&service).await {
            Ok(_) if count >= self.ctx.config.max_retries => {
                warn!(
                    namespace = %service.namespace().unwrap_or_default(),
                    service = %service.name_any(),
                    max_retries = self.ctx.config.max_retries,
                    "Giving up on serving certificate until the error annotations are cleared"
                );
                Ok(())
            }
            Ok(_) => Err(err),
            Err(update_err) => {
                warn!(
                    namespace = %service.namespace().unwrap_or_default(),
                    service = %service.name_any(),
                    error = %update_err,
                    "Failed to record serving certificate error on service"
                );
                Err(err)
            }
        }
    }
}

#[async_trait]
impl SyncHandler for ServingCertController {
    const NAME: &'static str = CREATION_CONTROLLER_NAME;

    fn stores(&self) -> &Stores {
        &self.ctx.stores
    }

    fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    async fn sync(&self, key: &ObjectKey) -> Result<(), SyncError> {
        self.sync_service(key).await
    }

    fn resync(&self) -> usize {
        let mut keys = 0;
        for service in self.ctx.stores.services.state() {
            if self.requires_cert_generation(&service) {
                self.queue.add(ObjectKey::for_resource(service.as_ref()));
                keys += 1;
            }
        }
        keys
    }
}

#[cfg(test)]
#[path = "serving_cert_tests.rs"]
mod serving_cert_tests;
