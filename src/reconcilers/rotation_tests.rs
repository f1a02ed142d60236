// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `rotation.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::{SERVING_CERT_EXPIRY, SERVING_CERT_SECRET_NAME, TLS_CERT_KEY};
    use crate::ca::ServingCertSigner;
    use crate::reconcilers::resources::format_expiry;
    use crate::test_support::{
        context, leaf_dns_names, secret, service, stores, test_signer, FailingSigner,
        FakeClusterApi,
    };
    use chrono::TimeDelta;

    const NS: &str = "ns";
    const SVC: &str = "svc-name";
    const SVC_UID: &str = "svc-uid";
    const SECRET: &str = "new-secret";

    fn controller_with(
        api: &Arc<FakeClusterApi>,
        services: Vec<Service>,
        secrets: Vec<Secret>,
        signer: Arc<dyn ServingCertSigner>,
    ) -> ServingCertRotationController {
        let (stores, _svc_writer, _secret_writer) = stores(services, secrets);
        ServingCertRotationController::new(context(Arc::clone(api), stores, signer))
    }

    fn controller(
        api: &Arc<FakeClusterApi>,
        services: Vec<Service>,
        secrets: Vec<Secret>,
    ) -> ServingCertRotationController {
        controller_with(api, services, secrets, test_signer())
    }

    fn owner() -> Service {
        service(NS, SVC, SVC_UID, &[(SERVING_CERT_SECRET_NAME, SECRET)])
    }

    fn managed_secret(uid: &str, expiry: Option<&str>) -> Secret {
        let mut pairs = vec![
            (ORIGINATING_SERVICE_UID, uid),
            (ORIGINATING_SERVICE_NAME, SVC),
        ];
        if let Some(expiry) = expiry {
            pairs.push((SERVING_CERT_EXPIRY, expiry));
        }
        secret(NS, SECRET, &pairs)
    }

    fn expiring_in(delta: TimeDelta) -> String {
        format_expiry(Utc::now() + delta)
    }

    fn key() -> ObjectKey {
        ObjectKey::new(NS, SECRET)
    }

    // ------------------------------------------------------------------------
    // requires_regeneration
    // ------------------------------------------------------------------------

    #[test]
    fn test_rotation_threshold() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![]);
        let now = Utc::now();
        let two_hours = managed_secret(SVC_UID, Some(&format_expiry(now + TimeDelta::hours(2))));
        let thirty_minutes =
            managed_secret(SVC_UID, Some(&format_expiry(now + TimeDelta::minutes(30))));

        assert!(
            !ctrl.requires_regeneration(&two_hours, now),
            "Two hours left is above the one hour threshold"
        );
        assert!(
            ctrl.requires_regeneration(&thirty_minutes, now),
            "Thirty minutes left is below the one hour threshold"
        );
    }

    #[test]
    fn test_missing_or_garbage_expiry_requires_regeneration() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![]);

        assert!(ctrl.requires_regeneration(&managed_secret(SVC_UID, None), Utc::now()));
        assert!(ctrl.requires_regeneration(
            &managed_secret(SVC_UID, Some("not-a-timestamp")),
            Utc::now()
        ));
    }

    #[test]
    fn test_unmanaged_secret_is_ignored() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![]);

        assert!(!ctrl.requires_regeneration(&secret(NS, SECRET, &[]), Utc::now()));
    }

    #[test]
    fn test_secret_without_cached_service_is_ignored() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![], vec![]);

        assert!(!ctrl.requires_regeneration(&managed_secret(SVC_UID, None), Utc::now()));
    }

    #[test]
    fn test_secret_no_longer_named_by_service_is_ignored() {
        let api = FakeClusterApi::new();
        let renamed = service(NS, SVC, SVC_UID, &[(SERVING_CERT_SECRET_NAME, "other")]);
        let ctrl = controller(&api, vec![renamed], vec![]);

        assert!(!ctrl.requires_regeneration(&managed_secret(SVC_UID, None), Utc::now()));
    }

    #[test]
    fn test_secret_with_foreign_uid_is_never_regenerated() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![]);

        assert!(
            !ctrl.requires_regeneration(&managed_secret("wrong-uid", None), Utc::now()),
            "A secret claiming a different service UID must be left untouched"
        );
    }

    // ------------------------------------------------------------------------
    // sync_secret
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_sync_rotates_expired_secret_in_place() {
        // Arrange
        let expired = managed_secret(SVC_UID, Some(&expiring_in(TimeDelta::hours(-1))));
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![expired]);

        // Act
        let result = ctrl.sync_secret(&key()).await;

        // Assert
        assert!(result.is_ok(), "rotation should succeed: {result:?}");
        let updated = api.updated_secrets();
        assert_eq!(updated.len(), 1, "Exactly one secret update");
        assert!(api.created_secrets().is_empty(), "Rotation never creates");

        let rotated = &updated[0];
        assert_eq!(rotated.name_any(), SECRET);
        assert_eq!(annotation(rotated, ORIGINATING_SERVICE_UID), Some(SVC_UID));
        assert_eq!(annotation(rotated, ORIGINATING_SERVICE_NAME), Some(SVC));
        assert_eq!(
            rotated.metadata.resource_version.as_deref(),
            Some("1"),
            "Update carries the cached resourceVersion"
        );

        let expiry = parse_expiry(rotated).expect("rotated secret should carry an expiry");
        assert!(expiry > Utc::now() + TimeDelta::days(700));

        let cert_pem = &rotated.data.as_ref().unwrap()[TLS_CERT_KEY].0;
        assert_eq!(
            leaf_dns_names(cert_pem),
            vec!["svc-name.ns.svc", "svc-name.ns.svc.cluster.local"]
        );
        assert!(!ctrl.requires_regeneration(rotated, Utc::now()), "Rotation is idempotent");
    }

    #[tokio::test]
    async fn test_sync_leaves_fresh_secret_alone() {
        let fresh = managed_secret(SVC_UID, Some(&expiring_in(TimeDelta::days(30))));
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![fresh]);

        ctrl.sync_secret(&key()).await.unwrap();

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_leaves_foreign_secret_alone() {
        let foreign = managed_secret("wrong-uid", Some(&expiring_in(TimeDelta::hours(-1))));
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![foreign]);

        ctrl.sync_secret(&key()).await.unwrap();

        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_missing_secret_is_success() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![owner()], vec![]);

        assert!(ctrl.sync_secret(&key()).await.is_ok());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sync_signing_failure_is_retried_without_annotations() {
        let api = FakeClusterApi::new();
        let ctrl = controller_with(
            &api,
            vec![owner()],
            vec![managed_secret(SVC_UID, None)],
            Arc::new(FailingSigner),
        );

        let result = ctrl.sync_secret(&key()).await;

        assert!(matches!(result, Err(SyncError::Signing(_))));
        assert!(api.calls().is_empty(), "No failure counter exists on this path");
    }

    #[tokio::test]
    async fn test_sync_update_failure_is_returned() {
        let api = FakeClusterApi::new();
        api.fail_secret_updates_with(409, "Conflict", "the object has been modified");
        let ctrl = controller(&api, vec![owner()], vec![managed_secret(SVC_UID, None)]);

        let result = ctrl.sync_secret(&key()).await;

        assert!(matches!(result, Err(SyncError::Api(_))));
        assert!(api.updated_services().is_empty());
    }

    // ------------------------------------------------------------------------
    // Event handler and resync
    // ------------------------------------------------------------------------

    #[test]
    fn test_only_managed_secrets_are_enqueued() {
        let api = FakeClusterApi::new();
        let ctrl = controller(&api, vec![], vec![]);

        ctrl.handle_secret_event(ResourceEvent::Applied(&secret(NS, "plain", &[])));
        ctrl.handle_secret_event(ResourceEvent::Deleted(&managed_secret(SVC_UID, None)));
        assert!(ctrl.queue.is_empty());

        ctrl.handle_secret_event(ResourceEvent::Applied(&managed_secret(SVC_UID, None)));
        assert_eq!(ctrl.queue.len(), 1);
    }

    #[test]
    fn test_resync_enqueues_expiring_secrets() {
        let api = FakeClusterApi::new();
        let other_owner = service(NS, "fresh-svc", "uid-2", &[(SERVING_CERT_SECRET_NAME, "fresh")]);
        let fresh = secret(
            NS,
            "fresh",
            &[
                (ORIGINATING_SERVICE_UID, "uid-2"),
                (ORIGINATING_SERVICE_NAME, "fresh-svc"),
                (SERVING_CERT_EXPIRY, &expiring_in(TimeDelta::days(30))),
            ],
        );
        let expiring = managed_secret(SVC_UID, Some(&expiring_in(TimeDelta::minutes(5))));
        let ctrl = controller(&api, vec![owner(), other_owner], vec![fresh, expiring]);

        let keys = ctrl.resync();

        assert_eq!(keys, 1);
        assert_eq!(ctrl.queue.len(), 1);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_resync_of_foreign_secret_is_quiet() {
        // Arrange: a stale secret that claims the service under a different UID
        let api = FakeClusterApi::new();
        let foreign = managed_secret("wrong-uid", Some(&expiring_in(TimeDelta::minutes(5))));
        let ctrl = controller(&api, vec![owner()], vec![foreign]);
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();

        // Act: repeated resync passes
        let keys = tracing::subscriber::with_default(subscriber, || {
            (0..3).map(|_| ctrl.resync()).sum::<usize>()
        });

        // Assert
        assert_eq!(keys, 0, "Foreign secrets are never enqueued");
        assert!(
            logs.0.lock().unwrap().is_empty(),
            "Resync over a foreign secret must not log at info level or above"
        );
    }
}
