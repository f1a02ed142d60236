// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Fixtures shared by the unit tests: object builders, pre-synced stores, an in-memory
//! [`ClusterApi`] that records every write, and a signer that always fails.

use crate::api::ClusterApi;
use crate::ca::{CertExtension, CertificateAuthority, ServingCertSigner, ServingCertificate};
use crate::config::SigningConfig;
use crate::context::{Context, Stores};
use crate::errors::{ApiError, CaError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, OnceLock};

pub const TEST_SIGNER_NAME: &str = "test-signer@1700000000";

fn annotations(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
    )
}

/// Build a Service with the given identity and annotations.
pub fn service(namespace: &str, name: &str, uid: &str, pairs: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some("1".to_string()),
            annotations: annotations(pairs),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build an opaque Secret with the given identity and annotations.
pub fn secret(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("secret-uid-{name}")),
            resource_version: Some("1".to_string()),
            annotations: annotations(pairs),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn synced_store<K>(objects: Vec<K>) -> (kube::runtime::reflector::Store<K>, Writer<K>)
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, mut writer) = kube::runtime::reflector::store::<K>();
    writer.apply_watcher_event(&Event::Init);
    for object in objects {
        writer.apply_watcher_event(&Event::InitApply(object));
    }
    writer.apply_watcher_event(&Event::InitDone);
    (reader, writer)
}

/// Stores that completed their initial list with the given objects.
///
/// The writers are returned so tests can apply further events.
pub fn stores(
    services: Vec<Service>,
    secrets: Vec<Secret>,
) -> (Stores, Writer<Service>, Writer<Secret>) {
    let (services, service_writer) = synced_store(services);
    let (secrets, secret_writer) = synced_store(secrets);
    (Stores { services, secrets }, service_writer, secret_writer)
}

/// A CA generated once per test binary.
pub fn test_signer() -> Arc<CertificateAuthority> {
    static SIGNER: OnceLock<Arc<CertificateAuthority>> = OnceLock::new();
    SIGNER
        .get_or_init(|| {
            Arc::new(
                CertificateAuthority::generate(TEST_SIGNER_NAME, 3650)
                    .expect("test CA generation should succeed"),
            )
        })
        .clone()
}

/// Context over the given fake API, stores and signer with default signing settings.
pub fn context(
    api: Arc<FakeClusterApi>,
    stores: Stores,
    signer: Arc<dyn ServingCertSigner>,
) -> Arc<Context> {
    Arc::new(Context::new(api, stores, signer, SigningConfig::default()))
}

/// A write call observed by [`FakeClusterApi`].
#[derive(Clone, Debug)]
pub enum ApiCall {
    CreateSecret(Secret),
    GetSecret { namespace: String, name: String },
    UpdateSecret(Secret),
    UpdateService(Service),
}

#[derive(Clone, Debug)]
struct InjectedFailure {
    code: u16,
    reason: String,
    message: String,
}

impl InjectedFailure {
    fn to_error(&self) -> ApiError {
        ApiError::Rejected {
            code: self.code,
            reason: self.reason.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    secrets: BTreeMap<(String, String), Secret>,
    calls: Vec<ApiCall>,
    create_failure: Option<InjectedFailure>,
    update_service_failure: Option<InjectedFailure>,
    update_secret_failure: Option<InjectedFailure>,
}

/// In-memory [`ClusterApi`] recording every call.
///
/// Secrets created or updated through it can be read back with `get_secret`; Services are
/// only recorded.
#[derive(Default)]
pub struct FakeClusterApi {
    state: Mutex<FakeState>,
}

impl FakeClusterApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Seed a Secret that exists on the server (not necessarily in the cache).
    pub fn with_secret(self: Arc<Self>, secret: Secret) -> Arc<Self> {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.state().secrets.insert(key, secret);
        self
    }

    pub fn fail_creates_with(&self, code: u16, reason: &str, message: &str) {
        self.state().create_failure = Some(InjectedFailure {
            code,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn fail_service_updates_with(&self, code: u16, reason: &str, message: &str) {
        self.state().update_service_failure = Some(InjectedFailure {
            code,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn fail_secret_updates_with(&self, code: u16, reason: &str, message: &str) {
        self.state().update_secret_failure = Some(InjectedFailure {
            code,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    pub fn created_secrets(&self) -> Vec<Secret> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::CreateSecret(secret) => Some(secret),
                _ => None,
            })
            .collect()
    }

    pub fn updated_secrets(&self) -> Vec<Secret> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::UpdateSecret(secret) => Some(secret),
                _ => None,
            })
            .collect()
    }

    pub fn updated_services(&self) -> Vec<Service> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::UpdateService(service) => Some(service),
                _ => None,
            })
            .collect()
    }

    pub fn stored_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ApiError> {
        let mut state = self.state();
        state.calls.push(ApiCall::CreateSecret(secret.clone()));
        if let Some(failure) = &state.create_failure {
            return Err(failure.to_error());
        }
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        if state.secrets.contains_key(&key) {
            return Err(ApiError::AlreadyExists {
                kind: "secrets".to_string(),
                name: key.1,
            });
        }
        state.secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ApiError> {
        let mut state = self.state();
        state.calls.push(ApiCall::GetSecret {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                kind: "secrets".to_string(),
                name: name.to_string(),
            })
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, ApiError> {
        let mut state = self.state();
        state.calls.push(ApiCall::UpdateSecret(secret.clone()));
        if let Some(failure) = &state.update_secret_failure {
            return Err(failure.to_error());
        }
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        state.secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn update_service(&self, service: &Service) -> Result<Service, ApiError> {
        let mut state = self.state();
        state.calls.push(ApiCall::UpdateService(service.clone()));
        if let Some(failure) = &state.update_service_failure {
            return Err(failure.to_error());
        }
        Ok(service.clone())
    }
}

/// Signer whose every signing attempt fails.
pub struct FailingSigner;

impl ServingCertSigner for FailingSigner {
    fn common_name(&self) -> &str {
        "failing-signer"
    }

    fn make_server_cert(
        &self,
        _dns_names: &BTreeSet<String>,
        _lifetime_days: u32,
        _extensions: &[CertExtension],
    ) -> crate::ca::Result<ServingCertificate> {
        Err(CaError::CertificateGenerationFailed(
            "signer unavailable".to_string(),
        ))
    }
}

/// DNS SANs of the first certificate in a PEM chain, sorted.
pub fn leaf_dns_names(pem: &[u8]) -> Vec<String> {
    use x509_parser::extensions::GeneralName;

    let (_, pem) = x509_parser::pem::parse_x509_pem(pem).expect("PEM should parse");
    let cert = pem.parse_x509().expect("certificate should parse");
    let san = cert
        .subject_alternative_name()
        .expect("SAN extension should parse")
        .expect("SAN extension should be present");
    let mut names: Vec<String> = san
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_string()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}
