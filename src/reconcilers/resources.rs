// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Annotation state shared by the creation and rotation controllers.
//!
//! The Service ⇄ Secret linkage lives entirely in annotations:
//!
//! - On the Service: the opt-in secret name, the signer that last satisfied it, and the
//!   last generation error with its consecutive failure count
//! - On the Secret: the UID and name of the originating Service and the certificate expiry
//!
//! Every helper here is a pure function over a private copy of an object, so the sync
//! handlers never touch the objects held by the reflector stores.

use crate::annotations::{
    ORIGINATING_SERVICE_NAME, ORIGINATING_SERVICE_UID, SECRET_TYPE_TLS, SERVING_CERT_EXPIRY,
    SERVING_CERT_GENERATION_ERROR, SERVING_CERT_GENERATION_ERROR_NUM, SERVING_CERT_SECRET_NAME,
    SERVING_CERT_SIGNED_BY, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
};
use crate::ca::ServingCertificate;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};

/// Value of annotation `key`, if set.
pub fn annotation<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

fn set_annotation<K: Resource>(obj: &mut K, key: &str, value: String) {
    obj.annotations_mut().insert(key.to_string(), value);
}

fn remove_annotation<K: Resource>(obj: &mut K, key: &str) {
    obj.annotations_mut().remove(key);
}

/// Secret name a Service opted in with, if any.
pub fn requested_secret_name(service: &Service) -> Option<&str> {
    annotation(service, SERVING_CERT_SECRET_NAME).filter(|name| !name.is_empty())
}

/// Consecutive generation failures recorded on a Service.
///
/// A missing or unparsable counter counts as zero.
pub fn failure_count(service: &Service) -> u32 {
    annotation(service, SERVING_CERT_GENERATION_ERROR_NUM)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Record a failed generation attempt: store `message` and increment the failure counter.
///
/// Returns the new counter value.
pub fn record_generation_failure(service: &mut Service, message: &str) -> u32 {
    let count = failure_count(service).saturating_add(1);
    set_annotation(service, SERVING_CERT_GENERATION_ERROR, message.to_string());
    set_annotation(service, SERVING_CERT_GENERATION_ERROR_NUM, count.to_string());
    count
}

/// Mark a Service as satisfied by `signer` and clear any recorded failure.
pub fn mark_signed_by(service: &mut Service, signer: &str) {
    set_annotation(service, SERVING_CERT_SIGNED_BY, signer.to_string());
    remove_annotation(service, SERVING_CERT_GENERATION_ERROR);
    remove_annotation(service, SERVING_CERT_GENERATION_ERROR_NUM);
}

/// Subject alternative names of a Service's serving certificate.
///
/// `{name}.{namespace}.svc` and `{name}.{namespace}.svc.{dns_suffix}`.
pub fn service_dns_names(name: &str, namespace: &str, dns_suffix: &str) -> BTreeSet<String> {
    let short = format!("{name}.{namespace}.svc");
    let qualified = format!("{short}.{}", dns_suffix.trim_matches('.'));
    BTreeSet::from([short, qualified])
}

/// RFC 3339 form of an expiry timestamp as stored in the `expiry` annotation.
pub fn format_expiry(not_after: DateTime<Utc>) -> String {
    not_after.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse the `expiry` annotation of a Secret. `None` if missing or not RFC 3339.
pub fn parse_expiry(secret: &Secret) -> Option<DateTime<Utc>> {
    annotation(secret, SERVING_CERT_EXPIRY)
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|expiry| expiry.with_timezone(&Utc))
}

/// Write certificate material and its expiry into a Secret.
pub fn apply_certificate(secret: &mut Secret, certificate: &ServingCertificate) {
    let data = secret.data.get_or_insert_with(BTreeMap::new);
    data.insert(
        TLS_CERT_KEY.to_string(),
        ByteString(certificate.cert_pem.as_bytes().to_vec()),
    );
    data.insert(
        TLS_PRIVATE_KEY_KEY.to_string(),
        ByteString(certificate.key_pem.as_bytes().to_vec()),
    );
    set_annotation(
        secret,
        SERVING_CERT_EXPIRY,
        format_expiry(certificate.not_after),
    );
}

/// Build the TLS Secret holding `certificate` for `service`.
pub fn build_serving_secret(
    service: &Service,
    secret_name: &str,
    certificate: &ServingCertificate,
) -> Secret {
    let annotations = BTreeMap::from([
        (
            ORIGINATING_SERVICE_UID.to_string(),
            service.uid().unwrap_or_default(),
        ),
        (ORIGINATING_SERVICE_NAME.to_string(), service.name_any()),
    ]);

    let mut secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: service.namespace(),
            annotations: Some(annotations),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        ..Default::default()
    };
    apply_certificate(&mut secret, certificate);
    secret
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
