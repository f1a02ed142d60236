// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate authority used to sign Service serving certificates.
//!
//! Both controllers consume the signer only through the [`ServingCertSigner`] trait: given a
//! set of DNS names, a lifetime and optional extensions it returns a PEM certificate chain,
//! a PEM private key and the certificate `NotAfter`. The signer is shared between all
//! workers of both controllers without external locking, so implementations hold no
//! mutable state.
//!
//! [`CertificateAuthority`] is the `rcgen` implementation. It is either loaded from PEM
//! files or generated in memory as a self-signed signer.

use crate::constants::SERVICE_UID_EXTENSION_OID;
use crate::errors::CaError;
use chrono::{DateTime, Utc};
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, CustomExtension, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

/// Result type for CA operations
pub type Result<T> = std::result::Result<T, CaError>;

/// Optional extensions embedded into a serving certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertExtension {
    /// Binds the certificate to the UID of the Service it was issued for
    ServiceUid(String),
}

impl CertExtension {
    fn to_custom_extension(&self) -> CustomExtension {
        match self {
            CertExtension::ServiceUid(uid) => {
                CustomExtension::from_oid_content(SERVICE_UID_EXTENSION_OID, der_utf8_string(uid))
            }
        }
    }
}

/// A freshly signed serving certificate.
#[derive(Clone, Debug)]
pub struct ServingCertificate {
    /// PEM chain: the serving certificate followed by the signer certificate
    pub cert_pem: String,
    /// PEM-encoded private key of the serving certificate
    pub key_pem: String,
    /// `NotAfter` of the serving certificate
    pub not_after: DateTime<Utc>,
}

/// Signing primitive consumed by the controllers.
pub trait ServingCertSigner: Send + Sync {
    /// Subject common name of the signer.
    ///
    /// A Service is satisfied when its `serving-cert-signed-by` annotation equals this value.
    fn common_name(&self) -> &str;

    /// Sign a server certificate valid for `dns_names` for `lifetime_days` days.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails, or if a DNS name is not a
    /// valid IA5 string. Callers treat every error as retriable.
    fn make_server_cert(
        &self,
        dns_names: &BTreeSet<String>,
        lifetime_days: u32,
        extensions: &[CertExtension],
    ) -> Result<ServingCertificate>;
}

/// `rcgen`-backed certificate authority.
pub struct CertificateAuthority {
    /// Subject common name of the CA certificate
    common_name: String,
    /// PEM-encoded CA certificate
    ca_cert_pem: String,
    /// CA key pair serialized as PEM (we need to deserialize each time since `KeyPair` isn't Clone)
    ca_key_pem: String,
    /// `NotAfter` of the CA certificate; no leaf outlives it
    not_after: ::time::OffsetDateTime,
}

impl CertificateAuthority {
    /// Create a new self-signed CA valid for `lifetime_days` days.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or self-signing fails.
    pub fn generate(common_name: &str, lifetime_days: u32) -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let (not_before, not_after) = compute_validity(lifetime_days)?;
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            CaError::KeyGenerationFailed(format!("failed to generate CA key: {e}"))
        })?;
        let ca_key_pem = key_pair.serialize_pem();

        let cert = params.self_signed(&key_pair).map_err(|e| {
            CaError::CertificateGenerationFailed(format!("failed to create CA cert: {e}"))
        })?;

        debug!(common_name = %common_name, "Generated self-signed serving certificate signer");

        Ok(Self {
            common_name: common_name.to_string(),
            ca_cert_pem: cert.pem(),
            ca_key_pem,
            not_after,
        })
    }

    /// Load a CA from PEM-encoded certificate and key.
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM block cannot be parsed or the certificate has no
    /// subject common name.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::ParseError(format!("failed to parse CA key: {e}")))?;

        let (common_name, not_after) = parse_ca_cert(cert_pem)?;

        Ok(Self {
            common_name,
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: key_pem.to_string(),
            not_after,
        })
    }

    /// Load a CA from PEM files on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed.
    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Get the CA certificate in PEM format
    #[must_use]
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// `NotAfter` of the CA certificate.
    #[must_use]
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.not_after.unix_timestamp(), 0)
    }

    /// Load the key pair from stored PEM
    fn load_key_pair(&self) -> Result<KeyPair> {
        KeyPair::from_pem(&self.ca_key_pem)
            .map_err(|e| CaError::ParseError(format!("failed to load CA key: {e}")))
    }
}

impl ServingCertSigner for CertificateAuthority {
    fn common_name(&self) -> &str {
        &self.common_name
    }

    fn make_server_cert(
        &self,
        dns_names: &BTreeSet<String>,
        lifetime_days: u32,
        extensions: &[CertExtension],
    ) -> Result<ServingCertificate> {
        let mut params = CertificateParams::default();

        // The first (shortest) DNS name doubles as the subject
        if let Some(first) = dns_names.iter().next() {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, DnValue::Utf8String(first.clone()));
            params.distinguished_name = dn;
        }

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let (not_before, not_after) = compute_validity(lifetime_days)?;
        if not_after > self.not_after {
            debug!(
                signer = %self.common_name,
                requested_days = lifetime_days,
                "Serving certificate lifetime capped at signer expiry"
            );
        }
        let not_after = not_after.min(self.not_after);
        params.not_before = not_before;
        params.not_after = not_after;

        params.subject_alt_names = dns_names
            .iter()
            .map(|name| {
                Ia5String::try_from(name.clone())
                    .map(SanType::DnsName)
                    .map_err(|e| CaError::InvalidDnsName {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        params.custom_extensions = extensions
            .iter()
            .map(CertExtension::to_custom_extension)
            .collect();

        let server_key = KeyPair::generate().map_err(|e| {
            CaError::KeyGenerationFailed(format!("failed to generate server key: {e}"))
        })?;

        let ca_key = self.load_key_pair()?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, &ca_key)
            .map_err(|e| CaError::ParseError(format!("failed to create issuer: {e}")))?;

        let server_cert = params.signed_by(&server_key, &issuer).map_err(|e| {
            CaError::CertificateGenerationFailed(format!("failed to sign server cert: {e}"))
        })?;

        let not_after = DateTime::<Utc>::from_timestamp(not_after.unix_timestamp(), 0)
            .ok_or_else(|| {
                CaError::CertificateGenerationFailed(format!(
                    "certificate NotAfter {not_after} is out of range"
                ))
            })?;

        Ok(ServingCertificate {
            cert_pem: format!("{}{}", server_cert.pem(), self.ca_cert_pem),
            key_pem: server_key.serialize_pem(),
            not_after,
        })
    }
}

/// Returns `(not_before, not_after)` starting now, truncated to whole seconds.
fn compute_validity(
    lifetime_days: u32,
) -> Result<(::time::OffsetDateTime, ::time::OffsetDateTime)> {
    let now = ::time::OffsetDateTime::from_unix_timestamp(
        ::time::OffsetDateTime::now_utc().unix_timestamp(),
    )
    .map_err(|e| CaError::CertificateGenerationFailed(format!("invalid current time: {e}")))?;
    let not_after = now + ::time::Duration::days(i64::from(lifetime_days));
    Ok((now, not_after))
}

/// Extract the subject common name and `NotAfter` from a PEM CA certificate.
fn parse_ca_cert(cert_pem: &str) -> Result<(String, ::time::OffsetDateTime)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| CaError::ParseError(format!("failed to parse PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CaError::ParseError(format!("failed to parse CA cert: {e}")))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| CaError::ParseError("CA certificate has no common name".to_string()))?;
    let not_after =
        ::time::OffsetDateTime::from_unix_timestamp(cert.validity().not_after.timestamp())
            .map_err(|e| CaError::ParseError(format!("CA NotAfter out of range: {e}")))?;
    Ok((common_name, not_after))
}

/// DER encoding of an ASN.1 `UTF8String`.
fn der_utf8_string(value: &str) -> Vec<u8> {
    const UTF8_STRING_TAG: u8 = 0x0c;

    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 4);
    out.push(UTF8_STRING_TAG);

    let len = bytes.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let len_bytes: Vec<u8> = len
            .to_be_bytes()
            .into_iter()
            .skip_while(|b| *b == 0)
            .collect();
        out.push(0x80 | len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
#[path = "ca_tests.rs"]
mod ca_tests;
