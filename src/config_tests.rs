// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::ca::ServingCertSigner;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["serving-cert-controller"]).unwrap();

        assert_eq!(config.dns_suffix, "cluster.local");
        assert_eq!(config.workers, 5);
        assert_eq!(config.max_retries, 10);
        assert_eq!(config.min_time_left_secs, 3600);
        assert_eq!(config.cert_lifetime_days, 730);
        assert_eq!(config.metrics_port, 8080);
        assert!(config.namespace.is_none());
        assert_eq!(config.resync_interval(), Some(Duration::from_secs(1200)));
    }

    #[test]
    fn test_signing_config_from_flags() {
        let config = Config::try_parse_from([
            "serving-cert-controller",
            "--dns-suffix",
            "example.internal",
            "--max-retries",
            "3",
            "--min-time-left-secs",
            "7200",
            "--cert-lifetime-days",
            "90",
        ])
        .unwrap();

        let signing = config.signing_config();

        assert_eq!(signing.dns_suffix, "example.internal");
        assert_eq!(signing.max_retries, 3);
        assert_eq!(signing.min_time_left, TimeDelta::hours(2));
        assert_eq!(signing.cert_lifetime_days, 90);
    }

    #[test]
    fn test_resync_can_be_disabled() {
        let config =
            Config::try_parse_from(["serving-cert-controller", "--resync-interval-secs", "0"])
                .unwrap();

        assert_eq!(config.resync_interval(), None);
    }

    #[test]
    fn test_ca_files_must_be_given_together() {
        let result =
            Config::try_parse_from(["serving-cert-controller", "--ca-cert-file", "/tmp/ca.crt"]);

        assert!(result.is_err(), "A CA certificate without its key is rejected");
    }

    #[test]
    fn test_load_signer_generates_named_ca() {
        let config = Config::try_parse_from([
            "serving-cert-controller",
            "--signer-name",
            "my-signer@1",
        ])
        .unwrap();

        let signer = config.load_signer().unwrap();

        assert_eq!(signer.common_name(), "my-signer@1");
    }

    #[test]
    fn test_load_signer_default_name_has_prefix() {
        let config = Config::try_parse_from(["serving-cert-controller"]).unwrap();

        let signer = config.load_signer().unwrap();

        assert!(signer.common_name().starts_with("service-serving-signer@"));
    }

    #[test]
    fn test_load_signer_reports_missing_files() {
        let config = Config::try_parse_from([
            "serving-cert-controller",
            "--ca-cert-file",
            "/nonexistent/ca.crt",
            "--ca-key-file",
            "/nonexistent/ca.key",
        ])
        .unwrap();

        let err = config.load_signer().err().expect("missing files should fail");

        assert!(err.to_string().contains("/nonexistent/ca.crt"));
    }

    #[test]
    fn test_signing_config_default_matches_flag_defaults() {
        let from_flags = Config::try_parse_from(["serving-cert-controller"])
            .unwrap()
            .signing_config();
        let default = SigningConfig::default();

        assert_eq!(from_flags.dns_suffix, default.dns_suffix);
        assert_eq!(from_flags.max_retries, default.max_retries);
        assert_eq!(from_flags.min_time_left, default.min_time_left);
        assert_eq!(from_flags.cert_lifetime_days, default.cert_lifetime_days);
    }
}
