//! Tests for configuration loading.

use super::*;
use crate::ErrorKind;
use std::collections::HashMap;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_defaults_when_nothing_set() {
    let config = ProvisionerConfig::from_lookup(|_| None).expect("defaults should load");

    assert_eq!(config, ProvisionerConfig::default());
    assert_eq!(config.max_upward_traversal, 10);
    assert_eq!(config.expiration, Some(Duration::from_secs(60)));
    assert_eq!(config.container_prefix, "provisioner");
    assert_eq!(config.host, "127.0.0.1");
}

#[test]
fn test_overrides_are_applied() {
    let config = ProvisionerConfig::from_lookup(lookup_from(&[
        (ENV_MAX_UPWARD_TRAVERSAL, "4"),
        (ENV_EXPIRATION_SECS, "120"),
        (ENV_READY_TIMEOUT_SECS, "30"),
        (ENV_READY_INITIAL_INTERVAL_MS, "100"),
        (ENV_READY_MAX_INTERVAL_MS, "1000"),
        (ENV_CONTAINER_PREFIX, "ci"),
        (ENV_HOST, "docker.internal"),
    ]))
    .expect("overrides should load");

    assert_eq!(config.max_upward_traversal, 4);
    assert_eq!(config.expiration, Some(Duration::from_secs(120)));
    assert_eq!(config.ready_timeout, Duration::from_secs(30));
    assert_eq!(config.container_prefix, "ci");
    assert_eq!(config.host, "docker.internal");

    let policy = config.retry_policy();
    assert_eq!(policy.initial_interval, Duration::from_millis(100));
    assert_eq!(policy.max_interval, Duration::from_secs(1));
    assert_eq!(policy.max_elapsed, Duration::from_secs(30));
}

#[test]
fn test_zero_expiration_disables_it() {
    let config = ProvisionerConfig::from_lookup(lookup_from(&[(ENV_EXPIRATION_SECS, "0")]))
        .expect("zero expiration is allowed");

    assert_eq!(config.expiration, None);
}

#[test]
fn test_non_numeric_value_is_rejected() {
    let err = ProvisionerConfig::from_lookup(lookup_from(&[(ENV_READY_TIMEOUT_SECS, "soon")]))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains(ENV_READY_TIMEOUT_SECS));
}

#[test]
fn test_zero_traversal_is_rejected() {
    let err = ProvisionerConfig::from_lookup(lookup_from(&[(ENV_MAX_UPWARD_TRAVERSAL, "0")]))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_max_interval_below_initial_is_rejected() {
    let err = ProvisionerConfig::from_lookup(lookup_from(&[
        (ENV_READY_INITIAL_INTERVAL_MS, "2000"),
        (ENV_READY_MAX_INTERVAL_MS, "1000"),
    ]))
    .unwrap_err();

    assert!(err.to_string().contains(ENV_READY_MAX_INTERVAL_MS));
}

#[test]
fn test_blank_prefix_is_rejected() {
    let err = ProvisionerConfig::from_lookup(lookup_from(&[(ENV_CONTAINER_PREFIX, "  ")]))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Config);
}
