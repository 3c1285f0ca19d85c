//! Certificate and provisioning profile lookup against an in-memory store.

mod common;

use std::path::PathBuf;

use common::MemoryStore;

use mobrig_core::host::HostOs;
use mobrig_core::signing::{
    Certificate, CertificateType, ProfileType, ProvisioningProfile, SigningError, SigningLookup,
};

fn cert(fingerprint: &str, name: &str) -> Certificate {
    Certificate {
        fingerprint: fingerprint.to_string(),
        name: name.to_string(),
    }
}

fn profile(uuid: &str, name: &str, profile_type: ProfileType) -> ProvisioningProfile {
    ProvisioningProfile {
        uuid: uuid.to_string(),
        name: name.to_string(),
        team_id: Some("ABCDE12345".to_string()),
        profile_type,
        expires: None,
        path: PathBuf::from(format!("/profiles/{uuid}.mobileprovision")),
    }
}

fn store() -> MemoryStore {
    MemoryStore {
        certificates: vec![
            (CertificateType::Developer, cert("AAA", "Apple Development: Jane Appleseed (T1)")),
            (CertificateType::Developer, cert("BBB", "iPhone Developer: Jane Appleseed (T2)")),
            (CertificateType::Distribution, cert("CCC", "Apple Distribution: Example Corp (T1)")),
        ],
        profiles: vec![
            profile("u-1", "Example AdHoc", ProfileType::AdHoc),
            profile("u-2", "Example Dev", ProfileType::Development),
            profile("u-3", "Example AdHoc", ProfileType::AdHoc),
            profile("u-4", "Example AdHoc Extra", ProfileType::AdHoc),
        ],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_certificate_contains_match_last_wins() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let found = lookup
        .find_certificate("developer", "Jane Appleseed")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.fingerprint, "BBB");

    let found = lookup.find_certificate("developer", "(T1)").await.unwrap().unwrap();
    assert_eq!(found.fingerprint, "AAA");
}

#[tokio::test]
async fn test_certificate_type_filters_records() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let found = lookup
        .find_certificate("distribution", "Example Corp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.fingerprint, "CCC");

    let err = lookup
        .find_certificate("distribution", "Jane Appleseed")
        .await
        .unwrap_err();
    assert!(matches!(err, SigningError::CertificateNotFound { .. }));
    assert!(err.to_string().contains("no certificate found"));
}

#[tokio::test]
async fn test_invalid_certificate_type_fails_before_store() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let err = lookup.find_certificate("enterprise", "Jane").await.unwrap_err();
    assert!(matches!(err, SigningError::InvalidType { .. }));
    assert!(err.to_string().contains("not a valid type"));
    assert_eq!(lookup.store().calls(), 0);
}

#[tokio::test]
async fn test_profile_exact_match_last_wins() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let found = lookup.find_profile("adhoc", "Example AdHoc").await.unwrap().unwrap();
    assert_eq!(found.uuid, "u-3");

    let found = lookup.find_profile("development", "Example Dev").await.unwrap().unwrap();
    assert_eq!(found.uuid, "u-2");
}

#[tokio::test]
async fn test_profile_prefix_is_not_a_match() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let err = lookup.find_profile("adhoc", "Example").await.unwrap_err();
    assert!(matches!(err, SigningError::ProfileNotFound { .. }));
    assert!(err.to_string().contains("no provisioning profile found"));

    let err = lookup.find_profile("distribution", "Example AdHoc").await.unwrap_err();
    assert!(matches!(err, SigningError::ProfileNotFound { .. }));
}

#[tokio::test]
async fn test_invalid_profile_type() {
    let lookup = SigningLookup::with_host(store(), HostOs::MacOs);

    let err = lookup.find_profile("appstore", "Example AdHoc").await.unwrap_err();
    assert!(err.to_string().contains("not a valid type"));
    assert_eq!(lookup.store().calls(), 0);
}

#[tokio::test]
async fn test_lookups_are_empty_off_macos() {
    for host in [HostOs::Linux, HostOs::Windows] {
        let lookup = SigningLookup::with_host(store(), host);
        assert!(lookup.find_certificate("developer", "Jane").await.unwrap().is_none());
        assert!(lookup.find_profile("adhoc", "Example AdHoc").await.unwrap().is_none());
        // Even invalid types are not an error where signing does not exist.
        assert!(lookup.find_profile("bogus", "x").await.unwrap().is_none());
        assert_eq!(lookup.store().calls(), 0);
    }
}
