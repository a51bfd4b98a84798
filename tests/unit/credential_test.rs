//! Tests for credential signing

use meeting_bot_scheduler::core::{CredentialIssuer, HmacCredentialIssuer, Role};

#[test]
fn test_sign_caches_per_meeting() {
    let issuer = HmacCredentialIssuer::new("sdk-key", "sdk-secret").unwrap();
    let first = issuer.sign("123", Role::Attendee, 30).unwrap();
    let second = issuer.sign("123", Role::Attendee, 30).unwrap();
    assert_eq!(first, second);
    assert_eq!(issuer.cached(), 1);

    issuer.sign("123", Role::Host, 30).unwrap();
    issuer.sign("456", Role::Attendee, 30).unwrap();
    assert_eq!(issuer.cached(), 3);
}

#[test]
fn test_empty_secret_rejected() {
    assert!(HmacCredentialIssuer::new("sdk-key", "").is_err());
    assert!(HmacCredentialIssuer::new("", "secret").is_err());
}

#[test]
fn test_lifetime_covers_hold_open() {
    assert_eq!(HmacCredentialIssuer::lifetime_secs(30), 7_200);
    assert_eq!(HmacCredentialIssuer::lifetime_secs(120), 120 * 60 + 1_800);
}
