//! RPSL text, source configuration and key fixtures.

use chrono::{DateTime, TimeZone, Utc};
use ed25519_dalek::SigningKey;

use crate::domain::SourceConfig;
use crate::domain::signature::{public_key_to_pem, signing_key_to_pem};

/// Fixed instant most tests start from.
pub fn fixed_now() -> DateTime<Utc> {
    match Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0) {
        chrono::LocalResult::Single(now) => now,
        _ => panic!("fixed timestamp is ambiguous"),
    }
}

/// Source configuration without any role.
pub fn source(name: &str) -> SourceConfig {
    SourceConfig::new(name)
}

pub fn mntner(name: &str, source: &str) -> String {
    format!("mntner:         {name}\nauth:           BCRYPT-PW $2b$12$secret\nmnt-by:         {name}\nsource:         {source}\n")
}

pub fn route(prefix: &str, origin: &str, source: &str) -> String {
    format!("route:          {prefix}\norigin:         {origin}\nmnt-by:         TEST-MNT\nsource:         {source}\n")
}

pub fn person(name: &str, nic_hdl: &str, source: &str) -> String {
    format!("person:         {name}\naddress:        1 Example Street\nphone:          +31 20 000 0000\nnic-hdl:        {nic_hdl}\nsource:         {source}\n")
}

/// Deterministic signing key derived from `seed`.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn public_pem(key: &SigningKey) -> String {
    match public_key_to_pem(&key.verifying_key()) {
        Ok(pem) => pem,
        Err(error) => panic!("encode public key: {error}"),
    }
}

pub fn private_pem(key: &SigningKey) -> String {
    match signing_key_to_pem(key) {
        Ok(pem) => pem.as_str().to_owned(),
        Err(error) => panic!("encode private key: {error}"),
    }
}
