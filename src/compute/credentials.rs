//! # Credential Derivation
//!
//! Per-consumer usernames and generated passwords for shared-resource
//! bindings.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generated password length. Alphanumeric only: connection URIs embed the
/// password and must not need escaping.
pub const PASSWORD_LENGTH: usize = 20;

/// Generate a random alphanumeric password from the thread-local CSPRNG.
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Username and database for a direct `uses` binding: the consuming
/// stack's own name.
#[must_use]
pub fn consumer_username(stack_name: &str) -> String {
    stack_name.to_string()
}

/// Username for a `dependsOn` binding against another consumer's database.
#[must_use]
pub fn dependency_username(consumer_stack: &str, dependency_name: &str) -> String {
    format!("{consumer_stack}--{dependency_name}")
}

/// Short content hash used to salt init-Job names, so a changed credential
/// target yields a fresh Job while an unchanged one converges on the same
/// object.
#[must_use]
pub fn credential_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..10].to_string()
}
