//! Hash utilities

use base64::{engine::general_purpose::STANDARD, Engine};
use digest::Digest;
use md5::Md5;
use sha2::Sha256;

/// Length iRODS pads passwords to before hashing them with a challenge
pub const IRODS_MAX_PASSWORD_LEN: usize = 50;

/// Length of the challenge an iRODS server sends for native authentication
pub const IRODS_CHALLENGE_LEN: usize = 64;

pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verification token for a cached authentication:
/// `hex(SHA-256(secret || identity || credential))`.
///
/// Only this token is ever stored, never the credential itself.
pub fn auth_token(secret: &str, identity: &str, credential: &str) -> String {
    sha256_hash(&[secret.as_bytes(), identity.as_bytes(), credential.as_bytes()].concat())
}

/// Response to an iRODS native authentication challenge, base64 encoded.
///
/// MD5 over the challenge followed by the password zero-padded to
/// [`IRODS_MAX_PASSWORD_LEN`] bytes. Zero bytes in the digest are replaced
/// by 1 since the server treats the response as a C string.
pub fn irods_challenge_response(challenge: &[u8], password: &str) -> String {
    let mut padded = [0u8; IRODS_MAX_PASSWORD_LEN];
    let pw = password.as_bytes();
    let len = pw.len().min(IRODS_MAX_PASSWORD_LEN);
    padded[..len].copy_from_slice(&pw[..len]);

    let mut hasher = Md5::new();
    hasher.update(challenge);
    hasher.update(padded);
    let mut digest = hasher.finalize().to_vec();
    for b in digest.iter_mut() {
        if *b == 0 {
            *b = 1;
        }
    }

    STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            sha256_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_auth_token_is_concatenation_hash() {
        assert_eq!(
            auth_token("seed", "alice", "secret"),
            sha256_hash(b"seedalicesecret")
        );
    }

    #[test]
    fn test_auth_token_depends_on_every_input() {
        let token = auth_token("seed", "alice", "secret");
        assert_ne!(token, auth_token("other", "alice", "secret"));
        assert_ne!(token, auth_token("seed", "bob", "secret"));
        assert_ne!(token, auth_token("seed", "alice", "Secret"));
    }

    #[test]
    fn test_auth_token_never_contains_credential() {
        for credential in ["secret", "hunter2", "a", "", "0123456789abcdef"] {
            let token = auth_token("seed", "alice", credential);
            assert_ne!(token, credential);
            assert_eq!(token.len(), 64);
        }
    }

    #[test]
    fn test_irods_challenge_response() {
        let challenge = [7u8; IRODS_CHALLENGE_LEN];
        let response = irods_challenge_response(&challenge, "rods");
        let decoded = STANDARD.decode(&response).unwrap();

        assert_eq!(decoded.len(), 16);
        assert!(decoded.iter().all(|b| *b != 0));
        assert_eq!(response, irods_challenge_response(&challenge, "rods"));
        assert_ne!(response, irods_challenge_response(&challenge, "rodz"));
    }

    #[test]
    fn test_irods_challenge_response_truncates_long_password() {
        let challenge = [1u8; IRODS_CHALLENGE_LEN];
        let long = "x".repeat(IRODS_MAX_PASSWORD_LEN);
        let longer = "x".repeat(IRODS_MAX_PASSWORD_LEN + 10);
        assert_eq!(
            irods_challenge_response(&challenge, &long),
            irods_challenge_response(&challenge, &longer)
        );
    }
}
