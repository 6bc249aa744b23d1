//! API-key secret generation.

use rand::RngCore;

/// Prefix identifying Catalyst key secrets in logs and support tickets.
pub const KEY_SECRET_PREFIX: &str = "ck_";

/// Generates a fresh API-key secret: 32 random bytes, hex-encoded, with
/// the `ck_` prefix. The secret is shown to the caller exactly once;
/// only its SHA-256 hash is persisted.
#[must_use]
pub fn generate_key_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{KEY_SECRET_PREFIX}{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_shape() {
        let secret = generate_key_secret();
        assert!(secret.starts_with("ck_"));
        assert_eq!(secret.len(), 3 + 64);
    }

    #[test]
    fn test_secrets_are_unique() {
        assert_ne!(generate_key_secret(), generate_key_secret());
    }
}
