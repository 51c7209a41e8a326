//! NaCl-compatible anonymous sealed box, used to encrypt repository secrets
//! before they are uploaded to the source host (spec §4.B, §6: "Secret
//! encryption: libsodium-compatible sealed box, base64-encoded ciphertext,
//! `key_id` echoed back").

use base64::Engine;
use crypto_box::PublicKey;

/// Seals `plaintext` against `public_key_b64` (the repo's base64-encoded
/// Curve25519 public key, as returned by the source host's public-key
/// endpoint) and returns the base64-encoded ciphertext the secrets API
/// expects as `encrypted_value`.
pub fn seal(public_key_b64: &str, plaintext: &[u8]) -> Result<String, String> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key_b64)
        .map_err(|e| format!("invalid public key encoding: {e}"))?;
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| "public key must be 32 bytes".to_string())?;
    let public_key = PublicKey::from_bytes(key_bytes);

    let mut rng = crypto_box::aead::OsRng;
    let ciphertext = crypto_box::seal(&mut rng, &public_key, plaintext)
        .map_err(|e| format!("sealed box encryption failed: {e}"))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_box::SecretKey;

    #[test]
    fn seal_produces_base64_ciphertext_decryptable_by_matching_secret_key() {
        let mut rng = crypto_box::aead::OsRng;
        let secret_key = SecretKey::generate(&mut rng);
        let public_key = secret_key.public_key();
        let public_key_b64 = base64::engine::general_purpose::STANDARD.encode(public_key.as_bytes());

        let sealed = seal(&public_key_b64, b"CLOUDFLARE_API_TOKEN=abc123").unwrap();
        let ciphertext = base64::engine::general_purpose::STANDARD.decode(sealed).unwrap();

        let opened = crypto_box::seal_open(&secret_key, &ciphertext).unwrap();
        assert_eq!(opened, b"CLOUDFLARE_API_TOKEN=abc123");
    }

    #[test]
    fn seal_rejects_malformed_public_key() {
        assert!(seal("not-base64!!!", b"value").is_err());
    }
}
