/// Variable-store encryption
///
/// Derives a 256-bit key from the configured passphrase with PBKDF2-HMAC-SHA256
/// (100 000 iterations, fixed salt), then seals values with AES-256-GCM. The
/// nonce is generated fresh per call and prepended to the ciphertext before
/// base64-wrapping, so a single opaque string is what gets persisted.
///
/// This supersedes the original service's PBKDF2HMAC + Fernet scheme
/// (`core/encryption.py`); AES-GCM is the authenticated-encryption primitive
/// the broader example corpus reaches for where no Fernet-equivalent crate
/// exists (see DESIGN.md).
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use thiserror::Error;

const KDF_SALT: &[u8] = b"resinkit-salt";
const KDF_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("invalid ciphertext encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

fn derive_key(passphrase: &str) -> Key<Aes256Gcm> {
    let mut key_bytes = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(passphrase.as_bytes(), KDF_SALT, KDF_ITERATIONS, &mut key_bytes);
    key_bytes.into()
}

/// Encrypts `plaintext` under `passphrase`, returning a base64url string
/// suitable for storage in the `variables.encrypted_value` column.
pub fn encrypt_value(passphrase: &str, plaintext: &str) -> Result<String, CryptoError> {
    let key = derive_key(passphrase);
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(nonce.len() + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Reverses [`encrypt_value`]. Returns an empty string on any failure,
/// matching the original service's fail-open-to-blank behavior for corrupt
/// or foreign-key-encrypted values.
pub fn decrypt_value(passphrase: &str, encrypted: &str) -> String {
    match try_decrypt(passphrase, encrypted) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::error!(error = %e, "failed to decrypt variable value");
            String::new()
        }
    }
}

fn try_decrypt(passphrase: &str, encrypted: &str) -> Result<String, CryptoError> {
    let sealed = URL_SAFE_NO_PAD.decode(encrypted)?;
    if sealed.len() < 12 {
        return Err(CryptoError::Decrypt);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(12);

    let key = derive_key(passphrase);
    let cipher = Aes256Gcm::new(&key);
    let plaintext = cipher
        .decrypt(nonce_bytes.into(), ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let sealed = encrypt_value("my-passphrase", "db.example.com").unwrap();
        assert_eq!(decrypt_value("my-passphrase", &sealed), "db.example.com");
    }

    #[test]
    fn wrong_passphrase_fails_open_to_blank() {
        let sealed = encrypt_value("my-passphrase", "s3cret").unwrap();
        assert_eq!(decrypt_value("wrong-passphrase", &sealed), "");
    }

    #[test]
    fn ciphertext_is_not_plaintext() {
        let sealed = encrypt_value("k", "hello").unwrap();
        assert!(!sealed.contains("hello"));
    }
}
