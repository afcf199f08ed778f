//! Authenticated encryption for message payloads.
//!
//! AES-256-GCM. Key: 32 bytes. Nonce: 12 random bytes, transported
//! alongside the ciphertext in the envelope rather than prepended.
//! Tag: 16 bytes, appended by the cipher.
//!
//! The AAD is the canonical JSON serialisation of the ratchet header, so
//! header tampering fails authentication together with the ciphertext.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    AeadCore, Aes256Gcm, Nonce,
};

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;

/// Fresh random 12-byte nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    Aes256Gcm::generate_nonce(&mut OsRng).into()
}

pub fn encrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::EncryptFailed)?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptFailed)
}

pub fn decrypt(
    key: &[u8; 32],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::DecryptFailed)?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_aad() {
        let key = [3u8; 32];
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"payload", b"header").unwrap();
        assert_eq!(decrypt(&key, &nonce, &ct, b"header").unwrap(), b"payload");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [3u8; 32];
        let nonce = generate_nonce();
        let mut ct = encrypt(&key, &nonce, b"payload", b"header").unwrap();
        ct[0] ^= 1;
        assert!(matches!(
            decrypt(&key, &nonce, &ct, b"header"),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn wrong_aad_fails() {
        let key = [3u8; 32];
        let nonce = generate_nonce();
        let ct = encrypt(&key, &nonce, b"payload", b"header").unwrap();
        assert!(matches!(
            decrypt(&key, &nonce, &ct, b"other"),
            Err(CryptoError::DecryptFailed)
        ));
    }
}
