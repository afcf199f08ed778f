//! X25519 keypairs and Ed25519 → X25519 conversion.
//!
//! References:
//!   - RFC 7748 (X25519): <https://datatracker.ietf.org/doc/html/rfc7748>
//!   - Birational map between the Ed25519 curve and Curve25519
//!
//! Both halves of an Ed25519 identity can participate in DH after
//! conversion: the secret via the clamped SHA-512 expansion that
//! ed25519-dalek applies internally, the public via Edwards → Montgomery.
//! A DH computed between two converted keypairs agrees in both
//! directions.

use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Generate a fresh X25519 keypair.
pub fn generate_keypair() -> (X25519Public, StaticSecret) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    (public, secret)
}

/// Convert an Ed25519 seed (32 bytes) to an X25519 static secret.
/// Clamped per RFC 7748 §5, mirroring libsignal's IK conversion.
pub fn ed25519_secret_to_x25519(ed_seed: &[u8; 32]) -> StaticSecret {
    let mut h = Sha512::digest(ed_seed);
    h[0] &= 248;
    h[31] &= 127;
    h[31] |= 64;
    let mut key = [0u8; 32];
    key.copy_from_slice(&h[..32]);
    h.as_mut_slice().zeroize();
    let secret = StaticSecret::from(key);
    key.zeroize();
    secret
}

/// Convert an Ed25519 verifying key (32 bytes) to an X25519 public key.
pub fn ed25519_public_to_x25519(ed_pub: &[u8; 32]) -> Result<X25519Public, CryptoError> {
    let compressed = CompressedEdwardsY::from_slice(ed_pub)
        .map_err(|_| CryptoError::InvalidKey("invalid Ed25519 public key".into()))?;
    let point = compressed
        .decompress()
        .ok_or_else(|| CryptoError::InvalidKey("Ed25519 public key decompression failed".into()))?;
    Ok(X25519Public::from(point.to_montgomery().to_bytes()))
}

/// Verify the Ed25519 signature a peer made over the raw X25519 public
/// bytes of their signed prekey. The signature must cover exactly those
/// 32 bytes, nothing else.
pub fn verify_signed_prekey(
    ed_pub: &[u8; 32],
    spk_pub: &[u8; 32],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(ed_pub)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig = Signature::from_bytes(signature);
    vk.verify(spk_pub, &sig)
        .map_err(|_| CryptoError::BadPrekeyBundle)
}

/// X25519 Diffie-Hellman.
pub fn dh(secret: &StaticSecret, public: &X25519Public) -> [u8; 32] {
    secret.diffie_hellman(public).to_bytes()
}
