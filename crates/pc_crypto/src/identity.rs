//! Long-term Ed25519 identity keys.
//!
//! The core CONSUMES the identity secret: callers hand a short-lived
//! reference on each entry point and the core never persists or caches
//! it. The account keystore that holds the secret at rest lives outside
//! this workspace.

use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::ZeroizeOnDrop;

use crate::{codec, curve, error::CryptoError};

/// 32-byte Ed25519 public identity key.
///
/// Hex on the keys API and in session identifiers, base64 inside ratchet
/// headers. Both representations are wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublic(pub [u8; 32]);

impl IdentityPublic {
    pub fn to_hex(&self) -> String {
        codec::to_hex(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        Ok(Self(codec::to_array32(&codec::from_hex(s)?)?))
    }

    pub fn to_b64(&self) -> String {
        codec::to_b64(&self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, CryptoError> {
        Ok(Self(codec::to_array32(&codec::from_b64(s)?)?))
    }

    /// X25519 view of the identity for DH operations.
    pub fn to_x25519(&self) -> Result<X25519Public, CryptoError> {
        curve::ed25519_public_to_x25519(&self.0)
    }

    /// Human-readable fingerprint: BLAKE3 of the key, truncated to 20
    /// bytes, hex in groups of 4 for manual comparison.
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.0);
        let hex = codec::to_hex(&hash.as_bytes()[..20]);
        hex.as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Short fingerprint for log lines. Never log raw key bytes.
    pub fn log_id(&self) -> String {
        let hash = blake3::hash(&self.0);
        codec::to_hex(&hash.as_bytes()[..4])
    }
}

/// Long-term identity signing key. Drop clears the secret.
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: IdentityPublic,
    secret: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::from_seed(&signing_key.to_bytes())
    }

    /// Build from the 32-byte Ed25519 seed held by the account keystore.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public: IdentityPublic(signing_key.verifying_key().to_bytes()),
            secret: *seed,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::from_seed(&codec::to_array32(bytes)?))
    }

    pub fn public(&self) -> &IdentityPublic {
        &self.public
    }

    /// Sign arbitrary bytes; raw 64-byte Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.secret).sign(msg).to_bytes()
    }

    /// X25519 view of the identity secret for DH operations.
    pub fn to_x25519_secret(&self) -> StaticSecret {
        curve::ed25519_secret_to_x25519(&self.secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_roundtrip_preserves_public_key() {
        let identity = IdentityKeyPair::generate();
        let seed = {
            // Rebuild through from_bytes as the keystore would
            let signing = SigningKey::from_bytes(&identity.secret);
            signing.to_bytes()
        };
        let rebuilt = IdentityKeyPair::from_bytes(&seed).unwrap();
        assert_eq!(identity.public(), rebuilt.public());
    }

    #[test]
    fn public_key_hex_and_b64_roundtrip() {
        let identity = IdentityKeyPair::generate();
        let public = *identity.public();
        assert_eq!(IdentityPublic::from_hex(&public.to_hex()).unwrap(), public);
        assert_eq!(IdentityPublic::from_b64(&public.to_b64()).unwrap(), public);
    }

    #[test]
    fn signature_verifies_via_curve_helper() {
        let identity = IdentityKeyPair::generate();
        let (spk_pub, _) = curve::generate_keypair();
        let sig = identity.sign(spk_pub.as_bytes());
        crate::curve::verify_signed_prekey(&identity.public().0, spk_pub.as_bytes(), &sig)
            .unwrap();
    }

    #[test]
    fn fingerprint_is_stable_and_grouped() {
        let identity = IdentityKeyPair::generate();
        let fp = identity.public().fingerprint();
        assert_eq!(fp, identity.public().fingerprint());
        assert_eq!(fp.split(' ').count(), 10);
    }
}
