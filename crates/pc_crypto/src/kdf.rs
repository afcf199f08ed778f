//! Key derivation for the Signal layer.
//!
//! All derivations are HKDF-SHA256 or HMAC-SHA256. The info strings and
//! HMAC tags below are wire contract: both peers must use the exact same
//! constants or the derived keys diverge silently.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;

/// HKDF info for the X3DH shared-secret derivation.
pub const X3DH_INFO: &[u8] = b"paracord:signal:x3dh";

/// HKDF info for root-key ratchet steps.
pub const RATCHET_INFO: &[u8] = b"paracord:signal:ratchet";

type HmacSha256 = Hmac<Sha256>;

/// X3DH KDF: 32-byte shared secret from the concatenated DH outputs.
/// Salt is fixed to 32 zero bytes.
pub fn x3dh_kdf(dh_concat: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&[0u8; 32]), dh_concat);
    let mut sk = [0u8; 32];
    hk.expand(X3DH_INFO, &mut sk)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(sk)
}

/// KDF_RK: mix a DH output into the root key.
/// One 64-byte expand, split into (new_root_key, chain_key).
pub fn kdf_rk(rk: &[u8; 32], dh_out: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(rk), dh_out);
    let mut okm = [0u8; 64];
    hk.expand(RATCHET_INFO, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let mut new_rk = [0u8; 32];
    let mut ck = [0u8; 32];
    new_rk.copy_from_slice(&okm[..32]);
    ck.copy_from_slice(&okm[32..]);
    Ok((new_rk, ck))
}

/// KDF_CK: advance a chain key one step.
/// Returns (next_chain_key, message_key); tag 0x01 derives the message
/// key, tag 0x02 the next chain key.
pub fn kdf_ck(ck: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let mut mac_mk = HmacSha256::new_from_slice(ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_mk.update(&[0x01]);
    let mk: [u8; 32] = mac_mk.finalize().into_bytes().into();

    let mut mac_ck = HmacSha256::new_from_slice(ck)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    mac_ck.update(&[0x02]);
    let next_ck: [u8; 32] = mac_ck.finalize().into_bytes().into();

    Ok((next_ck, mk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x3dh_kdf_is_deterministic() {
        let ikm = [7u8; 96];
        assert_eq!(x3dh_kdf(&ikm).unwrap(), x3dh_kdf(&ikm).unwrap());
        // Any input change must change the output
        let mut other = ikm;
        other[0] ^= 1;
        assert_ne!(x3dh_kdf(&ikm).unwrap(), x3dh_kdf(&other).unwrap());
    }

    #[test]
    fn kdf_rk_splits_distinct_halves() {
        let (rk, ck) = kdf_rk(&[1u8; 32], &[2u8; 32]).unwrap();
        assert_ne!(rk, ck);
        // Deterministic
        assert_eq!((rk, ck), kdf_rk(&[1u8; 32], &[2u8; 32]).unwrap());
    }

    #[test]
    fn kdf_ck_separates_message_and_chain_keys() {
        let ck0 = [9u8; 32];
        let (ck1, mk1) = kdf_ck(&ck0).unwrap();
        assert_ne!(ck1, mk1);
        assert_ne!(ck1, ck0);
        // Advancing twice yields a different message key
        let (_, mk2) = kdf_ck(&ck1).unwrap();
        assert_ne!(mk1, mk2);
    }
}
