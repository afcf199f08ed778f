//! Versioned DM envelope — the ciphertext record the message layer
//! transports. The server relays it opaquely.
//!
//! Two versions coexist:
//!   v1 — legacy static-ECDH AEAD; no header. Used only when the peer
//!        has no prekey bundle.
//!   v2 — Signal (X3DH + Double Ratchet); `header` carries the canonical
//!        JSON ratchet header whose exact bytes are the AEAD AAD.

use serde::{Deserialize, Serialize};

pub const VERSION_LEGACY: u8 = 1;
pub const VERSION_SIGNAL: u8 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmEnvelope {
    pub version: u8,
    /// 12-byte AEAD nonce, base64.
    pub nonce: String,
    /// Ciphertext with the 16-byte tag appended, base64.
    pub ciphertext: String,
    /// Canonical-JSON ratchet header string. Absent on v1 payloads; the
    /// string is passed through verbatim because re-serialising could
    /// reorder keys and break the AAD binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}
