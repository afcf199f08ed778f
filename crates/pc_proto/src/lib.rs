//! pc_proto — wire types for the Paracord DM encryption layer.
//!
//! Everything here maps directly to JSON bodies: the versioned DM
//! envelope handed to the message layer, and the keys-API
//! request/response shapes. Encodings are contract: public keys and
//! signatures travel as padded base64, identity keys as lowercase hex.
//!
//! # Modules
//! - `envelope` — versioned DM ciphertext payload (v1 legacy / v2 Signal)
//! - `keys`     — keys-API bodies and the prekey bundle wire form

pub mod envelope;
pub mod keys;

pub use envelope::{DmEnvelope, VERSION_LEGACY, VERSION_SIGNAL};
pub use keys::{
    KeyCountsResponse, OneTimePrekeyUpload, PrekeyBundleResponse, SignedPrekeyUpload,
    UploadKeysRequest, UploadKeysResponse,
};
