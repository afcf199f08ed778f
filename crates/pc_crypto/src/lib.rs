//! pc_crypto — Paracord client E2EE cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize secret material on drop.
//! - Constants baked into the key schedule (HKDF info strings, KDF tags,
//!   DH ordering, header canonicalisation) are wire contract: both peers
//!   must agree byte for byte or nothing decrypts.
//!
//! # Module layout
//! - `codec`    — base64 / hex / fixed-array conversions
//! - `kdf`      — HKDF-SHA256 + HMAC chain derivation for the Signal layer
//! - `curve`    — X25519 keypairs, Ed25519 → X25519 conversion, SPK verification
//! - `identity` — long-term Ed25519 identity keypair and public-key newtype
//! - `aead`     — AES-256-GCM with explicit nonce and caller-supplied AAD
//! - `x3dh`     — X3DH initiator / responder key agreement
//! - `ratchet`  — Double Ratchet state machine with skipped-key cache
//! - `error`    — unified error type

pub mod aead;
pub mod codec;
pub mod curve;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod ratchet;
pub mod x3dh;

pub use error::CryptoError;
