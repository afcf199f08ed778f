//! pc_e2ee — envelope routing and prekey lifecycle for Paracord DMs.
//!
//! The two entry points the client calls:
//!   - `E2eeEngine::encrypt_dm` / `decrypt_dm` — versioned payload
//!     routing between the legacy static-ECDH path (v1) and the Signal
//!     path (v2), including X3DH initiation, responder bootstrap, and
//!     the single bootstrap retry on an undecipherable initial message.
//!   - `PrekeyLifecycle::on_session_ready` — runs on the gateway "ready"
//!     signal: generates the local prekey store on first use, rotates an
//!     aged signed prekey, and replenishes one-time prekeys the server
//!     is running low on.
//!
//! The identity secret is passed by reference into every call and never
//! stored; storage and the keys API are consumed as capabilities.
//!
//! # Modules
//! - `router`     — versioned DM encrypt/decrypt
//! - `controller` — prekey upload / rotation / replenishment
//! - `keys_api`   — `KeysApi` capability + reqwest-backed client
//! - `error`      — unified error type

pub mod controller;
pub mod error;
pub mod keys_api;
pub mod router;

pub use controller::{PrekeyLifecycle, OPK_LOW_THRESHOLD};
pub use error::E2eeError;
pub use keys_api::{HttpKeysClient, KeysApi};
pub use router::E2eeEngine;
