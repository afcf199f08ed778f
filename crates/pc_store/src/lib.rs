//! pc_store — secure local persistence for the Paracord E2EE core.
//!
//! The core persists exactly two kinds of record: ratchet sessions
//! (`signal:session:<hex>:<hex>`) and the local prekey store
//! (`signal:prekeys`). Both go through the `SecureStorage` capability,
//! whose at-rest protection is implementation-defined.
//!
//! # Encryption strategy of the bundled SQLite backend
//! SQLite does NOT natively encrypt. Values are stored as
//! XChaCha20-Poly1305 ciphertext, base64-encoded; the key is derived
//! from the user password via Argon2id and held in memory only while
//! the vault is unlocked.
//!
//! # Modules
//! - `storage`  — `SecureStorage` trait + in-memory implementation
//! - `vault`    — in-memory key material with auto-lock
//! - `db`       — vault-encrypted SQLite `SecureStorage` backend
//! - `session`  — peer-pair session records
//! - `prekeys`  — signed prekey + one-time prekey pool
//! - `error`    — unified error type

pub mod db;
pub mod error;
pub mod prekeys;
pub mod session;
pub mod storage;
pub mod vault;

pub use db::EncryptedDbStorage;
pub use error::StoreError;
pub use prekeys::PrekeyStore;
pub use session::{PendingHandshake, SessionRecord, SessionStore};
pub use storage::{MemoryStorage, SecureStorage};
pub use vault::Vault;
