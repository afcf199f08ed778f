//! Ratchet session records, keyed by the peer pair.
//!
//! The key is derived from the SORTED pair of hex identity keys, so both
//! peers independently address the same record and a conversation has
//! exactly one session regardless of who initiated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use pc_crypto::{identity::IdentityPublic, ratchet::RatchetState};

use crate::{error::StoreError, storage::SecureStorage};

pub const SESSION_KEY_PREFIX: &str = "signal:session:";

/// `signal:session:<min(a,b)>:<max(a,b)>` over hex identity keys.
pub fn session_key(a_hex: &str, b_hex: &str) -> String {
    let (lo, hi) = if a_hex <= b_hex {
        (a_hex, b_hex)
    } else {
        (b_hex, a_hex)
    };
    format!("{SESSION_KEY_PREFIX}{lo}:{hi}")
}

/// X3DH initiation material that must ride on the first ciphertext.
/// Kept in the record until that ciphertext exists, then cleared, so a
/// crash between session creation and first send cannot orphan the
/// responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingHandshake {
    /// Our Ed25519 identity public key, base64.
    pub ik: String,
    /// X3DH ephemeral public key, base64.
    pub ek: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opk_id: Option<u64>,
}

/// One persisted session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub ratchet: RatchetState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_handshake: Option<PendingHandshake>,
}

/// Session persistence over the secure-storage capability. The storage
/// contract (set before get, per key) gives linearizability per session.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn SecureStorage>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    fn key(me: &IdentityPublic, peer: &IdentityPublic) -> String {
        session_key(&me.to_hex(), &peer.to_hex())
    }

    pub async fn load(
        &self,
        me: &IdentityPublic,
        peer: &IdentityPublic,
    ) -> Result<Option<SessionRecord>, StoreError> {
        match self.storage.get(&Self::key(me, peer)).await? {
            None => Ok(None),
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    pub async fn save(
        &self,
        me: &IdentityPublic,
        peer: &IdentityPublic,
        record: &SessionRecord,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.storage.set(&Self::key(me, peer), &json).await
    }

    pub async fn delete(
        &self,
        me: &IdentityPublic,
        peer: &IdentityPublic,
    ) -> Result<(), StoreError> {
        self.storage.delete(&Self::key(me, peer)).await
    }
}
