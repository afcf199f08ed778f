//! Local prekey store: one signed prekey plus a pool of one-time prekeys.
//!
//! - Signed Prekey (SPK): X25519, public half signed by the Ed25519
//!   identity at upload time, rotated after seven days.
//! - One-Time Prekeys (OPK): X25519, consumed once per incoming X3DH.
//!   Consumption is destructive; a secret is never handed out twice.
//!
//! Ids for the SPK and all OPKs come from one monotone allocator seeded
//! at creation-time wall-clock millis, so ids stay unique across the
//! store's whole lifetime (including rotations).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use pc_crypto::{codec, curve, identity::IdentityKeyPair};

use crate::{error::StoreError, storage::SecureStorage};

pub const PREKEY_STORE_KEY: &str = "signal:prekeys";

/// Size of the initial (and replenishment target) OPK batch.
pub const OPK_BATCH_SIZE: usize = 50;

/// Signed prekey age that forces a rotation.
pub const SPK_MAX_AGE_DAYS: i64 = 7;

#[derive(Clone, Serialize, Deserialize)]
pub struct SignedPrekeyRecord {
    pub id: u64,
    #[serde(with = "codec::b64_array")]
    pub public_key: [u8; 32],
    #[serde(with = "codec::b64_array")]
    pub private_key: [u8; 32],
    /// Ed25519 identity signature over `public_key`. Re-created on every
    /// rotation, reused verbatim on idempotent re-uploads.
    #[serde(with = "codec::b64_array64")]
    pub signature: [u8; 64],
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OneTimePrekeyRecord {
    pub id: u64,
    #[serde(with = "codec::b64_array")]
    pub public_key: [u8; 32],
    #[serde(with = "codec::b64_array")]
    pub private_key: [u8; 32],
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PrekeyStore {
    pub signed_prekey: SignedPrekeyRecord,
    pub one_time_prekeys: Vec<OneTimePrekeyRecord>,
    next_id: u64,
}

impl PrekeyStore {
    /// Fresh store: one signed prekey and a full OPK batch.
    pub fn generate(identity: &IdentityKeyPair, now: DateTime<Utc>) -> Self {
        let mut next_id = now.timestamp_millis().max(0) as u64;
        let signed_prekey = new_signed_prekey(identity, &mut next_id, now);
        let mut store = Self {
            signed_prekey,
            one_time_prekeys: Vec::new(),
            next_id,
        };
        store.generate_additional_opks(OPK_BATCH_SIZE);
        store
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Grow the pool by `count` fresh OPKs; returns (id, public key)
    /// pairs for upload.
    pub fn generate_additional_opks(&mut self, count: usize) -> Vec<(u64, [u8; 32])> {
        let mut uploads = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.allocate_id();
            let (public, secret) = curve::generate_keypair();
            self.one_time_prekeys.push(OneTimePrekeyRecord {
                id,
                public_key: *public.as_bytes(),
                private_key: secret.to_bytes(),
            });
            uploads.push((id, *public.as_bytes()));
        }
        uploads
    }

    /// Destructive read of one OPK secret. Returns None when the id is
    /// unknown or already consumed; the secret is never returned twice.
    pub fn consume_opk(&mut self, id: u64) -> Option<StaticSecret> {
        let index = self.one_time_prekeys.iter().position(|opk| opk.id == id)?;
        let record = self.one_time_prekeys.remove(index);
        Some(StaticSecret::from(record.private_key))
    }

    /// Public halves of the current pool, for upload.
    pub fn opk_publics(&self) -> Vec<(u64, [u8; 32])> {
        self.one_time_prekeys
            .iter()
            .map(|opk| (opk.id, opk.public_key))
            .collect()
    }

    pub fn signed_prekey_secret(&self) -> StaticSecret {
        StaticSecret::from(self.signed_prekey.private_key)
    }

    pub fn signed_prekey_public(&self) -> X25519Public {
        X25519Public::from(self.signed_prekey.public_key)
    }

    pub fn needs_rotation(&self, now: DateTime<Utc>) -> bool {
        now - self.signed_prekey.created_at > Duration::days(SPK_MAX_AGE_DAYS)
    }

    /// Replace the signed prekey atomically, re-signing the new public
    /// half with the identity key.
    pub fn rotate_signed_prekey(&mut self, identity: &IdentityKeyPair, now: DateTime<Utc>) {
        let mut next_id = self.next_id;
        self.signed_prekey = new_signed_prekey(identity, &mut next_id, now);
        self.next_id = next_id;
    }

    // ── Persistence ──────────────────────────────────────────────────────

    pub async fn load(storage: &Arc<dyn SecureStorage>) -> Result<Option<Self>, StoreError> {
        match storage.get(PREKEY_STORE_KEY).await? {
            None => Ok(None),
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    pub async fn save(&self, storage: &Arc<dyn SecureStorage>) -> Result<(), StoreError> {
        let json = serde_json::to_string(self)?;
        storage.set(PREKEY_STORE_KEY, &json).await
    }

    pub async fn erase(storage: &Arc<dyn SecureStorage>) -> Result<(), StoreError> {
        storage.delete(PREKEY_STORE_KEY).await
    }
}

fn new_signed_prekey(
    identity: &IdentityKeyPair,
    next_id: &mut u64,
    now: DateTime<Utc>,
) -> SignedPrekeyRecord {
    let id = *next_id;
    *next_id += 1;
    let (public, secret) = curve::generate_keypair();
    let signature = identity.sign(public.as_bytes());
    SignedPrekeyRecord {
        id,
        public_key: *public.as_bytes(),
        private_key: secret.to_bytes(),
        signature,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::collections::HashSet;

    fn fresh_store() -> PrekeyStore {
        PrekeyStore::generate(&IdentityKeyPair::generate(), Utc::now())
    }

    #[test]
    fn generate_fills_the_initial_batch_with_unique_ids() {
        let store = fresh_store();
        assert_eq!(store.one_time_prekeys.len(), OPK_BATCH_SIZE);

        let mut ids: HashSet<u64> = store.one_time_prekeys.iter().map(|o| o.id).collect();
        ids.insert(store.signed_prekey.id);
        assert_eq!(ids.len(), OPK_BATCH_SIZE + 1);
    }

    #[test]
    fn opk_consumption_is_one_shot() {
        let mut store = fresh_store();
        let id = store.one_time_prekeys[0].id;

        let first = store.consume_opk(id);
        assert!(first.is_some());
        assert_eq!(store.one_time_prekeys.len(), OPK_BATCH_SIZE - 1);

        assert!(store.consume_opk(id).is_none());
        assert!(store.consume_opk(u64::MAX).is_none());
    }

    #[test]
    fn additional_opks_continue_the_id_space() {
        let mut store = fresh_store();
        let high_water = store.one_time_prekeys.iter().map(|o| o.id).max().unwrap();
        let fresh = store.generate_additional_opks(10);
        assert_eq!(fresh.len(), 10);
        assert!(fresh.iter().all(|(id, _)| *id > high_water));
    }

    #[test]
    fn rotation_replaces_the_spk_and_advances_ids() {
        let identity = IdentityKeyPair::generate();
        let mut store = PrekeyStore::generate(&identity, Utc::now());
        let old = store.signed_prekey.clone();

        assert!(!store.needs_rotation(old.created_at + Duration::days(6)));
        assert!(store.needs_rotation(old.created_at + Duration::days(8)));

        let later = old.created_at + Duration::days(8);
        store.rotate_signed_prekey(&identity, later);
        assert_ne!(store.signed_prekey.id, old.id);
        assert!(store.signed_prekey.id > old.id);
        assert_ne!(store.signed_prekey.public_key, old.public_key);
        assert_eq!(store.signed_prekey.created_at, later);

        // The fresh public half carries a valid identity signature
        curve::verify_signed_prekey(
            &identity.public().0,
            &store.signed_prekey.public_key,
            &store.signed_prekey.signature,
        )
        .unwrap();
    }

    #[tokio::test]
    async fn store_roundtrips_through_storage() {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());
        assert!(PrekeyStore::load(&storage).await.unwrap().is_none());

        let mut store = fresh_store();
        let consumed_id = store.one_time_prekeys[3].id;
        store.consume_opk(consumed_id);
        store.save(&storage).await.unwrap();

        let loaded = PrekeyStore::load(&storage).await.unwrap().unwrap();
        assert_eq!(loaded.one_time_prekeys.len(), OPK_BATCH_SIZE - 1);
        assert_eq!(loaded.signed_prekey.id, store.signed_prekey.id);
        assert!(loaded
            .one_time_prekeys
            .iter()
            .all(|opk| opk.id != consumed_id));

        // Account deletion wipes the record
        PrekeyStore::erase(&storage).await.unwrap();
        assert!(PrekeyStore::load(&storage).await.unwrap().is_none());
    }
}
