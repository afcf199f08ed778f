//! Prekey lifecycle controller.
//!
//! Runs on every gateway "ready" event from an unlocked account:
//!   1. Load the local prekey store, generating it on first use.
//!   2. Ask the server for current counts.
//!   3. Upload the signed prekey when the server has none or the local
//!      one aged past the rotation window (rotating first).
//!   4. Replenish one-time prekeys when the server pool runs low.
//!
//! Re-running is always safe: signed-prekey uploads are idempotent per
//! id, and OPK ids are never reused.

use std::sync::Arc;

use chrono::Utc;

use pc_crypto::{codec, identity::IdentityKeyPair};
use pc_proto::keys::{OneTimePrekeyUpload, SignedPrekeyUpload, UploadKeysRequest};
use pc_store::{
    prekeys::{PrekeyStore, OPK_BATCH_SIZE},
    storage::SecureStorage,
};

use crate::{error::E2eeError, keys_api::KeysApi};

/// Server-side OPK count below which we top the pool back up.
pub const OPK_LOW_THRESHOLD: u64 = 20;

pub struct PrekeyLifecycle {
    storage: Arc<dyn SecureStorage>,
    keys: Arc<dyn KeysApi>,
}

impl PrekeyLifecycle {
    pub fn new(storage: Arc<dyn SecureStorage>, keys: Arc<dyn KeysApi>) -> Self {
        Self { storage, keys }
    }

    pub async fn on_session_ready(&self, identity: &IdentityKeyPair) -> Result<(), E2eeError> {
        let now = Utc::now();

        let (mut store, fresh) = match PrekeyStore::load(&self.storage).await? {
            Some(store) => (store, false),
            None => {
                let store = PrekeyStore::generate(identity, now);
                store.save(&self.storage).await?;
                tracing::info!(
                    target: "paracord_e2ee",
                    event = "prekey_store_created",
                    spk_id = store.signed_prekey.id,
                    opk_count = store.one_time_prekeys.len()
                );
                (store, true)
            }
        };

        let counts = self.keys.key_counts().await?;
        let mut request = UploadKeysRequest::default();

        if fresh || !counts.signed_prekey_uploaded || store.needs_rotation(now) {
            if store.needs_rotation(now) {
                store.rotate_signed_prekey(identity, now);
                store.save(&self.storage).await?;
                tracing::info!(
                    target: "paracord_e2ee",
                    event = "spk_rotated",
                    spk_id = store.signed_prekey.id
                );
            }
            request.signed_prekey = Some(SignedPrekeyUpload {
                id: store.signed_prekey.id,
                public_key: codec::to_b64(&store.signed_prekey.public_key),
                signature: codec::to_b64(&store.signed_prekey.signature),
            });
        }

        // A fresh store uploads its whole initial pool; afterwards the
        // pool only grows when the server runs low.
        let opk_uploads = if fresh {
            store.opk_publics()
        } else if counts.one_time_prekeys_remaining < OPK_LOW_THRESHOLD {
            let deficit = (OPK_BATCH_SIZE as u64 - counts.one_time_prekeys_remaining) as usize;
            let generated = store.generate_additional_opks(deficit);
            store.save(&self.storage).await?;
            generated
        } else {
            Vec::new()
        };
        if !opk_uploads.is_empty() {
            request.one_time_prekeys = Some(
                opk_uploads
                    .into_iter()
                    .map(|(id, public_key)| OneTimePrekeyUpload {
                        id,
                        public_key: codec::to_b64(&public_key),
                    })
                    .collect(),
            );
        }

        if request.is_empty() {
            return Ok(());
        }

        let response = self.keys.upload_keys(&request).await?;
        tracing::info!(
            target: "paracord_e2ee",
            event = "keys_uploaded",
            spk = request.signed_prekey.is_some(),
            opks_stored = response.one_time_prekeys_stored,
            opks_total = response.one_time_prekeys_total
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use pc_proto::keys::{KeyCountsResponse, PrekeyBundleResponse, UploadKeysResponse};
    use pc_store::storage::MemoryStorage;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    struct StubKeys {
        counts: Mutex<KeyCountsResponse>,
        uploads: Mutex<Vec<UploadKeysRequest>>,
    }

    impl StubKeys {
        fn new(remaining: u64, uploaded: bool) -> Arc<Self> {
            Arc::new(Self {
                counts: Mutex::new(KeyCountsResponse {
                    one_time_prekeys_remaining: remaining,
                    signed_prekey_uploaded: uploaded,
                }),
                uploads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl KeysApi for StubKeys {
        async fn fetch_prekey_bundle(
            &self,
            _user_id: &str,
        ) -> Result<Option<PrekeyBundleResponse>, E2eeError> {
            Ok(None)
        }

        async fn upload_keys(
            &self,
            request: &UploadKeysRequest,
        ) -> Result<UploadKeysResponse, E2eeError> {
            let mut counts = self.counts.lock().await;
            if request.signed_prekey.is_some() {
                counts.signed_prekey_uploaded = true;
            }
            let stored = request
                .one_time_prekeys
                .as_ref()
                .map(|v| v.len() as u64)
                .unwrap_or(0);
            counts.one_time_prekeys_remaining += stored;
            self.uploads.lock().await.push(request.clone());
            Ok(UploadKeysResponse {
                signed_prekey_id: request.signed_prekey.as_ref().map(|s| s.id),
                one_time_prekeys_stored: stored,
                one_time_prekeys_total: counts.one_time_prekeys_remaining,
            })
        }

        async fn key_counts(&self) -> Result<KeyCountsResponse, E2eeError> {
            Ok(self.counts.lock().await.clone())
        }
    }

    fn make_lifecycle(keys: &Arc<StubKeys>) -> (PrekeyLifecycle, Arc<dyn SecureStorage>) {
        let storage: Arc<dyn SecureStorage> = Arc::new(MemoryStorage::new());
        (
            PrekeyLifecycle::new(storage.clone(), keys.clone()),
            storage,
        )
    }

    #[tokio::test]
    async fn first_run_generates_and_uploads_everything() {
        let keys = StubKeys::new(0, false);
        let (lifecycle, storage) = make_lifecycle(&keys);
        let identity = IdentityKeyPair::generate();

        lifecycle.on_session_ready(&identity).await.unwrap();

        let uploads = keys.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].signed_prekey.is_some());
        assert_eq!(
            uploads[0].one_time_prekeys.as_ref().unwrap().len(),
            OPK_BATCH_SIZE
        );

        let store = PrekeyStore::load(&storage).await.unwrap().unwrap();
        assert_eq!(store.one_time_prekeys.len(), OPK_BATCH_SIZE);
    }

    #[tokio::test]
    async fn healthy_state_uploads_nothing() {
        let keys = StubKeys::new(0, false);
        let (lifecycle, _storage) = make_lifecycle(&keys);
        let identity = IdentityKeyPair::generate();

        lifecycle.on_session_ready(&identity).await.unwrap();
        lifecycle.on_session_ready(&identity).await.unwrap();

        // Second run found an uploaded SPK and a full server pool
        assert_eq!(keys.uploads.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn low_server_pool_is_replenished_with_fresh_ids() {
        let keys = StubKeys::new(0, false);
        let (lifecycle, _storage) = make_lifecycle(&keys);
        let identity = IdentityKeyPair::generate();
        lifecycle.on_session_ready(&identity).await.unwrap();

        // Simulate the server burning through most of the pool
        keys.counts.lock().await.one_time_prekeys_remaining = 10;
        lifecycle.on_session_ready(&identity).await.unwrap();

        let uploads = keys.uploads.lock().await;
        assert_eq!(uploads.len(), 2);
        let replenished = uploads[1].one_time_prekeys.as_ref().unwrap();
        assert_eq!(replenished.len(), OPK_BATCH_SIZE - 10);

        // Ids never repeat across uploads
        let mut seen = HashSet::new();
        for upload in uploads.iter() {
            for opk in upload.one_time_prekeys.as_ref().unwrap() {
                assert!(seen.insert(opk.id), "OPK id {} reused", opk.id);
            }
        }
    }

    #[tokio::test]
    async fn aged_signed_prekey_is_rotated_and_reuploaded() {
        let keys = StubKeys::new(0, false);
        let (lifecycle, storage) = make_lifecycle(&keys);
        let identity = IdentityKeyPair::generate();

        // Plant a store whose SPK is past the rotation window
        let old = PrekeyStore::generate(&identity, Utc::now() - Duration::days(8));
        let old_spk_id = old.signed_prekey.id;
        old.save(&storage).await.unwrap();
        keys.counts.lock().await.one_time_prekeys_remaining = OPK_BATCH_SIZE as u64;
        keys.counts.lock().await.signed_prekey_uploaded = true;

        lifecycle.on_session_ready(&identity).await.unwrap();

        let store = PrekeyStore::load(&storage).await.unwrap().unwrap();
        assert!(store.signed_prekey.id > old_spk_id);

        let uploads = keys.uploads.lock().await;
        assert_eq!(uploads.len(), 1);
        assert_eq!(
            uploads[0].signed_prekey.as_ref().unwrap().id,
            store.signed_prekey.id
        );
        assert!(uploads[0].one_time_prekeys.is_none());
    }
}
