//! Versioned DM encryption router.
//!
//! Encrypt decision, in order:
//!   1. Existing session → Signal (v2).
//!   2. Peer bundle fetchable → X3DH initiate, new session, v2 with the
//!      handshake fields on the first header.
//!   3. Otherwise → legacy static-ECDH AEAD (v1). A deterministic
//!      channel-scoped key with no forward secrecy, kept only for peers
//!      that never published prekeys.
//!
//! Decrypt mirrors it: v1 payloads (or headerless v2) take the legacy
//! path; v2 parses the header, bootstraps the responder side on a
//! handshake header, and retries the bootstrap exactly once when an
//! existing session fails to authenticate an initial message.
//!
//! Operations on one peer pair are serialised behind a per-pair mutex;
//! the updated session is persisted before the payload is returned.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use pc_crypto::{
    aead, codec, curve,
    error::CryptoError,
    identity::{IdentityKeyPair, IdentityPublic},
    ratchet::{HandshakeFields, RatchetHeader, RatchetState},
    x3dh,
};
use pc_proto::envelope::{DmEnvelope, VERSION_LEGACY, VERSION_SIGNAL};
use pc_store::{
    prekeys::PrekeyStore,
    session::{session_key, PendingHandshake, SessionRecord, SessionStore},
    storage::SecureStorage,
};

use crate::{error::E2eeError, keys_api::KeysApi};

const V1_KEY_CONTEXT: &[u8] = b"paracord:dm-e2ee:v1:";

pub struct E2eeEngine {
    storage: Arc<dyn SecureStorage>,
    sessions: SessionStore,
    keys: Arc<dyn KeysApi>,
    pair_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl E2eeEngine {
    pub fn new(storage: Arc<dyn SecureStorage>, keys: Arc<dyn KeysApi>) -> Self {
        Self {
            sessions: SessionStore::new(storage.clone()),
            storage,
            keys,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Serialise all work on one peer pair. Concurrent operations on
    /// different pairs proceed independently.
    async fn lock_pair(&self, a: &IdentityPublic, b: &IdentityPublic) -> OwnedMutexGuard<()> {
        let key = session_key(&a.to_hex(), &b.to_hex());
        let lock = {
            let mut map = self.pair_locks.lock().await;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    pub async fn encrypt_dm(
        &self,
        channel_id: &str,
        plaintext: &[u8],
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
        peer_user_id: Option<&str>,
    ) -> Result<DmEnvelope, E2eeError> {
        let me = *identity.public();
        let _guard = self.lock_pair(&me, peer).await;

        if let Some(record) = self.sessions.load(&me, peer).await? {
            return self.encrypt_with_session(identity, peer, record, plaintext).await;
        }

        if let Some(user_id) = peer_user_id {
            if let Some(wire_bundle) = self.keys.fetch_prekey_bundle(user_id).await? {
                let bundle = wire_bundle.decode()?;
                let initiation = x3dh::initiate(identity, &bundle)?;
                let ratchet = RatchetState::initialize_initiator(
                    &initiation.shared_secret,
                    &bundle.signed_prekey.public_key,
                )?;
                let record = SessionRecord {
                    ratchet,
                    pending_handshake: Some(PendingHandshake {
                        ik: me.to_b64(),
                        ek: codec::to_b64(&initiation.ephemeral_public),
                        opk_id: initiation.used_opk_id,
                    }),
                };
                tracing::info!(
                    target: "paracord_e2ee",
                    event = "session_initiated",
                    peer = %peer.log_id(),
                    used_opk = initiation.used_opk_id.is_some()
                );
                return self.encrypt_with_session(identity, peer, record, plaintext).await;
            }
            tracing::info!(
                target: "paracord_e2ee",
                event = "no_bundle_v1_fallback",
                peer = %peer.log_id()
            );
        }

        self.encrypt_v1(channel_id, plaintext, identity, peer)
    }

    async fn encrypt_with_session(
        &self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
        record: SessionRecord,
        plaintext: &[u8],
    ) -> Result<DmEnvelope, E2eeError> {
        let handshake = record.pending_handshake.as_ref().map(|p| HandshakeFields {
            ik: p.ik.clone(),
            ek: p.ek.clone(),
            opk_id: p.opk_id,
        });
        let (message, next) = record.ratchet.encrypt(plaintext, handshake.as_ref())?;

        // The handshake rides on exactly one ciphertext: the one just
        // produced. Cleared together with the state update.
        let next_record = SessionRecord {
            ratchet: next,
            pending_handshake: None,
        };
        self.sessions.save(identity.public(), peer, &next_record).await?;

        Ok(DmEnvelope {
            version: VERSION_SIGNAL,
            nonce: codec::to_b64(&message.nonce),
            ciphertext: codec::to_b64(&message.ciphertext),
            header: Some(message.header.canonical_string()?),
        })
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    pub async fn decrypt_dm(
        &self,
        channel_id: &str,
        payload: &DmEnvelope,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
    ) -> Result<Vec<u8>, E2eeError> {
        match payload.version {
            VERSION_LEGACY => self.decrypt_v1(channel_id, payload, identity, peer),
            VERSION_SIGNAL => match payload.header.as_deref() {
                Some(header) => self.decrypt_v2(header, payload, identity, peer).await,
                // Headerless payloads route to the legacy path whatever
                // the version claims.
                None => self.decrypt_v1(channel_id, payload, identity, peer),
            },
            version => Err(E2eeError::UnsupportedVersion(version)),
        }
    }

    async fn decrypt_v2(
        &self,
        header_json: &str,
        payload: &DmEnvelope,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
    ) -> Result<Vec<u8>, E2eeError> {
        let header = RatchetHeader::parse(header_json)?;
        let nonce = decode_nonce(&payload.nonce)?;
        let ciphertext = codec::from_b64(&payload.ciphertext)?;

        let me = *identity.public();
        let _guard = self.lock_pair(&me, peer).await;

        let has_handshake = header.has_handshake();
        let (record, had_session) = match self.sessions.load(&me, peer).await? {
            Some(record) => (record, true),
            None if has_handshake => (
                self.bootstrap_responder(identity, peer, &header).await?,
                false,
            ),
            None => return Err(E2eeError::NoSession),
        };

        match record.ratchet.decrypt(&header, &nonce, &ciphertext) {
            Ok((plaintext, next)) => {
                let next_record = SessionRecord {
                    ratchet: next,
                    pending_handshake: record.pending_handshake.clone(),
                };
                self.sessions.save(&me, peer, &next_record).await?;
                Ok(plaintext)
            }
            Err(CryptoError::DecryptFailed) if has_handshake && had_session => {
                // An initial message that our existing session cannot
                // authenticate: the peer restarted the conversation.
                // Drop the stale session and bootstrap once from the
                // handshake header; a second failure escalates.
                tracing::warn!(
                    target: "paracord_e2ee",
                    event = "stale_session_rebootstrap",
                    peer = %peer.log_id()
                );
                self.sessions.delete(&me, peer).await?;
                let record = self.bootstrap_responder(identity, peer, &header).await?;
                let (plaintext, next) = record.ratchet.decrypt(&header, &nonce, &ciphertext)?;
                self.sessions
                    .save(
                        &me,
                        peer,
                        &SessionRecord {
                            ratchet: next,
                            pending_handshake: None,
                        },
                    )
                    .await?;
                Ok(plaintext)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Complete the responder side of X3DH from a handshake header and
    /// initialise the ratchet. The consumed-OPK set is persisted before
    /// any decrypt attempt so a replayed id can never be served twice.
    async fn bootstrap_responder(
        &self,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
        header: &RatchetHeader,
    ) -> Result<SessionRecord, E2eeError> {
        let mut prekeys = PrekeyStore::load(&self.storage)
            .await?
            .ok_or(E2eeError::NoPrekeyStore)?;

        let ik = header.ik.as_ref().ok_or(E2eeError::NoSession)?;
        let ek = header.ek.as_ref().ok_or(E2eeError::NoSession)?;
        let initiator = IdentityPublic::from_b64(ik)?;
        if initiator != *peer {
            tracing::warn!(
                target: "paracord_e2ee",
                event = "handshake_identity_mismatch",
                peer = %peer.log_id(),
                header_ik = %initiator.log_id()
            );
        }
        let ephemeral = codec::to_array32(&codec::from_b64(ek)?)?;

        let opk_secret = match header.opk_id {
            Some(opk_id) => {
                let secret = prekeys.consume_opk(opk_id);
                prekeys.save(&self.storage).await?;
                if secret.is_none() {
                    tracing::warn!(
                        target: "paracord_e2ee",
                        event = "opk_already_consumed",
                        opk_id
                    );
                }
                secret
            }
            None => None,
        };

        let spk_secret = prekeys.signed_prekey_secret();
        let shared_secret = x3dh::respond(
            identity,
            &spk_secret,
            opk_secret.as_ref(),
            &initiator,
            &ephemeral,
        )?;

        tracing::info!(
            target: "paracord_e2ee",
            event = "session_bootstrapped",
            peer = %peer.log_id(),
            used_opk = opk_secret.is_some()
        );

        Ok(SessionRecord {
            ratchet: RatchetState::initialize_responder(&shared_secret, &spk_secret),
            pending_handshake: None,
        })
    }

    // ── Legacy v1 path ───────────────────────────────────────────────────

    /// v1 key: SHA-256 over a fixed context, the channel id, and the
    /// static identity-to-identity DH. Deterministic per channel; both
    /// peers derive it independently.
    fn v1_key(
        channel_id: &str,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
    ) -> Result<[u8; 32], E2eeError> {
        let dh = curve::dh(&identity.to_x25519_secret(), &peer.to_x25519()?);
        let mut hasher = Sha256::new();
        hasher.update(V1_KEY_CONTEXT);
        hasher.update(channel_id.as_bytes());
        hasher.update(dh);
        Ok(hasher.finalize().into())
    }

    fn encrypt_v1(
        &self,
        channel_id: &str,
        plaintext: &[u8],
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
    ) -> Result<DmEnvelope, E2eeError> {
        let key = Self::v1_key(channel_id, identity, peer)?;
        let nonce = aead::generate_nonce();
        let ciphertext = aead::encrypt(&key, &nonce, plaintext, &[])?;
        Ok(DmEnvelope {
            version: VERSION_LEGACY,
            nonce: codec::to_b64(&nonce),
            ciphertext: codec::to_b64(&ciphertext),
            header: None,
        })
    }

    fn decrypt_v1(
        &self,
        channel_id: &str,
        payload: &DmEnvelope,
        identity: &IdentityKeyPair,
        peer: &IdentityPublic,
    ) -> Result<Vec<u8>, E2eeError> {
        let key = Self::v1_key(channel_id, identity, peer)?;
        let nonce = decode_nonce(&payload.nonce)?;
        let ciphertext = codec::from_b64(&payload.ciphertext)?;
        Ok(aead::decrypt(&key, &nonce, &ciphertext, &[])?)
    }
}

fn decode_nonce(b64: &str) -> Result<[u8; aead::NONCE_LEN], E2eeError> {
    let bytes = codec::from_b64(b64)?;
    bytes.as_slice().try_into().map_err(|_| {
        E2eeError::Crypto(CryptoError::InvalidKey(format!(
            "expected {}-byte nonce, got {}",
            aead::NONCE_LEN,
            bytes.len()
        )))
    })
}
