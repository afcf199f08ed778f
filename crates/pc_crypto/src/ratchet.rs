//! Double Ratchet state machine.
//!
//! References:
//!   - Signal Double Ratchet spec: <https://signal.org/docs/specifications/doubleratchet/>
//!
//! State separation (non-negotiable):
//!   RK  — root key (updated on every DH ratchet step)
//!   CKs — sending chain key (advanced per message sent)
//!   CKr — receiving chain key (advanced per message received)
//!   MK  — message key (derived from a chain key, used once, then gone)
//!
//! DH ratchet: whenever a message arrives under a ratchet public key we
//! have not seen, the old receiving chain is closed out, the root key is
//! mixed with DH(our key, their new key), and a fresh sending keypair is
//! generated and mixed in turn. Forward secrecy comes from deleting old
//! chain keys; post-compromise security from the per-turn DH steps.
//!
//! The state is a VALUE: `encrypt` and `decrypt` return the successor
//! state instead of mutating in place, so a failed operation can never
//! leak a half-advanced ratchet into persistence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{aead, codec, curve, error::CryptoError, kdf};

/// Budget for skipped message keys derived within one decrypt call.
/// Bounds memory and stops counter-inflation DoS.
pub const MAX_SKIP: u64 = 256;

// ── Message header ───────────────────────────────────────────────────────────

/// Sent unencrypted with every ciphertext; authenticated as AEAD AAD.
///
/// `ik`, `ek` and `opk_id` appear only on the first ciphertext of a
/// session, carrying the X3DH material the responder needs to bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current ratchet public key, base64.
    pub dh: String,
    /// Length of the sender's previous sending chain.
    pub pn: u64,
    /// Message number in the current sending chain.
    pub n: u64,
    /// Initiator's Ed25519 identity public key, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ik: Option<String>,
    /// Initiator's X3DH ephemeral public key, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ek: Option<String>,
    /// One-time prekey id consumed by the handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opk_id: Option<u64>,
}

impl RatchetHeader {
    /// Canonical JSON bytes: UTF-8, keys in declaration order
    /// (dh, pn, n, ik, ek, opk_id), absent options omitted, no
    /// insignificant whitespace. These exact bytes are the AEAD AAD and
    /// the envelope `header` string; any deviation breaks interop.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn canonical_string(&self) -> Result<String, CryptoError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        Ok(serde_json::from_str(s)?)
    }

    /// True when the header carries the X3DH bootstrap material.
    pub fn has_handshake(&self) -> bool {
        self.ik.is_some() && self.ek.is_some()
    }
}

/// X3DH material folded into the first message header. The header must
/// carry these fields before encryption so the AAD binds them.
#[derive(Debug, Clone)]
pub struct HandshakeFields {
    /// Initiator identity public key, base64.
    pub ik: String,
    /// Initiator ephemeral public key, base64.
    pub ek: String,
    pub opk_id: Option<u64>,
}

/// One encrypted message as produced by the sending ratchet.
pub struct RatchetMessage {
    pub header: RatchetHeader,
    pub nonce: [u8; aead::NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

// ── Session state ────────────────────────────────────────────────────────────

/// Complete Double Ratchet session state for one peer pair.
/// Persisted (as JSON, binary fields base64) through the session store.
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetState {
    /// Our current ratchet secret. Regenerated on each DH step.
    #[serde(with = "codec::b64_array")]
    dhs_secret: [u8; 32],
    /// Our current ratchet public key.
    #[serde(with = "codec::b64_array")]
    dhs_public: [u8; 32],
    /// Peer's current ratchet public key. None for a responder that has
    /// not yet received the initiator's first message.
    #[serde(with = "codec::b64_array_opt")]
    dhr: Option<[u8; 32]>,
    /// Root key.
    #[serde(with = "codec::b64_array")]
    rk: [u8; 32],
    /// Sending chain key. None until the first DH ratchet on the
    /// responder side.
    #[serde(with = "codec::b64_array_opt")]
    cks: Option<[u8; 32]>,
    /// Receiving chain key.
    #[serde(with = "codec::b64_array_opt")]
    ckr: Option<[u8; 32]>,
    /// Message counters: current sending chain, current receiving chain,
    /// previous sending chain length.
    ns: u64,
    nr: u64,
    pn: u64,
    /// Cached keys for out-of-order messages: (ratchet key hex, n) → MK.
    /// Reads are destructive; entries are bounded by MAX_SKIP.
    #[serde(with = "skipped_map")]
    mkskipped: BTreeMap<(String, u64), [u8; 32]>,
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.dhs_secret.zeroize();
        self.rk.zeroize();
        if let Some(ref mut ck) = self.cks {
            ck.zeroize();
        }
        if let Some(ref mut ck) = self.ckr {
            ck.zeroize();
        }
        for (_, mk) in self.mkskipped.iter_mut() {
            mk.zeroize();
        }
    }
}

impl RatchetState {
    /// Initiator state (Alice): fresh ratchet keypair, immediate root-key
    /// step against the responder's signed prekey.
    pub fn initialize_initiator(
        shared_secret: &[u8; 32],
        peer_spk_public: &[u8; 32],
    ) -> Result<Self, CryptoError> {
        let (dhs_public, dhs_secret) = curve::generate_keypair();
        let dh_out = curve::dh(&dhs_secret, &X25519Public::from(*peer_spk_public));
        let (rk, cks) = kdf::kdf_rk(shared_secret, &dh_out)?;
        Ok(Self {
            dhs_secret: dhs_secret.to_bytes(),
            dhs_public: *dhs_public.as_bytes(),
            dhr: Some(*peer_spk_public),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mkskipped: BTreeMap::new(),
        })
    }

    /// Responder state (Bob): the signed prekey doubles as the first
    /// ratchet keypair; no chains exist until the initiator's first
    /// message triggers a DH ratchet.
    pub fn initialize_responder(shared_secret: &[u8; 32], spk_secret: &StaticSecret) -> Self {
        let spk_public = X25519Public::from(spk_secret);
        Self {
            dhs_secret: spk_secret.to_bytes(),
            dhs_public: *spk_public.as_bytes(),
            dhr: None,
            rk: *shared_secret,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mkskipped: BTreeMap::new(),
        }
    }

    /// Our current ratchet public key.
    pub fn sending_ratchet_public(&self) -> [u8; 32] {
        self.dhs_public
    }

    /// Peer's last seen ratchet public key.
    pub fn remote_ratchet_public(&self) -> Option<[u8; 32]> {
        self.dhr
    }

    /// Number of cached skipped message keys.
    pub fn skipped_len(&self) -> usize {
        self.mkskipped.len()
    }

    // ── Encrypt ──────────────────────────────────────────────────────────

    /// Encrypt one message. `handshake` is present only for the first
    /// ciphertext of a session; its fields ride in the header and are
    /// bound by the AAD.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        handshake: Option<&HandshakeFields>,
    ) -> Result<(RatchetMessage, RatchetState), CryptoError> {
        let mut next = self.clone();
        let cks = next.cks.ok_or(CryptoError::SendingChainNotInitialized)?;
        let (new_ck, mk) = kdf::kdf_ck(&cks)?;

        let header = RatchetHeader {
            dh: codec::to_b64(&next.dhs_public),
            pn: next.pn,
            n: next.ns,
            ik: handshake.map(|h| h.ik.clone()),
            ek: handshake.map(|h| h.ek.clone()),
            opk_id: handshake.and_then(|h| h.opk_id),
        };

        next.cks = Some(new_ck);
        next.ns += 1;

        let nonce = aead::generate_nonce();
        let aad = header.canonical_bytes()?;
        let ciphertext = aead::encrypt(&mk, &nonce, plaintext, &aad)?;

        Ok((
            RatchetMessage {
                header,
                nonce,
                ciphertext,
            },
            next,
        ))
    }

    // ── Decrypt ──────────────────────────────────────────────────────────

    /// Decrypt one message. Handles, in order: a cached skipped key for
    /// this exact (ratchet key, n); a DH ratchet step when the sender's
    /// ratchet key changed; skipping ahead within the current chain.
    pub fn decrypt(
        &self,
        header: &RatchetHeader,
        nonce: &[u8; aead::NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<(Vec<u8>, RatchetState), CryptoError> {
        let mut next = self.clone();
        let peer_dh = codec::to_array32(&codec::from_b64(&header.dh)?)?;
        let aad = header.canonical_bytes()?;

        // Out-of-order delivery: consume the cached key and stop.
        let cache_key = (codec::to_hex(&peer_dh), header.n);
        if let Some(mut mk) = next.mkskipped.remove(&cache_key) {
            let plaintext = aead::decrypt(&mk, nonce, ciphertext, &aad)?;
            mk.zeroize();
            return Ok((plaintext, next));
        }

        let mut skip_budget = MAX_SKIP;
        if next.dhr != Some(peer_dh) {
            // Close out the old receiving chain, caching its tail keys.
            if next.ckr.is_some() {
                next.skip_to(header.pn, &mut skip_budget)?;
            }
            next.dh_ratchet(&peer_dh)?;
        }
        next.skip_to(header.n, &mut skip_budget)?;

        let ckr = next
            .ckr
            .as_ref()
            .ok_or_else(|| CryptoError::RatchetStep("receiving chain not initialised".into()))?;
        let (new_ck, mk) = kdf::kdf_ck(ckr)?;
        let plaintext = aead::decrypt(&mk, nonce, ciphertext, &aad)?;
        next.ckr = Some(new_ck);
        next.nr += 1;

        Ok((plaintext, next))
    }

    // ── Internal ─────────────────────────────────────────────────────────

    /// Advance the receiving chain to `until`, caching each derived
    /// message key under the current remote ratchet key.
    fn skip_to(&mut self, until: u64, budget: &mut u64) -> Result<(), CryptoError> {
        if until <= self.nr {
            return Ok(());
        }
        let Some(ck_start) = self.ckr else {
            return Ok(());
        };
        let gap = until - self.nr;
        if gap > *budget {
            return Err(CryptoError::TooManySkipped {
                gap,
                max: MAX_SKIP,
            });
        }
        *budget -= gap;

        let dh_hex = self.dhr.map(|k| codec::to_hex(&k)).unwrap_or_default();
        let mut ck = ck_start;
        while self.nr < until {
            let (new_ck, mk) = kdf::kdf_ck(&ck)?;
            self.mkskipped.insert((dh_hex.clone(), self.nr), mk);
            ck = new_ck;
            self.nr += 1;
        }
        self.ckr = Some(ck);

        // Keep the cache bounded: evict the oldest entries past MAX_SKIP
        while self.mkskipped.len() > MAX_SKIP as usize {
            if let Some(key) = self.mkskipped.keys().next().cloned() {
                if let Some(mut mk) = self.mkskipped.remove(&key) {
                    mk.zeroize();
                }
            }
        }
        Ok(())
    }

    /// Full DH ratchet turn for a newly seen remote ratchet key:
    /// receiving step with our current keypair, then a fresh sending
    /// keypair and sending step.
    fn dh_ratchet(&mut self, peer_dh: &[u8; 32]) -> Result<(), CryptoError> {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.dhr = Some(*peer_dh);

        let peer_public = X25519Public::from(*peer_dh);
        let dh_recv = curve::dh(&StaticSecret::from(self.dhs_secret), &peer_public);
        let (rk, ckr) = kdf::kdf_rk(&self.rk, &dh_recv)?;

        let (dhs_public, dhs_secret) = curve::generate_keypair();
        let dh_send = curve::dh(&dhs_secret, &peer_public);
        let (rk, cks) = kdf::kdf_rk(&rk, &dh_send)?;

        self.rk = rk;
        self.ckr = Some(ckr);
        self.cks = Some(cks);
        self.dhs_secret = dhs_secret.to_bytes();
        self.dhs_public = *dhs_public.as_bytes();
        Ok(())
    }
}

// ── Serde helper for the skipped-key map ─────────────────────────────────────

/// `(dh_hex, n)` tuples flatten to `"dh_hex:n"` strings in persisted
/// JSON; message keys are base64.
mod skipped_map {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use crate::codec;

    pub fn serialize<S>(
        map: &BTreeMap<(String, u64), [u8; 32]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let flat: BTreeMap<String, String> = map
            .iter()
            .map(|((dh, n), mk)| (format!("{dh}:{n}"), codec::to_b64(mk)))
            .collect();
        serde::Serialize::serialize(&flat, serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<(String, u64), [u8; 32]>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let flat: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, value) in flat {
            let (dh, n) = key
                .rsplit_once(':')
                .ok_or_else(|| serde::de::Error::custom("malformed skipped-key entry"))?;
            let n: u64 = n.parse().map_err(serde::de::Error::custom)?;
            let mk_bytes = codec::from_b64(&value).map_err(serde::de::Error::custom)?;
            let mk = codec::to_array32(&mk_bytes).map_err(serde::de::Error::custom)?;
            map.insert((dh.to_string(), n), mk);
        }
        Ok(map)
    }
}
