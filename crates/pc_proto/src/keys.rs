//! Keys-API bodies shared with the server.
//!
//! Endpoints (consumed by the prekey controller and the envelope router):
//!   PUT /users/@me/keys        — upload signed prekey and/or OPK batch
//!   GET /users/@me/keys/count  — remaining server-side OPK count
//!   GET /users/{id}/keys       — peer prekey bundle
//!
//! Public keys and signatures are padded base64; the identity key is
//! lowercase hex. Both encodings are contract.

use serde::{Deserialize, Serialize};

use pc_crypto::{
    codec,
    error::CryptoError,
    x3dh::{OneTimePrekeyPublic, PrekeyBundle, SignedPrekeyPublic},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPrekeyUpload {
    pub id: u64,
    /// X25519 public key, base64.
    pub public_key: String,
    /// Ed25519 signature over the raw public key bytes, base64.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePrekeyUpload {
    pub id: u64,
    /// X25519 public key, base64.
    pub public_key: String,
}

/// PUT /users/@me/keys. Both fields optional; uploading the same signed
/// prekey id twice is safe on the server side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadKeysRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_prekey: Option<SignedPrekeyUpload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekeys: Option<Vec<OneTimePrekeyUpload>>,
}

impl UploadKeysRequest {
    pub fn is_empty(&self) -> bool {
        self.signed_prekey.is_none() && self.one_time_prekeys.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadKeysResponse {
    #[serde(default)]
    pub signed_prekey_id: Option<u64>,
    #[serde(default)]
    pub one_time_prekeys_stored: u64,
    #[serde(default)]
    pub one_time_prekeys_total: u64,
}

/// GET /users/@me/keys/count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyCountsResponse {
    pub one_time_prekeys_remaining: u64,
    pub signed_prekey_uploaded: bool,
}

/// GET /users/{id}/keys — peer prekey bundle as served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyBundleResponse {
    /// Ed25519 identity public key, lowercase hex.
    pub identity_key: String,
    pub signed_prekey: SignedPrekeyUpload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_prekey: Option<OneTimePrekeyUpload>,
}

impl PrekeyBundleResponse {
    /// Decode the wire bundle into the typed form the X3DH engine takes.
    pub fn decode(&self) -> Result<PrekeyBundle, CryptoError> {
        let identity_key = codec::to_array32(&codec::from_hex(&self.identity_key)?)?;
        let signed_prekey = SignedPrekeyPublic {
            id: self.signed_prekey.id,
            public_key: codec::to_array32(&codec::from_b64(&self.signed_prekey.public_key)?)?,
            signature: codec::to_array64(&codec::from_b64(&self.signed_prekey.signature)?)?,
        };
        let one_time_prekey = match &self.one_time_prekey {
            None => None,
            Some(opk) => Some(OneTimePrekeyPublic {
                id: opk.id,
                public_key: codec::to_array32(&codec::from_b64(&opk.public_key)?)?,
            }),
        };
        Ok(PrekeyBundle {
            identity_key,
            signed_prekey,
            one_time_prekey,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pc_crypto::{curve, identity::IdentityKeyPair};

    fn wire_bundle(identity: &IdentityKeyPair, with_opk: bool) -> PrekeyBundleResponse {
        let (spk_public, _spk_secret) = curve::generate_keypair();
        let signature = identity.sign(spk_public.as_bytes());
        PrekeyBundleResponse {
            identity_key: identity.public().to_hex(),
            signed_prekey: SignedPrekeyUpload {
                id: 11,
                public_key: codec::to_b64(spk_public.as_bytes()),
                signature: codec::to_b64(&signature),
            },
            one_time_prekey: with_opk.then(|| {
                let (opk_public, _) = curve::generate_keypair();
                OneTimePrekeyUpload {
                    id: 12,
                    public_key: codec::to_b64(opk_public.as_bytes()),
                }
            }),
        }
    }

    #[test]
    fn bundle_decodes_to_typed_form() {
        let identity = IdentityKeyPair::generate();
        let wire = wire_bundle(&identity, true);
        let bundle = wire.decode().unwrap();
        assert_eq!(bundle.identity_key, identity.public().0);
        assert_eq!(bundle.signed_prekey.id, 11);
        assert_eq!(bundle.one_time_prekey.as_ref().unwrap().id, 12);
    }

    #[test]
    fn bundle_without_opk_decodes() {
        let identity = IdentityKeyPair::generate();
        let bundle = wire_bundle(&identity, false).decode().unwrap();
        assert!(bundle.one_time_prekey.is_none());
    }

    #[test]
    fn truncated_key_is_rejected() {
        let identity = IdentityKeyPair::generate();
        let mut wire = wire_bundle(&identity, false);
        wire.signed_prekey.public_key = codec::to_b64(&[0u8; 16]);
        assert!(wire.decode().is_err());
    }

    #[test]
    fn empty_upload_request_serialises_to_empty_object() {
        let req = UploadKeysRequest::default();
        assert!(req.is_empty());
        assert_eq!(serde_json::to_string(&req).unwrap(), "{}");
    }
}
