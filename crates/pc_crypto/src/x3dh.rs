//! X3DH asynchronous key agreement.
//!
//! References:
//!   - Signal X3DH spec: <https://signal.org/docs/specifications/x3dh/>
//!
//! Protocol:
//!   Alice (initiator) fetches Bob's published key bundle:
//!     IK_B  (identity, Ed25519 public → converted to X25519)
//!     SPK_B (signed prekey, X25519) + IK_B signature over SPK_B
//!     OPK_B (optional one-time prekey, X25519)
//!
//!   Alice generates ONE ephemeral keypair EK_A and computes, in order:
//!     DH1 = DH(IK_A_x25519, SPK_B)
//!     DH2 = DH(EK_A,        IK_B_x25519)
//!     DH3 = DH(EK_A,        SPK_B)
//!     DH4 = DH(EK_A,        OPK_B)        [only if the bundle carried one]
//!
//!   SK = HKDF(salt = 0*32, ikm = DH1 || DH2 || DH3 [|| DH4],
//!             info = "paracord:signal:x3dh")
//!
//! Non-negotiable:
//!   - Alice MUST verify the SPK_B signature before computing any DH.
//!   - The DH concatenation order is contract.
//!   - Bob mirrors the same DH set from his secret halves and derives
//!     the identical SK, which seeds the Double Ratchet.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::{
    codec, curve,
    error::CryptoError,
    identity::{IdentityKeyPair, IdentityPublic},
    kdf,
};

/// Peer's signed prekey as served by the keys API, decoded.
#[derive(Debug, Clone)]
pub struct SignedPrekeyPublic {
    pub id: u64,
    pub public_key: [u8; 32],
    /// Ed25519 signature over `public_key`, made by the peer's identity.
    pub signature: [u8; 64],
}

/// Peer's one-time prekey, decoded.
#[derive(Debug, Clone)]
pub struct OneTimePrekeyPublic {
    pub id: u64,
    pub public_key: [u8; 32],
}

/// Everything the initiator needs from the peer to run X3DH.
#[derive(Debug, Clone)]
pub struct PrekeyBundle {
    /// Peer's Ed25519 identity public key.
    pub identity_key: [u8; 32],
    pub signed_prekey: SignedPrekeyPublic,
    pub one_time_prekey: Option<OneTimePrekeyPublic>,
}

/// Initiator output: the shared secret plus the material the first
/// message header must carry so the responder can mirror the handshake.
pub struct X3dhInitiation {
    pub shared_secret: [u8; 32],
    pub ephemeral_public: [u8; 32],
    pub used_opk_id: Option<u64>,
}

/// Alice initiates with Bob's bundle.
pub fn initiate(
    identity: &IdentityKeyPair,
    bundle: &PrekeyBundle,
) -> Result<X3dhInitiation, CryptoError> {
    curve::verify_signed_prekey(
        &bundle.identity_key,
        &bundle.signed_prekey.public_key,
        &bundle.signed_prekey.signature,
    )?;

    let ik_a = identity.to_x25519_secret();
    let ik_b = curve::ed25519_public_to_x25519(&bundle.identity_key)?;
    let spk_b = X25519Public::from(bundle.signed_prekey.public_key);

    let (ek_public, ek_secret) = curve::generate_keypair();

    let dh1 = curve::dh(&ik_a, &spk_b);
    let dh2 = curve::dh(&ek_secret, &ik_b);
    let dh3 = curve::dh(&ek_secret, &spk_b);
    let mut ikm = codec::concat(&[&dh1, &dh2, &dh3]);

    let mut used_opk_id = None;
    if let Some(ref opk) = bundle.one_time_prekey {
        let dh4 = curve::dh(&ek_secret, &X25519Public::from(opk.public_key));
        ikm.extend_from_slice(&dh4);
        used_opk_id = Some(opk.id);
    }

    let shared_secret = kdf::x3dh_kdf(&ikm)?;
    ikm.zeroize();

    Ok(X3dhInitiation {
        shared_secret,
        ephemeral_public: *ek_public.as_bytes(),
        used_opk_id,
    })
}

/// Bob mirrors the handshake from an incoming init header.
///
/// `spk_secret` — Bob's signed prekey secret
/// `opk_secret` — the consumed one-time prekey secret, if the init used one
/// `peer_identity` — Alice's Ed25519 identity public key
/// `peer_ephemeral` — Alice's X3DH ephemeral public key
pub fn respond(
    identity: &IdentityKeyPair,
    spk_secret: &StaticSecret,
    opk_secret: Option<&StaticSecret>,
    peer_identity: &IdentityPublic,
    peer_ephemeral: &[u8; 32],
) -> Result<[u8; 32], CryptoError> {
    let ik_a = peer_identity.to_x25519()?;
    let ik_b = identity.to_x25519_secret();
    let ek_a = X25519Public::from(*peer_ephemeral);

    // Same order as the initiator (each DH is commutative):
    //   DH1 = IK_A × SPK_B, DH2 = EK_A × IK_B, DH3 = EK_A × SPK_B
    let dh1 = curve::dh(spk_secret, &ik_a);
    let dh2 = curve::dh(&ik_b, &ek_a);
    let dh3 = curve::dh(spk_secret, &ek_a);
    let mut ikm = codec::concat(&[&dh1, &dh2, &dh3]);

    if let Some(opk) = opk_secret {
        let dh4 = curve::dh(opk, &ek_a);
        ikm.extend_from_slice(&dh4);
    }

    let shared_secret = kdf::x3dh_kdf(&ikm)?;
    ikm.zeroize();

    Ok(shared_secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_for(
        identity: &IdentityKeyPair,
        opk: Option<(u64, &X25519Public)>,
    ) -> (PrekeyBundle, StaticSecret) {
        let (spk_public, spk_secret) = curve::generate_keypair();
        let signature = identity.sign(spk_public.as_bytes());
        let bundle = PrekeyBundle {
            identity_key: identity.public().0,
            signed_prekey: SignedPrekeyPublic {
                id: 1,
                public_key: *spk_public.as_bytes(),
                signature,
            },
            one_time_prekey: opk.map(|(id, public)| OneTimePrekeyPublic {
                id,
                public_key: *public.as_bytes(),
            }),
        };
        (bundle, spk_secret)
    }

    #[test]
    fn initiator_and_responder_agree_without_opk() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let (bundle, bob_spk_secret) = bundle_for(&bob, None);

        let init = initiate(&alice, &bundle).unwrap();
        assert!(init.used_opk_id.is_none());

        let bob_sk = respond(
            &bob,
            &bob_spk_secret,
            None,
            alice.public(),
            &init.ephemeral_public,
        )
        .unwrap();

        assert_eq!(init.shared_secret, bob_sk);
    }

    #[test]
    fn initiator_and_responder_agree_with_opk() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let (opk_public, opk_secret) = curve::generate_keypair();
        let (bundle, bob_spk_secret) = bundle_for(&bob, Some((100, &opk_public)));

        let init = initiate(&alice, &bundle).unwrap();
        assert_eq!(init.used_opk_id, Some(100));

        let bob_sk = respond(
            &bob,
            &bob_spk_secret,
            Some(&opk_secret),
            alice.public(),
            &init.ephemeral_public,
        )
        .unwrap();

        assert_eq!(init.shared_secret, bob_sk);
    }

    #[test]
    fn opk_changes_the_shared_secret() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let (opk_public, _opk_secret) = curve::generate_keypair();
        let (mut bundle, bob_spk_secret) = bundle_for(&bob, Some((7, &opk_public)));

        let with_opk = initiate(&alice, &bundle).unwrap();
        bundle.one_time_prekey = None;
        let without_opk = initiate(&alice, &bundle).unwrap();

        // Different ephemerals anyway, but the responder mirrors must
        // disagree if the OPK leg is dropped on one side only.
        let mirrored = respond(
            &bob,
            &bob_spk_secret,
            None,
            alice.public(),
            &with_opk.ephemeral_public,
        )
        .unwrap();
        assert_ne!(with_opk.shared_secret, mirrored);
        assert_ne!(with_opk.shared_secret, without_opk.shared_secret);
    }

    #[test]
    fn rejects_spk_signed_by_wrong_identity() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let evil = IdentityKeyPair::generate();

        let (spk_public, _spk_secret) = curve::generate_keypair();
        let bundle = PrekeyBundle {
            identity_key: bob.public().0,
            signed_prekey: SignedPrekeyPublic {
                id: 1,
                public_key: *spk_public.as_bytes(),
                signature: evil.sign(spk_public.as_bytes()),
            },
            one_time_prekey: None,
        };

        assert!(matches!(
            initiate(&alice, &bundle),
            Err(CryptoError::BadPrekeyBundle)
        ));
    }
}
