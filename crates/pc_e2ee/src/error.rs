use thiserror::Error;

#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("No session established with this peer and the payload carries no handshake")]
    NoSession,

    #[error("Received an initial handshake before local prekeys were generated")]
    NoPrekeyStore,

    #[error("Unsupported payload version {0}")]
    UnsupportedVersion(u8),

    #[error("Keys API request failed: {0}")]
    Api(String),

    #[error(transparent)]
    Crypto(#[from] pc_crypto::CryptoError),

    #[error(transparent)]
    Store(#[from] pc_store::StoreError),
}

impl E2eeError {
    /// True when the payload failed AEAD authentication, whatever layer
    /// surfaced it. Hosts render "[Encrypted message]" on this.
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(self, E2eeError::Crypto(pc_crypto::CryptoError::DecryptFailed))
    }
}
