use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Signed prekey signature failed verification")]
    BadPrekeyBundle,

    #[error("Sending chain not initialised: responder must receive before sending")]
    SendingChainNotInitialized,

    #[error("Too many skipped message keys ({gap} exceeds budget {max})")]
    TooManySkipped { gap: u64, max: u64 },

    #[error("AEAD encryption failed")]
    EncryptFailed,

    #[error("AEAD decryption failed (authentication tag mismatch, possible tampering)")]
    DecryptFailed,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Ratchet step failed: {0}")]
    RatchetStep(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
