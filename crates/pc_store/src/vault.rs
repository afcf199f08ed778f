//! Vault: in-memory key material unlocked by user password.
//!
//! Holds the 32-byte storage encryption key while the account is
//! unlocked. Locking (explicit or via the inactivity timer) zeroizes the
//! key; every storage operation re-checks the lock first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use argon2::{Argon2, Params, Version};
use tokio::sync::RwLock;
use zeroize::ZeroizeOnDrop;

use crate::error::StoreError;

/// Argon2id parameters tuned for interactive desktop use.
fn argon2_params() -> Params {
    Params::new(
        64 * 1024, // m_cost: 64 MiB
        3,         // t_cost
        1,         // p_cost
        Some(32),
    )
    .expect("static Argon2 params are valid")
}

/// Derive the storage key from a user password and a 16-byte salt.
/// The salt is stored next to the encrypted data; it is not secret.
pub fn storage_key_from_password(
    password: &[u8],
    salt: &[u8; 16],
) -> Result<[u8; 32], StoreError> {
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| StoreError::Crypto(pc_crypto::CryptoError::KeyDerivation(e.to_string())))?;
    Ok(output)
}

/// Fresh random salt for a new profile.
pub fn generate_salt() -> [u8; 16] {
    use rand::RngCore;
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[derive(ZeroizeOnDrop)]
struct VaultInner {
    key: [u8; 32],
    #[zeroize(skip)]
    last_activity: Instant,
    #[zeroize(skip)]
    auto_lock_secs: u64,
}

/// Thread-safe vault handle. Clone to share across tasks.
#[derive(Clone, Default)]
pub struct Vault {
    inner: Arc<RwLock<Option<VaultInner>>>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlock with a password and salt.
    pub async fn unlock(&self, password: &[u8], salt: &[u8; 16]) -> Result<(), StoreError> {
        let key = storage_key_from_password(password, salt)?;
        self.unlock_with_key(key).await
    }

    /// Unlock with an existing key (OS keyring, hardware unlock).
    pub async fn unlock_with_key(&self, key: [u8; 32]) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        *guard = Some(VaultInner {
            key,
            last_activity: Instant::now(),
            auto_lock_secs: 1800,
        });
        Ok(())
    }

    /// Lock the vault; zeroizes the key.
    pub async fn lock(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    pub async fn is_locked(&self) -> bool {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(inner) => {
                if inner.auto_lock_secs > 0
                    && inner.last_activity.elapsed() > Duration::from_secs(inner.auto_lock_secs)
                {
                    drop(guard);
                    self.lock().await;
                    return true;
                }
                false
            }
            None => true,
        }
    }

    /// Auto-lock timeout in seconds; 0 disables.
    pub async fn set_auto_lock_timeout(&self, seconds: u64) {
        let mut guard = self.inner.write().await;
        if let Some(ref mut inner) = *guard {
            inner.auto_lock_secs = seconds;
        }
    }

    /// Run `f` with the raw key. Errors when locked or auto-lock has
    /// fired; resets the activity timer otherwise.
    pub async fn with_key<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&[u8; 32]) -> Result<R, StoreError>,
    {
        if self.is_locked().await {
            return Err(StoreError::VaultLocked);
        }
        let mut guard = self.inner.write().await;
        match guard.as_mut() {
            Some(inner) => {
                inner.last_activity = Instant::now();
                f(&inner.key)
            }
            None => Err(StoreError::VaultLocked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locked_vault_refuses_key_access() {
        let vault = Vault::new();
        assert!(vault.is_locked().await);
        let err = vault.with_key(|_| Ok(())).await;
        assert!(matches!(err, Err(StoreError::VaultLocked)));
    }

    #[tokio::test]
    async fn unlock_lock_cycle() {
        let vault = Vault::new();
        vault.unlock_with_key([5u8; 32]).await.unwrap();
        assert!(!vault.is_locked().await);
        let key_copy = vault.with_key(|k| Ok(*k)).await.unwrap();
        assert_eq!(key_copy, [5u8; 32]);
        vault.lock().await;
        assert!(vault.is_locked().await);
    }

    #[test]
    fn password_derivation_is_deterministic_per_salt() {
        let salt_a = [1u8; 16];
        let salt_b = [2u8; 16];
        let k1 = storage_key_from_password(b"hunter2", &salt_a).unwrap();
        let k2 = storage_key_from_password(b"hunter2", &salt_a).unwrap();
        let k3 = storage_key_from_password(b"hunter2", &salt_b).unwrap();
        assert_eq!(k1, k2);
        assert_ne!(k1, k3);
    }
}
