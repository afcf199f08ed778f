//! Vault-encrypted SQLite backend for `SecureStorage`.
//!
//! This is the device-encrypted fallback used when no OS keychain is
//! available. Keys stay plaintext (they are non-sensitive ASCII labels,
//! needed for lookups); values are sealed with XChaCha20-Poly1305 under
//! the vault key before they touch disk.

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use crate::{error::StoreError, storage::SecureStorage, vault::Vault};

const SEAL_AAD: &[u8] = b"paracord:store:v1";

/// Seal a value under the vault key: random 24-byte nonce prepended to
/// ciphertext+tag, base64-encoded.
fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<String, StoreError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| StoreError::Crypto(pc_crypto::CryptoError::EncryptFailed))?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: SEAL_AAD,
            },
        )
        .map_err(|_| StoreError::Crypto(pc_crypto::CryptoError::EncryptFailed))?;
    let mut out = Vec::with_capacity(24 + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(&out))
}

fn open_sealed(key: &[u8; 32], sealed_b64: &str) -> Result<Vec<u8>, StoreError> {
    let data = STANDARD
        .decode(sealed_b64)
        .map_err(|e| StoreError::Crypto(pc_crypto::CryptoError::Base64Decode(e)))?;
    if data.len() < 24 {
        return Err(StoreError::Crypto(pc_crypto::CryptoError::DecryptFailed));
    }
    let (nonce_bytes, ciphertext) = data.split_at(24);
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| StoreError::Crypto(pc_crypto::CryptoError::DecryptFailed))?;
    cipher
        .decrypt(
            XNonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: SEAL_AAD,
            },
        )
        .map_err(|_| StoreError::Crypto(pc_crypto::CryptoError::DecryptFailed))
}

/// SQLite-backed secure storage. Cheap to clone (pool is Arc inside).
#[derive(Clone)]
pub struct EncryptedDbStorage {
    pool: SqlitePool,
    vault: Vault,
}

impl EncryptedDbStorage {
    /// Open (or create) the database and run pending migrations.
    ///
    /// WAL and foreign keys are set at connection time, not inside a
    /// migration: SQLite forbids changing journal_mode in a transaction
    /// and sqlx wraps every migration in one.
    pub async fn open(db_path: &Path, vault: Vault) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::debug!(
            target: "paracord_e2ee",
            event = "storage_opened",
            path = %db_path.display()
        );

        Ok(Self { pool, vault })
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }
}

#[async_trait]
impl SecureStorage for EncryptedDbStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<String> =
            sqlx::query_scalar("SELECT value_enc FROM secure_kv WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            None => Ok(None),
            Some(sealed) => {
                let plaintext = self.vault.with_key(|k| open_sealed(k, &sealed)).await?;
                String::from_utf8(plaintext)
                    .map(Some)
                    .map_err(|_| StoreError::Crypto(pc_crypto::CryptoError::DecryptFailed))
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let sealed = self.vault.with_key(|k| seal(k, value.as_bytes())).await?;
        sqlx::query(
            "INSERT INTO secure_kv (key, value_enc, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value_enc = excluded.value_enc, \
             updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&sealed)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM secure_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
