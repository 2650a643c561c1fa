//! Signing-key store: bare 32-byte secp256k1 keys bound to a smart-wallet
//! principal, using the same encryption primitive as the wallet store.

use std::path::PathBuf;
use std::sync::Arc;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, KdfParams};
use crate::crypto::encryption::{self, EncryptedPayload};

use super::{atomic_write, ensure_owner_only_dir, StoreError};

const INDEX_VERSION: u32 = 1;
const KEYSTORE_VERSION: u32 = 1;

/// Sentinel principal before a smart wallet has been deployed.
pub const PENDING_PRINCIPAL: &str = "pending";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyMetadata {
    pub key_id: String,
    pub public_key_compressed: String,
    pub smart_wallet_principal: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SigningKeyIndex {
    version: u32,
    keys: Vec<SigningKeyMetadata>,
}

impl Default for SigningKeyIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SigningKeystoreFile {
    version: u32,
    encrypted: EncryptedPayload,
    public_verification: String,
}

pub struct NewSigningKey {
    pub metadata: SigningKeyMetadata,
}

pub struct SigningKeyStore {
    root: PathBuf,
    kdf: KdfParams,
    write_lock: Arc<Mutex<()>>,
}

impl SigningKeyStore {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.data_dir.clone(),
            kdf: config.kdf,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("signing-keys.json")
    }

    fn keystore_path(&self, key_id: &str) -> PathBuf {
        self.root.join("signing-keys").join(key_id).join("keystore.json")
    }

    fn read_index(&self) -> Result<SigningKeyIndex, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(SigningKeyIndex::default());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_index(&self, index: &SigningKeyIndex) -> Result<(), StoreError> {
        ensure_owner_only_dir(&self.root)?;
        let bytes = serde_json::to_vec_pretty(index)?;
        atomic_write(&self.index_path(), &bytes)
    }

    fn read_keystore(&self, key_id: &str) -> Result<SigningKeystoreFile, StoreError> {
        let path = self.keystore_path(key_id);
        if !path.exists() {
            return Err(StoreError::NotFound(key_id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_keystore(&self, key_id: &str, keystore: &SigningKeystoreFile) -> Result<(), StoreError> {
        let path = self.keystore_path(key_id);
        if let Some(dir) = path.parent() {
            ensure_owner_only_dir(dir)?;
        }
        let bytes = serde_json::to_vec_pretty(keystore)?;
        atomic_write(&path, &bytes)
    }

    async fn store_secret(
        &self,
        secret_key: SecretKey,
        password: &str,
    ) -> Result<NewSigningKey, StoreError> {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        let public_key_hex = hex::encode(public_key.serialize());

        let encrypted = encryption::encrypt(&secret_key.secret_bytes(), password, self.kdf)?;
        let key_id = Uuid::new_v4().to_string();
        let metadata = SigningKeyMetadata {
            key_id: key_id.clone(),
            public_key_compressed: public_key_hex.clone(),
            smart_wallet_principal: PENDING_PRINCIPAL.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        let keystore = SigningKeystoreFile {
            version: KEYSTORE_VERSION,
            encrypted,
            public_verification: public_key_hex,
        };

        let _guard = self.write_lock.lock().await;
        self.write_keystore(&key_id, &keystore)?;
        let mut index = self.read_index()?;
        index.keys.push(metadata.clone());
        self.write_index(&index)?;

        Ok(NewSigningKey { metadata })
    }

    /// Generates a fresh random secp256k1 keypair.
    pub async fn generate(&self, password: &str) -> Result<NewSigningKey, StoreError> {
        let secp = Secp256k1::new();
        let (secret_key, _) = secp.generate_keypair(&mut rand::thread_rng());
        self.store_secret(secret_key, password).await
    }

    /// Imports a caller-supplied 32-byte private key.
    pub async fn import(&self, private_key: &[u8; 32], password: &str) -> Result<NewSigningKey, StoreError> {
        let secret_key = SecretKey::from_slice(private_key)
            .map_err(|e| StoreError::Integrity(format!("invalid private key: {e}")))?;
        self.store_secret(secret_key, password).await
    }

    pub fn list(&self) -> Result<Vec<SigningKeyMetadata>, StoreError> {
        Ok(self.read_index()?.keys)
    }

    /// Updates the smart-wallet binding exactly once: sentinel → real
    /// principal.
    pub async fn bind_principal(&self, key_id: &str, principal: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index()?;
        let entry = index
            .keys
            .iter_mut()
            .find(|k| k.key_id == key_id)
            .ok_or_else(|| StoreError::NotFound(key_id.to_string()))?;
        if entry.smart_wallet_principal != PENDING_PRINCIPAL {
            return Err(StoreError::Integrity(
                "smart-wallet principal already bound".to_string(),
            ));
        }
        entry.smart_wallet_principal = principal.to_string();
        self.write_index(&index)
    }

    /// Verifies `password` by decrypting, then removes the keystore and
    /// index entry. This is a storage-layer primitive only: it does not
    /// know about any unlocked session. Callers that need the "deleting
    /// the unlocked key locks it first" contract should go through
    /// `SessionManager::delete_signing_key` instead of calling this
    /// directly.
    pub async fn delete(&self, key_id: &str, password: &str) -> Result<(), StoreError> {
        let keystore = self.read_keystore(key_id)?;
        encryption::decrypt(&keystore.encrypted, password).map_err(|_| StoreError::WrongPassword)?;

        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index()?;
        index.keys.retain(|k| k.key_id != key_id);
        self.write_index(&index)?;

        if let Some(dir) = self.keystore_path(key_id).parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        Ok(())
    }

    /// Decrypts and returns the raw private key, verifying the stored
    /// compressed public key matches the curve point it derives.
    pub fn unlock_key(&self, key_id: &str, password: &str) -> Result<(SecretKey, String), StoreError> {
        let keystore = self.read_keystore(key_id)?;
        let secret_bytes = encryption::decrypt(&keystore.encrypted, password)
            .map_err(|_| StoreError::WrongPassword)?;
        let secret_key = SecretKey::from_slice(&secret_bytes)
            .map_err(|e| StoreError::Integrity(format!("invalid stored private key: {e}")))?;

        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        if hex::encode(public_key.serialize()) != keystore.public_verification {
            return Err(StoreError::Integrity(
                "stored public key does not match decrypted private key".to_string(),
            ));
        }

        let index = self.read_index()?;
        let principal = index
            .keys
            .iter()
            .find(|k| k.key_id == key_id)
            .map(|k| k.smart_wallet_principal.clone())
            .ok_or_else(|| StoreError::NotFound(key_id.to_string()))?;

        Ok((secret_key, principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::new(Network::Mainnet, dir);
        config.kdf = KdfParams::Argon2id {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        };
        config
    }

    #[tokio::test]
    async fn generate_then_unlock_round_trips() {
        let dir = tempdir().unwrap();
        let store = SigningKeyStore::new(&config_in(dir.path()));
        let created = store.generate("pw").await.unwrap();

        let (secret_key, principal) = store.unlock_key(&created.metadata.key_id, "pw").unwrap();
        assert_eq!(principal, PENDING_PRINCIPAL);

        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        assert_eq!(
            hex::encode(public_key.serialize()),
            created.metadata.public_key_compressed
        );
    }

    #[tokio::test]
    async fn bind_principal_only_once() {
        let dir = tempdir().unwrap();
        let store = SigningKeyStore::new(&config_in(dir.path()));
        let created = store.generate("pw").await.unwrap();

        store
            .bind_principal(&created.metadata.key_id, "SP000REALPRINCIPAL")
            .await
            .unwrap();

        let err = store
            .bind_principal(&created.metadata.key_id, "SP000OTHER")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
    }
}
