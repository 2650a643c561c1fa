//! Wallet (seed-backed) store: the on-disk index plus one keystore file per
//! wallet.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::{Config, KdfParams, Network};
use crate::crypto::encryption::{self, EncryptedPayload};
use crate::derivation;

use super::{atomic_write, ensure_owner_only_dir, StoreError};

const INDEX_VERSION: u32 = 1;
const KEYSTORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletMetadata {
    pub wallet_id: String,
    pub name: String,
    pub network: Network,
    pub stacks_address: String,
    pub bitcoin_address: String,
    pub taproot_address: String,
    pub sponsor_api_key: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletIndex {
    version: u32,
    wallets: Vec<WalletMetadata>,
    active_wallet_id: Option<String>,
}

impl Default for WalletIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            wallets: Vec::new(),
            active_wallet_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    version: u32,
    encrypted: EncryptedPayload,
    public_verification: String,
}

/// Result of `create`/`import`: addresses plus the mnemonic, shown exactly
/// once to the caller.
pub struct NewWallet {
    pub metadata: WalletMetadata,
    pub mnemonic: String,
}

pub struct WalletStore {
    root: PathBuf,
    kdf: KdfParams,
    write_lock: Arc<Mutex<()>>,
}

impl WalletStore {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.data_dir.clone(),
            kdf: config.kdf,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("wallets.json")
    }

    fn keystore_path(&self, wallet_id: &str) -> PathBuf {
        self.root.join("wallets").join(wallet_id).join("keystore.json")
    }

    fn backup_path(&self, wallet_id: &str) -> PathBuf {
        self.root
            .join("wallets")
            .join(wallet_id)
            .join("keystore.json.bak")
    }

    fn read_index(&self) -> Result<WalletIndex, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(WalletIndex::default());
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_index(&self, index: &WalletIndex) -> Result<(), StoreError> {
        ensure_owner_only_dir(&self.root)?;
        let bytes = serde_json::to_vec_pretty(index)?;
        atomic_write(&self.index_path(), &bytes)
    }

    fn read_keystore(&self, wallet_id: &str) -> Result<KeystoreFile, StoreError> {
        let path = self.keystore_path(wallet_id);
        if !path.exists() {
            return Err(StoreError::NotFound(wallet_id.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_keystore(&self, wallet_id: &str, keystore: &KeystoreFile) -> Result<(), StoreError> {
        let path = self.keystore_path(wallet_id);
        if let Some(dir) = path.parent() {
            ensure_owner_only_dir(dir)?;
        }
        let bytes = serde_json::to_vec_pretty(keystore)?;
        atomic_write(&path, &bytes)
    }

    async fn new_wallet_from_mnemonic(
        &self,
        name: &str,
        mnemonic: &str,
        password: &str,
        network: Network,
    ) -> Result<NewWallet, StoreError> {
        let parsed = derivation::validate_mnemonic(mnemonic)?;
        let seed = parsed.to_seed("");
        let identity = derivation::derive_identity(&seed, network)?;

        let encrypted = encryption::encrypt(mnemonic.as_bytes(), password, self.kdf)?;
        let wallet_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let metadata = WalletMetadata {
            wallet_id: wallet_id.clone(),
            name: name.to_string(),
            network,
            stacks_address: identity.stacks.address.clone(),
            bitcoin_address: identity.bitcoin.address.clone(),
            taproot_address: identity.taproot.address.clone(),
            sponsor_api_key: None,
            created_at: now.clone(),
            last_used_at: None,
        };

        let keystore = KeystoreFile {
            version: KEYSTORE_VERSION,
            encrypted,
            public_verification: identity.stacks.address.clone(),
        };

        let _guard = self.write_lock.lock().await;
        self.write_keystore(&wallet_id, &keystore)?;
        let mut index = self.read_index()?;
        index.wallets.push(metadata.clone());
        if index.active_wallet_id.is_none() {
            index.active_wallet_id = Some(wallet_id.clone());
        }
        self.write_index(&index)?;

        Ok(NewWallet {
            metadata,
            mnemonic: mnemonic.to_string(),
        })
    }

    /// Generates a fresh 24-word mnemonic, derives addresses, writes the
    /// keystore and index entry atomically. The mnemonic is shown to the
    /// caller exactly once, here.
    pub async fn create(
        &self,
        name: &str,
        password: &str,
        network: Network,
    ) -> Result<NewWallet, StoreError> {
        let mnemonic = derivation::generate_mnemonic()?;
        self.new_wallet_from_mnemonic(name, &mnemonic.to_string(), password, network)
            .await
    }

    /// Identical to `create` but with caller-supplied entropy via an
    /// existing mnemonic.
    pub async fn import(
        &self,
        name: &str,
        mnemonic: &str,
        password: &str,
        network: Network,
    ) -> Result<NewWallet, StoreError> {
        derivation::validate_mnemonic(mnemonic)?;
        self.new_wallet_from_mnemonic(name, mnemonic, password, network)
            .await
    }

    pub fn list(&self) -> Result<Vec<WalletMetadata>, StoreError> {
        Ok(self.read_index()?.wallets)
    }

    pub fn get_active_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.read_index()?.active_wallet_id)
    }

    /// Moves the active-wallet pointer. This is a storage-layer primitive
    /// only: it does not know about any unlocked session. Callers that need
    /// the "switching locks any existing session" contract should go
    /// through `SessionManager::switch_active_wallet` instead of calling
    /// this directly.
    pub async fn switch_active(&self, wallet_id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index()?;
        if !index.wallets.iter().any(|w| w.wallet_id == wallet_id) {
            return Err(StoreError::NotFound(wallet_id.to_string()));
        }
        index.active_wallet_id = Some(wallet_id.to_string());
        self.write_index(&index)
    }

    /// Decrypts and returns the seed phrase. Callers must never cache this.
    pub fn export_mnemonic(&self, wallet_id: &str, password: &str) -> Result<String, StoreError> {
        let keystore = self.read_keystore(wallet_id)?;
        let plaintext = encryption::decrypt(&keystore.encrypted, password)
            .map_err(|_| StoreError::WrongPassword)?;
        String::from_utf8(plaintext)
            .map_err(|e| StoreError::Integrity(format!("non-utf8 mnemonic: {e}")))
    }

    /// Strictly atomic password rotation: back up the keystore, re-encrypt,
    /// re-read, verify the round trip decrypts under the new password and
    /// rejects the old one, then delete the backup. On any verification
    /// failure, restore from the backup and surface the original error
    /// plus any rollback failure.
    pub async fn rotate_password(
        &self,
        wallet_id: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let keystore_path = self.keystore_path(wallet_id);
        let backup_path = self.backup_path(wallet_id);

        let keystore = self.read_keystore(wallet_id)?;
        let mnemonic = encryption::decrypt(&keystore.encrypted, old_password)
            .map_err(|_| StoreError::WrongPassword)?;

        std::fs::copy(&keystore_path, &backup_path)?;

        let rotate_result = (|| -> Result<(), StoreError> {
            let new_encrypted = encryption::encrypt(&mnemonic, new_password, self.kdf)?;
            let new_keystore = KeystoreFile {
                version: KEYSTORE_VERSION,
                encrypted: new_encrypted,
                public_verification: keystore.public_verification.clone(),
            };
            self.write_keystore(wallet_id, &new_keystore)?;

            let reread = self.read_keystore(wallet_id)?;
            let round_trip = encryption::decrypt(&reread.encrypted, new_password)
                .map_err(|_| StoreError::Integrity("round-trip decrypt under new password failed".into()))?;
            if round_trip != mnemonic {
                return Err(StoreError::Integrity(
                    "round-trip plaintext mismatch after rotation".into(),
                ));
            }
            if encryption::decrypt(&reread.encrypted, old_password).is_ok() {
                return Err(StoreError::Integrity(
                    "old password still decrypts keystore after rotation".into(),
                ));
            }
            Ok(())
        })();

        match rotate_result {
            Ok(()) => {
                std::fs::remove_file(&backup_path)?;
                Ok(())
            }
            Err(original) => match std::fs::copy(&backup_path, &keystore_path) {
                Ok(_) => {
                    let _ = std::fs::remove_file(&backup_path);
                    Err(original)
                }
                Err(rollback_err) => Err(StoreError::RollbackFailed {
                    original: original.to_string(),
                    rollback: rollback_err.to_string(),
                }),
            },
        }
    }

    /// Verifies `password` by decrypting, then removes the keystore and
    /// index entry, reassigning the active pointer to the remaining head
    /// (or `None`). This is a storage-layer primitive only: it does not
    /// know about any unlocked session. Callers that need the "deleting
    /// the active wallet locks it first" contract should go through
    /// `SessionManager::delete_wallet` instead of calling this directly.
    pub async fn delete(&self, wallet_id: &str, password: &str) -> Result<(), StoreError> {
        let keystore = self.read_keystore(wallet_id)?;
        encryption::decrypt(&keystore.encrypted, password).map_err(|_| StoreError::WrongPassword)?;

        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index()?;
        index.wallets.retain(|w| w.wallet_id != wallet_id);
        if index.active_wallet_id.as_deref() == Some(wallet_id) {
            index.active_wallet_id = index.wallets.first().map(|w| w.wallet_id.clone());
        }
        self.write_index(&index)?;

        let wallet_dir = self.keystore_path(wallet_id);
        if let Some(dir) = wallet_dir.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
        Ok(())
    }

    /// Re-derives the full identity from the decrypted mnemonic, for
    /// session unlock.
    pub fn unlock_identity(
        &self,
        wallet_id: &str,
        password: &str,
    ) -> Result<(String, derivation::DerivedIdentity), StoreError> {
        let keystore = self.read_keystore(wallet_id)?;
        let mnemonic_bytes =
            encryption::decrypt(&keystore.encrypted, password).map_err(|_| StoreError::WrongPassword)?;
        let mnemonic = String::from_utf8(mnemonic_bytes)
            .map_err(|e| StoreError::Integrity(format!("non-utf8 mnemonic: {e}")))?;

        let index = self.read_index()?;
        let metadata = index
            .wallets
            .iter()
            .find(|w| w.wallet_id == wallet_id)
            .ok_or_else(|| StoreError::NotFound(wallet_id.to_string()))?;

        let identity = derivation::verify_identity(
            &mnemonic,
            metadata.network,
            &metadata.stacks_address,
            &metadata.bitcoin_address,
            &metadata.taproot_address,
        )
        .map_err(|_| StoreError::Integrity("re-derived addresses do not match metadata".into()))?;

        Ok((mnemonic, identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn create_then_list_round_trips() {
        let dir = tempdir().unwrap();
        let store = WalletStore::new(&config_in(dir.path()));
        let created = store.create("primary", "pw", Network::Mainnet).await.unwrap();
        let wallets = store.list().unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].wallet_id, created.metadata.wallet_id);
        assert_eq!(
            store.get_active_id().unwrap().as_deref(),
            Some(created.metadata.wallet_id.as_str())
        );
    }

    #[tokio::test]
    async fn export_mnemonic_requires_correct_password() {
        let dir = tempdir().unwrap();
        let store = WalletStore::new(&config_in(dir.path()));
        let created = store.create("primary", "pw", Network::Mainnet).await.unwrap();

        let exported = store
            .export_mnemonic(&created.metadata.wallet_id, "pw")
            .unwrap();
        assert_eq!(exported, created.mnemonic);

        let err = store
            .export_mnemonic(&created.metadata.wallet_id, "wrong")
            .unwrap_err();
        assert!(matches!(err, StoreError::WrongPassword));
    }

    #[tokio::test]
    async fn rotate_password_then_old_password_rejected() {
        let dir = tempdir().unwrap();
        let store = WalletStore::new(&config_in(dir.path()));
        let created = store.create("primary", "old", Network::Mainnet).await.unwrap();

        store
            .rotate_password(&created.metadata.wallet_id, "old", "new")
            .await
            .unwrap();

        assert!(matches!(
            store.export_mnemonic(&created.metadata.wallet_id, "old"),
            Err(StoreError::WrongPassword)
        ));
        assert_eq!(
            store.export_mnemonic(&created.metadata.wallet_id, "new").unwrap(),
            created.mnemonic
        );

        let wallets = store.list().unwrap();
        assert_eq!(wallets.len(), 1);
        assert_eq!(wallets[0].stacks_address, created.metadata.stacks_address);
    }

    #[tokio::test]
    async fn delete_reassigns_active_pointer() {
        let dir = tempdir().unwrap();
        let store = WalletStore::new(&config_in(dir.path()));
        let first = store.create("a", "pw", Network::Mainnet).await.unwrap();
        let second = store.create("b", "pw", Network::Mainnet).await.unwrap();
        store.switch_active(&second.metadata.wallet_id).await.unwrap();

        store.delete(&second.metadata.wallet_id, "pw").await.unwrap();

        assert_eq!(
            store.get_active_id().unwrap().as_deref(),
            Some(first.metadata.wallet_id.as_str())
        );
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
