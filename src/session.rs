//! In-memory unlocked-account session: auto-lock timer, zeroization on
//! lock. Single seed session and single signing-key session are allowed
//! concurrently (Pillar flows unlock both together); at most one of each.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::secp256k1::SecretKey;
use secrecy::{ExposeSecret, SecretBox};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::Network;
use crate::derivation::DerivedIdentity;
use crate::error::ErrorKind;
use crate::logging::log_session_event;
use crate::store::signing_key_store::SigningKeyStore;
use crate::store::wallet_store::WalletStore;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active session")]
    WalletLocked,

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("a seed session is already active")]
    AlreadyUnlocked,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::WalletLocked => ErrorKind::WalletLocked,
            SessionError::Store(e) => e.kind(),
            SessionError::AlreadyUnlocked => ErrorKind::InvalidInput,
        }
    }
}

/// Decrypted multi-chain account material held only while unlocked.
/// Zeroized on drop via the `PrivateKeyBytes` fields inside `DerivedIdentity`.
pub struct UnlockedWallet {
    pub wallet_id: String,
    pub network: Network,
    pub identity: DerivedIdentity,
}

/// Decrypted signing key held only while unlocked. The raw bytes (not the
/// `SecretKey` wrapper, which doesn't implement `Zeroize`) are held behind
/// `SecretBox` so they can't be accidentally logged or Debug-printed.
pub struct UnlockedSigningKey {
    pub key_id: String,
    pub secret_key_bytes: SecretBox<[u8; 32]>,
    pub smart_wallet_principal: String,
}

struct SeedSessionState {
    wallet: Option<UnlockedWallet>,
    timer: Option<JoinHandle<()>>,
}

struct SigningKeySessionState {
    key: Option<UnlockedSigningKey>,
    timer: Option<JoinHandle<()>>,
}

/// Owns the process-wide unlocked-session state. Constructed once per
/// process and passed by reference, per the rewrite's ban on module-level
/// singletons.
pub struct SessionManager {
    wallet_store: Arc<WalletStore>,
    signing_key_store: Arc<SigningKeyStore>,
    seed: Arc<RwLock<SeedSessionState>>,
    signing_key: Arc<RwLock<SigningKeySessionState>>,
    auto_lock_timeout_minutes: Arc<Mutex<u32>>,
}

impl SessionManager {
    pub fn new(
        wallet_store: Arc<WalletStore>,
        signing_key_store: Arc<SigningKeyStore>,
        auto_lock_timeout_minutes: u32,
    ) -> Self {
        Self {
            wallet_store,
            signing_key_store,
            seed: Arc::new(RwLock::new(SeedSessionState {
                wallet: None,
                timer: None,
            })),
            signing_key: Arc::new(RwLock::new(SigningKeySessionState {
                key: None,
                timer: None,
            })),
            auto_lock_timeout_minutes: Arc::new(Mutex::new(auto_lock_timeout_minutes)),
        }
    }

    /// Verifies the password by decrypting, derives full account material,
    /// starts the auto-lock timer if configured, and marks the wallet
    /// active.
    pub async fn unlock_wallet(&self, wallet_id: &str, password: &str) -> Result<(), SessionError> {
        if self.seed.read().await.wallet.is_some() {
            return Err(SessionError::AlreadyUnlocked);
        }

        let (_, identity) = self.wallet_store.unlock_identity(wallet_id, password)?;
        let network = self
            .wallet_store
            .list()?
            .into_iter()
            .find(|w| w.wallet_id == wallet_id)
            .map(|w| w.network)
            .ok_or(crate::store::StoreError::NotFound(wallet_id.to_string()))?;

        self.wallet_store.switch_active(wallet_id).await?;

        let mut state = self.seed.write().await;
        if let Some(old_timer) = state.timer.take() {
            old_timer.abort();
        }
        state.wallet = Some(UnlockedWallet {
            wallet_id: wallet_id.to_string(),
            network,
            identity,
        });

        let timeout_minutes = *self.auto_lock_timeout_minutes.lock().await;
        if timeout_minutes > 0 {
            let seed = Arc::clone(&self.seed);
            let wallet_id_owned = wallet_id.to_string();
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(u64::from(timeout_minutes) * 60)).await;
                let mut state = seed.write().await;
                state.wallet = None;
                state.timer = None;
                log_session_event("auto_lock", &wallet_id_owned, true, None);
            }));
        }
        drop(state);

        log_session_event("unlock", wallet_id, true, None);
        Ok(())
    }

    /// Returns the live unlocked wallet, or locks and returns `None` if the
    /// timer has already fired (belt-and-suspenders against a race between
    /// the timer task and this read).
    pub async fn get_active_wallet(&self) -> Option<String> {
        let state = self.seed.read().await;
        state.wallet.as_ref().map(|w| w.wallet_id.clone())
    }

    pub async fn with_active_wallet<T>(
        &self,
        f: impl FnOnce(&UnlockedWallet) -> T,
    ) -> Result<T, SessionError> {
        let state = self.seed.read().await;
        state.wallet.as_ref().map(f).ok_or(SessionError::WalletLocked)
    }

    /// Switches the active-wallet pointer, locking any existing seed
    /// session first, per spec.md §4.C.
    pub async fn switch_active_wallet(&self, wallet_id: &str) -> Result<(), SessionError> {
        self.lock_wallet().await;
        self.wallet_store.switch_active(wallet_id).await?;
        Ok(())
    }

    /// Deletes a wallet, locking the seed session first if it currently
    /// holds the wallet being deleted, per spec.md §4.C.
    pub async fn delete_wallet(&self, wallet_id: &str, password: &str) -> Result<(), SessionError> {
        if self.get_active_wallet().await.as_deref() == Some(wallet_id) {
            self.lock_wallet().await;
        }
        self.wallet_store.delete(wallet_id, password).await?;
        Ok(())
    }

    /// Deletes a signing key, locking the signing-key session first if it
    /// currently holds the key being deleted, per spec.md §4.D.
    pub async fn delete_signing_key(&self, key_id: &str, password: &str) -> Result<(), SessionError> {
        let active = self.signing_key.read().await.key.as_ref().map(|k| k.key_id.clone());
        if active.as_deref() == Some(key_id) {
            self.lock_signing_key().await;
        }
        self.signing_key_store.delete(key_id, password).await?;
        Ok(())
    }

    /// Cancels the timer, zeroizes private-key buffers (via `Drop`), and
    /// drops the reference. Idempotent.
    pub async fn lock_wallet(&self) {
        let mut state = self.seed.write().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let wallet_id = state.wallet.as_ref().map(|w| w.wallet_id.clone());
        state.wallet = None;
        drop(state);
        if let Some(id) = wallet_id {
            log_session_event("lock", &id, true, None);
        }
    }

    /// `0` disables auto-lock; positive values reset the running timer.
    pub async fn set_auto_lock_timeout(&self, minutes: u32) {
        *self.auto_lock_timeout_minutes.lock().await = minutes;

        let mut state = self.seed.write().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if minutes > 0 {
            if let Some(wallet) = &state.wallet {
                let seed = Arc::clone(&self.seed);
                let wallet_id_owned = wallet.wallet_id.clone();
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)).await;
                    let mut state = seed.write().await;
                    state.wallet = None;
                    state.timer = None;
                    log_session_event("auto_lock", &wallet_id_owned, true, None);
                }));
            }
        }
    }

    pub async fn unlock_signing_key(&self, key_id: &str, password: &str) -> Result<(), SessionError> {
        if self.signing_key.read().await.key.is_some() {
            return Err(SessionError::AlreadyUnlocked);
        }

        let (secret_key, principal) = self.signing_key_store.unlock_key(key_id, password)?;

        let mut state = self.signing_key.write().await;
        if let Some(old_timer) = state.timer.take() {
            old_timer.abort();
        }
        state.key = Some(UnlockedSigningKey {
            key_id: key_id.to_string(),
            secret_key_bytes: SecretBox::new(Box::new(secret_key.secret_bytes())),
            smart_wallet_principal: principal,
        });
        Ok(())
    }

    pub async fn lock_signing_key(&self) {
        let mut state = self.signing_key.write().await;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.key = None;
    }

    pub async fn with_active_signing_key<T>(
        &self,
        f: impl FnOnce(&SecretKey, &str) -> T,
    ) -> Result<T, SessionError> {
        let state = self.signing_key.read().await;
        match &state.key {
            Some(k) => {
                let secret_key = SecretKey::from_slice(k.secret_key_bytes.expose_secret())
                    .expect("stored signing-key bytes are always a valid secret key");
                Ok(f(&secret_key, &k.smart_wallet_principal))
            }
            None => Err(SessionError::WalletLocked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KdfParams};
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::new(Network::Mainnet, dir);
        config.kdf = KdfParams::Argon2id {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        };
        config.auto_lock_timeout_minutes = 0;
        config
    }

    #[tokio::test]
    async fn unlock_then_lock_clears_session() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let wallet_store = Arc::new(WalletStore::new(&config));
        let signing_key_store = Arc::new(SigningKeyStore::new(&config));
        let created = wallet_store.create("w", "pw", Network::Mainnet).await.unwrap();

        let manager = SessionManager::new(wallet_store, signing_key_store, 0);
        manager
            .unlock_wallet(&created.metadata.wallet_id, "pw")
            .await
            .unwrap();

        assert_eq!(
            manager.get_active_wallet().await,
            Some(created.metadata.wallet_id.clone())
        );

        manager.lock_wallet().await;
        assert_eq!(manager.get_active_wallet().await, None);
    }

    #[tokio::test]
    async fn wrong_password_does_not_unlock() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let wallet_store = Arc::new(WalletStore::new(&config));
        let signing_key_store = Arc::new(SigningKeyStore::new(&config));
        let created = wallet_store.create("w", "pw", Network::Mainnet).await.unwrap();

        let manager = SessionManager::new(wallet_store, signing_key_store, 0);
        let err = manager
            .unlock_wallet(&created.metadata.wallet_id, "wrong")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
    }

    #[tokio::test]
    async fn second_unlock_while_active_is_rejected() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let wallet_store = Arc::new(WalletStore::new(&config));
        let signing_key_store = Arc::new(SigningKeyStore::new(&config));
        let first = wallet_store.create("a", "pw", Network::Mainnet).await.unwrap();
        let second = wallet_store.create("b", "pw", Network::Mainnet).await.unwrap();

        let manager = SessionManager::new(wallet_store, signing_key_store, 0);
        manager
            .unlock_wallet(&first.metadata.wallet_id, "pw")
            .await
            .unwrap();

        let err = manager
            .unlock_wallet(&second.metadata.wallet_id, "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyUnlocked));
        assert_eq!(
            manager.get_active_wallet().await,
            Some(first.metadata.wallet_id)
        );
    }

    #[tokio::test]
    async fn switch_active_wallet_locks_existing_session() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let wallet_store = Arc::new(WalletStore::new(&config));
        let signing_key_store = Arc::new(SigningKeyStore::new(&config));
        let first = wallet_store.create("a", "pw", Network::Mainnet).await.unwrap();
        let second = wallet_store.create("b", "pw", Network::Mainnet).await.unwrap();

        let manager = SessionManager::new(wallet_store, signing_key_store, 0);
        manager
            .unlock_wallet(&first.metadata.wallet_id, "pw")
            .await
            .unwrap();

        manager
            .switch_active_wallet(&second.metadata.wallet_id)
            .await
            .unwrap();

        assert_eq!(manager.get_active_wallet().await, None);
    }

    #[tokio::test]
    async fn delete_wallet_locks_session_when_deleting_active_wallet() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let wallet_store = Arc::new(WalletStore::new(&config));
        let signing_key_store = Arc::new(SigningKeyStore::new(&config));
        let created = wallet_store.create("w", "pw", Network::Mainnet).await.unwrap();

        let manager = SessionManager::new(wallet_store, signing_key_store, 0);
        manager
            .unlock_wallet(&created.metadata.wallet_id, "pw")
            .await
            .unwrap();

        manager
            .delete_wallet(&created.metadata.wallet_id, "pw")
            .await
            .unwrap();

        assert_eq!(manager.get_active_wallet().await, None);
    }
}
