//! Smoke-test binary: create a wallet, unlock it, sign a SIP-018 message,
//! lock it again. Exercises the store/session/signing-engine seam without
//! standing up a full embedding application.

use std::sync::Arc;

use aibtc_wallet_core::config::{Config, Network};
use aibtc_wallet_core::session::SessionManager;
use aibtc_wallet_core::sip018::clarity::ClarityValue;
use aibtc_wallet_core::sip018::{self, Domain};
use aibtc_wallet_core::store::signing_key_store::SigningKeyStore;
use aibtc_wallet_core::store::wallet_store::WalletStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = std::env::temp_dir().join("aibtc-walletd-demo");
    let config = Config::new(Network::Testnet, &data_dir);
    let _ = aibtc_wallet_core::logging::init_from_config(&config);

    let wallet_store = Arc::new(WalletStore::new(&config));
    let signing_key_store = Arc::new(SigningKeyStore::new(&config));

    let created = wallet_store.create("demo", "correct horse battery staple", Network::Testnet).await?;
    println!("created wallet {} ({})", created.metadata.wallet_id, created.metadata.stacks_address);

    let session = SessionManager::new(
        Arc::clone(&wallet_store),
        Arc::clone(&signing_key_store),
        config.auto_lock_timeout_minutes,
    );
    session
        .unlock_wallet(&created.metadata.wallet_id, "correct horse battery staple")
        .await?;

    let domain = Domain {
        name: "aibtc-walletd-demo".to_string(),
        version: "1.0.0".to_string(),
        chain_id: Network::Testnet.stacks_chain_id(),
        wallet_principal: None,
    };
    let message = ClarityValue::Bool(true);

    let signature = session
        .with_active_wallet(|wallet| {
            sip018::sign(&message, &domain, wallet.identity.stacks.private_key.as_bytes())
        })
        .await??;
    println!("signed: {}", signature.to_hex());

    session.lock_wallet().await;
    println!("wallet locked");

    Ok(())
}
