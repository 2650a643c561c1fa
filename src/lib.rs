//! aibtc-wallet-core - managed keystore and signing engines for AI agents
//! operating Bitcoin-L1 and Stacks-L2 wallets.
//!
//! ## Components
//!
//! 1. **Managed keystore** (`store`) - password-encrypted mnemonic and
//!    signing-key storage, with atomic writes and rotate/delete flows.
//! 2. **Key derivation** (`derivation`) - BIP-32/39/84/86 multi-chain
//!    identity derivation and Stacks c32check addressing.
//! 3. **Session management** (`session`) - in-memory unlocked-account state
//!    with auto-lock timers and zeroization.
//! 4. **Signing engines** (`sip018`, `btcmsg`, `schnorr`, `pillar`) -
//!    SIP-018 structured data, BIP-137 Bitcoin messages, BIP-340 Schnorr,
//!    and the Pillar smart-wallet agent signer built on top of SIP-018.
//! 5. **DEX quoting** (`quoter`) - multi-hop XYK price-impact computation.
//! 6. **x402 payment engine** (`x402`) - 402 negotiation, sponsored
//!    transaction construction, and replay-safe settlement.

pub mod btcmsg;
pub mod config;
pub mod crypto;
pub mod derivation;
pub mod error;
pub mod logging;
pub mod pillar;
pub mod quoter;
pub mod schnorr;
pub mod session;
pub mod sip018;
pub mod store;
pub mod x402;

pub use config::{Config, Network};
pub use error::{ErrorKind, OperationResult, WalletCoreError};
pub use session::SessionManager;
pub use store::signing_key_store::SigningKeyStore;
pub use store::wallet_store::WalletStore;
