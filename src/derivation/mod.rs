//! BIP-39 → BIP-32 → Stacks / P2WPKH / P2TR key derivation.
//!
//! All three chains share one seed and one account index (0), so a single
//! unlock yields one consistent identity across Bitcoin L1 and Stacks L2,
//! per the data model's invariant that the stored metadata addresses must
//! equal a fresh re-derivation from the decrypted seed.

pub mod c32;

use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::hashes::Hash;
use bitcoin::key::{TapTweak, XOnlyPublicKey};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address as BtcAddress, CompressedPublicKey, PublicKey as BtcPublicKey};
use thiserror::Error;
use zeroize::Zeroize;

use crate::config::Network;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("key derivation failed: {0}")]
    Bip32(String),

    #[error("derived address does not match stored public identity")]
    IntegrityMismatch,
}

impl DerivationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DerivationError::InvalidMnemonic(_) => ErrorKind::InvalidInput,
            DerivationError::Bip32(_) => ErrorKind::InvalidInput,
            DerivationError::IntegrityMismatch => ErrorKind::IntegrityError,
        }
    }
}

/// A raw 32-byte secp256k1 private key, zeroized on drop.
#[derive(Clone, zeroize::ZeroizeOnDrop)]
pub struct PrivateKeyBytes(pub [u8; 32]);

impl PrivateKeyBytes {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

pub struct StacksKey {
    pub private_key: PrivateKeyBytes,
    pub address: String,
}

pub struct BitcoinKey {
    pub private_key: PrivateKeyBytes,
    pub public_key_compressed: [u8; 33],
    pub address: String,
}

pub struct TaprootKey {
    pub private_key: PrivateKeyBytes,
    pub xonly_public_key: [u8; 32],
    pub address: String,
}

/// One consistent multi-chain identity derived from a single seed.
pub struct DerivedIdentity {
    pub stacks: StacksKey,
    pub bitcoin: BitcoinKey,
    pub taproot: TaprootKey,
}

/// Generates a fresh 24-word (256-bit entropy) BIP-39 mnemonic.
pub fn generate_mnemonic() -> Result<Mnemonic, DerivationError> {
    let mut entropy = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut entropy);
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))?;
    entropy.zeroize();
    Ok(mnemonic)
}

/// Validates a 12- or 24-word mnemonic against the standard English
/// wordlist.
pub fn validate_mnemonic(phrase: &str) -> Result<Mnemonic, DerivationError> {
    let word_count = phrase.split_whitespace().count();
    if word_count != 12 && word_count != 24 {
        return Err(DerivationError::InvalidMnemonic(format!(
            "expected 12 or 24 words, got {word_count}"
        )));
    }
    Mnemonic::from_str(phrase).map_err(|e| DerivationError::InvalidMnemonic(e.to_string()))
}

fn master_key(seed: &[u8], network: Network) -> Result<Xpriv, DerivationError> {
    Xpriv::new_master(network.bitcoin_network(), seed)
        .map_err(|e| DerivationError::Bip32(e.to_string()))
}

fn derive_path(
    secp: &Secp256k1<bitcoin::secp256k1::All>,
    master: &Xpriv,
    path: &str,
) -> Result<Xpriv, DerivationError> {
    let path = DerivationPath::from_str(path).map_err(|e| DerivationError::Bip32(e.to_string()))?;
    master
        .derive_priv(secp, &path)
        .map_err(|e| DerivationError::Bip32(e.to_string()))
}

fn hash160(data: &[u8]) -> [u8; 20] {
    bitcoin::hashes::hash160::Hash::hash(data).to_byte_array()
}

/// Derives the standard Stacks account-0 key and c32check address.
pub fn derive_stacks_key(
    seed: &[u8],
    network: Network,
) -> Result<StacksKey, DerivationError> {
    let secp = Secp256k1::new();
    let master = master_key(seed, network)?;
    // Stacks uses the same BIP-44-style path as Bitcoin legacy, account 0,
    // external chain, index 0: m/44'/5757'/0'/0/0.
    let derived = derive_path(&secp, &master, "m/44'/5757'/0'/0/0")?;
    let secret_key = derived.private_key;
    let public_key = secret_key.public_key(&secp);
    let pubkey_hash = hash160(&public_key.serialize());
    let version = network.stacks_address_version();
    let address = c32::c32check_address(version, &pubkey_hash);

    Ok(StacksKey {
        private_key: PrivateKeyBytes(secret_key.secret_bytes()),
        address,
    })
}

/// Derives the BIP-84 native-SegWit P2WPKH account-0 key and address.
pub fn derive_bitcoin_key(
    seed: &[u8],
    network: Network,
) -> Result<BitcoinKey, DerivationError> {
    let secp = Secp256k1::new();
    let master = master_key(seed, network)?;
    let coin_type = match network {
        Network::Mainnet => 0,
        Network::Testnet => 1,
    };
    let derived = derive_path(&secp, &master, &format!("m/84'/{coin_type}'/0'/0/0"))?;
    let secret_key = derived.private_key;
    let public_key = BtcPublicKey::new(secret_key.public_key(&secp));
    let compressed = CompressedPublicKey::try_from(public_key)
        .map_err(|e| DerivationError::Bip32(e.to_string()))?;
    let address = BtcAddress::p2wpkh(&compressed, network.bitcoin_network());

    Ok(BitcoinKey {
        private_key: PrivateKeyBytes(secret_key.secret_bytes()),
        public_key_compressed: compressed.to_bytes(),
        address: address.to_string(),
    })
}

/// Derives the BIP-86 key-path Taproot account-0 key and address.
pub fn derive_taproot_key(
    seed: &[u8],
    network: Network,
) -> Result<TaprootKey, DerivationError> {
    let secp = Secp256k1::new();
    let master = master_key(seed, network)?;
    let coin_type = match network {
        Network::Mainnet => 0,
        Network::Testnet => 1,
    };
    let derived = derive_path(&secp, &master, &format!("m/86'/{coin_type}'/0'/0/0"))?;
    let secret_key = derived.private_key;
    let keypair = secret_key.keypair(&secp);
    let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
    let (tweaked, _parity) = xonly.tap_tweak(&secp, None);
    let address = BtcAddress::p2tr_tweaked(tweaked, network.bitcoin_network());

    Ok(TaprootKey {
        private_key: PrivateKeyBytes(secret_key.secret_bytes()),
        xonly_public_key: xonly.serialize(),
        address: address.to_string(),
    })
}

/// Derives the full Stacks + Bitcoin + Taproot identity from one seed.
pub fn derive_identity(
    seed: &[u8],
    network: Network,
) -> Result<DerivedIdentity, DerivationError> {
    Ok(DerivedIdentity {
        stacks: derive_stacks_key(seed, network)?,
        bitcoin: derive_bitcoin_key(seed, network)?,
        taproot: derive_taproot_key(seed, network)?,
    })
}

/// Re-derives identity from `mnemonic` and asserts the three addresses match
/// the ones recorded in metadata at creation time. Mismatch is the fatal
/// integrity error named in the data model.
pub fn verify_identity(
    mnemonic: &str,
    network: Network,
    expected_stacks_address: &str,
    expected_bitcoin_address: &str,
    expected_taproot_address: &str,
) -> Result<DerivedIdentity, DerivationError> {
    let parsed = validate_mnemonic(mnemonic)?;
    let seed = parsed.to_seed("");
    let identity = derive_identity(&seed, network)?;
    if identity.stacks.address != expected_stacks_address
        || identity.bitcoin.address != expected_bitcoin_address
        || identity.taproot.address != expected_taproot_address
    {
        return Err(DerivationError::IntegrityMismatch);
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn generates_valid_mnemonic() {
        let m = generate_mnemonic().unwrap();
        assert_eq!(m.word_count(), 24);
    }

    #[test]
    fn rejects_bad_word_count() {
        assert!(validate_mnemonic("abandon abandon abandon").is_err());
    }

    #[test]
    fn derives_deterministic_addresses() {
        let mnemonic = validate_mnemonic(TEST_MNEMONIC).unwrap();
        let seed = mnemonic.to_seed("");
        let id1 = derive_identity(&seed, Network::Mainnet).unwrap();
        let id2 = derive_identity(&seed, Network::Mainnet).unwrap();
        assert_eq!(id1.stacks.address, id2.stacks.address);
        assert_eq!(id1.bitcoin.address, id2.bitcoin.address);
        assert_eq!(id1.taproot.address, id2.taproot.address);
        assert!(id1.stacks.address.starts_with('S'));
        assert!(id1.bitcoin.address.starts_with("bc1q"));
        assert!(id1.taproot.address.starts_with("bc1p"));
    }

    #[test]
    fn testnet_addresses_differ_from_mainnet() {
        let mnemonic = validate_mnemonic(TEST_MNEMONIC).unwrap();
        let seed = mnemonic.to_seed("");
        let mainnet = derive_identity(&seed, Network::Mainnet).unwrap();
        let testnet = derive_identity(&seed, Network::Testnet).unwrap();
        assert_ne!(mainnet.bitcoin.address, testnet.bitcoin.address);
    }

    #[test]
    fn integrity_check_catches_tampering() {
        let mnemonic = validate_mnemonic(TEST_MNEMONIC).unwrap();
        let seed = mnemonic.to_seed("");
        let identity = derive_identity(&seed, Network::Mainnet).unwrap();
        let result = verify_identity(
            TEST_MNEMONIC,
            Network::Mainnet,
            &identity.stacks.address,
            "bc1qwrongaddress",
            &identity.taproot.address,
        );
        assert!(matches!(result, Err(DerivationError::IntegrityMismatch)));
    }
}
