//! SIP-018 structured-data signing: canonical Clarity serialization, domain
//! and message hashing, and RSV sign/recover over secp256k1.

pub mod clarity;

use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::Network;
use crate::derivation::c32::c32check_address;
use crate::error::ErrorKind;
use clarity::{sha256, ClarityError, ClarityValue};

/// The six bytes `53 49 50 30 31 38` ("SIP018").
pub const SIP018_PREFIX: [u8; 6] = [0x53, 0x49, 0x50, 0x30, 0x31, 0x38];

#[derive(Debug, Error)]
pub enum Sip018Error {
    #[error("invalid clarity value: {0}")]
    InvalidValue(#[from] ClarityError),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("wallet locked")]
    WalletLocked,
}

impl Sip018Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Sip018Error::InvalidValue(_) => ErrorKind::InvalidInput,
            Sip018Error::InvalidSignature(_) => ErrorKind::InvalidInput,
            Sip018Error::WalletLocked => ErrorKind::WalletLocked,
        }
    }
}

/// The SIP-018 domain tuple: `name`, `version`, `chain-id`, and (for the
/// Pillar-agent variant) `wallet`.
pub struct Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u32,
    pub wallet_principal: Option<(u8, [u8; 20])>,
}

impl Domain {
    fn to_clarity(&self) -> ClarityValue {
        let mut fields = BTreeMap::new();
        fields.insert(
            "name".to_string(),
            ClarityValue::StringAscii(self.name.clone()),
        );
        fields.insert(
            "version".to_string(),
            ClarityValue::StringAscii(self.version.clone()),
        );
        fields.insert(
            "chain-id".to_string(),
            ClarityValue::UInt(self.chain_id as u128),
        );
        if let Some((version, hash160)) = self.wallet_principal {
            fields.insert(
                "wallet".to_string(),
                ClarityValue::Principal(clarity::Principal::Standard { version, hash160 }),
            );
        }
        ClarityValue::Tuple(fields)
    }
}

pub fn domain_hash(domain: &Domain) -> [u8; 32] {
    sha256(&domain.to_clarity().serialize())
}

pub fn message_hash(message: &ClarityValue) -> [u8; 32] {
    sha256(&message.serialize())
}

/// `verification_hash = sha256(SIP018_PREFIX || domain_hash || message_hash)`.
pub fn verification_hash(domain: &Domain, message: &ClarityValue) -> [u8; 32] {
    let mut encoded = Vec::with_capacity(6 + 32 + 32);
    encoded.extend_from_slice(&SIP018_PREFIX);
    encoded.extend_from_slice(&domain_hash(domain));
    encoded.extend_from_slice(&message_hash(message));
    sha256(&encoded)
}

/// 65-byte RSV signature: `r(32) || s(32) || recovery_id(1)`.
#[derive(Debug)]
pub struct RsvSignature(pub [u8; 65]);

impl RsvSignature {
    pub fn to_bytes(&self) -> [u8; 65] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Sip018Error> {
        if bytes.len() != 65 {
            return Err(Sip018Error::InvalidSignature(format!(
                "expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 65];
        arr.copy_from_slice(bytes);
        Ok(RsvSignature(arr))
    }
}

/// Computes `verification_hash(domain, message)` and signs it with ECDSA
/// over secp256k1, low-S normalized.
pub fn sign(
    message: &ClarityValue,
    domain: &Domain,
    private_key: &[u8; 32],
) -> Result<RsvSignature, Sip018Error> {
    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(private_key)
        .map_err(|e| Sip018Error::InvalidSignature(e.to_string()))?;
    let digest = verification_hash(domain, message);
    let msg = Message::from_digest(digest);

    let recoverable = secp.sign_ecdsa_recoverable(&msg, &secret_key);
    let (recovery_id, compact) = recoverable.serialize_compact();

    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    Ok(RsvSignature(out))
}

/// Recovers the compressed public key from `verification_hash` and
/// `signature`, then derives the corresponding Stacks address for
/// `network`.
pub fn recover(
    verification_hash: &[u8; 32],
    signature: &RsvSignature,
    network: Network,
) -> Result<String, Sip018Error> {
    let secp = Secp256k1::new();
    let bytes = signature.0;
    let recovery_byte = bytes[64];
    if recovery_byte > 3 {
        return Err(Sip018Error::InvalidSignature(format!(
            "recovery id out of range: {recovery_byte}"
        )));
    }
    let recovery_id = RecoveryId::from_i32(recovery_byte as i32)
        .map_err(|e| Sip018Error::InvalidSignature(e.to_string()))?;
    let recoverable = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|e| Sip018Error::InvalidSignature(e.to_string()))?;

    let msg = Message::from_digest(*verification_hash);
    let public_key: PublicKey = secp
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|e| Sip018Error::InvalidSignature(e.to_string()))?;

    let hash160 = bitcoin::hashes::hash160::Hash::hash(&public_key.serialize()).to_byte_array();
    Ok(c32check_address(network.stacks_address_version(), &hash160))
}

/// Returns `(recovered_address, matches_expected)` so callers can assert
/// identity without re-deriving it themselves.
pub fn verify(
    verification_hash: &[u8; 32],
    signature: &RsvSignature,
    network: Network,
    expected_signer: Option<&str>,
) -> Result<(String, bool), Sip018Error> {
    let recovered = recover(verification_hash, signature, network)?;
    let matches = expected_signer.map(|e| e == recovered).unwrap_or(true);
    Ok((recovered, matches))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_domain() -> Domain {
        Domain {
            name: "My App".to_string(),
            version: "1.0.0".to_string(),
            chain_id: Network::Testnet.stacks_chain_id(),
            wallet_principal: None,
        }
    }

    #[test]
    fn sign_then_recover_round_trips() {
        let private_key = [0x11u8; 32];
        let domain = test_domain();
        let mut fields = BTreeMap::new();
        fields.insert("amount".to_string(), ClarityValue::UInt(100));
        let message = ClarityValue::Tuple(fields);

        let signature = sign(&message, &domain, &private_key).unwrap();
        let digest = verification_hash(&domain, &message);
        let (address, matched) = verify(&digest, &signature, Network::Testnet, None).unwrap();
        assert!(matched);
        assert!(address.starts_with('S'));
    }

    #[test]
    fn rejects_wrong_signature_length() {
        let err = RsvSignature::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, Sip018Error::InvalidSignature(_)));
    }

    #[test]
    fn verify_detects_mismatched_expected_signer() {
        let private_key = [0x22u8; 32];
        let domain = test_domain();
        let message = ClarityValue::Bool(true);
        let signature = sign(&message, &domain, &private_key).unwrap();
        let digest = verification_hash(&domain, &message);
        let (_, matched) =
            verify(&digest, &signature, Network::Testnet, Some("SPNOTREAL")).unwrap();
        assert!(!matched);
    }
}
