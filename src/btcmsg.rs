//! BIP-137 Bitcoin "signed message" convention: header-byte-encoded address
//! class + recovery id, double-SHA256 digest, varint-prefixed message.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use crate::error::ErrorKind;

const MESSAGE_PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";

#[derive(Debug, Error)]
pub enum BtcMsgError {
    #[error("message too long to varint-encode")]
    MessageTooLong,

    #[error("invalid signature encoding: {0}")]
    InvalidEncoding(String),

    #[error("invalid header byte: {0}")]
    InvalidHeader(u8),
}

impl BtcMsgError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}

/// The address class implied by a BIP-137 header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    P2pkhUncompressed,
    P2pkhCompressed,
    P2shP2wpkh,
    P2wpkh,
}

fn varint(len: usize) -> Result<Vec<u8>, BtcMsgError> {
    if len < 0xfd {
        Ok(vec![len as u8])
    } else if len <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(len as u16).to_le_bytes());
        Ok(out)
    } else if len <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(len as u32).to_le_bytes());
        Ok(out)
    } else {
        Err(BtcMsgError::MessageTooLong)
    }
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = bitcoin::hashes::sha256::Hash::hash(data);
    bitcoin::hashes::sha256::Hash::hash(first.as_byte_array()).to_byte_array()
}

/// `formatted = "\x18Bitcoin Signed Message:\n" || varint(len(message)) || message`,
/// `digest = sha256(sha256(formatted))`.
pub fn message_digest(message: &[u8]) -> Result<[u8; 32], BtcMsgError> {
    let mut formatted = Vec::with_capacity(MESSAGE_PREFIX.len() + message.len() + 9);
    formatted.extend_from_slice(MESSAGE_PREFIX);
    formatted.extend_from_slice(&varint(message.len())?);
    formatted.extend_from_slice(message);
    Ok(double_sha256(&formatted))
}

fn header_byte(class: AddressClass, recovery_id: i32) -> u8 {
    let base = match class {
        AddressClass::P2pkhUncompressed => 27,
        AddressClass::P2pkhCompressed => 31,
        AddressClass::P2shP2wpkh => 35,
        AddressClass::P2wpkh => 39,
    };
    base + recovery_id as u8
}

fn decode_header(header: u8) -> Result<(AddressClass, i32), BtcMsgError> {
    match header {
        27..=30 => Ok((AddressClass::P2pkhUncompressed, (header - 27) as i32)),
        31..=34 => Ok((AddressClass::P2pkhCompressed, (header - 31) as i32)),
        35..=38 => Ok((AddressClass::P2shP2wpkh, (header - 35) as i32)),
        39..=42 => Ok((AddressClass::P2wpkh, (header - 39) as i32)),
        other => Err(BtcMsgError::InvalidHeader(other)),
    }
}

/// 65-byte signature: `header(1) || r(32) || s(32)`. The managed wallet
/// always uses native SegWit, so `sign` always emits header class
/// `39 + recId`.
pub struct BtcSignature(pub [u8; 65]);

impl BtcSignature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Accepts hex (130 chars) or base64 (88 chars) input.
    pub fn parse(input: &str) -> Result<Self, BtcMsgError> {
        let bytes = if input.len() == 130 {
            hex::decode(input).map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?
        } else if input.len() == 88 {
            BASE64
                .decode(input)
                .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?
        } else {
            return Err(BtcMsgError::InvalidEncoding(format!(
                "unexpected length {}",
                input.len()
            )));
        };
        if bytes.len() != 65 {
            return Err(BtcMsgError::InvalidEncoding(format!(
                "decoded to {} bytes, expected 65",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 65];
        arr.copy_from_slice(&bytes);
        Ok(BtcSignature(arr))
    }
}

/// Produces a recoverable, low-S-normalized signature over `message`,
/// encoded with the native-SegWit header class.
pub fn sign(message: &[u8], private_key: &[u8; 32]) -> Result<BtcSignature, BtcMsgError> {
    let secp = Secp256k1::new();
    let secret_key = SecretKey::from_slice(private_key)
        .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;
    let digest = message_digest(message)?;
    let msg = Message::from_digest(digest);

    let recoverable = secp.sign_ecdsa_recoverable(&msg, &secret_key);
    let (recovery_id, compact) = recoverable.serialize_compact();

    let mut out = [0u8; 65];
    out[0] = header_byte(AddressClass::P2wpkh, recovery_id.to_i32());
    out[1..].copy_from_slice(&compact);
    Ok(BtcSignature(out))
}

/// Recovers the compressed public key from `digest` and the signature,
/// derives the expected address under the class implied by the header, and
/// compares against any caller-supplied expected signer.
pub fn verify(
    message: &[u8],
    signature: &BtcSignature,
    network: bitcoin::Network,
    expected_signer: Option<&str>,
) -> Result<(String, bool), BtcMsgError> {
    let (class, recovery_id) = decode_header(signature.0[0])?;
    let recid = RecoveryId::from_i32(recovery_id)
        .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;
    let recoverable = RecoverableSignature::from_compact(&signature.0[1..], recid)
        .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;

    let digest = message_digest(message)?;
    let msg = Message::from_digest(digest);
    let secp = Secp256k1::new();
    let public_key: PublicKey = secp
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;

    let address = address_for_class(class, &public_key, network)?;
    let matches = expected_signer.map(|e| e == address).unwrap_or(true);
    Ok((address, matches))
}

fn address_for_class(
    class: AddressClass,
    public_key: &PublicKey,
    network: bitcoin::Network,
) -> Result<String, BtcMsgError> {
    match class {
        AddressClass::P2wpkh => {
            let btc_pubkey = bitcoin::PublicKey::new(*public_key);
            let compressed = bitcoin::CompressedPublicKey::try_from(btc_pubkey)
                .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;
            Ok(bitcoin::Address::p2wpkh(&compressed, network).to_string())
        }
        AddressClass::P2pkhCompressed => {
            let btc_pubkey = bitcoin::PublicKey::new(*public_key);
            Ok(bitcoin::Address::p2pkh(btc_pubkey, network).to_string())
        }
        AddressClass::P2pkhUncompressed => {
            let mut uncompressed = bitcoin::PublicKey::new(*public_key);
            uncompressed.compressed = false;
            Ok(bitcoin::Address::p2pkh(uncompressed, network).to_string())
        }
        AddressClass::P2shP2wpkh => {
            let btc_pubkey = bitcoin::PublicKey::new(*public_key);
            let compressed = bitcoin::CompressedPublicKey::try_from(btc_pubkey)
                .map_err(|e| BtcMsgError::InvalidEncoding(e.to_string()))?;
            Ok(bitcoin::Address::p2shwpkh(&compressed, network).to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        assert_eq!(varint(5).unwrap(), vec![5]);
        assert_eq!(varint(0xfd).unwrap()[0], 0xfd);
        assert_eq!(varint(0x10000).unwrap()[0], 0xfe);
    }

    #[test]
    fn sign_then_verify_round_trips_hex_and_base64() {
        let private_key = [0x11u8; 32];
        let message = b"hello";
        let signature = sign(message, &private_key).unwrap();
        assert_eq!(signature.0[0], 39);

        let hex_sig = BtcSignature::parse(&signature.to_hex()).unwrap();
        let b64_sig = BtcSignature::parse(&signature.to_base64()).unwrap();

        let (addr1, ok1) = verify(message, &hex_sig, bitcoin::Network::Bitcoin, None).unwrap();
        let (addr2, ok2) = verify(message, &b64_sig, bitcoin::Network::Bitcoin, None).unwrap();
        assert!(ok1 && ok2);
        assert_eq!(addr1, addr2);
        assert!(addr1.starts_with("bc1q"));
    }

    #[test]
    fn rejects_invalid_header() {
        let err = decode_header(200).unwrap_err();
        assert!(matches!(err, BtcMsgError::InvalidHeader(200)));
    }
}
