//! BIP-340 Schnorr signing over raw 32-byte digests, with a blind-sign
//! confirmation gate: the digest can't be semantically decoded, so signing
//! without an explicit review assertion is refused at the engine boundary
//! rather than left to a UI choice.

use bitcoin::secp256k1::schnorr::Signature as SchnorrSig;
use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey as SecpXOnly};
use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum SchnorrError {
    #[error("digest must be exactly 32 bytes")]
    InvalidDigestLength,

    #[error("signature must be exactly 64 bytes")]
    InvalidSignatureLength,

    #[error("x-only public key must be exactly 32 bytes")]
    InvalidPubkeyLength,

    #[error("signing refused: caller did not confirm review of the raw digest")]
    BlindSignNotConfirmed,

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

impl SchnorrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchnorrError::BlindSignNotConfirmed => ErrorKind::BlindSignNotConfirmed,
            _ => ErrorKind::InvalidInput,
        }
    }
}

/// A Taproot-native x-only public key. A newtype rather than a bare
/// `[u8; 32]` so the 32-byte-only boundary (no 33-byte compressed form) is
/// enforced at the type level, per the engine's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XOnlyPubkey([u8; 32]);

impl XOnlyPubkey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SchnorrError> {
        if bytes.len() != 32 {
            return Err(SchnorrError::InvalidPubkeyLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(XOnlyPubkey(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// The envelope returned instead of a signature when blind-sign
/// confirmation was withheld: a warning carrying the digest for review.
#[derive(Debug)]
pub struct BlindSignWarning {
    pub digest: [u8; 32],
    pub message: &'static str,
}

/// Signs `digest` (exactly 32 bytes) with `private_key` (exactly 32 bytes).
/// `aux_rand` is optional extra randomness per BIP-340. Only proceeds when
/// `confirmed_review` is true; otherwise returns a warning envelope and
/// does not sign.
pub fn sign(
    digest: &[u8],
    private_key: &[u8; 32],
    aux_rand: Option<&[u8; 32]>,
    confirmed_review: bool,
) -> Result<Result<[u8; 64], BlindSignWarning>, SchnorrError> {
    if digest.len() != 32 {
        return Err(SchnorrError::InvalidDigestLength);
    }
    let mut digest_arr = [0u8; 32];
    digest_arr.copy_from_slice(digest);

    if !confirmed_review {
        return Ok(Err(BlindSignWarning {
            digest: digest_arr,
            message: "raw digest signing requires explicit review confirmation",
        }));
    }

    let secp = Secp256k1::new();
    let secret_key =
        SecretKey::from_slice(private_key).map_err(|e| SchnorrError::InvalidKey(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &secret_key);
    let msg = Message::from_digest(digest_arr);

    let signature = match aux_rand {
        Some(rand) => secp.sign_schnorr_with_aux_rand(&msg, &keypair, rand),
        None => secp.sign_schnorr(&msg, &keypair),
    };

    Ok(Ok(*signature.as_ref()))
}

/// Verifies a 64-byte BIP-340 signature over `digest` against
/// `xonly_pubkey`.
pub fn verify(digest: &[u8], signature: &[u8], xonly_pubkey: &XOnlyPubkey) -> Result<bool, SchnorrError> {
    if digest.len() != 32 {
        return Err(SchnorrError::InvalidDigestLength);
    }
    if signature.len() != 64 {
        return Err(SchnorrError::InvalidSignatureLength);
    }

    let secp = Secp256k1::new();
    let pubkey = SecpXOnly::from_slice(xonly_pubkey.as_bytes())
        .map_err(|e| SchnorrError::InvalidKey(e.to_string()))?;
    let sig = SchnorrSig::from_slice(signature)
        .map_err(|_| SchnorrError::InvalidSignatureLength)?;
    let mut digest_arr = [0u8; 32];
    digest_arr.copy_from_slice(digest);
    let msg = Message::from_digest(digest_arr);

    Ok(secp.verify_schnorr(&sig, &msg, &pubkey).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let secp = Secp256k1::new();
        let private_key = [0x33u8; 32];
        let secret_key = SecretKey::from_slice(&private_key).unwrap();
        let keypair = Keypair::from_secret_key(&secp, &secret_key);
        let (xonly, _) = keypair.x_only_public_key();

        let digest = [0x44u8; 32];
        let signature = sign(&digest, &private_key, None, true).unwrap().unwrap();

        let xonly_pubkey = XOnlyPubkey::from_bytes(&xonly.serialize()).unwrap();
        assert!(verify(&digest, &signature, &xonly_pubkey).unwrap());
    }

    #[test]
    fn refuses_to_sign_without_confirmation() {
        let private_key = [0x55u8; 32];
        let digest = [0x66u8; 32];
        let result = sign(&digest, &private_key, None, false).unwrap();
        assert!(result.is_err());
        if let Err(warning) = result {
            assert_eq!(warning.digest, digest);
        }
    }

    #[test]
    fn rejects_wrong_length_digest() {
        let private_key = [0x77u8; 32];
        let err = sign(&[0u8; 10], &private_key, None, true).unwrap_err();
        assert!(matches!(err, SchnorrError::InvalidDigestLength));
    }
}
