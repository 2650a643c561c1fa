//! Password-based authenticated encryption for keystore blobs.
//!
//! Keys are stretched with Argon2id (default, for all newly-written
//! keystores) or PBKDF2-SHA512 (decode-only compatibility path for
//! keystores written by older builds), then used as an AES-256-GCM key. A
//! fresh 16-byte salt and 12-byte nonce are generated per encryption; the
//! GCM tag is bundled into the ciphertext the way `aes-gcm` returns it,
//! mirroring the teacher's own `Keystore::save`/`load` shape.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroize;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("malformed keystore blob: {0}")]
    Malformed(String),

    #[error("unsupported algorithm tag: {0}")]
    UnsupportedAlgorithm(String),
}

impl EncryptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EncryptionError::WrongPassword => ErrorKind::WrongPassword,
            EncryptionError::Kdf(_) | EncryptionError::Malformed(_) => ErrorKind::InvalidInput,
            EncryptionError::UnsupportedAlgorithm(_) => ErrorKind::InvalidInput,
        }
    }
}

/// The `kdf` discriminant stored in a keystore blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdfAlgorithm {
    Argon2id,
    Pbkdf2Sha512,
}

/// KDF parameters as stored alongside the ciphertext. Kept as an untyped
/// JSON object on the wire so old and new parameter shapes round-trip
/// without a schema migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParamsOnDisk {
    #[serde(flatten)]
    pub params: serde_json::Value,
}

/// The `encrypted` sub-object of a keystore blob, matching the on-disk
/// shape `{alg, kdf, kdf_params, salt, nonce, ciphertext}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub alg: String,
    pub kdf: KdfAlgorithm,
    pub kdf_params: KdfParamsOnDisk,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

const AES_GCM_256: &str = "aes-gcm-256";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

fn derive_key_argon2id(
    password: &[u8],
    salt: &[u8],
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
) -> Result<[u8; 32], EncryptionError> {
    let params = Params::new(memory_kib, iterations, parallelism, Some(32))
        .map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    Ok(key)
}

fn derive_key_pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::<Hmac<Sha512>>(password, salt, iterations, &mut key);
    key
}

/// Encrypts `plaintext` under `password` using Argon2id, per
/// [`crate::config::KdfParams::default`] unless `kdf` overrides it.
pub fn encrypt(
    plaintext: &[u8],
    password: &str,
    kdf: crate::config::KdfParams,
) -> Result<EncryptedPayload, EncryptionError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let (mut key, kdf_algo, kdf_params_json) = match kdf {
        crate::config::KdfParams::Argon2id {
            memory_kib,
            iterations,
            parallelism,
        } => {
            let key = derive_key_argon2id(password.as_bytes(), &salt, memory_kib, iterations, parallelism)?;
            (
                key,
                KdfAlgorithm::Argon2id,
                serde_json::json!({
                    "memory_kib": memory_kib,
                    "iterations": iterations,
                    "parallelism": parallelism,
                }),
            )
        }
        crate::config::KdfParams::Pbkdf2Sha512 { iterations } => {
            let key = derive_key_pbkdf2(password.as_bytes(), &salt, iterations);
            (
                key,
                KdfAlgorithm::Pbkdf2Sha512,
                serde_json::json!({ "iterations": iterations }),
            )
        }
    };

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    key.zeroize();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| EncryptionError::Kdf(e.to_string()))?;

    Ok(EncryptedPayload {
        alg: AES_GCM_256.to_string(),
        kdf: kdf_algo,
        kdf_params: KdfParamsOnDisk {
            params: kdf_params_json,
        },
        salt: hex::encode(salt),
        nonce: hex::encode(nonce_bytes),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Decrypts a keystore blob under `password`. Returns
/// [`EncryptionError::WrongPassword`] when the AEAD tag fails to verify —
/// this is the sole signal the caller has to distinguish a bad password
/// from a corrupt file, matching the specification's error taxonomy.
pub fn decrypt(payload: &EncryptedPayload, password: &str) -> Result<Vec<u8>, EncryptionError> {
    if payload.alg != AES_GCM_256 {
        return Err(EncryptionError::UnsupportedAlgorithm(payload.alg.clone()));
    }

    let salt = hex::decode(&payload.salt)
        .map_err(|e| EncryptionError::Malformed(format!("salt: {e}")))?;
    let nonce_bytes = hex::decode(&payload.nonce)
        .map_err(|e| EncryptionError::Malformed(format!("nonce: {e}")))?;
    let ciphertext = hex::decode(&payload.ciphertext)
        .map_err(|e| EncryptionError::Malformed(format!("ciphertext: {e}")))?;

    let mut key = match payload.kdf {
        KdfAlgorithm::Argon2id => {
            let memory_kib = payload
                .kdf_params
                .params
                .get("memory_kib")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| EncryptionError::Malformed("missing memory_kib".into()))?
                as u32;
            let iterations = payload
                .kdf_params
                .params
                .get("iterations")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| EncryptionError::Malformed("missing iterations".into()))?
                as u32;
            let parallelism = payload
                .kdf_params
                .params
                .get("parallelism")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| EncryptionError::Malformed("missing parallelism".into()))?
                as u32;
            derive_key_argon2id(password.as_bytes(), &salt, memory_kib, iterations, parallelism)?
        }
        KdfAlgorithm::Pbkdf2Sha512 => {
            let iterations = payload
                .kdf_params
                .params
                .get("iterations")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| EncryptionError::Malformed("missing iterations".into()))?
                as u32;
            derive_key_pbkdf2(password.as_bytes(), &salt, iterations)
        }
    };

    let cipher =
        Aes256Gcm::new_from_slice(&key).map_err(|e| EncryptionError::Kdf(e.to_string()))?;
    key.zeroize();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| EncryptionError::WrongPassword)?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;

    fn fast_argon2() -> KdfParams {
        // Smallest valid argon2 cost so tests stay fast.
        KdfParams::Argon2id {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn round_trip_argon2id() {
        let plaintext = b"super secret seed bytes";
        let payload = encrypt(plaintext, "correct horse", fast_argon2()).unwrap();
        let decrypted = decrypt(&payload, "correct horse").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_password_rejected() {
        let payload = encrypt(b"data", "right", fast_argon2()).unwrap();
        let err = decrypt(&payload, "wrong").unwrap_err();
        assert!(matches!(err, EncryptionError::WrongPassword));
    }

    #[test]
    fn round_trip_pbkdf2_compat_path() {
        let plaintext = b"legacy keystore contents";
        let payload = encrypt(
            plaintext,
            "pw",
            KdfParams::Pbkdf2Sha512 { iterations: 100_000 },
        )
        .unwrap();
        assert_eq!(payload.kdf, KdfAlgorithm::Pbkdf2Sha512);
        let decrypted = decrypt(&payload, "pw").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn fresh_salt_and_nonce_per_encryption() {
        let a = encrypt(b"x", "pw", fast_argon2()).unwrap();
        let b = encrypt(b"x", "pw", fast_argon2()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.nonce, b.nonce);
    }
}
