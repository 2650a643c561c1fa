//! Pillar agent signer: a domain-bound SIP-018 signer for a smart-wallet
//! principal, used by the Pillar smart-wallet flow.

use std::collections::BTreeMap;

use crate::config::Network;
use crate::derivation::c32::decode_c32check_address;
use crate::sip018::clarity::ClarityValue;
use crate::sip018::{self, Domain, RsvSignature, Sip018Error};

/// Generates monotonically-unique auth ids. The default implementation
/// uses the wall-clock in milliseconds, matching the source's scheme; the
/// contract only requires monotonic uniqueness per [`Sip018Error`] callers,
/// so alternate generators (e.g. an atomic counter) can be substituted where
/// clock monotonicity isn't guaranteed.
pub trait AuthIdGenerator: Send + Sync {
    fn next_auth_id(&self) -> u64;
}

pub struct WallClockAuthIdGenerator;

impl AuthIdGenerator for WallClockAuthIdGenerator {
    fn next_auth_id(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock is after the unix epoch")
            .as_millis() as u64
    }
}

pub struct PillarSignResult {
    pub auth_id: u64,
    pub signature: RsvSignature,
    pub pubkey_compressed: [u8; 33],
}

/// Bound to a specific smart-wallet principal at unlock time.
pub struct PillarAgentSigner<'a> {
    pub smart_wallet_principal: &'a str,
    pub network: Network,
    pub auth_id_generator: &'a dyn AuthIdGenerator,
}

impl<'a> PillarAgentSigner<'a> {
    pub fn new(
        smart_wallet_principal: &'a str,
        network: Network,
        auth_id_generator: &'a dyn AuthIdGenerator,
    ) -> Self {
        Self {
            smart_wallet_principal,
            network,
            auth_id_generator,
        }
    }

    fn domain(&self) -> Result<Domain, Sip018Error> {
        let (version, hash160) = decode_c32check_address(self.smart_wallet_principal)
            .map_err(|e| Sip018Error::InvalidSignature(format!("bad smart-wallet principal: {e}")))?;
        Ok(Domain {
            name: "smart-wallet-standard".to_string(),
            version: "1.0.0".to_string(),
            chain_id: 1,
            wallet_principal: Some((version, hash160)),
        })
    }

    /// Builds a `"pillar-boost"` topic tuple with the given fields, signs
    /// it under the smart-wallet-standard domain, and returns
    /// `{auth_id, signature, pubkey}`.
    pub fn sign_boost(
        &self,
        sbtc_amount: u128,
        aeusdc_to_borrow: u128,
        min_sbtc_from_swap: u128,
        private_key: &[u8; 32],
    ) -> Result<PillarSignResult, Sip018Error> {
        let auth_id = self.auth_id_generator.next_auth_id();

        let mut fields = BTreeMap::new();
        fields.insert(
            "topic".to_string(),
            ClarityValue::StringAscii("pillar-boost".to_string()),
        );
        fields.insert("auth-id".to_string(), ClarityValue::UInt(auth_id as u128));
        fields.insert("sbtc-amount".to_string(), ClarityValue::UInt(sbtc_amount));
        fields.insert(
            "aeusdc-to-borrow".to_string(),
            ClarityValue::UInt(aeusdc_to_borrow),
        );
        fields.insert(
            "min-sbtc-from-swap".to_string(),
            ClarityValue::UInt(min_sbtc_from_swap),
        );
        let message = ClarityValue::Tuple(fields);

        let domain = self.domain()?;
        let signature = sip018::sign(&message, &domain, private_key)?;

        let secp = bitcoin::secp256k1::Secp256k1::new();
        let secret_key = bitcoin::secp256k1::SecretKey::from_slice(private_key)
            .map_err(|e| Sip018Error::InvalidSignature(e.to_string()))?;
        let public_key = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &secret_key);

        Ok(PillarSignResult {
            auth_id,
            signature,
            pubkey_compressed: public_key.serialize(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derivation::c32::c32check_address;

    #[test]
    fn sign_boost_produces_monotonic_auth_ids() {
        let hash160 = [0x01u8; 20];
        let principal = c32check_address(22, &hash160);
        let generator = WallClockAuthIdGenerator;
        let signer = PillarAgentSigner::new(&principal, Network::Mainnet, &generator);
        let private_key = [0x99u8; 32];

        let first = signer.sign_boost(1_000, 500, 900, &private_key).unwrap();
        let second = signer.sign_boost(1_000, 500, 900, &private_key).unwrap();
        assert!(second.auth_id >= first.auth_id);
    }
}
