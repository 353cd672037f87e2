//! BLS signatures over `(message_hash, domain)` pairs.

use std::fmt;

use blst::{
    min_pk::{PublicKey, SecretKey, Signature},
    BLST_ERROR,
};
use ethereum_types::H256;
use thiserror::Error;

use crate::types::{BlsPublicKey, BlsSignature, DepositData};

/// Hash-to-curve ciphersuite used for every signature.
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Verifies that `signature` was produced by `pubkey` over `message_hash`
/// under `domain`.
///
/// Verifiers are pure: the same inputs always give the same answer.
pub trait SignatureVerifier: Send + Sync {
    fn bls_verify(
        &self,
        pubkey: &BlsPublicKey,
        message_hash: H256,
        signature: &BlsSignature,
        domain: u64,
    ) -> bool;
}

/// The bytes actually signed: `message_hash || domain` (big endian).
pub fn signing_message(message_hash: H256, domain: u64) -> [u8; 40] {
    let mut message = [0; 40];
    message[..32].copy_from_slice(message_hash.as_bytes());
    message[32..].copy_from_slice(&domain.to_be_bytes());
    message
}

/// [`SignatureVerifier`] backed by `blst`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlstVerifier;

impl SignatureVerifier for BlstVerifier {
    fn bls_verify(
        &self,
        pubkey: &BlsPublicKey,
        message_hash: H256,
        signature: &BlsSignature,
        domain: u64,
    ) -> bool {
        let Ok(pk) = PublicKey::from_bytes(&pubkey.0) else {
            return false;
        };
        let Ok(sig) = Signature::from_bytes(&signature.0) else {
            return false;
        };

        let message = signing_message(message_hash, domain);
        sig.verify(true, &message, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }
}

/// Checks the proof of possession carried by a deposit.
pub fn verify_deposit_signature(
    verifier: &dyn SignatureVerifier,
    deposit: &DepositData,
    domain: u64,
) -> bool {
    verifier.bls_verify(
        &deposit.pubkey,
        deposit.signing_root(),
        &deposit.signature,
        domain,
    )
}

#[derive(Clone, Debug, Error)]
pub enum KeyError {
    #[error("key material must be at least 32 bytes, got {0}")]
    ShortSeed(usize),

    #[error("key generation failed: {0:?}")]
    Generation(BLST_ERROR),
}

/// A BLS secret key and its public key.
#[derive(Clone)]
pub struct Keypair {
    secret: SecretKey,
    public: BlsPublicKey,
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Derives a key from at least 32 bytes of key material.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KeyError> {
        if seed.len() < 32 {
            return Err(KeyError::ShortSeed(seed.len()));
        }

        let secret = SecretKey::key_gen(seed, &[]).map_err(KeyError::Generation)?;
        let public = BlsPublicKey(secret.sk_to_pk().to_bytes());
        Ok(Self { secret, public })
    }

    pub const fn public_key(&self) -> BlsPublicKey {
        self.public
    }

    pub fn sign(&self, message_hash: H256, domain: u64) -> BlsSignature {
        let message = signing_message(message_hash, domain);
        BlsSignature(self.secret.sign(&message, BLS_DST, &[]).to_bytes())
    }
}
