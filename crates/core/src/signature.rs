//! Aggregate-signature capability
//!
//! Pairing arithmetic lives outside this workspace. The engine only needs
//! to sign, aggregate and verify, so it talks to a [`SignatureScheme`].

use rollup_tree::{Hash, Keccak256Hasher};
use serde::{Deserialize, Serialize};

use crate::registry::PublicKey;

/// Signing domain separating deployments
pub type Domain = [u8; 32];

/// G1 signature as two 32-byte words
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub [[u8; 32]; 2]);

impl Signature {
    /// Raw 64-byte encoding
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.0[0]);
        bytes[32..].copy_from_slice(&self.0[1]);
        bytes
    }
}

/// Secret signing key
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SecretKey(pub [u8; 32]);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Sign, aggregate and verify
pub trait SignatureScheme: Send + Sync {
    /// Public key of `secret`
    fn public_key(&self, secret: &SecretKey) -> PublicKey;

    /// Sign `message` under `domain`
    fn sign(&self, domain: &Domain, message: &[u8], secret: &SecretKey) -> Signature;

    /// Combine signatures into one
    fn aggregate(&self, signatures: &[Signature]) -> Signature;

    /// Check that `signature` aggregates one signature per
    /// `(pubkeys[i], messages[i])` pair
    fn verify_aggregate(
        &self,
        signature: &Signature,
        pubkeys: &[PublicKey],
        messages: &[Vec<u8>],
        domain: &Domain,
    ) -> bool;
}

/// Keccak stand-in for BLS. Signatures are derivable from public data, so
/// this is only fit for tests and local simulation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockSignatureScheme;

impl MockSignatureScheme {
    fn expected(domain: &Domain, pubkey: &PublicKey, message: &[u8]) -> Signature {
        let first = Keccak256Hasher::hash_packed(&[
            domain.as_slice(),
            pubkey.to_bytes().as_slice(),
            message,
        ]);
        let second = Keccak256Hasher::hash(&first);
        Signature([first, second])
    }

    fn xor(left: Signature, right: &Signature) -> Signature {
        let mut words = left.0;
        for (word, other) in words.iter_mut().zip(right.0.iter()) {
            for (byte, other) in word.iter_mut().zip(other.iter()) {
                *byte ^= other;
            }
        }
        Signature(words)
    }
}

impl SignatureScheme for MockSignatureScheme {
    fn public_key(&self, secret: &SecretKey) -> PublicKey {
        let mut words = [[0u8; 32]; 4];
        let mut seed: Hash = secret.0;
        for word in &mut words {
            seed = Keccak256Hasher::hash(&seed);
            *word = seed;
        }
        PublicKey(words)
    }

    fn sign(&self, domain: &Domain, message: &[u8], secret: &SecretKey) -> Signature {
        Self::expected(domain, &self.public_key(secret), message)
    }

    fn aggregate(&self, signatures: &[Signature]) -> Signature {
        signatures
            .iter()
            .fold(Signature::default(), |acc, signature| Self::xor(acc, signature))
    }

    fn verify_aggregate(
        &self,
        signature: &Signature,
        pubkeys: &[PublicKey],
        messages: &[Vec<u8>],
        domain: &Domain,
    ) -> bool {
        if pubkeys.len() != messages.len() {
            return false;
        }
        let expected = pubkeys
            .iter()
            .zip(messages)
            .fold(Signature::default(), |acc, (pubkey, message)| {
                Self::xor(acc, &Self::expected(domain, pubkey, message))
            });
        expected == *signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: Domain = [9u8; 32];

    #[test]
    fn test_aggregate_verifies() {
        let scheme = MockSignatureScheme;
        let secrets = [SecretKey([1u8; 32]), SecretKey([2u8; 32])];
        let messages = vec![b"first".to_vec(), b"second".to_vec()];

        let signatures: Vec<Signature> = secrets
            .iter()
            .zip(&messages)
            .map(|(secret, message)| scheme.sign(&DOMAIN, message, secret))
            .collect();
        let aggregate = scheme.aggregate(&signatures);
        let pubkeys: Vec<PublicKey> = secrets.iter().map(|s| scheme.public_key(s)).collect();

        assert!(scheme.verify_aggregate(&aggregate, &pubkeys, &messages, &DOMAIN));
        assert!(!scheme.verify_aggregate(&aggregate, &pubkeys, &messages, &[0u8; 32]));
        assert!(!scheme.verify_aggregate(&aggregate, &pubkeys[..1], &messages, &DOMAIN));

        let swapped = vec![messages[1].clone(), messages[0].clone()];
        assert!(!scheme.verify_aggregate(&aggregate, &pubkeys, &swapped, &DOMAIN));
    }

    #[test]
    fn test_secret_key_is_redacted() {
        assert_eq!(format!("{:?}", SecretKey([7u8; 32])), "SecretKey(..)");
    }
}
