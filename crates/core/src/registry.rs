//! Public-key registry

use std::collections::HashMap;

use rollup_tree::{Hash, Keccak256Hasher, LeafCompressor, LeafProof, LeafStore, TreeResult};
use serde::{Deserialize, Serialize};

/// G2 public key as four 32-byte words
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [[u8; 32]; 4]);

impl PublicKey {
    /// Raw 128-byte encoding
    pub fn to_bytes(&self) -> [u8; 128] {
        let mut bytes = [0u8; 128];
        for (chunk, word) in bytes.chunks_mut(32).zip(self.0.iter()) {
            chunk.copy_from_slice(word);
        }
        bytes
    }

    /// Registry leaf hash, `keccak(pubkey)`
    pub fn hash(&self) -> Hash {
        Keccak256Hasher::hash(&self.to_bytes())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes()))
    }
}

/// Registry leaf
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyLeaf {
    /// Registered key
    pub pubkey: PublicKey,
}

impl PublicKeyLeaf {
    /// Placeholder carried by proofs of unpopulated slots
    pub const DUMMY: Self = Self {
        pubkey: PublicKey([[0u8; 32]; 4]),
    };
}

/// Compresses public keys into registry leaves
#[derive(Clone, Copy, Debug, Default)]
pub struct PubkeyCompressor;

impl LeafCompressor<PublicKeyLeaf> for PubkeyCompressor {
    fn compress(&self, data: &PublicKeyLeaf) -> Hash {
        data.pubkey.hash()
    }
}

/// Public key plus its witness in the registry
pub type PubkeyMerkleProof = LeafProof<PublicKeyLeaf>;

/// Registry of public keys. Registration order is the pubkey index.
#[derive(Clone, Debug)]
pub struct AccountRegistry {
    store: LeafStore<PublicKeyLeaf, PubkeyCompressor>,
    by_hash: HashMap<Hash, u32>,
}

impl AccountRegistry {
    /// Create an empty registry
    pub fn new(depth: usize) -> TreeResult<Self> {
        Ok(Self {
            store: LeafStore::new(depth, PubkeyCompressor)?,
            by_hash: HashMap::new(),
        })
    }

    /// Tree depth
    pub fn depth(&self) -> usize {
        self.store.depth()
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether no further key can be registered
    pub fn is_full(&self) -> bool {
        self.store.is_full()
    }

    /// Index the next registration lands on
    pub fn next_empty_index(&self) -> usize {
        self.store.next_empty_index()
    }

    /// Registry root, the account root of a commitment
    pub fn root(&self) -> Hash {
        self.store.root()
    }

    /// Register a key, returning its pubkey index
    pub fn insert_public_key(&mut self, pubkey: PublicKey) -> TreeResult<u32> {
        let hash = pubkey.hash();
        let index = self.store.insert(PublicKeyLeaf { pubkey })? as u32;
        self.by_hash.entry(hash).or_insert(index);
        Ok(index)
    }

    /// Same as [`Self::insert_public_key`]
    pub fn register(&mut self, pubkey: PublicKey) -> TreeResult<u32> {
        self.insert_public_key(pubkey)
    }

    /// Register a key known only by its leaf hash
    pub fn insert_hash(&mut self, hash: Hash) -> TreeResult<u32> {
        let index = self.store.insert_hash(hash)? as u32;
        self.by_hash.entry(hash).or_insert(index);
        Ok(index)
    }

    /// Pubkey index of a registered key
    pub fn lookup(&self, pubkey: &PublicKey) -> Option<u32> {
        self.by_hash.get(&pubkey.hash()).copied()
    }

    /// Locally known key at `index`
    pub fn get(&self, index: u32) -> Option<&PublicKey> {
        self.store.data(index as usize).map(|leaf| &leaf.pubkey)
    }

    /// Key and witness for `index`
    pub fn get_pda_merkle_proof(
        &self,
        index: u32,
        allow_dummy: bool,
    ) -> TreeResult<PubkeyMerkleProof> {
        self.store.get_proof(index as usize, allow_dummy)
    }

    /// Witness for `index`
    pub fn witness(&self, index: u32) -> TreeResult<Vec<Hash>> {
        self.store.siblings(index as usize)
    }

    /// Snapshot the registry
    pub fn set_checkpoint(&mut self) {
        self.store.set_checkpoint();
    }

    /// Roll back to the last snapshot
    pub fn restore_checkpoint(&mut self) -> TreeResult<()> {
        self.store.restore_checkpoint()?;
        self.reindex();
        Ok(())
    }

    /// Drop the snapshot
    pub fn discard_checkpoint(&mut self) {
        self.store.discard_checkpoint();
    }

    fn reindex(&mut self) {
        self.by_hash.clear();
        for (index, leaf) in self.store.items().iter().enumerate() {
            self.by_hash.entry(leaf.hash).or_insert(index as u32);
        }
    }
}
