//! Balance-state tree

use rollup_tree::{
    Hash, Keccak256Hasher, LeafCompressor, LeafProof, LeafStore, MerkleAccumulator, TreeError,
    TreeResult, ZERO_LEAF,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Size of the canonical account encoding
pub const ACCOUNT_ENCODED_LEN: usize = 58;

/// Balance-state leaf
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owner's registry index
    pub pubkey_index: u32,
    /// Token held
    pub token_type: u16,
    /// Balance in token base units
    pub balance: u128,
    /// Next expected nonce
    pub nonce: u32,
    /// Amount the owner consented to burn each period
    pub burn: u128,
    /// Last period a burn was executed for, 0 when never
    pub last_burn: u128,
}

impl Account {
    /// Placeholder carried by proofs of unpopulated slots
    pub const DUMMY: Self = Self {
        pubkey_index: 0,
        token_type: 0,
        balance: 0,
        nonce: 0,
        burn: 0,
        last_burn: 0,
    };

    /// Fresh account with no burn history
    pub fn new(pubkey_index: u32, token_type: u16, balance: u128, nonce: u32) -> Self {
        Self {
            pubkey_index,
            token_type,
            balance,
            nonce,
            ..Self::DUMMY
        }
    }

    /// Big-endian `pubkey_index || token_type || balance || nonce || burn || last_burn`
    pub fn encode(&self) -> [u8; ACCOUNT_ENCODED_LEN] {
        let mut bytes = [0u8; ACCOUNT_ENCODED_LEN];
        bytes[0..4].copy_from_slice(&self.pubkey_index.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.token_type.to_be_bytes());
        bytes[6..22].copy_from_slice(&self.balance.to_be_bytes());
        bytes[22..26].copy_from_slice(&self.nonce.to_be_bytes());
        bytes[26..42].copy_from_slice(&self.burn.to_be_bytes());
        bytes[42..58].copy_from_slice(&self.last_burn.to_be_bytes());
        bytes
    }

    /// Inverse of [`Self::encode`]
    pub fn decode(bytes: &[u8; ACCOUNT_ENCODED_LEN]) -> Self {
        Self {
            pubkey_index: u32::from_be_bytes(be_array(&bytes[0..4])),
            token_type: u16::from_be_bytes(be_array(&bytes[4..6])),
            balance: u128::from_be_bytes(be_array(&bytes[6..22])),
            nonce: u32::from_be_bytes(be_array(&bytes[22..26])),
            burn: u128::from_be_bytes(be_array(&bytes[26..42])),
            last_burn: u128::from_be_bytes(be_array(&bytes[42..58])),
        }
    }

    /// Leaf hash, `keccak(encode())`
    pub fn hash(&self) -> Hash {
        Keccak256Hasher::hash(&self.encode())
    }
}

fn be_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Compresses accounts into state leaves
#[derive(Clone, Copy, Debug, Default)]
pub struct AccountCompressor;

impl LeafCompressor<Account> for AccountCompressor {
    fn compress(&self, data: &Account) -> Hash {
        data.hash()
    }
}

/// Account plus its witness in the state tree
pub type StateMerkleProof = LeafProof<Account>;

/// Result of merging a full deposit subtree into the state tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSubtree {
    /// Subtree position at height `depth`
    pub position: usize,
    /// Subtree height
    pub depth: usize,
    /// Witness of the empty subtree before the merge
    pub empty_proof: Vec<Hash>,
    /// Root of the deposited accounts
    pub subtree_root: Hash,
    /// State root after the merge
    pub new_root: Hash,
}

/// Balance-state tree
#[derive(Clone, Debug)]
pub struct StateTree {
    store: LeafStore<Account, AccountCompressor>,
}

impl StateTree {
    /// Create an empty state tree
    pub fn new(depth: usize) -> TreeResult<Self> {
        Ok(Self {
            store: LeafStore::new(depth, AccountCompressor)?,
        })
    }

    /// Tree depth
    pub fn depth(&self) -> usize {
        self.store.depth()
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no slot is populated
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether every slot is populated
    pub fn is_full(&self) -> bool {
        self.store.is_full()
    }

    /// Slot the next created account lands on
    pub fn next_empty_index(&self) -> usize {
        self.store.next_empty_index()
    }

    /// Current state root
    pub fn root(&self) -> Hash {
        self.store.root()
    }

    /// Append an account, returning its state index
    pub fn create_state(&mut self, account: Account) -> TreeResult<u32> {
        self.store.insert(account).map(|index| index as u32)
    }

    /// Append several accounts in order
    pub fn create_state_bulk(&mut self, accounts: Vec<Account>) -> TreeResult<Vec<u32>> {
        accounts
            .into_iter()
            .map(|account| self.create_state(account))
            .collect()
    }

    /// Reserve a slot known only by its leaf hash
    pub fn insert_genesis_hash(&mut self, hash: Hash) -> TreeResult<u32> {
        self.store.insert_hash(hash).map(|index| index as u32)
    }

    /// Locally known account at `index`
    pub fn get_state(&self, index: u32) -> Option<&Account> {
        self.store.data(index as usize)
    }

    /// Whether the slot holds an account, known locally or by hash
    pub fn exists(&self, index: u32) -> bool {
        self.store.get(index as usize).is_some()
    }

    /// Account at `index` if the slot is populated.
    ///
    /// Reserved empty slots read as absent. A populated slot known only by
    /// hash fails with [`TreeError::MissingData`].
    pub fn lookup(&self, index: u32) -> TreeResult<Option<&Account>> {
        match self.store.get(index as usize) {
            None => Ok(None),
            Some(leaf) => match &leaf.data {
                Some(account) => Ok(Some(account)),
                None if leaf.hash == ZERO_LEAF => Ok(None),
                None => Err(TreeError::MissingData {
                    index: index as usize,
                }),
            },
        }
    }

    /// Overwrite an existing account
    pub fn update_state(&mut self, index: u32, account: Account) -> TreeResult<()> {
        self.store.update(index as usize, account)
    }

    /// Account and witness for `index`
    pub fn get_account_merkle_proof(
        &self,
        index: u32,
        allow_dummy: bool,
    ) -> TreeResult<StateMerkleProof> {
        self.store.get_proof(index as usize, allow_dummy)
    }

    /// Account and witness for `index` as if the `pending` accounts had
    /// already been written
    pub fn get_account_merkle_proof_with_pending(
        &self,
        index: u32,
        pending: &[(u32, &Account)],
        allow_dummy: bool,
    ) -> TreeResult<StateMerkleProof> {
        let pending: Vec<(usize, Hash)> = pending
            .iter()
            .map(|(slot, account)| (*slot as usize, account.hash()))
            .collect();
        self.store
            .get_proof_with_pending(index as usize, &pending, allow_dummy)
    }

    /// Witness of the subtree of height `depth` at `position`
    pub fn get_subtree_merkle_proof(&self, position: usize, depth: usize) -> TreeResult<Vec<Hash>> {
        self.store.get_subtree_proof(position, depth)
    }

    /// First empty subtree of height `depth`
    pub fn find_empty_subtree_position(&self, depth: usize) -> TreeResult<usize> {
        self.store.find_empty_subtree_position(depth)
    }

    /// Merge `2^depth` deposited accounts into the first empty subtree of
    /// that height.
    ///
    /// Slots between the populated prefix and the subtree are reserved as
    /// empty leaves so indices stay aligned.
    pub fn finalise_deposit_subtree(
        &mut self,
        accounts: Vec<Account>,
        depth: usize,
    ) -> CoreResult<DepositSubtree> {
        let expected = 1usize
            .checked_shl(depth as u32)
            .filter(|_| depth <= self.depth())
            .ok_or(TreeError::DepthTooLarge {
                depth,
                max: self.depth(),
            })?;
        if accounts.len() != expected {
            return Err(CoreError::DepositSize {
                depth,
                expected,
                actual: accounts.len(),
            });
        }

        let position = self.find_empty_subtree_position(depth)?;
        let empty_proof = self.get_subtree_merkle_proof(position, depth)?;
        let leaves: Vec<Hash> = accounts.iter().map(Account::hash).collect();
        let subtree_root = MerkleAccumulator::merklize(&leaves)?.root();

        let base = position << depth;
        for (offset, account) in accounts.into_iter().enumerate() {
            let slot = base + offset;
            if slot < self.store.len() {
                self.store.update(slot, account)?;
                continue;
            }
            while self.store.len() < slot {
                self.store.insert_hash(ZERO_LEAF)?;
            }
            self.store.insert(account)?;
        }

        Ok(DepositSubtree {
            position,
            depth,
            empty_proof,
            subtree_root,
            new_root: self.root(),
        })
    }

    /// Snapshot the tree
    pub fn set_checkpoint(&mut self) {
        self.store.set_checkpoint();
    }

    /// Roll back to the last snapshot
    pub fn restore_checkpoint(&mut self) -> TreeResult<()> {
        self.store.restore_checkpoint()
    }

    /// Drop the snapshot
    pub fn discard_checkpoint(&mut self) {
        self.store.discard_checkpoint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rollup_tree::{compute_root, verify_inclusion, zero_hash};

    fn random_account(rng: &mut impl Rng) -> Account {
        Account {
            pubkey_index: rng.gen(),
            token_type: rng.gen(),
            balance: rng.gen(),
            nonce: rng.gen(),
            burn: rng.gen(),
            last_burn: rng.gen(),
        }
    }

    #[test]
    fn test_encoding_layout() {
        let account = Account {
            pubkey_index: 0x0102_0304,
            token_type: 0x0506,
            balance: 7,
            nonce: 8,
            burn: 9,
            last_burn: 10,
        };
        let bytes = account.encode();
        assert_eq!(&bytes[0..6], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(bytes[21], 7);
        assert_eq!(&bytes[22..26], &[0, 0, 0, 8]);
        assert_eq!(bytes[41], 9);
        assert_eq!(bytes[57], 10);
        assert_eq!(account.hash(), Keccak256Hasher::hash(&bytes));
    }

    #[test]
    fn test_encoding_round_trip_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..32 {
            let account = random_account(&mut rng);
            assert_eq!(Account::decode(&account.encode()), account);
        }
    }

    #[test]
    fn test_dummy_is_not_the_zero_leaf() {
        assert_eq!(Account::default(), Account::DUMMY);
        assert_ne!(Account::DUMMY.hash(), ZERO_LEAF);
    }

    #[test]
    fn test_create_and_prove() {
        let mut rng = rand::thread_rng();
        let mut tree = StateTree::new(8).unwrap();
        let accounts: Vec<Account> = (0..20).map(|_| random_account(&mut rng)).collect();
        let indices = tree.create_state_bulk(accounts.clone()).unwrap();
        assert_eq!(indices, (0..20).collect::<Vec<u32>>());

        let root = tree.root();
        for (index, account) in accounts.iter().enumerate() {
            let proof = tree.get_account_merkle_proof(index as u32, false).unwrap();
            assert_eq!(&proof.data, account);
            assert!(verify_inclusion(&root, &account.hash(), index, &proof.siblings));
        }
        let empty = tree.get_account_merkle_proof(20, true).unwrap();
        assert_eq!(empty.data, Account::DUMMY);
        assert!(verify_inclusion(&root, &zero_hash(0), 20, &empty.siblings));
    }

    #[test]
    fn test_genesis_hash_needs_dummy() {
        let mut tree = StateTree::new(4).unwrap();
        tree.insert_genesis_hash([5u8; 32]).unwrap();
        assert!(tree.exists(0));
        assert_eq!(tree.get_state(0), None);
        assert_eq!(
            tree.get_account_merkle_proof(0, false),
            Err(TreeError::MissingData { index: 0 })
        );
    }

    #[test]
    fn test_deposit_subtree() {
        let mut tree = StateTree::new(4).unwrap();
        tree.create_state(Account::new(0, 1, 100, 0)).unwrap();
        let before = tree.root();

        let deposits = vec![Account::new(1, 1, 10, 0), Account::new(2, 1, 20, 0)];
        let merged = tree.finalise_deposit_subtree(deposits.clone(), 1).unwrap();

        assert_eq!(merged.position, 1);
        assert_eq!(compute_root(&zero_hash(1), 1, &merged.empty_proof), before);
        assert_eq!(compute_root(&merged.subtree_root, 1, &merged.empty_proof), merged.new_root);
        assert_eq!(tree.root(), merged.new_root);
        assert_eq!(tree.get_state(2), Some(&deposits[0]));
        assert_eq!(tree.get_state(3), Some(&deposits[1]));
        // slot 1 is reserved but still empty
        assert_eq!(tree.store.get(1).unwrap().hash, ZERO_LEAF);
    }

    #[test]
    fn test_deposit_subtree_size_mismatch() {
        let mut tree = StateTree::new(4).unwrap();
        let err = tree
            .finalise_deposit_subtree(vec![Account::DUMMY; 3], 1)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::DepositSize {
                depth: 1,
                expected: 2,
                actual: 3
            }
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn test_checkpoint_forwarding() {
        let mut tree = StateTree::new(4).unwrap();
        tree.create_state(Account::new(0, 1, 100, 0)).unwrap();
        tree.set_checkpoint();
        let root = tree.root();

        tree.update_state(0, Account::new(0, 1, 50, 1)).unwrap();
        tree.create_state(Account::new(1, 1, 50, 0)).unwrap();
        tree.restore_checkpoint().unwrap();

        assert_eq!(tree.root(), root);
        assert_eq!(tree.len(), 1);
    }
}
