//! Index-keyed vectors stored in a [`WitnessTrie`].
//!
//! Element `i` lives under [`TrieKey::from_index`]`(i)`, and the length is
//! mixed into the root. Because the backing trie may be partial, every read or
//! write of an element the witness does not cover fails with
//! [`AccessError::Witness`] instead of yielding a default.

use std::{fmt::Debug, marker::PhantomData};

use ethereum_types::H256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use thiserror::Error;
use witness_trie::{
    merkle::mix_in_length,
    partial_trie::TrieOpError,
    trie_subsets::{create_trie_subset, SubsetTrieError},
    TrieKey, WitnessTrie,
};

use crate::{error::ErrorCategory, types::expect_items};

pub type AccessResult<T> = Result<T, AccessError>;

/// Failure to read or write a piece of (possibly partial) state.
#[derive(Clone, Debug, Error)]
pub enum AccessError {
    #[error("index {index} is out of range (length {len})")]
    OutOfRange { index: u64, len: u64 },

    /// The state is a witness that does not cover the accessed element.
    #[error(transparent)]
    Witness(#[from] TrieOpError),

    #[error("cannot reduce state to a witness: {0}")]
    Subset(#[from] SubsetTrieError),

    #[error("corrupt state entry: {0}")]
    Decode(#[from] DecoderError),

    #[error("an entry at index {0} was expected but is missing")]
    Missing(u64),

    #[error("the root of slot {slot} is not available at slot {current}")]
    RootUnavailable { slot: u64, current: u64 },
}

impl AccessError {
    /// `true` if the failure is caused by a witness that is too small.
    pub const fn is_incomplete_witness(&self) -> bool {
        matches!(self, Self::Witness(_) | Self::Subset(_))
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::OutOfRange { .. } => ErrorCategory::Malformed,
            Self::RootUnavailable { .. } => ErrorCategory::Temporal,
            _ => ErrorCategory::Consistency,
        }
    }
}

/// A vector of RLP-encodable elements, backed by a [`WitnessTrie`].
///
/// Indices below [`Self::len`] that were never written read as `None`.
pub struct TrieVec<T> {
    len: u64,
    trie: WitnessTrie,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Debug for TrieVec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrieVec")
            .field("len", &self.len)
            .field("root", &self.trie.hash())
            .finish()
    }
}

impl<T> Clone for TrieVec<T> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            trie: self.trie.clone(),
            _ty: PhantomData,
        }
    }
}

impl<T> PartialEq for TrieVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.trie == other.trie
    }
}

impl<T> Eq for TrieVec<T> {}

impl<T> Default for TrieVec<T> {
    fn default() -> Self {
        Self::with_len(0)
    }
}

impl<T> TrieVec<T> {
    /// A vector of `len` unset elements.
    pub fn with_len(len: u64) -> Self {
        Self {
            len,
            trie: WitnessTrie::default(),
            _ty: PhantomData,
        }
    }

    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extends the vector with unset elements. Never shrinks it.
    pub fn grow_to(&mut self, len: u64) {
        self.len = self.len.max(len);
    }

    pub fn root(&self) -> H256 {
        mix_in_length(self.trie.hash(), self.len)
    }

    /// The same vector, with everything but the elements at `indices` hashed
    /// out. Indices past the end stay writable once the vector grows.
    pub fn subset(&self, indices: impl IntoIterator<Item = u64>) -> AccessResult<Self> {
        let keys = indices.into_iter().map(TrieKey::from_index);

        Ok(Self {
            len: self.len,
            trie: create_trie_subset(&self.trie, keys)?,
            _ty: PhantomData,
        })
    }

    fn check_range(&self, index: u64) -> AccessResult<()> {
        match index < self.len {
            true => Ok(()),
            false => Err(AccessError::OutOfRange {
                index,
                len: self.len,
            }),
        }
    }
}

impl<T: Encodable + Decodable> TrieVec<T> {
    pub fn get(&self, index: u64) -> AccessResult<Option<T>> {
        self.check_range(index)?;
        Ok(self
            .trie
            .get(TrieKey::from_index(index))?
            .map(rlp::decode)
            .transpose()?)
    }

    pub fn set(&mut self, index: u64, value: &T) -> AccessResult<()> {
        self.check_range(index)?;
        self.trie
            .insert(TrieKey::from_index(index), rlp::encode(value).to_vec())?;
        Ok(())
    }

    /// Appends `value`, returning its index.
    pub fn push(&mut self, value: &T) -> AccessResult<u64> {
        let index = self.len;
        self.trie
            .insert(TrieKey::from_index(index), rlp::encode(value).to_vec())?;
        self.len += 1;
        Ok(index)
    }
}

impl<T> Encodable for TrieVec<T> {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2).append(&self.len).append(&self.trie);
    }
}

impl<T> Decodable for TrieVec<T> {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 2)?;
        Ok(Self {
            len: rlp.val_at(0)?,
            trie: rlp.val_at(1)?,
            _ty: PhantomData,
        })
    }
}

/// A fixed-length ring of roots indexed by `slot % len`. Unwritten entries
/// read as the zero digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RootRing(TrieVec<H256>);

impl RootRing {
    /// # Panics
    /// Panics if `len` is zero.
    pub fn new(len: u64) -> Self {
        assert!(len > 0, "a root ring needs at least one entry");
        Self(TrieVec::with_len(len))
    }

    pub const fn len(&self) -> u64 {
        self.0.len()
    }

    /// Index of `slot` in the ring.
    pub const fn position(&self, slot: u64) -> u64 {
        slot % self.0.len()
    }

    pub fn get(&self, slot: u64) -> AccessResult<H256> {
        Ok(self.0.get(self.position(slot))?.unwrap_or_default())
    }

    /// Like [`Self::get`], but an unwritten entry is an error.
    pub fn recorded(&self, slot: u64) -> AccessResult<H256> {
        let position = self.position(slot);
        self.0.get(position)?.ok_or(AccessError::Missing(position))
    }

    pub fn record(&mut self, slot: u64, root: H256) -> AccessResult<()> {
        self.0.set(self.position(slot), &root)
    }

    pub fn root(&self) -> H256 {
        self.0.root()
    }

    /// Witness covering the entries of `slots`.
    pub fn subset(&self, slots: impl IntoIterator<Item = u64>) -> AccessResult<Self> {
        let len = self.len();
        Ok(Self(self.0.subset(slots.into_iter().map(|s| s % len))?))
    }
}

impl Encodable for RootRing {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.0.rlp_append(s);
    }
}

impl Decodable for RootRing {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let inner = TrieVec::decode(rlp)?;
        match inner.is_empty() {
            true => Err(DecoderError::Custom("root ring with no entries")),
            false => Ok(Self(inner)),
        }
    }
}

/// Per-script state digests of a shard. The vector grows on demand, and
/// scripts that never ran read as the zero digest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecEnvStates(TrieVec<H256>);

impl ExecEnvStates {
    pub const fn len(&self) -> u64 {
        self.0.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, script_id: u64) -> AccessResult<H256> {
        Ok(self.0.get(script_id)?.unwrap_or_default())
    }

    /// Stores the digest of `script_id`, extending the vector if needed.
    pub fn set(&mut self, script_id: u64, digest: H256) -> AccessResult<()> {
        self.0.grow_to(script_id.saturating_add(1));
        self.0.set(script_id, &digest)
    }

    pub fn root(&self) -> H256 {
        self.0.root()
    }

    pub fn subset(&self, script_ids: impl IntoIterator<Item = u64>) -> AccessResult<Self> {
        Ok(Self(self.0.subset(script_ids)?))
    }
}

impl Encodable for ExecEnvStates {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.0.rlp_append(s);
    }
}

impl Decodable for ExecEnvStates {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self(TrieVec::decode(rlp)?))
    }
}
