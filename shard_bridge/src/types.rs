//! Records exchanged between the beacon chain and the shards, and their
//! canonical RLP encodings.
//!
//! Anything that is hashed or signed goes through [`hash_rlp`], so two nodes
//! that agree on a record agree on its digest.

use std::fmt;

use ethereum_types::{H256, U256};
use keccak_hash::keccak;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use shard_common::{BLS_WITHDRAWAL_PREFIX, FAR_FUTURE_EPOCH};

/// `keccak(rlp(value))`.
pub fn hash_rlp<T: Encodable>(value: &T) -> H256 {
    keccak(rlp::encode(value))
}

macro_rules! impl_fixed_bytes {
    ($name:ident, $len:expr) => {
        impl $name {
            /// Length of the encoding in bytes.
            pub const LEN: usize = $len;

            /// Returns `None` if `bytes` does not have the expected length.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                bytes.try_into().ok().map(Self)
            }

            /// Returns `true` for the all-zero placeholder.
            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0; $len])
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl Encodable for $name {
            fn rlp_append(&self, s: &mut RlpStream) {
                s.encoder().encode_value(&self.0);
            }
        }

        impl Decodable for $name {
            fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
                rlp.decoder()
                    .decode_value(|bytes| match bytes.len().cmp(&$len) {
                        std::cmp::Ordering::Less => Err(DecoderError::RlpIsTooShort),
                        std::cmp::Ordering::Greater => Err(DecoderError::RlpIsTooBig),
                        std::cmp::Ordering::Equal => {
                            let mut out = [0; $len];
                            out.copy_from_slice(bytes);
                            Ok(Self(out))
                        }
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                use serde::de::Error as _;

                let s = String::deserialize(deserializer)?;
                let bytes =
                    hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(D::Error::custom)?;
                Self::from_slice(&bytes)
                    .ok_or_else(|| D::Error::custom(format!("expected {} bytes", $len)))
            }
        }
    };
}

/// A compressed BLS12-381 (G1) public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey(pub [u8; 48]);
impl_fixed_bytes!(BlsPublicKey, 48);

/// A compressed BLS12-381 (G2) signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsSignature(pub [u8; 96]);
impl_fixed_bytes!(BlsSignature, 96);

/// Withdrawal credentials committing to a BLS withdrawal key:
/// `BLS_WITHDRAWAL_PREFIX || keccak(pubkey)[1..]`.
pub fn bls_withdrawal_credentials(pubkey: &BlsPublicKey) -> H256 {
    let mut credentials = keccak(pubkey.0);
    credentials.0[0] = BLS_WITHDRAWAL_PREFIX;
    credentials
}

/// A code object hosted on the beacon chain, with a balance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionScript {
    /// Immutable once created.
    #[serde(with = "hex::serde")]
    pub code: Vec<u8>,
    pub balance: u64,
}

impl Encodable for ExecutionScript {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2).append(&self.code).append(&self.balance);
    }
}

impl Decodable for ExecutionScript {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 2)?;
        Ok(Self {
            code: rlp.val_at(0)?,
            balance: rlp.val_at(1)?,
        })
    }
}

/// An entry of the validator registry. Balances are kept separately, in
/// `BeaconState::balances`.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Validator {
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: H256,
    pub activation_eligibility_epoch: u64,
    pub activation_epoch: u64,
    pub exit_epoch: u64,
    pub withdrawable_epoch: u64,
}

impl Default for Validator {
    /// The empty registry entry.
    fn default() -> Self {
        Self {
            pubkey: BlsPublicKey::default(),
            withdrawal_credentials: H256::zero(),
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        }
    }
}

impl Validator {
    /// `true` for an entry that was reset by a withdrawal (or never used).
    pub fn is_empty(&self) -> bool {
        self.pubkey.is_zero()
    }

    /// A validator is active or pending from the moment it becomes eligible
    /// for activation until it becomes withdrawable.
    pub fn is_active_or_pending(&self, epoch: u64) -> bool {
        self.activation_eligibility_epoch != FAR_FUTURE_EPOCH && epoch < self.withdrawable_epoch
    }
}

/// Data of a validator deposit, signed by the validator key as a proof of
/// possession.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct DepositData {
    pub pubkey: BlsPublicKey,
    pub withdrawal_credentials: H256,
    pub amount: u64,
    /// Start of the window in which the deposit can be accepted.
    pub min_timestamp: u64,
    pub signature: BlsSignature,
}

impl DepositData {
    /// The root signed by [`Self::signature`].
    pub fn signing_root(&self) -> H256 {
        let mut s = RlpStream::new_list(4);
        s.append(&self.pubkey)
            .append(&self.withdrawal_credentials)
            .append(&self.amount)
            .append(&self.min_timestamp);
        keccak(s.out())
    }
}

/// A validator's request to move its whole balance into an execution script.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Withdrawal {
    pub validator_index: u64,
    pub target_script: u64,
    /// Shard on which the receipt may be claimed.
    pub shard_id: u64,
    /// The withdrawal key; must match the validator's credentials.
    pub pubkey: BlsPublicKey,
    pub signature: BlsSignature,
}

impl Withdrawal {
    /// The root signed by [`Self::signature`].
    pub fn signing_root(&self) -> H256 {
        let mut s = RlpStream::new_list(4);
        s.append(&self.validator_index)
            .append(&self.target_script)
            .append(&self.shard_id)
            .append(&self.pubkey);
        keccak(s.out())
    }
}

/// Issued by the beacon chain for every processed [`Withdrawal`].
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    pub receipt_index: u64,
    pub withdrawal: Withdrawal,
    pub amount: u64,
}

/// A record emitted by shard execution, for the beacon chain to act on.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReceipt {
    pub shard_id: u64,
    /// The execution script whose execution emitted the receipt.
    pub script_id: u64,
    /// [`NEW_VALIDATOR_TARGET`](shard_common::NEW_VALIDATOR_TARGET) for
    /// validator deposits.
    pub target: U256,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl Encodable for ShardReceipt {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4)
            .append(&self.shard_id)
            .append(&self.script_id)
            .append(&self.target)
            .append(&self.data);
    }
}

impl Decodable for ShardReceipt {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 4)?;
        Ok(Self {
            shard_id: rlp.val_at(0)?,
            script_id: rlp.val_at(1)?,
            target: rlp.val_at(2)?,
            data: rlp.val_at(3)?,
        })
    }
}

/// Header of a shard block.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct ShardBlockHeader {
    pub shard_id: u64,
    /// The slot of the shard state the block applies to.
    pub slot: u64,
    /// Hash of the previous block's header.
    pub parent_root: H256,
    /// The execution script the block invokes.
    pub script_id: u64,
    pub data_length: u64,
    pub data_root: H256,
    /// Claimed root of the shard state after the block.
    pub state_root: H256,
    /// Claimed root of the list of receipts emitted by the block.
    pub deposit_root: H256,
}

impl ShardBlockHeader {
    pub fn hash(&self) -> H256 {
        hash_rlp(self)
    }
}

/// A shard block: a header and an opaque payload for its execution script.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardBlock {
    pub header: ShardBlockHeader,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl Encodable for ShardBlock {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2).append(&self.header).append(&self.data);
    }
}

impl Decodable for ShardBlock {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 2)?;
        Ok(Self {
            header: rlp.val_at(0)?,
            data: rlp.val_at(1)?,
        })
    }
}

/// A shard block header committed to by the beacon chain.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Crosslink {
    pub shard_id: u64,
    pub slot: u64,
    pub block_root: H256,
}

/// Beacon transaction creating an execution script, paid for by `sender`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExecutionScript {
    pub sender: u64,
    /// The transaction is only valid in this slot.
    pub slot: u64,
    #[serde(with = "hex::serde")]
    pub code: Vec<u8>,
    pub pubkey: BlsPublicKey,
    pub signature: BlsSignature,
}

impl NewExecutionScript {
    /// The root signed by [`Self::signature`].
    pub fn signing_root(&self) -> H256 {
        let mut s = RlpStream::new_list(4);
        s.append(&self.sender)
            .append(&self.slot)
            .append(&keccak(&self.code))
            .append(&self.pubkey);
        keccak(s.out())
    }
}

impl Encodable for NewExecutionScript {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(5)
            .append(&self.sender)
            .append(&self.slot)
            .append(&self.code)
            .append(&self.pubkey)
            .append(&self.signature);
    }
}

impl Decodable for NewExecutionScript {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 5)?;
        Ok(Self {
            sender: rlp.val_at(0)?,
            slot: rlp.val_at(1)?,
            code: rlp.val_at(2)?,
            pubkey: rlp.val_at(3)?,
            signature: rlp.val_at(4)?,
        })
    }
}

/// Beacon transaction turning a deposit receipt emitted on a shard into a
/// validator.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct NewValidator {
    pub receipt: ShardReceipt,
    /// The crosslinked block that emitted the receipt.
    pub header: ShardBlockHeader,
    /// Position of the receipt in the block's receipt list.
    pub receipt_index: u64,
    /// Length of the block's receipt list.
    pub receipt_count: u64,
    /// Merkle branch of the receipt against `header.deposit_root`.
    pub receipt_branch: Vec<H256>,
}

/// Proof that a [`WithdrawalReceipt`] is part of a beacon state root.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct ReceiptProof {
    /// Position of the receipt in the slot's receipt list.
    pub position: u64,
    /// Length of the slot's receipt list.
    pub receipt_count: u64,
    /// Branch of the receipt against the receipt list root.
    pub list_branch: Vec<H256>,
    /// Branch of the receipt list root against the beacon state root.
    pub state_branch: Vec<H256>,
}

/// The beacon transactions defined by the bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconTransaction {
    NewExecutionScript(NewExecutionScript),
    NewValidator(NewValidator),
    Withdrawal(Withdrawal),
}

impl BeaconTransaction {
    const NEW_EXECUTION_SCRIPT_TAG: u8 = 0;
    const NEW_VALIDATOR_TAG: u8 = 1;
    const WITHDRAWAL_TAG: u8 = 2;

    /// A short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NewExecutionScript(_) => "NewExecutionScript",
            Self::NewValidator(_) => "NewValidator",
            Self::Withdrawal(_) => "Withdrawal",
        }
    }
}

impl Encodable for BeaconTransaction {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        match self {
            Self::NewExecutionScript(tx) => s.append(&Self::NEW_EXECUTION_SCRIPT_TAG).append(tx),
            Self::NewValidator(tx) => s.append(&Self::NEW_VALIDATOR_TAG).append(tx),
            Self::Withdrawal(tx) => s.append(&Self::WITHDRAWAL_TAG).append(tx),
        };
    }
}

impl Decodable for BeaconTransaction {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        expect_items(rlp, 2)?;
        match rlp.val_at::<u8>(0)? {
            Self::NEW_EXECUTION_SCRIPT_TAG => Ok(Self::NewExecutionScript(rlp.val_at(1)?)),
            Self::NEW_VALIDATOR_TAG => Ok(Self::NewValidator(rlp.val_at(1)?)),
            Self::WITHDRAWAL_TAG => Ok(Self::Withdrawal(rlp.val_at(1)?)),
            _ => Err(DecoderError::Custom("unknown beacon transaction tag")),
        }
    }
}

pub(crate) fn expect_items(rlp: &Rlp, count: usize) -> Result<(), DecoderError> {
    if !rlp.is_list() {
        return Err(DecoderError::RlpExpectedToBeList);
    }
    if rlp.item_count()? != count {
        return Err(DecoderError::RlpIncorrectListLen);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use ethereum_types::H256;

    use super::*;

    #[test]
    fn bls_bytes_reject_wrong_lengths() {
        let short = rlp::encode(&vec![1u8; 47]);
        assert_eq!(
            rlp::decode::<BlsPublicKey>(&short),
            Err(DecoderError::RlpIsTooShort)
        );

        let long = rlp::encode(&vec![1u8; 97]);
        assert_eq!(
            rlp::decode::<BlsSignature>(&long),
            Err(DecoderError::RlpIsTooBig)
        );
    }

    #[test]
    fn withdrawal_credentials_carry_the_prefix() {
        let pubkey = BlsPublicKey([7; 48]);
        let credentials = bls_withdrawal_credentials(&pubkey);

        assert_eq!(credentials.0[0], BLS_WITHDRAWAL_PREFIX);
        assert_eq!(credentials.0[1..], keccak(pubkey.0).0[1..]);
    }

    #[test]
    fn signing_roots_exclude_the_signature() {
        let mut withdrawal = Withdrawal {
            validator_index: 1,
            target_script: 2,
            shard_id: 3,
            pubkey: BlsPublicKey([1; 48]),
            signature: BlsSignature::default(),
        };
        let root = withdrawal.signing_root();

        withdrawal.signature = BlsSignature([9; 96]);
        assert_eq!(root, withdrawal.signing_root());

        withdrawal.shard_id = 4;
        assert_ne!(root, withdrawal.signing_root());
    }

    #[test]
    fn beacon_transactions_decode_by_tag() {
        let tx = BeaconTransaction::NewValidator(NewValidator {
            receipt: ShardReceipt {
                shard_id: 1,
                script_id: 0,
                target: U256::MAX,
                data: vec![1, 2, 3],
            },
            header: ShardBlockHeader::default(),
            receipt_index: 0,
            receipt_count: 1,
            receipt_branch: vec![H256::repeat_byte(1)],
        });

        let decoded: BeaconTransaction = rlp::decode(&rlp::encode(&tx)).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.kind(), "NewValidator");

        let mut s = RlpStream::new_list(2);
        s.append(&7u8).append(&0u8);
        assert!(rlp::decode::<BeaconTransaction>(&s.out()).is_err());
    }

    #[test]
    fn empty_validator_is_never_active() {
        let validator = Validator::default();
        assert!(validator.is_empty());
        assert!(!validator.is_active_or_pending(0));
    }
}
