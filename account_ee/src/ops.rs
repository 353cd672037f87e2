//! Block payload of the account environment: an RLP list of tagged
//! operations, each carrying the witness it executes against.

use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rlp_derive::{RlpDecodable, RlpEncodable};
use shard_bridge::{
    types::{BlsPublicKey, BlsSignature, DepositData, ReceiptProof, WithdrawalReceipt},
    ExecutionContext,
};
use witness_trie::WitnessTrie;

use crate::{
    account::Address,
    error::{EnvError, EnvResult},
};

/// The script instance a signed operation is valid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OpScope {
    pub shard_id: u64,
    pub script_id: u64,
}

impl OpScope {
    pub const fn new(shard_id: u64, script_id: u64) -> Self {
        Self {
            shard_id,
            script_id,
        }
    }

    pub const fn of(ctx: &ExecutionContext<'_>) -> Self {
        Self::new(ctx.shard_id, ctx.script_id)
    }
}

/// Claims a beacon withdrawal receipt into the account of the withdrawing
/// key.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct WithdrawalOp {
    pub receipt: WithdrawalReceipt,
    /// Beacon slot whose state root the proof is against. The receipt must
    /// have been issued in that slot.
    pub beacon_slot: u64,
    pub proof: ReceiptProof,
    pub witness: WitnessTrie,
}

#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct TransferOp {
    pub sender: Address,
    pub nonce: u64,
    pub target: BlsPublicKey,
    pub amount: u64,
    pub signature: BlsSignature,
    pub witness: WitnessTrie,
}

impl TransferOp {
    /// Hash signed by the sender, under `DOMAIN_SHARD_TRANSFER`.
    pub fn signing_root(&self, scope: OpScope) -> H256 {
        let mut stream = RlpStream::new_list(5);
        stream
            .append(&self.nonce)
            .append(&self.target)
            .append(&self.amount)
            .append(&scope.shard_id)
            .append(&scope.script_id);
        keccak(stream.out())
    }
}

/// Pays for a new validator out of an account. The deposit leaves the shard
/// as a receipt for the beacon chain.
#[derive(Clone, Debug, PartialEq, Eq, RlpEncodable, RlpDecodable)]
pub struct DepositOp {
    pub sender: Address,
    pub nonce: u64,
    pub deposit: DepositData,
    pub signature: BlsSignature,
    pub witness: WitnessTrie,
}

impl DepositOp {
    /// Hash signed by the sender, under `DOMAIN_SHARD_DEPOSIT`.
    pub fn signing_root(&self, scope: OpScope) -> H256 {
        let mut stream = RlpStream::new_list(4);
        stream
            .append(&self.nonce)
            .append(&self.deposit)
            .append(&scope.shard_id)
            .append(&scope.script_id);
        keccak(stream.out())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Withdrawal(WithdrawalOp),
    Transfer(TransferOp),
    Deposit(DepositOp),
}

impl Operation {
    const WITHDRAWAL: u8 = 0;
    const TRANSFER: u8 = 1;
    const DEPOSIT: u8 = 2;

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Withdrawal(_) => "withdrawal",
            Self::Transfer(_) => "transfer",
            Self::Deposit(_) => "deposit",
        }
    }

    pub const fn witness(&self) -> &WitnessTrie {
        match self {
            Self::Withdrawal(op) => &op.witness,
            Self::Transfer(op) => &op.witness,
            Self::Deposit(op) => &op.witness,
        }
    }
}

impl Encodable for Operation {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        match self {
            Self::Withdrawal(op) => s.append(&Self::WITHDRAWAL).append(op),
            Self::Transfer(op) => s.append(&Self::TRANSFER).append(op),
            Self::Deposit(op) => s.append(&Self::DEPOSIT).append(op),
        };
    }
}

impl Decodable for Operation {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let op = rlp.at(1)?;
        match rlp.val_at::<u8>(0)? {
            Self::WITHDRAWAL => op.as_val().map(Self::Withdrawal),
            Self::TRANSFER => op.as_val().map(Self::Transfer),
            Self::DEPOSIT => op.as_val().map(Self::Deposit),
            _ => Err(DecoderError::Custom("unknown operation tag")),
        }
    }
}

pub fn encode_operations(ops: &[Operation]) -> Vec<u8> {
    rlp::encode_list(ops).to_vec()
}

/// Decodes a block payload. The payload must be exactly one RLP list.
pub fn decode_operations(data: &[u8]) -> EnvResult<Vec<Operation>> {
    let rlp = Rlp::new(data);
    let info = rlp.payload_info().map_err(EnvError::MalformedBlock)?;
    if info.total() != data.len() {
        return Err(EnvError::MalformedBlock(DecoderError::RlpInconsistentLengthAndData));
    }
    rlp.as_list().map_err(EnvError::MalformedBlock)
}
