//! The beacon chain's registry of execution scripts.

use ethereum_types::H256;
use log::debug;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use shard_common::{DOMAIN_TRANSFER, MAX_CODE_LEN, NEW_CODE_BYTE_FEE, NEW_CODE_FEE};

use crate::{
    beacon::BeaconState,
    containers::{AccessError, AccessResult, TrieVec},
    crypto::SignatureVerifier,
    error::{BridgeError, BridgeResult},
    execution::CodeExecutor,
    types::{bls_withdrawal_credentials, ExecutionScript, NewExecutionScript},
};

/// Append-only list of execution scripts. Ids are dense and never reused.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptRegistry(TrieVec<ExecutionScript>);

impl ScriptRegistry {
    /// Number of scripts ever created.
    pub const fn len(&self) -> u64 {
        self.0.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, script_id: u64) -> AccessResult<ExecutionScript> {
        self.0.get(script_id)?.ok_or(AccessError::Missing(script_id))
    }

    pub fn code(&self, script_id: u64) -> AccessResult<Vec<u8>> {
        Ok(self.get(script_id)?.code)
    }

    pub fn balance(&self, script_id: u64) -> AccessResult<u64> {
        Ok(self.get(script_id)?.balance)
    }

    /// Creates a script with zero balance and returns its id.
    pub fn append(&mut self, code: Vec<u8>) -> AccessResult<u64> {
        self.0.push(&ExecutionScript { code, balance: 0 })
    }

    pub fn credit(&mut self, script_id: u64, amount: u64) -> BridgeResult<()> {
        let mut script = self.lookup(script_id)?;
        script.balance = script
            .balance
            .checked_add(amount)
            .ok_or(BridgeError::BalanceOverflow)?;
        Ok(self.0.set(script_id, &script)?)
    }

    pub fn debit(&mut self, script_id: u64, amount: u64) -> BridgeResult<()> {
        let mut script = self.lookup(script_id)?;
        script.balance =
            script
                .balance
                .checked_sub(amount)
                .ok_or(BridgeError::InsufficientBalance {
                    have: script.balance,
                    need: amount,
                })?;
        Ok(self.0.set(script_id, &script)?)
    }

    pub fn root(&self) -> H256 {
        self.0.root()
    }

    /// Witness covering the scripts in `script_ids`.
    pub fn subset(&self, script_ids: impl IntoIterator<Item = u64>) -> AccessResult<Self> {
        Ok(Self(self.0.subset(script_ids)?))
    }

    fn lookup(&self, script_id: u64) -> BridgeResult<ExecutionScript> {
        if script_id >= self.len() {
            return Err(BridgeError::UnknownScript(script_id));
        }
        Ok(self.get(script_id)?)
    }
}

impl Encodable for ScriptRegistry {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.0.rlp_append(s);
    }
}

impl Decodable for ScriptRegistry {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self(TrieVec::decode(rlp)?))
    }
}

/// Fee for installing `code_len` bytes of code.
pub fn new_code_fee(code_len: usize) -> Option<u64> {
    NEW_CODE_BYTE_FEE
        .checked_mul(u64::try_from(code_len).ok()?)?
        .checked_add(NEW_CODE_FEE)
}

impl BeaconState {
    /// Creates an execution script paid for by the sending validator.
    ///
    /// The sender must not be active or pending, must prove control of its
    /// withdrawal key and must afford [`new_code_fee`]. Returns the id of the
    /// new script.
    pub fn process_new_execution_script(
        &mut self,
        tx: &NewExecutionScript,
        verifier: &dyn SignatureVerifier,
        executor: &dyn CodeExecutor,
    ) -> BridgeResult<u64> {
        if tx.code.len() > MAX_CODE_LEN {
            return Err(BridgeError::CodeTooLong {
                len: tx.code.len(),
                max: MAX_CODE_LEN,
            });
        }

        let sender = self.validator(tx.sender)?;
        let balance = self.balances[sender];
        let fee = new_code_fee(tx.code.len()).ok_or(BridgeError::BalanceOverflow)?;
        if balance < fee {
            return Err(BridgeError::InsufficientBalance {
                have: balance,
                need: fee,
            });
        }

        if tx.slot != self.slot {
            return Err(BridgeError::WrongSlot {
                declared: tx.slot,
                current: self.slot,
            });
        }

        let validator = &self.validators[sender];
        if validator.is_active_or_pending(self.current_epoch()) {
            return Err(BridgeError::ValidatorActive(tx.sender));
        }
        if validator.withdrawal_credentials != bls_withdrawal_credentials(&tx.pubkey) {
            return Err(BridgeError::CredentialMismatch(tx.sender));
        }
        if !verifier.bls_verify(
            &tx.pubkey,
            tx.signing_root(),
            &tx.signature,
            DOMAIN_TRANSFER,
        ) {
            return Err(BridgeError::BadSignature("new execution script"));
        }
        if !executor.verify_code(&tx.code) {
            return Err(BridgeError::InvalidCode);
        }

        let script_id = self.execution_scripts.append(tx.code.clone())?;
        self.balances[sender] = balance - fee;

        debug!(
            "Validator {} created execution script {} ({} bytes, fee {})",
            tx.sender,
            script_id,
            tx.code.len(),
            fee
        );
        Ok(script_id)
    }
}
