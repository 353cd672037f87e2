use ethereum_types::{H256, U256};

/// Maximum length in bytes of the code of an execution script.
pub const MAX_CODE_LEN: usize = 24_576;

/// Flat fee charged to the sender of a `NewExecutionScript` transaction.
pub const NEW_CODE_FEE: u64 = 1_000_000;

/// Fee charged per byte of code of a `NewExecutionScript` transaction.
pub const NEW_CODE_BYTE_FEE: u64 = 100;

/// Length of the ring buffer of pre-transition roots kept in a shard state.
pub const LATEST_STATE_ROOTS_LENGTH: u64 = 1024;

/// Length of the ring buffer of state roots kept in the beacon state.
pub const HISTORICAL_ROOTS_LENGTH: u64 = 8192;

pub const SLOTS_PER_EPOCH: u64 = 64;

pub const SECONDS_PER_SLOT: u64 = 6;

/// A deposit is only valid while
/// `min_timestamp <= now < min_timestamp + MIN_VALIDATOR_PERSISTENCE_TIME`.
/// One (julian) year, in seconds.
pub const MIN_VALIDATOR_PERSISTENCE_TIME: u64 = 31_557_600;

pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;

/// Upper bound on the length of a receipt list proven against a root, either
/// the withdrawal receipts of a beacon slot or the deposits of a shard block.
pub const MAX_RECEIPT_LIST_LENGTH: u64 = 1 << 32;

/// Default size in bytes of a flattened fraud proof.
pub const BLOCK_SIZE: usize = 1 << 16;

/// Prefix byte of BLS withdrawal credentials.
pub const BLS_WITHDRAWAL_PREFIX: u8 = 0x00;

/// Signature domain of deposit proofs of possession.
pub const DOMAIN_DEPOSIT: u64 = 3;
/// Signature domain of beacon-chain value transfers (script creation).
pub const DOMAIN_TRANSFER: u64 = 5;
/// Signature domain of validator withdrawals into execution scripts.
pub const DOMAIN_WITHDRAWAL: u64 = 0x1001;
/// Signature domain of account transfers inside the reference execution
/// environment.
pub const DOMAIN_SHARD_TRANSFER: u64 = 0x1002;
/// Signature domain of account deposits inside the reference execution
/// environment.
pub const DOMAIN_SHARD_DEPOSIT: u64 = 0x1003;

/// Reserved target of a shard receipt that asks the beacon chain to create a
/// validator. `2**256 - 1`.
pub const NEW_VALIDATOR_TARGET: U256 = U256::MAX;

/// The root of an empty witness trie, and the initial state of every execution
/// environment on every shard.
pub const EMPTY_ROOT: H256 = H256::zero();

/// Returns the epoch a slot belongs to.
pub const fn epoch_at_slot(slot: u64) -> u64 {
    slot / SLOTS_PER_EPOCH
}

/// Chain time of `slot`.
pub const fn time_at_slot(genesis_time: u64, slot: u64) -> u64 {
    genesis_time.saturating_add(slot.saturating_mul(SECONDS_PER_SLOT))
}

/// Whether a deposit signed with `min_timestamp` may be accepted at `now`.
pub const fn is_within_deposit_window(min_timestamp: u64, now: u64) -> bool {
    now >= min_timestamp && now - min_timestamp < MIN_VALIDATOR_PERSISTENCE_TIME
}

#[test]
fn test_fraud_proof_sections_divide_block_size() {
    assert_eq!(BLOCK_SIZE % 8, 0);
    assert_eq!(BLOCK_SIZE / 8 + BLOCK_SIZE * 3 / 8 + BLOCK_SIZE / 2, BLOCK_SIZE);
}

#[test]
fn test_domains_are_distinct() {
    let domains = [
        DOMAIN_DEPOSIT,
        DOMAIN_TRANSFER,
        DOMAIN_WITHDRAWAL,
        DOMAIN_SHARD_TRANSFER,
        DOMAIN_SHARD_DEPOSIT,
    ];
    for (i, a) in domains.iter().enumerate() {
        for b in &domains[i + 1..] {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn test_empty_root_is_not_a_keccak_image() {
    assert_ne!(EMPTY_ROOT, keccak_hash::keccak([]));
}

#[test]
fn test_epoch_at_slot() {
    assert_eq!(epoch_at_slot(0), 0);
    assert_eq!(epoch_at_slot(SLOTS_PER_EPOCH - 1), 0);
    assert_eq!(epoch_at_slot(SLOTS_PER_EPOCH), 1);
}

#[test]
fn test_deposit_window_bounds() {
    let now = time_at_slot(1_000, 10);
    assert_eq!(now, 1_000 + 10 * SECONDS_PER_SLOT);
    assert!(is_within_deposit_window(now, now));
    assert!(!is_within_deposit_window(now + 1, now));
    assert!(!is_within_deposit_window(0, MIN_VALIDATOR_PERSISTENCE_TIME));
    assert!(is_within_deposit_window(1, MIN_VALIDATOR_PERSISTENCE_TIME));
    assert_eq!(time_at_slot(u64::MAX, u64::MAX), u64::MAX);
}
