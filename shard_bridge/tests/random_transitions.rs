//! Randomized shard histories: every block of an honest history must replay
//! from its fraud proof, and every corrupted block must be caught.

use ethereum_types::H256;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use shard_bridge::{
    fraud_proof::FraudProof,
    testing::{hash_chain_executor, test_beacon_state, with_script, HashChainEnvironment},
    types::ShardBlock,
    verify, BeaconState, FraudProofError, FraudProofLayout, NativeCodeExecutor, ShardState,
};
use shard_common::NEW_CODE_FEE;

const SLOTS: usize = 40;

fn common_setup() {
    let _ = pretty_env_logger::try_init();
}

struct Chain {
    beacon: BeaconState,
    executor: NativeCodeExecutor,
    shard: ShardState,
    layout: FraudProofLayout,
}

impl Chain {
    fn new() -> Self {
        let mut beacon = with_script(test_beacon_state(&[NEW_CODE_FEE * 2]));
        beacon.process_slot().unwrap();

        Self {
            beacon,
            executor: hash_chain_executor(),
            shard: ShardState::genesis(0),
            layout: FraudProofLayout::new(1 << 14).unwrap(),
        }
    }

    fn random_payload(&self, rng: &mut StdRng) -> Vec<u8> {
        match rng.gen_range(0..4) {
            0 => HashChainEnvironment::read_root(rng.gen_range(0..self.beacon.slot)),
            1 => {
                let mut data = vec![0; rng.gen_range(1..48)];
                rng.fill_bytes(&mut data);
                HashChainEnvironment::emit(&data)
            }
            _ => {
                let mut data = vec![0; rng.gen_range(0..256)];
                rng.fill_bytes(&mut data);
                // Keep clear of the command bytes.
                if let Some(first) = data.first_mut() {
                    *first &= 0x7f;
                }
                data
            }
        }
    }

    fn propose(&self, rng: &mut StdRng) -> ShardBlock {
        let data = self.random_payload(rng);
        shard_bridge::propose_block(&self.shard, &self.beacon, &self.executor, 0, data).unwrap()
    }

    fn proof(&self, block: &ShardBlock) -> Vec<u8> {
        shard_bridge::flatten(block, &self.shard, &self.beacon, &self.executor, self.layout)
            .unwrap()
    }

    fn apply(&mut self, block: Option<&ShardBlock>) {
        shard_bridge::process_block(&mut self.shard, &self.beacon, &self.executor, block).unwrap();
        self.beacon.process_slot().unwrap();
    }
}

#[test]
fn honest_blocks_always_verify() {
    common_setup();

    let mut rng = StdRng::seed_from_u64(7);
    let mut chain = Chain::new();

    for _ in 0..SLOTS {
        if rng.gen_bool(0.25) {
            chain.apply(None);
            continue;
        }

        let block = chain.propose(&mut rng);
        let verified = verify(&chain.proof(&block), &chain.executor, chain.layout).unwrap();
        assert_eq!(verified.pre_state_root, chain.shard.root());
        assert_eq!(verified.beacon_root, chain.beacon.root());
        assert_eq!(verified.post_state_root, block.header.state_root);

        chain.apply(Some(&block));
    }
}

#[test]
fn corrupted_blocks_are_always_fraud() {
    common_setup();

    let mut rng = StdRng::seed_from_u64(11);
    let mut chain = Chain::new();

    for _ in 0..SLOTS {
        let block = chain.propose(&mut rng);

        let mut bad = block.clone();
        let mut garbage = [0; 32];
        rng.fill_bytes(&mut garbage);
        match rng.gen_range(0..3) {
            0 => bad.header.state_root = H256(garbage),
            1 => bad.header.deposit_root = H256(garbage),
            _ => bad.header.parent_root = H256(garbage),
        }

        let proof = FraudProof::build(&bad, &chain.shard, &chain.beacon, &chain.executor)
            .unwrap()
            .encode(chain.layout)
            .unwrap();
        match verify(&proof, &chain.executor, chain.layout) {
            Err(FraudProofError::Fraud(fraud)) => {
                assert_eq!(fraud.block_root, bad.header.hash());
                assert_eq!(fraud.pre_state_root, chain.shard.root());
            }
            other => panic!("corrupted block was not caught: {other:?}"),
        }

        chain.apply(Some(&block));
    }
}

#[test]
fn replays_agree_across_runs() {
    common_setup();

    let run = |seed| {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut chain = Chain::new();
        for _ in 0..SLOTS / 2 {
            let block = chain.propose(&mut rng);
            chain.apply(Some(&block));
        }
        chain.shard.root()
    };

    assert_eq!(run(3), run(3));
    assert_ne!(run(3), run(4));
}
