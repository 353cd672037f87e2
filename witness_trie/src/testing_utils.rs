use ethereum_types::H256;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::partial_trie::TrieKey;

pub(crate) type TestInsertEntry = (TrieKey, Vec<u8>);

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

/// Random keys with random 1..=64 byte values. Keys are 256 random bits, so
/// collisions are not a concern.
pub(crate) fn generate_n_random_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(move |_| {
        let mut key = [0; 32];
        rng.fill_bytes(&mut key);

        let mut value = vec![0; rng.gen_range(1..=64)];
        rng.fill_bytes(&mut value);

        (TrieKey(H256(key)), value)
    })
}

/// A key whose first byte is `first` and whose last byte is `last`, so that
/// two such keys share a long prefix.
pub(crate) fn key_with_first_byte(first: u8, last: u8) -> TrieKey {
    let mut key = [0; 32];
    key[0] = first;
    key[31] = last;
    TrieKey(H256(key))
}
