//! RLP encoding of (partial) [`WitnessTrie`]s.
//!
//! ```pseudocode
//! encode( Empty )              = [0]
//! encode( Hash { h } )         = [1, h]
//! encode( Branch { l, r } )    = [2, encode(l), encode(r)]
//! encode( Leaf { key, value } ) = [3, key, value]
//! ```
//!
//! Decoding rejects tries nested deeper than [`KEY_BITS`], so a hostile
//! payload cannot exhaust the stack.

use std::sync::Arc;

use ethereum_types::H256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use crate::partial_trie::{Node, TrieKey, WitnessTrie, KEY_BITS};

const EMPTY_TAG: u8 = 0;
const HASH_TAG: u8 = 1;
const BRANCH_TAG: u8 = 2;
const LEAF_TAG: u8 = 3;

impl Encodable for TrieKey {
    fn rlp_append(&self, s: &mut RlpStream) {
        self.0.rlp_append(s);
    }
}

impl Decodable for TrieKey {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self(H256::decode(rlp)?))
    }
}

impl Encodable for WitnessTrie {
    fn rlp_append(&self, s: &mut RlpStream) {
        match &self.node {
            Node::Empty => {
                s.begin_list(1).append(&EMPTY_TAG);
            }
            Node::Hash(h) => {
                s.begin_list(2).append(&HASH_TAG).append(h);
            }
            Node::Branch { children } => {
                s.begin_list(3)
                    .append(&BRANCH_TAG)
                    .append(&*children[0])
                    .append(&*children[1]);
            }
            Node::Leaf { key, value } => {
                s.begin_list(3).append(&LEAF_TAG).append(key).append(value);
            }
        }
    }
}

impl Decodable for WitnessTrie {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        decode_intern(rlp, 0).map(WitnessTrie::new)
    }
}

fn decode_intern(rlp: &Rlp, depth: usize) -> Result<Node, DecoderError> {
    if depth > KEY_BITS {
        return Err(DecoderError::Custom("witness trie is nested too deeply"));
    }
    if !rlp.is_list() {
        return Err(DecoderError::RlpExpectedToBeList);
    }

    let tag: u8 = rlp.val_at(0)?;
    let expected_items = match tag {
        EMPTY_TAG => 1,
        HASH_TAG => 2,
        BRANCH_TAG | LEAF_TAG => 3,
        _ => return Err(DecoderError::Custom("unknown witness trie node tag")),
    };
    if rlp.item_count()? != expected_items {
        return Err(DecoderError::RlpIncorrectListLen);
    }

    Ok(match tag {
        EMPTY_TAG => Node::Empty,
        HASH_TAG => Node::Hash(rlp.val_at(1)?),
        BRANCH_TAG => Node::Branch {
            children: [
                Arc::new(WitnessTrie::new(decode_intern(&rlp.at(1)?, depth + 1)?)),
                Arc::new(WitnessTrie::new(decode_intern(&rlp.at(2)?, depth + 1)?)),
            ],
        },
        _ => Node::Leaf {
            key: rlp.val_at(1)?,
            value: rlp.val_at(2)?,
        },
    })
}
