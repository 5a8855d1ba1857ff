//! An ordered chain fragment as tracked by the status machine
//! The head of the fork is the tip; truncating operations hand back the
//! accumulated balance diff of whatever they dropped so callers can unwind it

use crate::balance::{BlockchainBalance, DiffIndex};
use crate::types::{BlockRef, BlockType, WavesBlock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a block could not be appended
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForkError {
    #[error("block {block} references {reference}, fork tip is {tip}")]
    UnexpectedReference {
        block: BlockRef,
        reference: String,
        tip: BlockRef,
    },

    #[error("block {block} does not continue from tip height {tip_height}")]
    UnexpectedHeight { block: BlockRef, tip_height: u32 },
}

/// Ordered sequence of blocks, oldest first, last element the tip
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WavesFork {
    blocks: Vec<WavesBlock>,
}

impl WavesFork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<WavesBlock>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn tip(&self) -> Option<&WavesBlock> {
        self.blocks.last()
    }

    /// Height of the tip, zero for an empty fork
    pub fn height(&self) -> u32 {
        self.tip().map(|block| block.height()).unwrap_or(0)
    }

    pub fn blocks(&self) -> &[WavesBlock] {
        &self.blocks
    }

    /// Append a block whose reference matches the tip
    /// An empty fork accepts any block as its new root
    pub fn with_block(&self, block: &WavesBlock) -> Result<WavesFork, ForkError> {
        if let Some(tip) = self.tip() {
            if block.reference != tip.id() {
                return Err(ForkError::UnexpectedReference {
                    block: block.block_ref,
                    reference: block.reference.to_string(),
                    tip: tip.block_ref,
                });
            }
            let expected_height = match block.tpe {
                BlockType::Block => tip.height() + 1,
                BlockType::MicroBlock => tip.height(),
            };
            if block.height() != expected_height {
                return Err(ForkError::UnexpectedHeight {
                    block: block.block_ref,
                    tip_height: tip.height(),
                });
            }
        }

        let mut blocks = self.blocks.clone();
        blocks.push(block.clone());
        Ok(WavesFork { blocks })
    }

    /// Truncate to and including `reference`, returning the truncated fork
    /// and the accumulated diff of the dropped blocks
    /// An unknown reference drops everything
    pub fn drop_after(&self, reference: &BlockRef) -> (WavesFork, BlockchainBalance) {
        let keep = self
            .blocks
            .iter()
            .position(|block| block.block_ref == *reference)
            .map(|position| position + 1)
            .unwrap_or(0);
        self.split_off(keep)
    }

    /// Drop all blocks with height at or above `height`
    pub fn drop_from(&self, height: u32) -> (WavesFork, BlockchainBalance) {
        let keep = self
            .blocks
            .iter()
            .position(|block| block.height() >= height)
            .unwrap_or(self.blocks.len());
        self.split_off(keep)
    }

    /// Drop the tip only
    pub fn drop_tip(&self) -> (WavesFork, BlockchainBalance) {
        self.split_off(self.blocks.len().saturating_sub(1))
    }

    /// Drop everything
    pub fn drop_all(&self) -> (WavesFork, BlockchainBalance) {
        self.split_off(0)
    }

    fn split_off(&self, keep: usize) -> (WavesFork, BlockchainBalance) {
        let mut dropped = BlockchainBalance::new();
        for block in &self.blocks[keep..] {
            dropped += &block.changes;
        }
        let fork = WavesFork {
            blocks: self.blocks[..keep].to_vec(),
        };
        (fork, dropped)
    }

    /// The key set every block of this fork touched
    pub fn diff_index(&self) -> DiffIndex {
        let mut index = DiffIndex::new();
        for block in &self.blocks {
            index.merge(&block.changes.diff_index());
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_array::{Address, Bytes32, TxId};
    use crate::types::Asset;

    fn id(n: u8) -> Bytes32 {
        Bytes32([n; 32])
    }

    fn addr(n: u8) -> Address {
        Address([n; 26])
    }

    fn block(height: u32, block_id: u8, parent_id: u8, waves_delta: i64) -> WavesBlock {
        WavesBlock {
            block_ref: BlockRef {
                height,
                id: id(block_id),
            },
            reference: id(parent_id),
            timestamp_ms: height as u64 * 1000,
            tpe: BlockType::Block,
            changes: BlockchainBalance::from_iter([(addr(block_id), Asset::Waves, waves_delta)]),
            transactions: vec![TxId([block_id; 32])],
        }
    }

    fn micro(height: u32, block_id: u8, parent_id: u8) -> WavesBlock {
        WavesBlock {
            tpe: BlockType::MicroBlock,
            ..block(height, block_id, parent_id, 1)
        }
    }

    fn chain() -> WavesFork {
        let fork = WavesFork::new();
        let fork = fork.with_block(&block(1, 10, 0, 5)).unwrap();
        let fork = fork.with_block(&block(2, 20, 10, 3)).unwrap();
        fork.with_block(&block(3, 30, 20, -2)).unwrap()
    }

    #[test]
    fn with_block_appends_matching_reference() {
        let fork = chain();
        assert_eq!(3, fork.len());
        assert_eq!(3, fork.height());
        assert_eq!(id(30), fork.tip().unwrap().id());
    }

    #[test]
    fn with_block_rejects_wrong_reference() {
        let fork = chain();
        let stranger = block(4, 40, 99, 1);
        assert!(matches!(
            fork.with_block(&stranger),
            Err(ForkError::UnexpectedReference { .. })
        ));
    }

    #[test]
    fn with_block_rejects_skipped_height() {
        let fork = chain();
        let skipping = block(5, 40, 30, 1);
        assert!(matches!(
            fork.with_block(&skipping),
            Err(ForkError::UnexpectedHeight { .. })
        ));
    }

    #[test]
    fn micro_block_keeps_key_block_height() {
        let fork = chain();
        let fork = fork.with_block(&micro(3, 31, 30)).unwrap();
        assert_eq!(3, fork.height());
        assert_eq!(4, fork.len());
    }

    #[test]
    fn drop_after_returns_dropped_diff() {
        let fork = chain();
        let (kept, dropped) = fork.drop_after(&BlockRef {
            height: 1,
            id: id(10),
        });

        assert_eq!(1, kept.len());
        assert_eq!(Some(3), dropped.get(&addr(20), &Asset::Waves));
        assert_eq!(Some(-2), dropped.get(&addr(30), &Asset::Waves));
    }

    #[test]
    fn drop_after_unknown_reference_drops_everything() {
        let fork = chain();
        let (kept, dropped) = fork.drop_after(&BlockRef {
            height: 9,
            id: id(99),
        });
        assert!(kept.is_empty());
        assert_eq!(3, dropped.len());
    }

    #[test]
    fn drop_from_removes_heights_at_or_above() {
        let fork = chain();
        let (kept, dropped) = fork.drop_from(2);
        assert_eq!(1, kept.len());
        assert_eq!(1, kept.height());
        assert_eq!(Some(3), dropped.get(&addr(20), &Asset::Waves));
    }

    #[test]
    fn diff_index_unions_all_blocks() {
        let fork = chain();
        let index = fork.diff_index();
        assert!(index.contains(&addr(10), &Asset::Waves));
        assert!(index.contains(&addr(20), &Asset::Waves));
        assert!(index.contains(&addr(30), &Asset::Waves));
    }
}
