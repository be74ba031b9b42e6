//! The append-only block store behind the admin surface.
//!
//! Blocks are indexed by id (`blocks[i].block_id == i`); entries only
//! ever land in the tip block, and sealing the tip appends a fresh empty
//! successor chained by hash.

use {
    fedchain_ledger::{block::verify_chain, Block, LedgerError, PlainEntry},
    log::info,
    parking_lot::RwLock,
};

/// Shared, append-only sequence of blocks.
#[derive(Debug)]
pub struct BlockStore {
    blocks: RwLock<Vec<Block>>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::bootstrap()
    }
}

impl BlockStore {
    /// Genesis plus one open tip block.
    pub fn bootstrap() -> Self {
        let genesis = Block::genesis();
        let tip = Block::next_after(&genesis);
        Self { blocks: RwLock::new(vec![genesis, tip]) }
    }

    /// Adopt an existing chain after verifying its invariants.
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, LedgerError> {
        verify_chain(&blocks)?;
        Ok(Self { blocks: RwLock::new(blocks) })
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn get(&self, index: u64) -> Option<Block> {
        self.blocks.read().get(index as usize).cloned()
    }

    pub fn all(&self) -> Vec<Block> {
        self.blocks.read().clone()
    }

    /// Append `entry` to the tip block.
    pub fn append_to_tip(&self, entry: PlainEntry) {
        let mut blocks = self.blocks.write();
        if let Some(tip) = blocks.last_mut() {
            tip.add_entry(entry);
        }
    }

    /// Seal the tip and open its successor, returning the sealed block's
    /// id (the new directory height).
    pub fn seal_tip(&self) -> u64 {
        let mut blocks = self.blocks.write();
        let tip = blocks.last().cloned().unwrap_or_else(Block::genesis);
        let next = Block::next_after(&tip);
        blocks.push(next);
        info!("sealed block {} ({} entries)", tip.block_id, tip.entries.len());
        tip.block_id
    }

    /// Height of the newest sealed block (everything below the tip).
    pub fn newest_sealed_height(&self) -> u64 {
        let blocks = self.blocks.read();
        blocks.last().map(|tip| tip.block_id.saturating_sub(1)).unwrap_or_default()
    }
}
