pub mod block;

use crate::directory::FileSlice;
use crate::{DocId, Error};
use block::{read_skip_table, BlockInfo, PostingBlock};

/// Streaming reader over one term's posting region: skip table up front,
/// self-sufficient blocks behind it. Blocks decode lazily, one at a time.
pub struct PostingsCursor {
    region: Option<FileSlice>,
    blocks: Vec<BlockInfo>,
    has_positions: bool,
    block_idx: usize,
    decoded: PostingBlock,
    in_block: usize,
    active: bool,
}

impl PostingsCursor {
    pub fn open(region: FileSlice, has_positions: bool) -> Result<Self, Error> {
        let (blocks, _table_len) = read_skip_table(region.as_bytes())?;
        if blocks.is_empty() {
            return Err(Error::Corrupt("posting region with zero blocks".into()));
        }
        let mut cursor = Self {
            region: Some(region),
            blocks,
            has_positions,
            block_idx: 0,
            decoded: PostingBlock::default(),
            in_block: 0,
            active: true,
        };
        cursor.load_block(0)?;
        Ok(cursor)
    }

    /// A single posting held inline in the dictionary; no region to read.
    pub fn inline(doc: DocId, tf: u32, len_byte: u8) -> Self {
        Self {
            region: None,
            blocks: vec![BlockInfo {
                last_doc: doc,
                offset: 0,
                len: 0,
                max_tf: tf,
                min_len_byte: len_byte,
            }],
            has_positions: false,
            block_idx: 0,
            decoded: PostingBlock {
                docs: vec![doc],
                tfs: vec![tf],
                positions: Vec::new(),
            },
            in_block: 0,
            active: true,
        }
    }

    fn load_block(&mut self, idx: usize) -> Result<(), Error> {
        let info = &self.blocks[idx];
        let region = match &self.region {
            Some(r) => r,
            None => {
                // inline cursors carry their only block pre-decoded.
                self.block_idx = idx;
                self.in_block = 0;
                return Ok(());
            }
        };
        let prev_last = if idx == 0 {
            0
        } else {
            self.blocks[idx - 1].last_doc.0
        };
        let data = &region.as_bytes()[info.offset..info.offset + info.len];
        self.decoded = PostingBlock::decode(data, prev_last, self.has_positions)?;
        if self.decoded.last_doc() != info.last_doc {
            return Err(Error::Corrupt(
                "skip table disagrees with block contents".into(),
            ));
        }
        self.block_idx = idx;
        self.in_block = 0;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn doc(&self) -> DocId {
        if self.active {
            self.decoded.docs[self.in_block]
        } else {
            DocId::no_more()
        }
    }

    pub fn tf(&self) -> u32 {
        if self.active {
            self.decoded.tfs[self.in_block]
        } else {
            0
        }
    }

    pub fn positions(&self) -> &[u32] {
        if self.active && !self.decoded.positions.is_empty() {
            &self.decoded.positions[self.in_block]
        } else {
            &[]
        }
    }

    pub fn advance(&mut self) -> Result<(), Error> {
        if !self.active {
            return Ok(());
        }
        self.in_block += 1;
        if self.in_block >= self.decoded.len() {
            if self.block_idx + 1 < self.blocks.len() {
                self.load_block(self.block_idx + 1)?;
            } else {
                self.active = false;
            }
        }
        Ok(())
    }

    pub fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        if !self.active || self.doc() >= target {
            return Ok(());
        }
        // Whole blocks first:
        if self.blocks[self.block_idx].last_doc < target {
            let mut idx = self.block_idx + 1;
            while idx < self.blocks.len() && self.blocks[idx].last_doc < target {
                idx += 1;
            }
            if idx >= self.blocks.len() {
                self.active = false;
                return Ok(());
            }
            self.load_block(idx)?;
        }
        // Then within the block:
        while self.decoded.docs[self.in_block] < target {
            self.in_block += 1;
            debug_assert!(self.in_block < self.decoded.len());
        }
        Ok(())
    }

    /// Quality inputs of the block the cursor is currently inside.
    pub fn block_info(&self) -> &BlockInfo {
        &self.blocks[self.block_idx]
    }

    /// Advance past whole blocks as long as `reject` approves of skipping
    /// them; lands on the first posting of the first surviving block.
    pub fn skip_blocks_while<F>(&mut self, reject: F) -> Result<(), Error>
    where
        F: Fn(&BlockInfo) -> bool,
    {
        if !self.active {
            return Ok(());
        }
        if !reject(&self.blocks[self.block_idx]) {
            return Ok(());
        }
        let mut idx = self.block_idx + 1;
        while idx < self.blocks.len() && reject(&self.blocks[idx]) {
            idx += 1;
        }
        if idx >= self.blocks.len() {
            self.active = false;
            return Ok(());
        }
        self.load_block(idx)
    }

    /// The best quality inputs anywhere at-or-after the current block.
    pub fn remaining_blocks(&self) -> &[BlockInfo] {
        &self.blocks[self.block_idx..]
    }

    /// Index of the block the cursor currently sits in.
    pub fn block_ord(&self) -> usize {
        self.block_idx
    }

    /// Fresh cursor positioned at the start; used by `copy()` paths.
    pub fn reopened(&self) -> Result<Self, Error> {
        match &self.region {
            Some(region) => Self::open(region.clone(), self.has_positions),
            None => Ok(Self::inline(
                self.blocks[0].last_doc,
                self.blocks[0].max_tf,
                self.blocks[0].min_len_byte,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::block::{write_skip_table, BLOCK_SIZE};
    use super::*;
    use crate::directory::{Directory, FileSlice, RamDirectory};
    use std::io::Write;

    /// Build a region the way the segment writer does: block encodings, then
    /// the skip table spliced in front.
    fn region_for(postings: &[(u32, u32)]) -> FileSlice {
        let mut infos = Vec::new();
        let mut blob = Vec::new();
        let mut prev_last = 0u32;
        for chunk in postings.chunks(BLOCK_SIZE) {
            let block = PostingBlock {
                docs: chunk.iter().map(|(d, _)| DocId(*d)).collect(),
                tfs: chunk.iter().map(|(_, tf)| *tf).collect(),
                positions: Vec::new(),
            };
            let mut encoded = Vec::new();
            block.encode(prev_last, &mut encoded).unwrap();
            infos.push(BlockInfo {
                last_doc: block.last_doc(),
                offset: 0,
                len: encoded.len(),
                max_tf: block.max_tf(),
                min_len_byte: 1,
            });
            prev_last = block.last_doc().0;
            blob.extend_from_slice(&encoded);
        }
        let mut file = Vec::new();
        write_skip_table(&infos, &mut file).unwrap();
        file.extend_from_slice(&blob);

        let dir = RamDirectory::new();
        let mut out = dir.create("r").unwrap();
        out.write_all(&file).unwrap();
        out.finish().unwrap();
        dir.open("r").unwrap()
    }

    fn every_third(n: u32) -> Vec<(u32, u32)> {
        (0..n).map(|i| (i * 3, (i % 7) + 1)).collect()
    }

    #[test]
    fn iterates_everything() {
        let postings = every_third(1000);
        let mut cursor = PostingsCursor::open(region_for(&postings), false).unwrap();
        for (doc, tf) in &postings {
            assert!(cursor.is_active());
            assert_eq!(DocId(*doc), cursor.doc());
            assert_eq!(*tf, cursor.tf());
            cursor.advance().unwrap();
        }
        assert!(!cursor.is_active());
        assert!(cursor.doc().is_done());
    }

    #[test]
    fn skip_lands_on_or_after() {
        let postings = every_third(1000);
        let mut cursor = PostingsCursor::open(region_for(&postings), false).unwrap();
        cursor.skip_to(DocId(900)).unwrap();
        assert_eq!(DocId(900), cursor.doc());
        // between postings: lands after.
        cursor.skip_to(DocId(901)).unwrap();
        assert_eq!(DocId(903), cursor.doc());
        // far past the end:
        cursor.skip_to(DocId(10_000)).unwrap();
        assert!(!cursor.is_active());
    }

    #[test]
    fn block_skipping_by_quality() {
        // 3 blocks; only the middle one has a big tf.
        let mut postings = every_third(BLOCK_SIZE as u32 * 3);
        postings[BLOCK_SIZE + 5].1 = 1000;
        let mut cursor = PostingsCursor::open(region_for(&postings), false).unwrap();
        cursor.skip_blocks_while(|info| info.max_tf < 100).unwrap();
        assert!(cursor.is_active());
        // landed on the first posting of the middle block:
        assert_eq!(postings[BLOCK_SIZE].0, cursor.doc().0);
        // skipping again with the same bar moves past everything:
        cursor.advance().unwrap();
        let here = cursor.doc();
        cursor.skip_blocks_while(|info| info.max_tf < 100).unwrap();
        // current block still qualifies, no movement:
        assert_eq!(here, cursor.doc());
    }

    #[test]
    fn inline_cursor() {
        let mut cursor = PostingsCursor::inline(DocId(42), 3, 9);
        assert!(cursor.is_active());
        assert_eq!(DocId(42), cursor.doc());
        assert_eq!(3, cursor.tf());
        cursor.skip_to(DocId(40)).unwrap();
        assert_eq!(DocId(42), cursor.doc());
        cursor.advance().unwrap();
        assert!(!cursor.is_active());
    }
}
