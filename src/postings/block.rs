use crate::io_helper::{write_vbyte, DataInputStream, InputStream, SliceInputStream};
use crate::{DocId, Error};
use std::io::{self, Write};
use stream_vbyte::Scalar;

/// Postings per block; the final block of a list may be short.
pub const BLOCK_SIZE: usize = 128;

/// Skip-table entry for one block. Offsets are relative to the start of the
/// term's blocks region; quality inputs ride along so entire blocks can be
/// ruled out without decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockInfo {
    pub last_doc: DocId,
    pub offset: usize,
    pub len: usize,
    pub max_tf: u32,
    pub min_len_byte: u8,
}

/// A decoded block: absolute doc IDs, term frequencies, and (for fields that
/// carry them) absolute positions per posting.
#[derive(Debug, Default, Clone)]
pub struct PostingBlock {
    pub docs: Vec<DocId>,
    pub tfs: Vec<u32>,
    pub positions: Vec<Vec<u32>>,
}

impl PostingBlock {
    pub fn len(&self) -> usize {
        self.docs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
    pub fn last_doc(&self) -> DocId {
        *self.docs.last().expect("encode requires a non-empty block")
    }
    pub fn max_tf(&self) -> u32 {
        self.tfs.iter().cloned().max().unwrap_or(0)
    }

    /// Encode against the previous block's last doc ID. Self-sufficient given
    /// that base: doc gaps and tfs as stream-vbyte runs, positions as
    /// count-prefixed vbyte gaps.
    pub fn encode(&self, prev_last_doc: u32, out: &mut Vec<u8>) -> io::Result<()> {
        debug_assert!(!self.docs.is_empty() && self.docs.len() <= BLOCK_SIZE);
        let count = self.docs.len();
        write_vbyte(count as u32, out)?;

        let mut gaps = Vec::with_capacity(count);
        let mut prev = prev_last_doc;
        for doc in &self.docs {
            debug_assert!(doc.0 > prev || (prev == 0 && doc.0 == 0 && gaps.is_empty()));
            gaps.push(doc.0 - prev);
            prev = doc.0;
        }
        let mut encoded = vec![0u8; 5 * count];
        let used = stream_vbyte::encode::<Scalar>(&gaps, &mut encoded);
        write_vbyte(used as u32, out)?;
        out.write_all(&encoded[..used])?;

        let used = stream_vbyte::encode::<Scalar>(&self.tfs, &mut encoded);
        write_vbyte(used as u32, out)?;
        out.write_all(&encoded[..used])?;

        if !self.positions.is_empty() {
            debug_assert_eq!(self.positions.len(), count);
            for plist in &self.positions {
                write_vbyte(plist.len() as u32, out)?;
                let mut prev_pos = 0;
                for (i, pos) in plist.iter().enumerate() {
                    debug_assert!(i == 0 || *pos > prev_pos);
                    write_vbyte(pos - prev_pos, out)?;
                    prev_pos = *pos;
                }
            }
        }
        Ok(())
    }

    pub fn decode(
        data: &[u8],
        prev_last_doc: u32,
        has_positions: bool,
    ) -> Result<PostingBlock, Error> {
        let mut stream = SliceInputStream::new(data);
        let count = stream.read_vbyte()? as usize;
        if count == 0 || count > BLOCK_SIZE {
            return Err(Error::Corrupt(format!("bad posting block count {}", count)));
        }

        let gaps_len = stream.read_vbyte()? as usize;
        let gaps_bytes = stream.consume(gaps_len)?;
        let mut gaps = vec![0u32; count.max(4)];
        stream_vbyte::decode::<Scalar>(gaps_bytes, count, &mut gaps);
        gaps.truncate(count);
        let mut docs = Vec::with_capacity(count);
        let mut prev = prev_last_doc;
        for (i, gap) in gaps.iter().enumerate() {
            let doc = if i == 0 && prev == 0 {
                *gap
            } else if *gap == 0 {
                return Err(Error::Corrupt("doc ids must strictly increase".into()));
            } else {
                prev + gap
            };
            docs.push(DocId(doc));
            prev = doc;
        }

        let tfs_len = stream.read_vbyte()? as usize;
        let tfs_bytes = stream.consume(tfs_len)?;
        let mut tfs = vec![0u32; count.max(4)];
        stream_vbyte::decode::<Scalar>(tfs_bytes, count, &mut tfs);
        tfs.truncate(count);

        let mut positions = Vec::new();
        if has_positions {
            positions.reserve(count);
            for _ in 0..count {
                let n = stream.read_vbyte()? as usize;
                let mut plist = Vec::with_capacity(n);
                let mut pos = 0;
                for i in 0..n {
                    let gap = stream.read_vbyte()? as u32;
                    pos = if i == 0 { gap } else { pos + gap };
                    plist.push(pos);
                }
                positions.push(plist);
            }
        }

        Ok(PostingBlock {
            docs,
            tfs,
            positions,
        })
    }
}

/// Serialize a skip table at the head of a term's postings region.
pub fn write_skip_table<W: Write>(blocks: &[BlockInfo], out: &mut W) -> io::Result<()> {
    write_vbyte(blocks.len() as u32, out)?;
    let mut prev_last = 0u32;
    for info in blocks {
        write_vbyte(info.last_doc.0 - prev_last, out)?;
        write_vbyte(info.len as u32, out)?;
        write_vbyte(info.max_tf, out)?;
        out.write_all(&[info.min_len_byte])?;
        prev_last = info.last_doc.0;
    }
    Ok(())
}

/// Read a skip table; returns the entries (with absolute offsets into the
/// region, starting just past the table) and the table's byte length.
pub fn read_skip_table(data: &[u8]) -> Result<(Vec<BlockInfo>, usize), Error> {
    let mut stream = SliceInputStream::new(data);
    let n_blocks = stream.read_vbyte()? as usize;
    let mut infos = Vec::with_capacity(n_blocks);
    let mut prev_last = 0u32;
    // First pass gathers lengths; offsets are assigned after the table ends.
    for _ in 0..n_blocks {
        let last_doc = prev_last + stream.read_vbyte()? as u32;
        let len = stream.read_vbyte()? as usize;
        let max_tf = stream.read_vbyte()? as u32;
        let min_len_byte = stream.advance(1)?[0];
        prev_last = last_doc;
        infos.push(BlockInfo {
            last_doc: DocId(last_doc),
            offset: 0,
            len,
            max_tf,
            min_len_byte,
        });
    }
    let table_len = stream.tell();
    let mut offset = table_len;
    for info in infos.iter_mut() {
        info.offset = offset;
        offset += info.len;
    }
    Ok((infos, table_len))
}
