use crate::directory::{checked_payload, ChecksumOutput, FileSlice, IndexOutput};
use crate::io_helper::{
    f64_to_ordered, i64_to_ordered, write_len_prefixed, write_vbyte, write_vbyte_u64, Bytes,
    DataInputStream, InputStream, SliceInputStream,
};
use crate::{DocId, Error};
use std::convert::TryInto;
use std::io::Write;

const DICT_MAGIC: u64 = 0x6775_7374_7472_6d01;
/// Terms per dictionary block; one block is the unit of linear scan.
const TERM_BLOCK_SIZE: usize = 128;

/// A `(field, bytes)` pair; the unit the dictionary is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Term {
    pub field: String,
    pub bytes: Vec<u8>,
}

impl Term {
    pub fn text(field: &str, token: &str) -> Term {
        Term {
            field: field.to_string(),
            bytes: token.as_bytes().to_vec(),
        }
    }
    pub fn from_bytes(field: &str, bytes: &[u8]) -> Term {
        Term {
            field: field.to_string(),
            bytes: bytes.to_vec(),
        }
    }
    /// Order-preserving numeric terms; lexicographic compare == numeric compare.
    pub fn i64(field: &str, value: i64) -> Term {
        Term {
            field: field.to_string(),
            bytes: i64_to_ordered(value).to_be_bytes().to_vec(),
        }
    }
    pub fn f64(field: &str, value: f64) -> Term {
        Term {
            field: field.to_string(),
            bytes: f64_to_ordered(value).to_be_bytes().to_vec(),
        }
    }

    /// Dictionary key: length-prefixed field name, then the raw term bytes.
    /// Same-field keys stay contiguous and sort by term bytes.
    pub fn encoded(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.field.len() + self.bytes.len() + 1);
        write_vbyte(self.field.len() as u32, &mut key).expect("vec write");
        key.extend_from_slice(self.field.as_bytes());
        key.extend_from_slice(&self.bytes);
        key
    }

    /// The key prefix shared by every term of `field`.
    pub fn field_prefix(field: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(field.len() + 1);
        write_vbyte(field.len() as u32, &mut key).expect("vec write");
        key.extend_from_slice(field.as_bytes());
        key
    }

    pub fn decode(key: &[u8]) -> Result<Term, Error> {
        let mut stream = SliceInputStream::new(key);
        let name_len = stream.read_vbyte()? as usize;
        let field = std::str::from_utf8(stream.advance(name_len)?)?.to_string();
        let bytes = stream.advance(stream.remaining())?.to_vec();
        Ok(Term { field, bytes })
    }
}

/// Where a term's postings live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostingsAddr {
    /// df == 1: the single posting rides in the dictionary entry.
    Inline { doc: DocId, tf: u32 },
    /// Byte range of the term's region inside the `.pst` file.
    Blocks { offset: u64, len: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermInfo {
    /// Number of documents containing the term (deletions not subtracted).
    pub df: u64,
    /// Sum of term frequencies.
    pub cf: u64,
    /// Max tf in any block; with `min_len_byte`, a list-wide quality input.
    pub max_tf: u32,
    pub min_len_byte: u8,
    pub addr: PostingsAddr,
}

const FLAG_INLINE: u8 = 0b1;

impl TermInfo {
    fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let flags = match self.addr {
            PostingsAddr::Inline { .. } => FLAG_INLINE,
            PostingsAddr::Blocks { .. } => 0,
        };
        out.write_all(&[flags])?;
        write_vbyte_u64(self.df, out)?;
        write_vbyte_u64(self.cf, out)?;
        write_vbyte(self.max_tf, out)?;
        out.write_all(&[self.min_len_byte])?;
        match self.addr {
            PostingsAddr::Inline { doc, tf } => {
                write_vbyte(doc.0, out)?;
                write_vbyte(tf, out)?;
            }
            PostingsAddr::Blocks { offset, len } => {
                write_vbyte_u64(offset, out)?;
                write_vbyte_u64(len, out)?;
            }
        }
        Ok(())
    }

    fn read<I: InputStream>(stream: &mut I) -> Result<TermInfo, Error> {
        let flags = stream.get()?;
        let df = stream.read_vbyte()?;
        let cf = stream.read_vbyte()?;
        let max_tf = stream.read_vbyte()? as u32;
        let min_len_byte = stream.get()?;
        let addr = if flags & FLAG_INLINE != 0 {
            PostingsAddr::Inline {
                doc: DocId(stream.read_vbyte()? as u32),
                tf: stream.read_vbyte()? as u32,
            }
        } else {
            PostingsAddr::Blocks {
                offset: stream.read_vbyte()?,
                len: stream.read_vbyte()?,
            }
        };
        if cf < df {
            return Err(Error::Corrupt(format!("cf {} below df {}", cf, df)));
        }
        Ok(TermInfo {
            df,
            cf,
            max_tf,
            min_len_byte,
            addr,
        })
    }
}

// ---------------------------------------------------------------------------
// Writer: keys arrive in strictly ascending order, prefix-compressed within
// blocks of TERM_BLOCK_SIZE; a sparse (first key, offset) index goes at the
// end, followed by a fixed tail locating that index.

pub struct TermDictWriter {
    out: ChecksumOutput,
    block: Vec<u8>,
    block_count_in_flight: usize,
    last_key: Vec<u8>,
    index: Vec<(Vec<u8>, u64)>,
    num_terms: u64,
}

impl TermDictWriter {
    pub fn new(out: Box<dyn IndexOutput>) -> Self {
        Self {
            out: ChecksumOutput::new(out),
            block: Vec::new(),
            block_count_in_flight: 0,
            last_key: Vec::new(),
            index: Vec::new(),
            num_terms: 0,
        }
    }

    pub fn add(&mut self, key: &[u8], info: &TermInfo) -> Result<(), Error> {
        debug_assert!(
            self.last_key.is_empty() || key > &self.last_key[..],
            "dictionary keys must be added in ascending order"
        );
        if self.block_count_in_flight == 0 {
            self.index.push((key.to_vec(), self.out.tell()));
            // first entry of a block carries its full key.
            write_vbyte(0, &mut self.block)?;
            write_len_prefixed(key, &mut self.block)?;
        } else {
            let shared = common_prefix(&self.last_key, key);
            write_vbyte(shared as u32, &mut self.block)?;
            write_len_prefixed(&key[shared..], &mut self.block)?;
        }
        info.write(&mut self.block)?;
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.block_count_in_flight += 1;
        self.num_terms += 1;
        if self.block_count_in_flight >= TERM_BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<(), Error> {
        if self.block_count_in_flight == 0 {
            return Ok(());
        }
        self.out.write_all(&self.block)?;
        self.block.clear();
        self.block_count_in_flight = 0;
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64, Error> {
        self.flush_block()?;
        let index_offset = self.out.tell();
        for (first_key, offset) in &self.index {
            write_len_prefixed(first_key, &mut self.out)?;
            write_vbyte_u64(*offset, &mut self.out)?;
        }
        // Fixed tail: index offset, block count, term count.
        let block_count = self.index.len() as u32;
        self.out.write_all(&index_offset.to_be_bytes())?;
        self.out.write_all(&block_count.to_be_bytes())?;
        self.out.write_all(&self.num_terms.to_be_bytes())?;
        let n = self.num_terms;
        self.out.seal(DICT_MAGIC)?;
        Ok(n)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

// ---------------------------------------------------------------------------
// Reader.

struct BlockRef {
    first_key: Bytes,
    offset: usize,
    len: usize,
}

pub struct TermDictReader {
    payload: FileSlice,
    blocks: Vec<BlockRef>,
    num_terms: u64,
}

const TAIL_LEN: usize = 8 + 4 + 8;

impl TermDictReader {
    pub fn open(file: FileSlice) -> Result<Self, Error> {
        let payload = checked_payload(&file, DICT_MAGIC)?;
        let bytes = payload.as_bytes();
        if bytes.len() < TAIL_LEN {
            return Err(Error::Corrupt("dictionary too small for its tail".into()));
        }
        let tail = &bytes[bytes.len() - TAIL_LEN..];
        let index_offset = u64::from_be_bytes(tail[0..8].try_into().unwrap()) as usize;
        let block_count = u32::from_be_bytes(tail[8..12].try_into().unwrap()) as usize;
        let num_terms = u64::from_be_bytes(tail[12..20].try_into().unwrap());

        if index_offset > bytes.len() - TAIL_LEN {
            return Err(Error::Corrupt("dictionary index out of bounds".into()));
        }
        let mut stream = SliceInputStream::new(&bytes[index_offset..bytes.len() - TAIL_LEN]);
        let mut blocks: Vec<BlockRef> = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            let first_key = Bytes::from_slice(&stream.read_len_prefixed()?);
            let offset = stream.read_vbyte()? as usize;
            if let Some(prev) = blocks.last_mut() {
                prev.len = offset - prev.offset;
            }
            blocks.push(BlockRef {
                first_key,
                offset,
                len: 0,
            });
        }
        if let Some(last) = blocks.last_mut() {
            last.len = index_offset - last.offset;
        }
        Ok(Self {
            payload,
            blocks,
            num_terms,
        })
    }

    pub fn num_terms(&self) -> u64 {
        self.num_terms
    }

    /// Index of the block that could contain `key`.
    fn block_for(&self, key: &[u8]) -> Option<usize> {
        if self.blocks.is_empty() || self.blocks[0].first_key.cmp_slice(key) == std::cmp::Ordering::Greater
        {
            return None;
        }
        // rightmost block whose first key is <= key.
        let mut lo = 0usize;
        let mut hi = self.blocks.len() - 1;
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.blocks[mid].first_key.cmp_slice(key) != std::cmp::Ordering::Greater {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        Some(lo)
    }

    pub fn get(&self, term: &Term) -> Result<Option<TermInfo>, Error> {
        let key = term.encoded();
        let block_idx = match self.block_for(&key) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let mut iter = self.iter_at_block(block_idx);
        while let Some((found, info)) = iter.next()? {
            match found[..].cmp(&key[..]) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(info)),
                std::cmp::Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    pub fn contains(&self, term: &Term) -> Result<bool, Error> {
        Ok(self.get(term)?.is_some())
    }

    pub fn iter(&self) -> TermDictIterator {
        self.iter_at_block(0)
    }

    /// Iterate from the first key >= the given term.
    pub fn iter_from(&self, term: &Term) -> Result<TermDictIterator, Error> {
        self.iter_from_key(&term.encoded())
    }

    pub fn iter_from_key(&self, key: &[u8]) -> Result<TermDictIterator, Error> {
        let block_idx = self.block_for(key).unwrap_or(0);
        let mut iter = self.iter_at_block(block_idx);
        while let Some((found, info)) = iter.next()? {
            if &found[..] >= key {
                iter.pending = Some((found, info));
                break;
            }
        }
        Ok(iter)
    }

    /// All terms of `field` starting with `prefix`.
    pub fn iter_prefix(&self, field: &str, prefix: &[u8]) -> Result<TermDictIterator, Error> {
        let mut key = Term::field_prefix(field);
        key.extend_from_slice(prefix);
        let mut iter = self.iter_from_key(&key)?;
        iter.stop_prefix = Some(key);
        Ok(iter)
    }

    fn iter_at_block(&self, block_idx: usize) -> TermDictIterator {
        TermDictIterator {
            dict: self,
            block_idx,
            entry_in_block: 0,
            stream_pos: self.blocks.get(block_idx).map(|b| b.offset).unwrap_or(0),
            key: Vec::new(),
            pending: None,
            stop_prefix: None,
        }
    }
}

/// Streaming, single-pass iteration over `(key, TermInfo)` in key order.
pub struct TermDictIterator<'a> {
    dict: &'a TermDictReader,
    block_idx: usize,
    entry_in_block: usize,
    stream_pos: usize,
    key: Vec<u8>,
    pending: Option<(Vec<u8>, TermInfo)>,
    /// When set, iteration ends at the first key outside this prefix.
    stop_prefix: Option<Vec<u8>>,
}

impl<'a> TermDictIterator<'a> {
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, TermInfo)>, Error> {
        if let Some(ready) = self.pending.take() {
            if self.beyond_prefix(&ready.0) {
                return Ok(None);
            }
            return Ok(Some(ready));
        }
        loop {
            if self.block_idx >= self.dict.blocks.len() {
                return Ok(None);
            }
            let block = &self.dict.blocks[self.block_idx];
            let block_end = block.offset + block.len;
            if self.stream_pos >= block_end {
                self.block_idx += 1;
                self.entry_in_block = 0;
                if let Some(next) = self.dict.blocks.get(self.block_idx) {
                    self.stream_pos = next.offset;
                }
                continue;
            }
            let bytes = self.dict.payload.as_bytes();
            let mut stream = SliceInputStream::new(&bytes[..block_end]);
            stream.seek(self.stream_pos)?;
            let shared = stream.read_vbyte()? as usize;
            let suffix = stream.read_len_prefixed()?;
            if self.entry_in_block == 0 && shared != 0 {
                return Err(Error::Corrupt("block head must carry a full key".into()));
            }
            self.key.truncate(shared);
            self.key.extend_from_slice(&suffix);
            let info = TermInfo::read(&mut stream)?;
            self.stream_pos = stream.tell();
            self.entry_in_block += 1;
            let key = self.key.clone();
            if self.beyond_prefix(&key) {
                return Ok(None);
            }
            return Ok(Some((key, info)));
        }
    }

    fn beyond_prefix(&self, key: &[u8]) -> bool {
        match &self.stop_prefix {
            Some(prefix) => !key.starts_with(prefix),
            None => false,
        }
    }
}
