use crate::directory::{checked_payload, ChecksumOutput, Directory};
use crate::io_helper::{write_vbyte, DataInputStream, InputStream};
use crate::{DocId, Error};
use std::io::Write;

const DELETES_MAGIC: u64 = 0x6775_7374_6465_6c01;

/// One bit per local doc. Absent on disk until the first deletion.
#[derive(Debug, Clone)]
pub struct DeleteBitSet {
    words: Vec<u64>,
    doc_count: u32,
    num_deleted: u32,
}

impl DeleteBitSet {
    pub fn empty(doc_count: u32) -> Self {
        let n_words = ((doc_count as usize) + 63) / 64;
        Self {
            words: vec![0; n_words],
            doc_count,
            num_deleted: 0,
        }
    }

    pub fn is_deleted(&self, doc: DocId) -> bool {
        let idx = doc.0 as usize;
        if idx >= self.doc_count as usize {
            return false;
        }
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Returns true if the doc was newly marked.
    pub fn set_deleted(&mut self, doc: DocId) -> bool {
        let idx = doc.0 as usize;
        debug_assert!(idx < self.doc_count as usize);
        let mask = 1u64 << (idx % 64);
        if self.words[idx / 64] & mask != 0 {
            return false;
        }
        self.words[idx / 64] |= mask;
        self.num_deleted += 1;
        true
    }

    pub fn num_deleted(&self) -> u32 {
        self.num_deleted
    }

    pub fn is_empty(&self) -> bool {
        self.num_deleted == 0
    }

    /// Flush through a temp file; the rename keeps concurrent readers whole.
    pub fn write(&self, dir: &dyn Directory, name: &str) -> Result<(), Error> {
        let tmp = format!("{}.tmp", name);
        let mut out = ChecksumOutput::new(dir.create(&tmp)?);
        write_vbyte(self.doc_count, &mut out)?;
        write_vbyte(self.num_deleted, &mut out)?;
        for word in &self.words {
            out.write_all(&word.to_be_bytes())?;
        }
        out.seal(DELETES_MAGIC)?;
        dir.atomic_rename(&tmp, name)?;
        Ok(())
    }

    pub fn open(dir: &dyn Directory, name: &str, expect_docs: u32) -> Result<Self, Error> {
        let payload = checked_payload(&dir.open(name)?, DELETES_MAGIC)
            .map_err(|e| e.with_context(format!("opening deletes {}", name)))?;
        let mut stream = payload.stream();
        let doc_count = stream.read_vbyte()? as u32;
        if doc_count != expect_docs {
            return Err(Error::Corrupt(format!(
                "delete bitset sized for {} docs, segment has {}",
                doc_count, expect_docs
            )));
        }
        let num_deleted = stream.read_vbyte()? as u32;
        let n_words = ((doc_count as usize) + 63) / 64;
        let mut words = Vec::with_capacity(n_words);
        for _ in 0..n_words {
            words.push(stream.read_u64()?);
        }
        Ok(Self {
            words,
            doc_count,
            num_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;

    #[test]
    fn set_and_query() {
        let mut del = DeleteBitSet::empty(130);
        assert!(!del.is_deleted(DocId(0)));
        assert!(del.set_deleted(DocId(0)));
        assert!(!del.set_deleted(DocId(0)));
        assert!(del.set_deleted(DocId(129)));
        assert!(del.is_deleted(DocId(0)));
        assert!(del.is_deleted(DocId(129)));
        assert!(!del.is_deleted(DocId(64)));
        assert_eq!(2, del.num_deleted());
    }

    #[test]
    fn file_round_trip() {
        let dir = RamDirectory::new();
        let mut del = DeleteBitSet::empty(100);
        del.set_deleted(DocId(3));
        del.set_deleted(DocId(77));
        del.write(&dir, "0.del").unwrap();

        let read = DeleteBitSet::open(&dir, "0.del", 100).unwrap();
        assert_eq!(2, read.num_deleted());
        assert!(read.is_deleted(DocId(3)));
        assert!(read.is_deleted(DocId(77)));
        assert!(!read.is_deleted(DocId(4)));

        // doc-count disagreement is corruption:
        match DeleteBitSet::open(&dir, "0.del", 101) {
            Err(Error::Corrupt(_)) => {}
            _ => panic!("size mismatch should be corrupt"),
        }
    }
}
