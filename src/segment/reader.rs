use super::SegmentMeta;
use crate::deletes::DeleteBitSet;
use crate::dictionary::{PostingsAddr, Term, TermDictReader, TermInfo};
use crate::directory::{Directory, FileSlice};
use crate::lengths::LengthsReader;
use crate::postings::PostingsCursor;
use crate::schema::Schema;
use crate::store::StoredReader;
use crate::value::Value;
use crate::{DocId, Error};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only view over one segment. Binds to the segment's files at open
/// time; deletion-bit updates made elsewhere are invisible until reopen.
pub struct SegmentReader {
    meta: SegmentMeta,
    schema: Schema,
    dict: TermDictReader,
    postings: FileSlice,
    stored: StoredReader,
    lengths: Arc<LengthsReader>,
    deletes: Option<DeleteBitSet>,
}

impl SegmentReader {
    pub fn open(dir: &dyn Directory, meta: &SegmentMeta, schema: &Schema) -> Result<Self, Error> {
        let dict = TermDictReader::open(dir.open(&meta.terms_file())?)
            .map_err(|e| e.with_context(format!("segment {:08x} terms", meta.id)))?;
        let postings = crate::directory::checked_payload(
            &dir.open(&meta.postings_file())?,
            super::writer::POSTINGS_MAGIC,
        )
        .map_err(|e| e.with_context(format!("segment {:08x} postings", meta.id)))?;
        let stored = StoredReader::open(dir.open(&meta.stored_file())?)
            .map_err(|e| e.with_context(format!("segment {:08x} stored", meta.id)))?;
        let lengths = LengthsReader::open(dir, &meta.lengths_file(), meta.doc_count)
            .map_err(|e| e.with_context(format!("segment {:08x} lengths", meta.id)))?;
        let deletes = if meta.has_deletes && dir.exists(&meta.deletes_file()) {
            Some(DeleteBitSet::open(dir, &meta.deletes_file(), meta.doc_count)?)
        } else {
            None
        };
        if stored.doc_count() != meta.doc_count {
            return Err(Error::Corrupt(format!(
                "segment {:08x}: stored file has {} docs, TOC says {}",
                meta.id,
                stored.doc_count(),
                meta.doc_count
            )));
        }
        Ok(Self {
            meta: meta.clone(),
            schema: schema.clone(),
            dict,
            postings,
            stored,
            lengths: Arc::new(lengths),
            deletes,
        })
    }

    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }
    pub fn schema(&self) -> &Schema {
        &self.schema
    }
    pub fn dictionary(&self) -> &TermDictReader {
        &self.dict
    }

    /// Docs still alive in this view.
    pub fn doc_count(&self) -> u32 {
        self.meta.doc_count - self.num_deleted()
    }
    /// Docs ever written, tombstones included.
    pub fn doc_count_all(&self) -> u32 {
        self.meta.doc_count
    }
    pub fn num_deleted(&self) -> u32 {
        self.deletes.as_ref().map(|d| d.num_deleted()).unwrap_or(0)
    }
    pub fn has_deletions(&self) -> bool {
        self.num_deleted() > 0
    }
    pub fn is_deleted(&self, doc: DocId) -> bool {
        self.deletes
            .as_ref()
            .map(|d| d.is_deleted(doc))
            .unwrap_or(false)
    }
    pub fn deletes(&self) -> Option<&DeleteBitSet> {
        self.deletes.as_ref()
    }

    pub fn term_info(&self, term: &Term) -> Result<Option<TermInfo>, Error> {
        self.dict.get(term)
    }

    /// A cursor over the term's postings, or None for an absent term.
    pub fn postings(&self, term: &Term) -> Result<Option<PostingsCursor>, Error> {
        let info = match self.dict.get(term)? {
            Some(info) => info,
            None => return Ok(None),
        };
        self.postings_for_info(term, &info).map(Some)
    }

    pub fn postings_for_info(&self, term: &Term, info: &TermInfo) -> Result<PostingsCursor, Error> {
        let has_positions = self
            .schema
            .get(&term.field)
            .map(|o| o.positions)
            .unwrap_or(false);
        match info.addr {
            PostingsAddr::Inline { doc, tf } => {
                Ok(PostingsCursor::inline(doc, tf, info.min_len_byte))
            }
            PostingsAddr::Blocks { offset, len } => {
                let region = self
                    .postings
                    .slice(offset as usize, (offset + len) as usize);
                PostingsCursor::open(region, has_positions)
            }
        }
    }

    pub fn stored_fields(&self, doc: DocId) -> Result<BTreeMap<String, Value>, Error> {
        self.stored.get(doc)
    }

    pub fn doc_field_length(&self, doc: DocId, field: &str, default: u32) -> u32 {
        self.lengths.doc_field_length(doc, field, default)
    }

    /// Exact sum of raw lengths for one field across the whole segment.
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.lengths.total_field_length(field)
    }

    pub fn lengths(&self) -> &LengthsReader {
        &self.lengths
    }

    /// Shared handle for matchers that outlive this borrow.
    pub fn lengths_handle(&self) -> Arc<LengthsReader> {
        self.lengths.clone()
    }
}
