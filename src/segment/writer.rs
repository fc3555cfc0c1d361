use super::SegmentMeta;
use crate::analysis::Analyzer;
use crate::dictionary::{PostingsAddr, Term, TermDictWriter, TermInfo};
use crate::directory::{ChecksumOutput, Directory};
use crate::io_helper::{write_len_prefixed, write_vbyte};
use crate::lengths::{encode_length, write_lengths, FieldLengthsRow};
use crate::postings::block::{write_skip_table, BlockInfo, PostingBlock, BLOCK_SIZE};
use crate::schema::{Document, FieldKind, Schema};
use crate::store::StoredWriter;
use crate::{DocId, Error};
use fnv::FnvHashMap;
use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

pub(crate) const POSTINGS_MAGIC: u64 = 0x6775_7374_7073_7401;

#[derive(Default)]
pub(crate) struct PostingListBuilder {
    pub(crate) docs: Vec<u32>,
    /// index-paired with docs.
    pub(crate) tfs: Vec<u32>,
    /// index-paired with docs; empty unless the field carries positions.
    pub(crate) positions: Vec<Vec<u32>>,
}

/// In-flight posting data for one doc of one field.
#[derive(Default)]
struct DocTermAcc {
    tf: u32,
    positions: Vec<u32>,
}

/// Accumulates postings in memory, spilling sorted runs to temp files when
/// the configured RAM budget is exceeded; `finish` merges runs plus the
/// in-memory tail, in term order, into the segment's files.
pub struct SegmentWriter {
    schema: Schema,
    analyzer: Arc<dyn Analyzer>,
    accumulator: BTreeMap<Vec<u8>, PostingListBuilder>,
    lengths: BTreeMap<String, Vec<u32>>,
    stored: Vec<BTreeMap<String, crate::value::Value>>,
    runs: Vec<std::fs::File>,
    next_doc: u32,
    approx_ram: usize,
    ram_limit: usize,
}

impl SegmentWriter {
    pub fn new(schema: Schema, analyzer: Arc<dyn Analyzer>, ram_limit_mb: usize) -> Self {
        Self {
            schema,
            analyzer,
            accumulator: BTreeMap::new(),
            lengths: BTreeMap::new(),
            stored: Vec::new(),
            runs: Vec::new(),
            next_doc: 0,
            approx_ram: 0,
            ram_limit: ram_limit_mb.max(1) * 1024 * 1024,
        }
    }

    pub fn doc_count(&self) -> u32 {
        self.next_doc
    }

    pub fn is_empty(&self) -> bool {
        self.next_doc == 0
    }

    /// Index one document; returns its local doc ID.
    pub fn add_document(&mut self, doc: &Document) -> Result<DocId, Error> {
        let doc_id = DocId(self.next_doc);

        // Validate the whole document before touching any state, so a bad
        // value never leaves a half-indexed doc behind.
        for (field, value) in doc.fields() {
            let options = self.schema.get(field).ok_or_else(|| {
                Error::SchemaMismatch(format!("field '{}' not in schema", field))
            })?;
            options.check_value(field, value)?;
        }

        for (field, value) in doc.fields() {
            let options = *self.schema.get(field).expect("validated above");
            if !options.indexed {
                continue;
            }
            let mut per_term: FnvHashMap<Vec<u8>, DocTermAcc> = FnvHashMap::default();
            let mut token_count = 0u32;
            match options.kind {
                FieldKind::Text => {
                    let text = value.as_str().expect("validated as text");
                    for token in self.analyzer.analyze(field, text) {
                        let position = token.position;
                        let acc = per_term.entry(token.bytes).or_default();
                        acc.tf += 1;
                        if options.positions {
                            if acc.positions.last().map(|p| *p < position).unwrap_or(true) {
                                acc.positions.push(position);
                            }
                        }
                        token_count += 1;
                    }
                }
                FieldKind::Id => {
                    let text = value.as_str().expect("validated as id");
                    per_term.entry(text.as_bytes().to_vec()).or_default().tf = 1;
                    token_count = 1;
                }
                FieldKind::I64 => {
                    let x = value.as_i64().expect("validated as i64");
                    let bytes = crate::io_helper::i64_to_ordered(x).to_be_bytes().to_vec();
                    per_term.entry(bytes).or_default().tf = 1;
                    token_count = 1;
                }
                FieldKind::F64 => {
                    let x = value.as_f64().expect("validated as f64");
                    let bytes = crate::io_helper::f64_to_ordered(x).to_be_bytes().to_vec();
                    per_term.entry(bytes).or_default().tf = 1;
                    token_count = 1;
                }
                FieldKind::StoredOnly => unreachable!("stored-only fields are not indexed"),
            }

            if options.scorable {
                let row = self.lengths.entry(field.to_string()).or_default();
                // pad-zeros for docs without this field.
                while row.len() < doc_id.0 as usize {
                    row.push(0);
                }
                row.push(token_count);
            }

            let prefix = Term::field_prefix(field);
            for (bytes, acc) in per_term {
                let mut key = prefix.clone();
                key.extend_from_slice(&bytes);
                self.approx_ram += key.len() + 16 + 4 * acc.positions.len();
                let posting = self.accumulator.entry(key).or_default();
                posting.docs.push(doc_id.0);
                posting.tfs.push(acc.tf);
                if options.positions {
                    posting.positions.push(acc.positions);
                }
            }
        }

        self.stored.push(doc.to_stored(&self.schema));
        self.next_doc += 1;

        if self.approx_ram > self.ram_limit {
            self.spill()?;
        }
        Ok(doc_id)
    }

    /// Write the sorted accumulator out as one run and clear it.
    fn spill(&mut self) -> Result<(), Error> {
        if self.accumulator.is_empty() {
            return Ok(());
        }
        log::debug!(
            "spilling run #{}: {} terms, ~{} bytes",
            self.runs.len(),
            self.accumulator.len(),
            self.approx_ram
        );
        let file = tempfile::tempfile()?;
        let mut out = BufWriter::new(file);
        for (key, posting) in std::mem::replace(&mut self.accumulator, BTreeMap::new()) {
            write_run_term(&mut out, &key, &posting)?;
        }
        out.flush()?;
        let mut file = out.into_inner().map_err(|e| Error::IO(e.into_error()))?;
        file.seek(SeekFrom::Start(0))?;
        self.runs.push(file);
        self.approx_ram = 0;
        Ok(())
    }

    /// Merge runs plus the in-memory tail and write every segment file.
    /// Files are made durable before this returns; the TOC swap is the
    /// caller's business.
    pub fn finish(
        mut self,
        dir: &dyn Directory,
        id: u64,
        generation: u64,
    ) -> Result<SegmentMeta, Error> {
        let meta = SegmentMeta {
            id,
            generation,
            doc_count: self.next_doc,
            has_deletes: false,
        };

        // Sources: each spilled run, plus the in-memory tail. Doc IDs in
        // earlier runs precede later ones, so per-term batches concatenate.
        let mut sources: Vec<RunCursor> = Vec::new();
        for file in std::mem::replace(&mut self.runs, Vec::new()) {
            sources.push(RunCursor::from_file(file)?);
        }
        sources.push(RunCursor::from_memory(std::mem::replace(
            &mut self.accumulator,
            BTreeMap::new(),
        )));

        let mut dict = TermDictWriter::new(dir.create(&meta.terms_file())?);
        let mut postings_out = ChecksumOutput::new(dir.create(&meta.postings_file())?);

        loop {
            // Smallest key across the active sources.
            let next_key: Option<Vec<u8>> = sources
                .iter()
                .filter_map(|s| s.peek_key())
                .min()
                .map(|k| k.to_vec());
            let key = match next_key {
                Some(k) => k,
                None => break,
            };
            let mut merged = PostingListBuilder::default();
            for source in sources.iter_mut() {
                if source.peek_key() == Some(&key[..]) {
                    source.take_into(&mut merged)?;
                }
            }
            self.write_term(&key, merged, &mut dict, &mut postings_out)?;
        }

        dict.finish()?;
        postings_out.seal(POSTINGS_MAGIC)?;

        let rows: Vec<FieldLengthsRow> = std::mem::replace(&mut self.lengths, BTreeMap::new())
            .into_iter()
            .map(|(field, raw)| FieldLengthsRow {
                field,
                total_length: raw.iter().map(|x| *x as u64).sum(),
                encoded: raw.iter().map(|x| encode_length(*x)).collect(),
            })
            .collect();
        write_lengths(dir, &meta.lengths_file(), meta.doc_count, &rows)?;

        let mut stored = StoredWriter::new(dir.create(&meta.stored_file())?);
        for fields in &self.stored {
            stored.add(fields)?;
        }
        stored.finish()?;

        log::info!(
            "segment {:08x}: {} docs written at generation {}",
            id,
            meta.doc_count,
            generation
        );
        Ok(meta)
    }

    fn write_term(
        &self,
        key: &[u8],
        merged: PostingListBuilder,
        dict: &mut TermDictWriter,
        postings_out: &mut ChecksumOutput,
    ) -> Result<(), Error> {
        let term = Term::decode(key)?;
        let options = self.schema.get(&term.field);
        let has_positions = options.map(|o| o.positions).unwrap_or(false);
        let scorable = options.map(|o| o.scorable).unwrap_or(false);
        let len_row = self.lengths.get(&term.field);

        let len_byte_of = move |doc: u32| -> u8 {
            if !scorable {
                return encode_length(1);
            }
            let raw = len_row
                .and_then(|row| row.get(doc as usize))
                .cloned()
                .unwrap_or(0);
            encode_length(raw)
        };
        write_term_entry(key, merged, has_positions, &len_byte_of, dict, postings_out)
    }
}

/// Block-encode one term's merged postings and register its dictionary
/// entry. Shared between fresh segment builds and segment merging.
pub(crate) fn write_term_entry(
    key: &[u8],
    merged: PostingListBuilder,
    has_positions: bool,
    len_byte_of: &dyn Fn(u32) -> u8,
    dict: &mut TermDictWriter,
    postings_out: &mut ChecksumOutput,
) -> Result<(), Error> {
    let df = merged.docs.len() as u64;
    let cf: u64 = merged.tfs.iter().map(|tf| *tf as u64).sum();

    // Single posting without positions rides inline in the dictionary.
    if df == 1 && !has_positions {
        let doc = DocId(merged.docs[0]);
        let tf = merged.tfs[0];
        let info = TermInfo {
            df,
            cf,
            max_tf: tf,
            min_len_byte: len_byte_of(doc.0),
            addr: PostingsAddr::Inline { doc, tf },
        };
        dict.add(key, &info)?;
        return Ok(());
    }

    let mut infos: Vec<BlockInfo> = Vec::new();
    let mut blob: Vec<u8> = Vec::new();
    let mut prev_last = 0u32;
    let n = merged.docs.len();
    let mut at = 0;
    while at < n {
        let upto = std::cmp::min(at + BLOCK_SIZE, n);
        let block = PostingBlock {
            docs: merged.docs[at..upto].iter().map(|d| DocId(*d)).collect(),
            tfs: merged.tfs[at..upto].to_vec(),
            positions: if has_positions {
                merged.positions[at..upto].to_vec()
            } else {
                Vec::new()
            },
        };
        let mut encoded = Vec::new();
        block.encode(prev_last, &mut encoded)?;
        let min_len_byte = merged.docs[at..upto]
            .iter()
            .map(|d| len_byte_of(*d))
            .min()
            .unwrap_or(0);
        infos.push(BlockInfo {
            last_doc: block.last_doc(),
            offset: 0,
            len: encoded.len(),
            max_tf: block.max_tf(),
            min_len_byte,
        });
        prev_last = block.last_doc().0;
        blob.extend_from_slice(&encoded);
        at = upto;
    }

    let region_start = postings_out.tell();
    write_skip_table(&infos, postings_out)?;
    postings_out.write_all(&blob)?;
    let region_len = postings_out.tell() - region_start;

    let info = TermInfo {
        df,
        cf,
        max_tf: infos.iter().map(|i| i.max_tf).max().unwrap_or(0),
        min_len_byte: infos.iter().map(|i| i.min_len_byte).min().unwrap_or(0),
        addr: PostingsAddr::Blocks {
            offset: region_start,
            len: region_len,
        },
    };
    dict.add(key, &info)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Run format: per term, a length-prefixed key, a doc count, then per doc
// (gap-free) doc, tf, position count, position gaps -- all vbytes.

fn write_run_term<W: Write>(
    out: &mut W,
    key: &[u8],
    posting: &PostingListBuilder,
) -> Result<(), Error> {
    write_len_prefixed(key, out)?;
    write_vbyte(posting.docs.len() as u32, out)?;
    let with_positions = !posting.positions.is_empty();
    for (i, doc) in posting.docs.iter().enumerate() {
        write_vbyte(*doc, out)?;
        write_vbyte(posting.tfs[i], out)?;
        if with_positions {
            let plist = &posting.positions[i];
            write_vbyte(plist.len() as u32, out)?;
            let mut prev = 0;
            for (j, pos) in plist.iter().enumerate() {
                write_vbyte(if j == 0 { *pos } else { *pos - prev }, out)?;
                prev = *pos;
            }
        } else {
            write_vbyte(0, out)?;
        }
    }
    Ok(())
}

/// Either a spilled run streaming back off disk, or the in-memory tail.
/// Both present the same (sorted, unique-key) term-record interface.
enum RunCursor {
    Disk {
        reader: BufReader<std::fs::File>,
        current: Option<(Vec<u8>, PostingListBuilder)>,
    },
    Memory {
        items: std::collections::btree_map::IntoIter<Vec<u8>, PostingListBuilder>,
        current: Option<(Vec<u8>, PostingListBuilder)>,
    },
}

impl RunCursor {
    fn from_file(file: std::fs::File) -> Result<Self, Error> {
        let mut cursor = RunCursor::Disk {
            reader: BufReader::new(file),
            current: None,
        };
        cursor.load_next()?;
        Ok(cursor)
    }

    fn from_memory(map: BTreeMap<Vec<u8>, PostingListBuilder>) -> Self {
        let mut items = map.into_iter();
        let current = items.next();
        RunCursor::Memory { items, current }
    }

    fn peek_key(&self) -> Option<&[u8]> {
        match self {
            RunCursor::Disk { current, .. } | RunCursor::Memory { current, .. } => {
                current.as_ref().map(|(k, _)| &k[..])
            }
        }
    }

    /// Append the current term's postings into `merged` and step forward.
    fn take_into(&mut self, merged: &mut PostingListBuilder) -> Result<(), Error> {
        let (_, posting) = match self {
            RunCursor::Disk { current, .. } | RunCursor::Memory { current, .. } => {
                current.take().expect("take_into after peek")
            }
        };
        debug_assert!(
            merged.docs.last().map(|last| posting.docs[0] > *last).unwrap_or(true),
            "runs must concatenate in doc order"
        );
        merged.docs.extend_from_slice(&posting.docs);
        merged.tfs.extend_from_slice(&posting.tfs);
        merged.positions.extend(posting.positions);
        self.load_next()
    }

    fn load_next(&mut self) -> Result<(), Error> {
        match self {
            RunCursor::Memory { items, current } => {
                *current = items.next();
                Ok(())
            }
            RunCursor::Disk { reader, current } => {
                *current = read_run_term(reader)?;
                Ok(())
            }
        }
    }
}

/// One vbyte off a Read, or None at a clean EOF.
fn read_vbyte_opt<R: Read>(reader: &mut R) -> Result<Option<u64>, Error> {
    let mut result: u64 = 0;
    let mut bit_p: u8 = 0;
    let mut buf = [0u8; 1];
    loop {
        match reader.read(&mut buf)? {
            0 => {
                if bit_p == 0 {
                    return Ok(None);
                }
                return Err(Error::Corrupt("run truncated mid-vbyte".into()));
            }
            _ => {
                let byte = buf[0] as u64;
                if byte & 0x80 > 0 {
                    result |= (byte & 0x7f) << bit_p;
                    return Ok(Some(result));
                }
                result |= byte << bit_p;
                bit_p += 7;
            }
        }
    }
}

fn read_run_term<R: Read>(
    reader: &mut R,
) -> Result<Option<(Vec<u8>, PostingListBuilder)>, Error> {
    let key_len = match read_vbyte_opt(reader)? {
        Some(n) => n as usize,
        None => return Ok(None),
    };
    let mut key = vec![0u8; key_len];
    reader.read_exact(&mut key)?;
    let ndocs = read_vbyte_opt(reader)?.ok_or(Error::InternalSizeErr)? as usize;
    let mut posting = PostingListBuilder::default();
    for _ in 0..ndocs {
        let doc = read_vbyte_opt(reader)?.ok_or(Error::InternalSizeErr)? as u32;
        let tf = read_vbyte_opt(reader)?.ok_or(Error::InternalSizeErr)? as u32;
        let npos = read_vbyte_opt(reader)?.ok_or(Error::InternalSizeErr)? as usize;
        posting.docs.push(doc);
        posting.tfs.push(tf);
        if npos > 0 {
            let mut plist = Vec::with_capacity(npos);
            let mut pos = 0u32;
            for j in 0..npos {
                let gap = read_vbyte_opt(reader)?.ok_or(Error::InternalSizeErr)? as u32;
                pos = if j == 0 { gap } else { pos + gap };
                plist.push(pos);
            }
            posting.positions.push(plist);
        }
    }
    Ok(Some((key, posting)))
}
