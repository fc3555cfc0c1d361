use crate::directory::{checked_payload, ChecksumOutput, FileSlice, IndexOutput};
use crate::io_helper::{write_len_prefixed, write_vbyte, DataInputStream, InputStream, SliceInputStream};
use crate::value::Value;
use crate::{DocId, Error};
use std::collections::BTreeMap;
use std::convert::TryInto;
use std::io::Write;

const STORED_MAGIC: u64 = 0x6775_7374_7374_7601;

fn encode_record(fields: &BTreeMap<String, Value>) -> Vec<u8> {
    let mut raw = Vec::new();
    write_vbyte(fields.len() as u32, &mut raw).expect("vec write");
    for (name, value) in fields {
        write_len_prefixed(name.as_bytes(), &mut raw).expect("vec write");
        value.encode(&mut raw).expect("vec write");
    }
    raw
}

fn decode_record(raw: &[u8]) -> Result<BTreeMap<String, Value>, Error> {
    let mut stream = SliceInputStream::new(raw);
    let count = stream.read_vbyte()? as usize;
    let mut fields = BTreeMap::new();
    for _ in 0..count {
        let name = String::from_utf8(stream.read_len_prefixed()?)
            .map_err(|e| Error::Utf8DecodeError(e.utf8_error()))?;
        fields.insert(name, Value::decode(&mut stream)?);
    }
    Ok(fields)
}

/// Writes the `.stv` artifact: one LZ4 record per doc, then an offset table
/// so any record is one slice away.
pub struct StoredWriter {
    out: ChecksumOutput,
    offsets: Vec<u64>,
}

impl StoredWriter {
    pub fn new(out: Box<dyn IndexOutput>) -> Self {
        Self {
            out: ChecksumOutput::new(out),
            offsets: vec![0],
        }
    }

    /// Records must arrive in local doc-ID order.
    pub fn add(&mut self, fields: &BTreeMap<String, Value>) -> Result<(), Error> {
        let raw = encode_record(fields);
        let compressed = lz4_flex::compress_prepend_size(&raw);
        self.out.write_all(&compressed)?;
        self.offsets.push(self.out.tell());
        Ok(())
    }

    pub fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    pub fn finish(mut self) -> Result<(), Error> {
        let table_start = self.out.tell();
        for offset in &self.offsets {
            self.out.write_all(&offset.to_be_bytes())?;
        }
        let doc_count = (self.offsets.len() - 1) as u32;
        self.out.write_all(&table_start.to_be_bytes())?;
        self.out.write_all(&doc_count.to_be_bytes())?;
        self.out.seal(STORED_MAGIC)
    }
}

pub struct StoredReader {
    payload: FileSlice,
    table_start: usize,
    doc_count: u32,
}

const TAIL_LEN: usize = 8 + 4;

impl StoredReader {
    pub fn open(file: FileSlice) -> Result<Self, Error> {
        let payload = checked_payload(&file, STORED_MAGIC)?;
        let bytes = payload.as_bytes();
        if bytes.len() < TAIL_LEN {
            return Err(Error::Corrupt("stored file too small".into()));
        }
        let tail = &bytes[bytes.len() - TAIL_LEN..];
        let table_start = u64::from_be_bytes(tail[0..8].try_into().unwrap()) as usize;
        let doc_count = u32::from_be_bytes(tail[8..12].try_into().unwrap());
        let table_len = (doc_count as usize + 1) * 8;
        if table_start + table_len > bytes.len() - TAIL_LEN {
            return Err(Error::Corrupt("stored offset table out of bounds".into()));
        }
        Ok(Self {
            payload,
            table_start,
            doc_count,
        })
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    fn offset(&self, i: usize) -> usize {
        let at = self.table_start + i * 8;
        let bytes = self.payload.as_bytes();
        u64::from_be_bytes(bytes[at..at + 8].try_into().unwrap()) as usize
    }

    pub fn get(&self, doc: DocId) -> Result<BTreeMap<String, Value>, Error> {
        if doc.0 >= self.doc_count {
            return Err(Error::NotFound);
        }
        let start = self.offset(doc.0 as usize);
        let end = self.offset(doc.0 as usize + 1);
        let compressed = &self.payload.as_bytes()[start..end];
        let raw = lz4_flex::decompress_size_prepended(compressed)
            .map_err(|_| Error::CompressionError)?;
        decode_record(&raw)
    }
}
