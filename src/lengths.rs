use crate::directory::{checked_payload, ChecksumOutput, Directory, FileSlice};
use crate::io_helper::{write_len_prefixed, write_vbyte, DataInputStream, InputStream};
use crate::{DocId, Error};
use once_cell::sync::Lazy;
use std::io::Write;

/// Magic + version for `.fln` files.
const LENGTHS_MAGIC: u64 = 0x6775_7374_666c_6e01;

/// Lengths below this encode exactly as themselves.
const EXACT_LIMIT: u32 = 64;
/// Geometric bucket growth above the exact range.
const BUCKET_RATIO: f64 = 1.15;

/// Decode table for the one-byte length approximation. Strictly increasing,
/// so `encode` can binary-search it and `decode(encode(x)) <= x` holds.
static DECODE_TABLE: Lazy<[u64; 256]> = Lazy::new(|| {
    let mut table = [0u64; 256];
    for b in 0..256 {
        if (b as u32) < EXACT_LIMIT {
            table[b] = b as u64;
        } else {
            let approx = (EXACT_LIMIT as f64) * BUCKET_RATIO.powi(b as i32 - EXACT_LIMIT as i32);
            table[b] = std::cmp::max(approx as u64, table[b - 1] + 1);
        }
    }
    table
});

/// Lossy one-byte approximation of a field length.
pub fn encode_length(len: u32) -> u8 {
    let table = &*DECODE_TABLE;
    let len = len as u64;
    // Largest bucket whose floor does not exceed len.
    let mut lo = 0usize;
    let mut hi = 255usize;
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if table[mid] <= len {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo as u8
}

pub fn decode_length(b: u8) -> u32 {
    std::cmp::min(DECODE_TABLE[b as usize], u32::max_value() as u64) as u32
}

/// One dense row of encoded lengths per scorable field.
pub struct FieldLengthsRow {
    pub field: String,
    /// Sum of the raw (pre-bucketing) lengths; keeps averages exact.
    pub total_length: u64,
    pub encoded: Vec<u8>,
}

/// Write the `.fln` artifact: all scorable-field rows for one segment.
pub fn write_lengths(
    dir: &dyn Directory,
    name: &str,
    doc_count: u32,
    rows: &[FieldLengthsRow],
) -> Result<(), Error> {
    let mut out = ChecksumOutput::new(dir.create(name)?);
    write_vbyte(rows.len() as u32, &mut out)?;
    for row in rows {
        debug_assert!(row.encoded.len() <= doc_count as usize);
        write_len_prefixed(row.field.as_bytes(), &mut out)?;
        crate::io_helper::write_vbyte_u64(row.total_length, &mut out)?;
        write_vbyte(row.encoded.len() as u32, &mut out)?;
        out.write_all(&row.encoded)?;
    }
    out.seal(LENGTHS_MAGIC)
}

struct ReaderRow {
    field: String,
    total_length: u64,
    /// Byte range of this row within the payload.
    start: usize,
    len: usize,
}

pub struct LengthsReader {
    payload: FileSlice,
    rows: Vec<ReaderRow>,
    doc_count: u32,
}

impl LengthsReader {
    pub fn open(dir: &dyn Directory, name: &str, doc_count: u32) -> Result<Self, Error> {
        let payload = checked_payload(&dir.open(name)?, LENGTHS_MAGIC)
            .map_err(|e| e.with_context(format!("opening lengths {}", name)))?;
        let mut stream = payload.stream();
        let field_count = stream.read_vbyte()? as usize;
        let mut rows = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field = String::from_utf8(stream.read_len_prefixed()?)
                .map_err(|e| Error::Utf8DecodeError(e.utf8_error()))?;
            let total_length = stream.read_vbyte()?;
            let len = stream.read_vbyte()? as usize;
            let start = stream.tell();
            let _ = stream.advance(len)?;
            rows.push(ReaderRow {
                field,
                total_length,
                start,
                len,
            });
        }
        Ok(Self {
            payload,
            rows,
            doc_count,
        })
    }

    fn row(&self, field: &str) -> Option<&ReaderRow> {
        self.rows.iter().find(|r| r.field == field)
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.row(field).is_some()
    }

    /// Decoded (approximate) length; `default` when the field or doc has none.
    pub fn doc_field_length(&self, doc: DocId, field: &str, default: u32) -> u32 {
        match self.row(field) {
            Some(row) if (doc.0 as usize) < row.len => {
                decode_length(self.payload.as_bytes()[row.start + doc.0 as usize])
            }
            _ => default,
        }
    }

    /// Raw encoded byte; the block writer records minima of these.
    pub fn doc_field_length_byte(&self, doc: DocId, field: &str) -> u8 {
        match self.row(field) {
            Some(row) if (doc.0 as usize) < row.len => {
                self.payload.as_bytes()[row.start + doc.0 as usize]
            }
            _ => 0,
        }
    }

    /// Exact total of raw lengths across the segment for one field.
    pub fn total_field_length(&self, field: &str) -> u64 {
        self.row(field).map(|r| r.total_length).unwrap_or(0)
    }

    pub fn average_field_length(&self, field: &str) -> f32 {
        if self.doc_count == 0 {
            0.0
        } else {
            (self.total_field_length(field) as f64 / self.doc_count as f64) as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;

    #[test]
    fn small_lengths_are_exact() {
        for len in 0..EXACT_LIMIT {
            assert_eq!(len, decode_length(encode_length(len)));
        }
    }

    #[test]
    fn bucketing_is_monotone_and_conservative() {
        // Every byte that `encode` can produce decodes strictly above its
        // predecessor; past u32 range the decoded value saturates.
        let top = encode_length(u32::max_value());
        for b in 1..=top {
            assert!(
                decode_length(b) > decode_length(b - 1),
                "table must strictly increase at {}",
                b
            );
        }
        for len in &[64u32, 65, 100, 1000, 65_536, 10_000_000, u32::max_value()] {
            let decoded = decode_length(encode_length(*len));
            assert!(decoded <= *len, "{} decoded to {}", len, decoded);
        }
    }

    #[test]
    fn lengths_file_round_trip() {
        let dir = RamDirectory::new();
        let raw: Vec<u32> = vec![3, 0, 17, 950, 63, 64];
        let total: u64 = raw.iter().map(|x| *x as u64).sum();
        let row = FieldLengthsRow {
            field: "body".into(),
            total_length: total,
            encoded: raw.iter().map(|x| encode_length(*x)).collect(),
        };
        write_lengths(&dir, "0.fln", raw.len() as u32, &[row]).unwrap();

        let reader = LengthsReader::open(&dir, "0.fln", raw.len() as u32).unwrap();
        assert_eq!(reader.doc_field_length(DocId(0), "body", 1), 3);
        assert_eq!(reader.doc_field_length(DocId(1), "body", 1), 0);
        assert_eq!(reader.doc_field_length(DocId(4), "body", 1), 63);
        // 950 buckets down, never up:
        assert!(reader.doc_field_length(DocId(3), "body", 1) <= 950);
        // missing field gets the default:
        assert_eq!(reader.doc_field_length(DocId(0), "title", 7), 7);
        assert_eq!(reader.total_field_length("body"), total);
        let avg = reader.average_field_length("body");
        assert!((avg - total as f32 / 6.0).abs() < 0.001);
    }
}
