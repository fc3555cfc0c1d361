use super::reader::SegmentReader;
use super::writer::{write_term_entry, PostingListBuilder, POSTINGS_MAGIC};
use super::SegmentMeta;
use crate::dictionary::{Term, TermDictWriter};
use crate::directory::{ChecksumOutput, Directory};
use crate::lengths::{decode_length, write_lengths, FieldLengthsRow};
use crate::schema::Schema;
use crate::store::StoredWriter;
use crate::{DocId, Error};

/// Rewrite several segments as one, dropping tombstoned docs and
/// renumbering survivors densely in source order. Source files are left
/// alone; unlinking them is the committer's job once the new TOC lands.
pub fn merge_segments(
    dir: &dyn Directory,
    sources: &[SegmentReader],
    schema: &Schema,
    id: u64,
    generation: u64,
) -> Result<SegmentMeta, Error> {
    // Old -> new doc ids, skipping deletions.
    let mut doc_maps: Vec<Vec<Option<DocId>>> = Vec::with_capacity(sources.len());
    let mut next_doc = 0u32;
    for reader in sources {
        let mut map = Vec::with_capacity(reader.doc_count_all() as usize);
        for old in 0..reader.doc_count_all() {
            if reader.is_deleted(DocId(old)) {
                map.push(None);
            } else {
                map.push(Some(DocId(next_doc)));
                next_doc += 1;
            }
        }
        doc_maps.push(map);
    }
    let meta = SegmentMeta {
        id,
        generation,
        doc_count: next_doc,
        has_deletes: false,
    };
    log::info!(
        "merging {} segments ({} live docs) into {:08x}",
        sources.len(),
        next_doc,
        id
    );

    // Length rows for the merged doc space. The encoded bytes carry over
    // unchanged; totals are rebuilt from the decoded values, which is as
    // much as the one-byte approximation remembers.
    let mut rows: Vec<FieldLengthsRow> = Vec::new();
    for field in schema.scorable_fields() {
        let mut encoded = vec![0u8; next_doc as usize];
        let mut total = 0u64;
        let mut any = false;
        for (reader, map) in sources.iter().zip(doc_maps.iter()) {
            if !reader.lengths().has_field(field) {
                continue;
            }
            any = true;
            for old in 0..reader.doc_count_all() {
                if let Some(new_id) = map[old as usize] {
                    let byte = reader.lengths().doc_field_length_byte(DocId(old), field);
                    encoded[new_id.0 as usize] = byte;
                    total += decode_length(byte) as u64;
                }
            }
        }
        if any {
            rows.push(FieldLengthsRow {
                field: field.to_string(),
                total_length: total,
                encoded,
            });
        }
    }

    // Terms: walk every source dictionary in lockstep, smallest key first.
    let mut dict_out = TermDictWriter::new(dir.create(&meta.terms_file())?);
    let mut postings_out = ChecksumOutput::new(dir.create(&meta.postings_file())?);

    let mut iters: Vec<_> = Vec::with_capacity(sources.len());
    let mut heads: Vec<Option<(Vec<u8>, crate::dictionary::TermInfo)>> = Vec::new();
    for reader in sources {
        let mut iter = reader.dictionary().iter();
        let head = iter.next()?;
        iters.push(iter);
        heads.push(head);
    }

    loop {
        let key: Option<Vec<u8>> = heads
            .iter()
            .filter_map(|h| h.as_ref().map(|(k, _)| k.clone()))
            .min();
        let key = match key {
            Some(k) => k,
            None => break,
        };
        let term = Term::decode(&key)?;
        let has_positions = schema.get(&term.field).map(|o| o.positions).unwrap_or(false);

        let mut merged = PostingListBuilder::default();
        for (idx, reader) in sources.iter().enumerate() {
            let matches = heads[idx]
                .as_ref()
                .map(|(k, _)| k == &key)
                .unwrap_or(false);
            if !matches {
                continue;
            }
            let (_, info) = heads[idx].take().expect("matched above");
            let mut cursor = reader.postings_for_info(&term, &info)?;
            while cursor.is_active() {
                if let Some(new_id) = doc_maps[idx][cursor.doc().0 as usize] {
                    merged.docs.push(new_id.0);
                    merged.tfs.push(cursor.tf());
                    if has_positions {
                        merged.positions.push(cursor.positions().to_vec());
                    }
                }
                cursor.advance()?;
            }
            heads[idx] = iters[idx].next()?;
        }

        // Fully-deleted terms drop out of the merged dictionary.
        if merged.docs.is_empty() {
            continue;
        }
        let lengths_row = rows.iter().find(|r| r.field == term.field);
        let len_byte_of = move |doc: u32| -> u8 {
            match lengths_row {
                Some(row) => row.encoded[doc as usize],
                None => crate::lengths::encode_length(1),
            }
        };
        write_term_entry(
            &key,
            merged,
            has_positions,
            &len_byte_of,
            &mut dict_out,
            &mut postings_out,
        )?;
    }

    dict_out.finish()?;
    postings_out.seal(POSTINGS_MAGIC)?;

    write_lengths(dir, &meta.lengths_file(), meta.doc_count, &rows)?;

    let mut stored = StoredWriter::new(dir.create(&meta.stored_file())?);
    for (reader, map) in sources.iter().zip(doc_maps.iter()) {
        for old in 0..reader.doc_count_all() {
            if map[old as usize].is_some() {
                stored.add(&reader.stored_fields(DocId(old))?)?;
            }
        }
    }
    stored.finish()?;

    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SimpleAnalyzer;
    use crate::deletes::DeleteBitSet;
    use crate::directory::RamDirectory;
    use crate::schema::{Document, FieldOptions};
    use crate::segment::SegmentWriter;
    use crate::value::Value;
    use std::sync::Arc;

    fn schema() -> Schema {
        let mut s = Schema::new();
        s.add_field("body", FieldOptions::text()).unwrap();
        s
    }

    fn segment(dir: &RamDirectory, id: u64, texts: &[&str]) -> SegmentMeta {
        let mut writer = SegmentWriter::new(schema(), Arc::new(SimpleAnalyzer), 32);
        for t in texts {
            writer.add_document(&Document::new().add("body", *t)).unwrap();
        }
        writer.finish(dir, id, 1).unwrap()
    }

    #[test]
    fn merge_two_segments() {
        let dir = RamDirectory::new();
        let s = schema();
        let m1 = segment(&dir, 1, &["red fish", "blue fish"]);
        let m2 = segment(&dir, 2, &["one fish", "two fish two"]);
        let r1 = SegmentReader::open(&dir, &m1, &s).unwrap();
        let r2 = SegmentReader::open(&dir, &m2, &s).unwrap();

        let merged = merge_segments(&dir, &[r1, r2], &s, 3, 2).unwrap();
        assert_eq!(4, merged.doc_count);
        let reader = SegmentReader::open(&dir, &merged, &s).unwrap();

        let info = reader
            .term_info(&Term::text("body", "fish"))
            .unwrap()
            .unwrap();
        assert_eq!(4, info.df);
        let mut cursor = reader
            .postings(&Term::text("body", "fish"))
            .unwrap()
            .unwrap();
        let mut docs = Vec::new();
        while cursor.is_active() {
            docs.push(cursor.doc().0);
            cursor.advance().unwrap();
        }
        assert_eq!(vec![0, 1, 2, 3], docs);

        // tf carried over:
        let info = reader
            .term_info(&Term::text("body", "two"))
            .unwrap()
            .unwrap();
        assert_eq!(1, info.df);
        assert_eq!(2, info.cf);

        // stored fields follow the remap:
        let fields = reader.stored_fields(DocId(2)).unwrap();
        assert_eq!(Some(&Value::from("one fish")), fields.get("body"));
    }

    #[test]
    fn merge_drops_deleted_docs_and_dead_terms() {
        let dir = RamDirectory::new();
        let s = schema();
        let mut m1 = segment(&dir, 1, &["solo unique", "common text"]);
        // tombstone doc 0 of segment 1:
        let mut del = DeleteBitSet::empty(2);
        del.set_deleted(DocId(0));
        del.write(&dir, &m1.deletes_file()).unwrap();
        m1.has_deletes = true;

        let m2 = segment(&dir, 2, &["common again"]);
        let r1 = SegmentReader::open(&dir, &m1, &s).unwrap();
        assert!(r1.has_deletions());
        let r2 = SegmentReader::open(&dir, &m2, &s).unwrap();

        let merged = merge_segments(&dir, &[r1, r2], &s, 3, 2).unwrap();
        assert_eq!(2, merged.doc_count);
        assert!(!merged.has_deletes);
        let reader = SegmentReader::open(&dir, &merged, &s).unwrap();

        // terms of the deleted doc are gone from the dictionary:
        assert!(reader
            .term_info(&Term::text("body", "solo"))
            .unwrap()
            .is_none());
        // df reflects only live docs now:
        let info = reader
            .term_info(&Term::text("body", "common"))
            .unwrap()
            .unwrap();
        assert_eq!(2, info.df);

        // doc ids got renumbered densely:
        let mut cursor = reader
            .postings(&Term::text("body", "common"))
            .unwrap()
            .unwrap();
        assert_eq!(DocId(0), cursor.doc());
        cursor.advance().unwrap();
        assert_eq!(DocId(1), cursor.doc());
    }
}
