use crate::analysis::{Analyzer, SimpleAnalyzer};
use crate::collector::CollectOptions;
use crate::deletes::DeleteBitSet;
use crate::dictionary::Term;
use crate::directory::{Directory, DirLock};
use crate::query::Query;
use crate::schema::{Document, Schema};
use crate::scoring::ScoringConfig;
use crate::searcher::Searcher;
use crate::segment::{merge_segments, SegmentMeta, SegmentReader, SegmentWriter};
use crate::{DocId, Error};
use fnv::FnvHashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TOC_PREFIX: &str = "TOC.";
const LOCK_NAME: &str = ".gust.lock";

/// Table of contents: the single source of truth for what a generation of
/// the index contains. Written as JSON, swapped in by atomic rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toc {
    pub generation: u64,
    pub schema: Schema,
    pub schema_fingerprint: u32,
    pub next_segment_id: u64,
    pub segments: Vec<SegmentMeta>,
}

impl Toc {
    fn file_name(generation: u64) -> String {
        format!("{}{}", TOC_PREFIX, generation)
    }

    fn parse_generation(name: &str) -> Option<u64> {
        name.strip_prefix(TOC_PREFIX)?.parse::<u64>().ok()
    }

    /// Write as `TOC.<gen>.tmp`, fsync, then rename: the commit point.
    fn publish(&self, dir: &dyn Directory) -> Result<(), Error> {
        let name = Toc::file_name(self.generation);
        let tmp = format!("{}.tmp", name);
        let mut out = dir.create(&tmp)?;
        let json = serde_json::to_vec_pretty(self)?;
        out.write_all(&json)?;
        out.finish()?;
        dir.atomic_rename(&tmp, &name)?;
        dir.sync_dir()?;
        log::info!("published {} ({} segments)", name, self.segments.len());
        Ok(())
    }

    fn load(dir: &dyn Directory, generation: u64) -> Result<Toc, Error> {
        let slice = dir.open(&Toc::file_name(generation))?;
        let toc: Toc = serde_json::from_slice(slice.as_bytes())?;
        if toc.generation != generation {
            return Err(Error::Corrupt(format!(
                "TOC file {} claims generation {}",
                generation, toc.generation
            )));
        }
        Ok(toc)
    }

    /// The latest committed generation, discovered by listing.
    fn load_latest(dir: &dyn Directory) -> Result<Toc, Error> {
        let mut latest = None;
        for name in dir.list()? {
            if let Some(generation) = Toc::parse_generation(&name) {
                latest = std::cmp::max(latest, Some(generation));
            }
        }
        match latest {
            Some(generation) => Toc::load(dir, generation),
            None => Err(Error::NotFound),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    pub readonly: bool,
    pub lock_timeout_ms: u64,
    pub mmap: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            readonly: false,
            lock_timeout_ms: 1_000,
            mmap: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    pub ram_limit_mb: usize,
    /// Advisory; reserved for merge parallelism.
    pub procs: usize,
    pub merge_tier_factor: f64,
    pub merge_min_segments: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            ram_limit_mb: 64,
            procs: 1,
            merge_tier_factor: 10.0,
            merge_min_segments: 4,
        }
    }
}

/// What used to be ambient defaults, made explicit: the analyzer feeding
/// the writer and the scoring knobs feeding searchers.
#[derive(Clone)]
pub struct IndexConfig {
    pub analyzer: Arc<dyn Analyzer>,
    pub scoring: ScoringConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            analyzer: Arc::new(SimpleAnalyzer),
            scoring: ScoringConfig::default(),
        }
    }
}

/// Handle on an index directory. Cheap to clone conceptually: all state
/// lives in the directory; every reader pins the TOC it opened with.
pub struct Index {
    dir: Arc<dyn Directory>,
    options: IndexOptions,
    config: IndexConfig,
}

impl Index {
    /// Initialize an empty index; fails if one is already there.
    pub fn create(
        dir: Arc<dyn Directory>,
        schema: Schema,
        options: IndexOptions,
        config: IndexConfig,
    ) -> Result<Index, Error> {
        if Toc::load_latest(dir.as_ref()).is_ok() {
            return Err(Error::IndexingError("index already exists".into()));
        }
        let fingerprint = schema.fingerprint();
        let toc = Toc {
            generation: 0,
            schema,
            schema_fingerprint: fingerprint,
            next_segment_id: 1,
            segments: Vec::new(),
        };
        toc.publish(dir.as_ref())?;
        Ok(Index {
            dir,
            options,
            config,
        })
    }

    pub fn open(
        dir: Arc<dyn Directory>,
        options: IndexOptions,
        config: IndexConfig,
    ) -> Result<Index, Error> {
        let toc = Toc::load_latest(dir.as_ref())?;
        if toc.schema.fingerprint() != toc.schema_fingerprint {
            return Err(Error::SchemaMismatch(
                "schema fingerprint does not match TOC".into(),
            ));
        }
        Ok(Index {
            dir,
            options,
            config,
        })
    }

    pub fn open_or_create(
        dir: Arc<dyn Directory>,
        schema: Schema,
        options: IndexOptions,
        config: IndexConfig,
    ) -> Result<Index, Error> {
        match Toc::load_latest(dir.as_ref()) {
            Ok(_) => Index::open(dir, options, config),
            Err(Error::NotFound) => Index::create(dir, schema, options, config),
            Err(e) => Err(e),
        }
    }

    pub fn schema(&self) -> Result<Schema, Error> {
        Ok(Toc::load_latest(self.dir.as_ref())?.schema)
    }

    pub fn generation(&self) -> Result<u64, Error> {
        Ok(Toc::load_latest(self.dir.as_ref())?.generation)
    }

    /// A searcher pinned to the latest committed snapshot.
    pub fn reader(&self) -> Result<Searcher, Error> {
        let toc = Toc::load_latest(self.dir.as_ref())?;
        let mut readers = Vec::with_capacity(toc.segments.len());
        for meta in &toc.segments {
            readers.push(SegmentReader::open(self.dir.as_ref(), meta, &toc.schema)?);
        }
        Ok(Searcher::new(
            readers,
            toc.schema,
            self.config.scoring.clone(),
        ))
    }

    pub fn writer(&self, options: WriterOptions) -> Result<IndexWriter, Error> {
        self.writer_with_schema(None, options)
    }

    /// A writer that also extends the schema; existing fields must keep
    /// identical semantics.
    pub fn writer_with_schema(
        &self,
        schema: Option<Schema>,
        options: WriterOptions,
    ) -> Result<IndexWriter, Error> {
        if self.options.readonly {
            return Err(Error::ReadOnly);
        }
        let lock = self
            .dir
            .acquire_lock(LOCK_NAME, self.options.lock_timeout_ms)?;
        let mut toc = Toc::load_latest(self.dir.as_ref())?;
        if let Some(new_schema) = schema {
            new_schema.check_extends(&toc.schema)?;
            toc.schema = new_schema;
            toc.schema_fingerprint = toc.schema.fingerprint();
        }
        let buffer = SegmentWriter::new(
            toc.schema.clone(),
            self.config.analyzer.clone(),
            options.ram_limit_mb,
        );
        Ok(IndexWriter {
            dir: self.dir.clone(),
            config: self.config.clone(),
            options,
            _lock: lock,
            toc,
            buffer,
            buffered_unique: FnvHashMap::default(),
            buffer_tombstones: Vec::new(),
            pending_delete_terms: Vec::new(),
            pending_delete_queries: Vec::new(),
        })
    }
}

/// The single writer: holds the index write lock from creation to drop,
/// buffers documents, and publishes atomically on commit.
pub struct IndexWriter {
    dir: Arc<dyn Directory>,
    config: IndexConfig,
    options: WriterOptions,
    _lock: Box<dyn DirLock>,
    toc: Toc,
    buffer: SegmentWriter,
    /// Unique-field term key -> buffered docs carrying it; updates inside
    /// one batch tombstone earlier buffered docs.
    buffered_unique: FnvHashMap<Vec<u8>, Vec<DocId>>,
    buffer_tombstones: Vec<DocId>,
    pending_delete_terms: Vec<Term>,
    pending_delete_queries: Vec<Query>,
}

impl IndexWriter {
    pub fn schema(&self) -> &Schema {
        &self.toc.schema
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<DocId, Error> {
        let doc_id = self.buffer.add_document(doc)?;
        for field in self.toc.schema.unique_fields() {
            if let Some(value) = doc.get(field) {
                if let Some(text) = value.as_str() {
                    let key = Term::text(field, text).encoded();
                    self.buffered_unique.entry(key).or_default().push(doc_id);
                }
            }
        }
        Ok(doc_id)
    }

    /// Delete every prior doc whose unique field matches this doc's value,
    /// then add it. With several unique fields declared, a match on any of
    /// them deletes.
    pub fn update_document(&mut self, doc: &Document) -> Result<DocId, Error> {
        let unique_fields = self.toc.schema.unique_fields();
        if unique_fields.is_empty() {
            return Err(Error::IndexingError(
                "update_document needs a unique field in the schema".into(),
            ));
        }
        for field in unique_fields {
            if let Some(value) = doc.get(field) {
                let text = value.as_str().ok_or_else(|| {
                    Error::IndexingError(format!("unique field '{}' must be a string", field))
                })?;
                let term = Term::text(field, text);
                // docs already sitting in the buffer with this key die too.
                if let Some(earlier) = self.buffered_unique.get(&term.encoded()) {
                    self.buffer_tombstones.extend(earlier.iter().cloned());
                }
                self.pending_delete_terms.push(term);
            }
        }
        self.add_document(doc)
    }

    pub fn delete_by_term(&mut self, term: Term) {
        if let Some(earlier) = self.buffered_unique.get(&term.encoded()) {
            self.buffer_tombstones.extend(earlier.iter().cloned());
        }
        self.pending_delete_terms.push(term);
    }

    pub fn delete_by_query(&mut self, query: Query) {
        self.pending_delete_queries.push(query);
    }

    /// Drop everything uncommitted. The on-disk index is untouched.
    pub fn rollback(&mut self) {
        self.buffer = SegmentWriter::new(
            self.toc.schema.clone(),
            self.config.analyzer.clone(),
            self.options.ram_limit_mb,
        );
        self.buffered_unique.clear();
        self.buffer_tombstones.clear();
        self.pending_delete_terms.clear();
        self.pending_delete_queries.clear();
    }

    /// A searcher over the committed state only; buffered docs are not
    /// visible until `commit`.
    pub fn reader(&self) -> Result<Searcher, Error> {
        let mut readers = Vec::with_capacity(self.toc.segments.len());
        for meta in &self.toc.segments {
            readers.push(SegmentReader::open(self.dir.as_ref(), meta, &self.toc.schema)?);
        }
        Ok(Searcher::new(
            readers,
            self.toc.schema.clone(),
            self.config.scoring.clone(),
        ))
    }

    fn alloc_segment_id(&mut self) -> u64 {
        let id = self.toc.next_segment_id;
        self.toc.next_segment_id += 1;
        id
    }

    /// Publish buffered docs and pending deletions as a new generation.
    pub fn commit(&mut self) -> Result<u64, Error> {
        let new_id = if self.buffer.is_empty() {
            None
        } else {
            Some(self.alloc_segment_id())
        };
        let result = self.commit_inner(new_id);
        if result.is_err() {
            // Half-written segment files must not outlive the failure; the
            // TOC was never touched.
            if let Some(id) = new_id {
                let probe = SegmentMeta {
                    id,
                    generation: 0,
                    doc_count: 0,
                    has_deletes: true,
                };
                if let Ok(names) = self.dir.list() {
                    for name in names {
                        if probe.owns_file(&name) {
                            let _ = self.dir.delete(&name);
                        }
                    }
                }
            }
            self.rollback();
        }
        result
    }

    fn commit_inner(&mut self, new_id: Option<u64>) -> Result<u64, Error> {
        let generation = self.toc.generation + 1;

        // 1. Tombstone existing segments for pending deletes.
        let delete_terms = std::mem::replace(&mut self.pending_delete_terms, Vec::new());
        let delete_queries = std::mem::replace(&mut self.pending_delete_queries, Vec::new());
        let mut new_segments = self.toc.segments.clone();
        if !delete_terms.is_empty() || !delete_queries.is_empty() {
            self.apply_deletes(&mut new_segments, &delete_terms, &delete_queries)?;
        }

        // 2. Flush the buffer into a new segment.
        if let Some(id) = new_id {
            let buffer = std::mem::replace(
                &mut self.buffer,
                SegmentWriter::new(
                    self.toc.schema.clone(),
                    self.config.analyzer.clone(),
                    self.options.ram_limit_mb,
                ),
            );
            let mut meta = buffer.finish(self.dir.as_ref(), id, generation)?;
            // In-batch updates: earlier buffered docs with a reused unique
            // key were tombstoned before the segment even published.
            let tombstones = std::mem::replace(&mut self.buffer_tombstones, Vec::new());
            if !tombstones.is_empty() {
                let mut bits = DeleteBitSet::empty(meta.doc_count);
                for doc in tombstones {
                    bits.set_deleted(doc);
                }
                if !bits.is_empty() {
                    bits.write(self.dir.as_ref(), &meta.deletes_file())?;
                    meta.has_deletes = true;
                }
            }
            new_segments.push(meta);
        }
        self.buffered_unique.clear();
        self.buffer_tombstones.clear();

        // 3. Swap in the new TOC.
        self.toc.generation = generation;
        self.toc.segments = new_segments;
        self.toc.publish(self.dir.as_ref())?;

        // 4. Best-effort cleanup, then maybe merge.
        self.cleanup_orphans();
        self.maybe_merge()?;
        Ok(self.toc.generation)
    }

    fn apply_deletes(
        &self,
        segments: &mut Vec<SegmentMeta>,
        terms: &[Term],
        queries: &[Query],
    ) -> Result<(), Error> {
        // Query deletes see the committed snapshot.
        let searcher = self.reader()?;
        let mut query_hits: Vec<Vec<DocId>> = vec![Vec::new(); segments.len()];
        for query in queries {
            let total = searcher.doc_count_all() as usize;
            let results = searcher.search(query, CollectOptions::limit(total.max(1)))?;
            for hit in results.hits {
                query_hits[hit.address.segment as usize].push(hit.address.doc);
            }
        }

        for (idx, meta) in segments.iter_mut().enumerate() {
            let reader = SegmentReader::open(self.dir.as_ref(), meta, &self.toc.schema)?;
            let mut bits = match reader.deletes() {
                Some(existing) => existing.clone(),
                None => DeleteBitSet::empty(meta.doc_count),
            };
            let before = bits.num_deleted();
            for term in terms {
                if let Some(mut cursor) = reader.postings(term)? {
                    while cursor.is_active() {
                        bits.set_deleted(cursor.doc());
                        cursor.advance()?;
                    }
                }
            }
            for doc in &query_hits[idx] {
                bits.set_deleted(*doc);
            }
            if bits.num_deleted() != before || (!bits.is_empty() && !meta.has_deletes) {
                bits.write(self.dir.as_ref(), &meta.deletes_file())?;
                meta.has_deletes = true;
                log::debug!(
                    "segment {:08x}: {} docs now deleted",
                    meta.id,
                    bits.num_deleted()
                );
            }
        }
        Ok(())
    }

    /// Segments group into logarithmic size tiers; a tier with at least
    /// `merge_min_segments` members collapses into one segment.
    fn maybe_merge(&mut self) -> Result<(), Error> {
        loop {
            let factor = self.options.merge_tier_factor.max(2.0);
            let mut tiers: FnvHashMap<u32, Vec<usize>> = FnvHashMap::default();
            for (idx, meta) in self.toc.segments.iter().enumerate() {
                let live = {
                    let reader =
                        SegmentReader::open(self.dir.as_ref(), meta, &self.toc.schema)?;
                    reader.doc_count().max(1)
                };
                let tier = (live as f64).log(factor).floor() as u32;
                tiers.entry(tier).or_default().push(idx);
            }
            let candidates = tiers
                .into_iter()
                .find(|(_, members)| members.len() >= self.options.merge_min_segments.max(2));
            let (_, members) = match candidates {
                Some(found) => found,
                None => return Ok(()),
            };
            self.merge_members(&members)?;
        }
    }

    fn merge_members(&mut self, members: &[usize]) -> Result<(), Error> {
        let id = self.alloc_segment_id();
        let generation = self.toc.generation + 1;
        let mut sources = Vec::with_capacity(members.len());
        for idx in members {
            sources.push(SegmentReader::open(
                self.dir.as_ref(),
                &self.toc.segments[*idx],
                &self.toc.schema,
            )?);
        }
        let merged = merge_segments(self.dir.as_ref(), &sources, &self.toc.schema, id, generation)?;
        drop(sources);

        let mut survivors: Vec<SegmentMeta> = Vec::new();
        for (idx, meta) in self.toc.segments.iter().enumerate() {
            if !members.contains(&idx) {
                survivors.push(meta.clone());
            }
        }
        survivors.push(merged);
        self.toc.generation = generation;
        self.toc.segments = survivors;
        self.toc.publish(self.dir.as_ref())?;
        self.cleanup_orphans();
        Ok(())
    }

    /// Collapse everything into a single segment. Running it twice in a row
    /// leaves the second call a no-op.
    pub fn optimize(&mut self) -> Result<(), Error> {
        if !self.buffer.is_empty()
            || !self.pending_delete_terms.is_empty()
            || !self.pending_delete_queries.is_empty()
        {
            self.commit()?;
        }
        let needs_rewrite = self.toc.segments.len() > 1
            || self
                .toc
                .segments
                .iter()
                .any(|meta| meta.has_deletes);
        if !needs_rewrite {
            // still sweep leftovers from interrupted commits.
            self.cleanup_orphans();
            return Ok(());
        }
        let members: Vec<usize> = (0..self.toc.segments.len()).collect();
        self.merge_members(&members)
    }

    /// Delete files no longer referenced by the current TOC: older TOC
    /// generations and unlinked segment artifacts. Best-effort only.
    fn cleanup_orphans(&self) {
        let names = match self.dir.list() {
            Ok(names) => names,
            Err(_) => return,
        };
        for name in names {
            if name == LOCK_NAME {
                continue;
            }
            if let Some(generation) = Toc::parse_generation(&name) {
                if generation < self.toc.generation {
                    let _ = self.dir.delete(&name);
                }
                continue;
            }
            let referenced = self
                .toc
                .segments
                .iter()
                .any(|meta| meta.owns_file(&name));
            if !referenced && name.contains('.') {
                log::debug!("removing orphan {}", name);
                let _ = self.dir.delete(&name);
            }
        }
    }
}

/// Batches adds over a doc-count/age window, committing transparently; its
/// reader unions the committed snapshot with an ephemeral in-RAM segment
/// built from the buffer.
pub struct BatchedWriter {
    writer: IndexWriter,
    pending: Vec<Document>,
    max_docs: usize,
    max_age: Duration,
    oldest_pending: Option<Instant>,
}

impl BatchedWriter {
    pub fn new(writer: IndexWriter, max_docs: usize, max_age: Duration) -> Self {
        Self {
            writer,
            pending: Vec::new(),
            max_docs,
            max_age,
            oldest_pending: None,
        }
    }

    pub fn add_document(&mut self, doc: &Document) -> Result<(), Error> {
        self.writer.add_document(doc)?;
        self.pending.push(doc.clone());
        if self.oldest_pending.is_none() {
            self.oldest_pending = Some(Instant::now());
        }
        let expired = self
            .oldest_pending
            .map(|at| at.elapsed() >= self.max_age)
            .unwrap_or(false);
        if self.pending.len() >= self.max_docs || expired {
            self.commit()?;
        }
        Ok(())
    }

    pub fn pending_docs(&self) -> usize {
        self.pending.len()
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.oldest_pending = None;
        self.pending.clear();
        self.writer.commit()?;
        Ok(())
    }

    /// Committed segments plus the buffer, searchable together. The buffer
    /// is staged into an in-memory segment; the disk is not touched.
    pub fn reader(&self) -> Result<Searcher, Error> {
        let mut readers = Vec::new();
        for meta in &self.writer.toc.segments {
            readers.push(SegmentReader::open(
                self.writer.dir.as_ref(),
                meta,
                &self.writer.toc.schema,
            )?);
        }
        if !self.pending.is_empty() {
            let ram = crate::directory::RamDirectory::new();
            let mut staged = SegmentWriter::new(
                self.writer.toc.schema.clone(),
                self.writer.config.analyzer.clone(),
                self.writer.options.ram_limit_mb,
            );
            for doc in &self.pending {
                staged.add_document(doc)?;
            }
            // The staged segment sorts last in the snapshot order.
            let meta = staged.finish(&ram, u64::max_value(), u64::max_value())?;
            readers.push(SegmentReader::open(&ram, &meta, &self.writer.toc.schema)?);
        }
        Ok(Searcher::new(
            readers,
            self.writer.toc.schema.clone(),
            self.writer.config.scoring.clone(),
        ))
    }

    pub fn into_inner(self) -> IndexWriter {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::RamDirectory;
    use crate::schema::FieldOptions;
    use crate::value::Value;
    use tempfile::TempDir;

    fn books_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_field("id", FieldOptions::id().unique()).unwrap();
        schema.add_field("text", FieldOptions::text()).unwrap();
        schema
    }

    fn ram_index(schema: Schema) -> Index {
        Index::create(
            Arc::new(RamDirectory::new()),
            schema,
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap()
    }

    fn text_docs(writer: &mut IndexWriter, texts: &[&str]) {
        for (i, text) in texts.iter().enumerate() {
            let doc = Document::new()
                .add("id", format!("doc{}", i).as_str())
                .add("text", *text);
            writer.add_document(&doc).unwrap();
        }
    }

    #[test]
    fn create_commit_reopen() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let index = Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        assert_eq!(0, index.generation().unwrap());

        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["hello world", "goodbye world"]);
        let generation = writer.commit().unwrap();
        assert_eq!(1, generation);
        drop(writer);

        // a fresh handle sees the committed docs:
        let reopened =
            Index::open(dir, IndexOptions::default(), IndexConfig::default()).unwrap();
        let searcher = reopened.reader().unwrap();
        assert_eq!(2, searcher.doc_count());
        let results = searcher
            .search(&Query::term("text", "world"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(2, results.hits.len());
    }

    #[test]
    fn create_twice_fails() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        match Index::create(
            dir,
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        ) {
            Err(Error::IndexingError(_)) => {}
            _ => panic!("second create must fail"),
        }
    }

    #[test]
    fn writer_lock_is_exclusive_and_readonly_rejected() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let index = Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        let held = index.writer(WriterOptions::default()).unwrap();
        match index.writer(WriterOptions::default()) {
            Err(Error::Locked) => {}
            _ => panic!("second writer must see Locked"),
        }
        drop(held);
        let _ok = index.writer(WriterOptions::default()).unwrap();

        let readonly = Index::open(
            dir,
            IndexOptions {
                readonly: true,
                ..IndexOptions::default()
            },
            IndexConfig::default(),
        )
        .unwrap();
        match readonly.writer(WriterOptions::default()) {
            Err(Error::ReadOnly) => {}
            _ => panic!("readonly index must refuse a writer"),
        }
    }

    #[test]
    fn range_scenario() {
        let mut schema = Schema::new();
        schema.add_field("date", FieldOptions::id()).unwrap();
        let index = ram_index(schema);
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        for date in &["20050101", "20090715", "20091231"] {
            writer
                .add_document(&Document::new().add("date", *date))
                .unwrap();
        }
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let query = Query::range_str("date", Some("20050101"), Some("20090715"), true, true);
        let results = searcher.search(&query, CollectOptions::limit(10)).unwrap();
        let mut docs: Vec<u32> = results.hits.iter().map(|h| h.address.doc.0).collect();
        docs.sort();
        assert_eq!(vec![0, 1], docs);

        // exclusive upper bound drops the boundary doc:
        let query = Query::range_str("date", Some("20050101"), Some("20090715"), true, false);
        let results = searcher.search(&query, CollectOptions::limit(10)).unwrap();
        let docs: Vec<u32> = results.hits.iter().map(|h| h.address.doc.0).collect();
        assert_eq!(vec![0], docs);
    }

    #[test]
    fn update_by_unique_field() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        writer
            .add_document(&Document::new().add("id", "A").add("text", "x"))
            .unwrap();
        writer.commit().unwrap();

        writer
            .update_document(&Document::new().add("id", "A").add("text", "y"))
            .unwrap();
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let results = searcher
            .search(&Query::term("text", "y"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());
        let stored = searcher.stored_fields(results.hits[0].address).unwrap();
        assert_eq!(Some(&Value::from("A")), stored.get("id"));

        let results = searcher
            .search(&Query::term("text", "x"), CollectOptions::limit(10))
            .unwrap();
        assert!(results.hits.is_empty());
    }

    #[test]
    fn update_within_one_batch() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        writer
            .add_document(&Document::new().add("id", "A").add("text", "x"))
            .unwrap();
        writer
            .update_document(&Document::new().add("id", "A").add("text", "y"))
            .unwrap();
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        assert_eq!(1, searcher.doc_count());
        let results = searcher
            .search(&Query::term("text", "x"), CollectOptions::limit(10))
            .unwrap();
        assert!(results.hits.is_empty());
        let results = searcher
            .search(&Query::term("text", "y"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());
    }

    #[test]
    fn deletion_is_visible_to_later_readers_only() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["alpha", "beta"]);
        writer.commit().unwrap();

        let before = index.reader().unwrap();
        assert_eq!(2, before.doc_count());

        writer.delete_by_term(Term::text("text", "alpha"));
        writer.commit().unwrap();
        drop(writer);

        // the old reader is pinned to its snapshot:
        assert_eq!(2, before.doc_count());
        // any reader opened after the commit sees the tombstone:
        let after = index.reader().unwrap();
        assert_eq!(1, after.doc_count());
        assert_eq!(2, after.doc_count_all());
        let results = after
            .search(&Query::term("text", "alpha"), CollectOptions::limit(10))
            .unwrap();
        assert!(results.hits.is_empty());
        // df still counts the tombstone; df_live subtracts it:
        let stats = after.term_stats(&Term::text("text", "alpha")).unwrap();
        assert_eq!(1, stats.docs_with_term);
        assert_eq!(0, after.df_live(&Term::text("text", "alpha")).unwrap());
    }

    #[test]
    fn delete_by_query_works() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["alpha beta", "alpha gamma", "delta"]);
        writer.commit().unwrap();

        writer.delete_by_query(Query::term("text", "alpha"));
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        assert_eq!(1, searcher.doc_count());
        let results = searcher
            .search(&Query::term("text", "delta"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());
    }

    #[test]
    fn optimize_is_idempotent() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let index = Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        // several commits → several segments:
        for round in 0..3 {
            let doc = Document::new()
                .add("id", format!("r{}", round).as_str())
                .add("text", "some words here");
            writer.add_document(&doc).unwrap();
            writer.commit().unwrap();
        }
        writer.delete_by_term(Term::text("id", "r0"));
        writer.commit().unwrap();

        writer.optimize().unwrap();
        let files_after_first: Vec<String> = dir.list().unwrap();
        let searcher = index.reader().unwrap();
        assert_eq!(1, searcher.segment_readers().len());
        assert_eq!(2, searcher.doc_count());
        assert!(!searcher.segment_readers()[0].has_deletions());

        writer.optimize().unwrap();
        let files_after_second: Vec<String> = dir.list().unwrap();
        assert_eq!(files_after_first, files_after_second);
        drop(writer);
    }

    #[test]
    fn merge_policy_collapses_small_segments() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions {
            merge_min_segments: 3,
            ..WriterOptions::default()
        })
        .unwrap();
        // three one-doc commits land in the same size tier:
        for round in 0..3 {
            let doc = Document::new()
                .add("id", format!("m{}", round).as_str())
                .add("text", "tiny doc");
            writer.add_document(&doc).unwrap();
            writer.commit().unwrap();
        }
        drop(writer);
        let searcher = index.reader().unwrap();
        assert_eq!(1, searcher.segment_readers().len());
        assert_eq!(3, searcher.doc_count());
    }

    #[test]
    fn commit_crash_leaves_prior_generation() {
        let dir_impl = RamDirectory::new();
        let dir: Arc<dyn Directory> = Arc::new(dir_impl.clone());
        let index = Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["committed doc"]);
        writer.commit().unwrap();
        drop(writer);
        let generation_before = index.generation().unwrap();

        // Simulate a writer that wrote and fsynced segment files and the
        // TOC temp, then died before the rename.
        let mut staged = SegmentWriter::new(
            books_schema(),
            Arc::new(SimpleAnalyzer),
            16,
        );
        staged
            .add_document(&Document::new().add("id", "ghost").add("text", "never published"))
            .unwrap();
        staged.finish(dir.as_ref(), 0x77, 99).unwrap();
        let mut tmp = dir.create("TOC.99.tmp").unwrap();
        tmp.write_all(b"{ partial json").unwrap();
        tmp.finish().unwrap();

        // Reopen: only the committed generation is visible.
        let reopened =
            Index::open(dir.clone(), IndexOptions::default(), IndexConfig::default()).unwrap();
        assert_eq!(generation_before, reopened.generation().unwrap());
        let searcher = reopened.reader().unwrap();
        assert_eq!(1, searcher.doc_count());

        // Orphans linger until a writer sweeps them.
        assert!(dir.exists("00000077.trm"));
        let mut writer = reopened.writer(WriterOptions::default()).unwrap();
        writer.optimize().unwrap();
        drop(writer);
        assert!(!dir.exists("00000077.trm"));
        assert!(!dir.exists("TOC.99.tmp"));
    }

    #[test]
    fn top_k_matches_unpruned_search() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        // enough docs for multiple posting blocks with varied tf/length:
        for i in 0..600 {
            let mut text = String::from("needle");
            for _ in 0..(i % 7) {
                text.push_str(" needle");
            }
            for _ in 0..(i % 13) {
                text.push_str(" filler");
            }
            let doc = Document::new()
                .add("id", format!("d{}", i).as_str())
                .add("text", text.as_str());
            writer.add_document(&doc).unwrap();
        }
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let query = Query::or(vec![
            Query::term("text", "needle"),
            Query::term("text", "filler"),
        ]);
        let pruned = searcher
            .search(&query, CollectOptions::limit(10))
            .unwrap();
        let unpruned = searcher
            .search(
                &query,
                CollectOptions {
                    limit: 10,
                    disable_pruning: true,
                    ..CollectOptions::default()
                },
            )
            .unwrap();
        assert_eq!(pruned.hits.len(), unpruned.hits.len());
        for (a, b) in pruned.hits.iter().zip(unpruned.hits.iter()) {
            assert_eq!(a.address, b.address);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn batched_writer_unions_buffer_and_disk() {
        let index = ram_index(books_schema());
        let writer = index.writer(WriterOptions::default()).unwrap();
        let mut batched = BatchedWriter::new(writer, 100, Duration::from_secs(3600));
        batched
            .add_document(&Document::new().add("id", "a").add("text", "on disk"))
            .unwrap();
        batched.commit().unwrap();
        batched
            .add_document(&Document::new().add("id", "b").add("text", "only buffered"))
            .unwrap();
        assert_eq!(1, batched.pending_docs());

        let searcher = batched.reader().unwrap();
        assert_eq!(2, searcher.doc_count());
        let results = searcher
            .search(&Query::term("text", "buffered"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());

        // committed view alone does not see the buffer:
        let committed = index.reader().unwrap();
        assert_eq!(1, committed.doc_count());

        // the size window triggers a transparent commit:
        let mut batched = BatchedWriter::new(batched.into_inner(), 2, Duration::from_secs(3600));
        batched
            .add_document(&Document::new().add("id", "c").add("text", "two"))
            .unwrap();
        assert_eq!(1, batched.pending_docs());
        batched
            .add_document(&Document::new().add("id", "d").add("text", "three"))
            .unwrap();
        assert_eq!(0, batched.pending_docs());
        drop(batched);
        assert_eq!(4, index.reader().unwrap().doc_count());
    }

    #[test]
    fn schema_extension_between_commits() {
        let dir: Arc<dyn Directory> = Arc::new(RamDirectory::new());
        let index = Index::create(
            dir.clone(),
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["first era"]);
        writer.commit().unwrap();
        drop(writer);

        let mut grown = books_schema();
        grown.add_field("lang", FieldOptions::id()).unwrap();
        let mut writer = index
            .writer_with_schema(Some(grown), WriterOptions::default())
            .unwrap();
        writer
            .add_document(
                &Document::new()
                    .add("id", "n1")
                    .add("text", "second era")
                    .add("lang", "en"),
            )
            .unwrap();
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        assert_eq!(2, searcher.doc_count());
        let results = searcher
            .search(&Query::term("lang", "en"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());

        // shrinking is rejected:
        let mut shrunk = Schema::new();
        shrunk.add_field("id", FieldOptions::id().unique()).unwrap();
        match index.writer_with_schema(Some(shrunk), WriterOptions::default()) {
            Err(Error::SchemaMismatch(_)) => {}
            _ => panic!("schema shrink must be rejected"),
        }
    }

    #[test]
    fn rollback_discards_buffer() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["will vanish"]);
        writer.rollback();
        writer.commit().unwrap();
        drop(writer);
        assert_eq!(0, index.reader().unwrap().doc_count());
    }

    #[test]
    fn sort_by_stored_field() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        for (i, id) in ["zeta", "alpha", "mike"].iter().enumerate() {
            let doc = Document::new()
                .add("id", *id)
                .add("text", format!("doc number {}", i).as_str());
            writer.add_document(&doc).unwrap();
        }
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let results = searcher
            .search(
                &Query::term("text", "doc"),
                CollectOptions {
                    limit: 10,
                    sort_by: Some("id".to_string()),
                    ..CollectOptions::default()
                },
            )
            .unwrap();
        let ids: Vec<String> = results
            .hits
            .iter()
            .map(|h| {
                searcher
                    .stored_fields(h.address)
                    .unwrap()
                    .get("id")
                    .unwrap()
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(vec!["alpha", "mike", "zeta"], ids);
    }

    #[test]
    fn time_limit_surfaces_partial_results() {
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        for i in 0..500 {
            let doc = Document::new()
                .add("id", format!("t{}", i).as_str())
                .add("text", "tick tock");
            writer.add_document(&doc).unwrap();
        }
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let results = searcher
            .search(
                &Query::term("text", "tick"),
                CollectOptions {
                    limit: 10,
                    time_limit: Some(Duration::from_secs(0)),
                    check_every: 1,
                    ..CollectOptions::default()
                },
            )
            .unwrap();
        assert!(results.timed_out);
        // an expired-before-start deadline still yields a valid (possibly
        // empty) partial heap:
        assert!(results.hits.len() <= 10);

        let results = searcher
            .search(
                &Query::term("text", "tick"),
                CollectOptions {
                    limit: 10,
                    time_limit: Some(Duration::from_secs(3600)),
                    ..CollectOptions::default()
                },
            )
            .unwrap();
        assert!(!results.timed_out);
        assert_eq!(10, results.hits.len());
    }

    #[test]
    fn filter_and_mask_sets() {
        use crate::DocAddress;
        let index = ram_index(books_schema());
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["same words", "same words", "same words"]);
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let addr = |doc: u32| DocAddress {
            segment: 0,
            doc: DocId(doc),
        };
        let mut filter = fnv::FnvHashSet::default();
        filter.insert(addr(0));
        filter.insert(addr(2));
        let mut mask = fnv::FnvHashSet::default();
        mask.insert(addr(2));
        let results = searcher
            .search(
                &Query::term("text", "same"),
                CollectOptions {
                    limit: 10,
                    filter: Some(filter),
                    mask: Some(mask),
                    ..CollectOptions::default()
                },
            )
            .unwrap();
        let docs: Vec<u32> = results.hits.iter().map(|h| h.address.doc.0).collect();
        assert_eq!(vec![0], docs);
    }

    #[test]
    fn fs_directory_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let dir: Arc<dyn Directory> =
            Arc::new(crate::directory::FsDirectory::open(tmp.path(), true).unwrap());
        let index = Index::create(
            dir,
            books_schema(),
            IndexOptions::default(),
            IndexConfig::default(),
        )
        .unwrap();
        let mut writer = index.writer(WriterOptions::default()).unwrap();
        text_docs(&mut writer, &["files on real disk", "second doc"]);
        writer.commit().unwrap();
        drop(writer);

        let searcher = index.reader().unwrap();
        let results = searcher
            .search(&Query::term("text", "disk"), CollectOptions::limit(10))
            .unwrap();
        assert_eq!(1, results.hits.len());
        let stored = searcher.stored_fields(results.hits[0].address).unwrap();
        assert_eq!(
            Some(&Value::from("files on real disk")),
            stored.get("text")
        );
    }
}
