use crate::collector::{CollectOptions, SearchResults, TopKCollector};
use crate::dictionary::Term;
use crate::matcher::boolean::{AndNotMatcher, ConjunctionMatcher, DisjunctionMatcher};
use crate::matcher::phrase::PhraseMatcher;
use crate::matcher::{
    AllMatcher, BoostMatcher, ConstantScoreMatcher, EmptyMatcher, Matcher, TermMatcher,
};
use crate::query::Query;
use crate::schema::Schema;
use crate::scoring::{Bm25Weight, Scorer, ScoringConfig, TermStatistics};
use crate::segment::SegmentReader;
use crate::value::Value;
use crate::{DocAddress, Error};
use fnv::FnvHashMap;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Ceiling on wildcard/prefix/range expansion; scans stop here.
pub const DEFAULT_EXPANSION_LIMIT: usize = 1024;

/// A consistent view over one committed snapshot: readers in stable order
/// (generation, then id), never affected by later commits.
pub struct Searcher {
    readers: Vec<SegmentReader>,
    schema: Schema,
    config: ScoringConfig,
    expansion_limit: usize,
}

impl Searcher {
    pub fn new(mut readers: Vec<SegmentReader>, schema: Schema, config: ScoringConfig) -> Self {
        readers.sort_by_key(|r| (r.meta().generation, r.meta().id));
        Self {
            readers,
            schema,
            config,
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
        }
    }

    pub fn with_expansion_limit(mut self, limit: usize) -> Self {
        self.expansion_limit = limit;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn segment_readers(&self) -> &[SegmentReader] {
        &self.readers
    }

    pub fn doc_count(&self) -> u32 {
        self.readers.iter().map(|r| r.doc_count()).sum()
    }

    pub fn doc_count_all(&self) -> u32 {
        self.readers.iter().map(|r| r.doc_count_all()).sum()
    }

    pub fn stored_fields(&self, address: DocAddress) -> Result<BTreeMap<String, Value>, Error> {
        let reader = self
            .readers
            .get(address.segment as usize)
            .ok_or(Error::NotFound)?;
        reader.stored_fields(address.doc)
    }

    /// Collection statistics for one term, aggregated over every segment.
    pub fn term_stats(&self, term: &Term) -> Result<TermStatistics, Error> {
        TermStatistics::gather(&self.readers, term)
    }

    /// Live document frequency: postings minus deleted matches, counted on
    /// demand.
    pub fn df_live(&self, term: &Term) -> Result<u64, Error> {
        let mut df = 0;
        for reader in &self.readers {
            if let Some(mut cursor) = reader.postings(term)? {
                while cursor.is_active() {
                    if !reader.is_deleted(cursor.doc()) {
                        df += 1;
                    }
                    cursor.advance()?;
                }
            }
        }
        Ok(df)
    }

    pub fn search(&self, query: &Query, options: CollectOptions) -> Result<SearchResults, Error> {
        let resolved = self.resolve(query)?;
        let mut weights: FnvHashMap<Term, Arc<dyn Scorer>> = FnvHashMap::default();
        self.cache_weights(&resolved, 1.0, &mut weights)?;

        let mut collector = TopKCollector::new(options);
        for (ord, reader) in self.readers.iter().enumerate() {
            let mut matcher = self.build_matcher(reader, &resolved, &weights)?;
            collector.collect_segment(matcher.as_mut(), ord as u32, reader)?;
        }
        Ok(collector.into_results())
    }

    // -- expansion ---------------------------------------------------------

    /// Rewrite multi-term nodes into unions of concrete terms, using
    /// dictionary iteration over every segment.
    fn resolve(&self, query: &Query) -> Result<Query, Error> {
        Ok(match query {
            Query::Term(_) | Query::Phrase { .. } | Query::Every(None) => query.clone(),
            Query::And(children) => Query::And(
                children
                    .iter()
                    .map(|c| self.resolve(c))
                    .collect::<Result<_, _>>()?,
            ),
            Query::Or(children) => Query::Or(
                children
                    .iter()
                    .map(|c| self.resolve(c))
                    .collect::<Result<_, _>>()?,
            ),
            Query::AndNot(keep, subtract) => Query::AndNot(
                Box::new(self.resolve(keep)?),
                Box::new(self.resolve(subtract)?),
            ),
            Query::Boost(child, factor) => Query::Boost(Box::new(self.resolve(child)?), *factor),
            Query::Constant(child, score) => {
                Query::Constant(Box::new(self.resolve(child)?), *score)
            }
            Query::Prefix { field, prefix } => {
                let terms = self.expand_prefix(field, prefix)?;
                union_of(terms)
            }
            Query::Every(Some(field)) => {
                let terms = self.expand_prefix(field, b"")?;
                Query::Constant(Box::new(union_of(terms)), 1.0)
            }
            Query::Wildcard { field, pattern } => {
                let terms = self.expand_wildcard(field, pattern)?;
                union_of(terms)
            }
            Query::Range {
                field,
                lo,
                hi,
                incl_lo,
                incl_hi,
            } => {
                let terms = self.expand_range(field, lo, hi, *incl_lo, *incl_hi)?;
                union_of(terms)
            }
        })
    }

    fn expand_prefix(&self, field: &str, prefix: &[u8]) -> Result<BTreeSet<Term>, Error> {
        let mut terms = BTreeSet::new();
        for reader in &self.readers {
            let mut iter = reader.dictionary().iter_prefix(field, prefix)?;
            while let Some((key, _info)) = iter.next()? {
                terms.insert(Term::decode(&key)?);
                if terms.len() >= self.expansion_limit {
                    log::warn!("expansion limit hit on {}:{:?}*", field, prefix);
                    return Ok(terms);
                }
            }
        }
        Ok(terms)
    }

    fn expand_wildcard(&self, field: &str, pattern: &str) -> Result<BTreeSet<Term>, Error> {
        // Scan from the literal prefix; filter the rest with a regex.
        let literal: String = pattern.chars().take_while(|c| *c != '*' && *c != '?').collect();
        let mut regex = String::from("^");
        for ch in pattern.chars() {
            match ch {
                '*' => regex.push_str(".*"),
                '?' => regex.push('.'),
                other => regex.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex.push('$');
        let matcher = regex::Regex::new(&regex)
            .map_err(|e| Error::IndexingError(format!("bad wildcard pattern: {}", e)))?;

        let mut terms = BTreeSet::new();
        for reader in &self.readers {
            let mut iter = reader.dictionary().iter_prefix(field, literal.as_bytes())?;
            while let Some((key, _info)) = iter.next()? {
                let term = Term::decode(&key)?;
                if let Ok(text) = std::str::from_utf8(&term.bytes) {
                    if matcher.is_match(text) {
                        terms.insert(term);
                    }
                }
                if terms.len() >= self.expansion_limit {
                    log::warn!("expansion limit hit on {}:{}", field, pattern);
                    return Ok(terms);
                }
            }
        }
        Ok(terms)
    }

    fn expand_range(
        &self,
        field: &str,
        lo: &Option<Vec<u8>>,
        hi: &Option<Vec<u8>>,
        incl_lo: bool,
        incl_hi: bool,
    ) -> Result<BTreeSet<Term>, Error> {
        let mut terms = BTreeSet::new();
        for reader in &self.readers {
            let mut iter = match lo {
                Some(lo_bytes) => {
                    let mut start = Term::field_prefix(field);
                    start.extend_from_slice(lo_bytes);
                    reader.dictionary().iter_from_key(&start)?
                }
                None => reader.dictionary().iter_prefix(field, b"")?,
            };
            while let Some((key, _info)) = iter.next()? {
                let term = Term::decode(&key)?;
                if term.field != field {
                    break;
                }
                if let Some(lo_bytes) = lo {
                    if !incl_lo && &term.bytes == lo_bytes {
                        continue;
                    }
                }
                if let Some(hi_bytes) = hi {
                    match term.bytes.cmp(hi_bytes) {
                        std::cmp::Ordering::Greater => break,
                        std::cmp::Ordering::Equal if !incl_hi => break,
                        _ => {}
                    }
                }
                terms.insert(term);
                if terms.len() >= self.expansion_limit {
                    log::warn!("expansion limit hit on {} range", field);
                    return Ok(terms);
                }
            }
        }
        Ok(terms)
    }

    // -- scoring weights ---------------------------------------------------

    /// One BM25 weight per distinct term, idf and averages baked in from
    /// snapshot-wide statistics.
    fn cache_weights(
        &self,
        query: &Query,
        boost: f32,
        weights: &mut FnvHashMap<Term, Arc<dyn Scorer>>,
    ) -> Result<(), Error> {
        match query {
            Query::Term(term) => {
                if !weights.contains_key(term) {
                    let stats = self.term_stats(term)?;
                    let weight = Bm25Weight::for_term(&stats, &self.config, &term.field, boost);
                    weights.insert(term.clone(), Arc::new(weight));
                }
            }
            Query::Phrase { field, terms, .. } => {
                for bytes in terms {
                    let term = Term::from_bytes(field, bytes);
                    if !weights.contains_key(&term) {
                        let stats = self.term_stats(&term)?;
                        let weight = Bm25Weight::for_term(&stats, &self.config, field, boost);
                        weights.insert(term, Arc::new(weight));
                    }
                }
            }
            Query::And(children) | Query::Or(children) => {
                for child in children {
                    self.cache_weights(child, boost, weights)?;
                }
            }
            Query::AndNot(keep, subtract) => {
                self.cache_weights(keep, boost, weights)?;
                // subtracted side never scores, but needs matchers:
                self.cache_weights(subtract, boost, weights)?;
            }
            Query::Boost(child, factor) => {
                self.cache_weights(child, boost * factor, weights)?;
            }
            Query::Constant(child, _) => {
                self.cache_weights(child, boost, weights)?;
            }
            Query::Every(_) => {}
            Query::Prefix { .. } | Query::Wildcard { .. } | Query::Range { .. } => {
                unreachable!("resolved before weight caching")
            }
        }
        Ok(())
    }

    // -- matcher compilation ----------------------------------------------

    fn term_matcher(
        &self,
        reader: &SegmentReader,
        term: &Term,
        weights: &FnvHashMap<Term, Arc<dyn Scorer>>,
    ) -> Result<Option<TermMatcher>, Error> {
        let cursor = match reader.postings(term)? {
            Some(cursor) => cursor,
            None => return Ok(None),
        };
        let scorer = weights
            .get(term)
            .cloned()
            .expect("weights cached for every term");
        Ok(Some(TermMatcher::new(
            cursor,
            scorer,
            reader.lengths_handle(),
            term.field.clone(),
        )))
    }

    fn build_matcher(
        &self,
        reader: &SegmentReader,
        query: &Query,
        weights: &FnvHashMap<Term, Arc<dyn Scorer>>,
    ) -> Result<Box<dyn Matcher>, Error> {
        Ok(match query {
            Query::Term(term) => match self.term_matcher(reader, term, weights)? {
                Some(matcher) => Box::new(matcher),
                None => Box::new(EmptyMatcher),
            },
            Query::Phrase { field, terms, slop } => {
                let positions_ok = self
                    .schema
                    .get(field)
                    .map(|o| o.positions)
                    .unwrap_or(false);
                if !positions_ok {
                    return Err(Error::SchemaMismatch(format!(
                        "phrase query needs positions on field '{}'",
                        field
                    )));
                }
                if terms.is_empty() {
                    return Ok(Box::new(EmptyMatcher));
                }
                if terms.len() < 2 {
                    // a one-word phrase is just that word.
                    let term = Term::from_bytes(field, &terms[0]);
                    return self.build_matcher(reader, &Query::Term(term), weights);
                }
                let mut children = Vec::with_capacity(terms.len());
                for bytes in terms {
                    match self.term_matcher(reader, &Term::from_bytes(field, bytes), weights)? {
                        Some(matcher) => children.push(matcher),
                        None => return Ok(Box::new(EmptyMatcher)),
                    }
                }
                Box::new(PhraseMatcher::new(children, *slop)?)
            }
            Query::And(children) => {
                if children.is_empty() {
                    return Ok(Box::new(EmptyMatcher));
                }
                let mut built = Vec::with_capacity(children.len());
                for child in children {
                    built.push(self.build_matcher(reader, child, weights)?);
                }
                if built.len() == 1 {
                    built.pop().unwrap()
                } else {
                    Box::new(ConjunctionMatcher::new(built)?)
                }
            }
            Query::Or(children) => {
                if children.is_empty() {
                    return Ok(Box::new(EmptyMatcher));
                }
                let mut built = Vec::with_capacity(children.len());
                for child in children {
                    built.push(self.build_matcher(reader, child, weights)?);
                }
                if built.len() == 1 {
                    built.pop().unwrap()
                } else {
                    Box::new(DisjunctionMatcher::new(built))
                }
            }
            Query::AndNot(keep, subtract) => {
                let include = self.build_matcher(reader, keep, weights)?;
                let exclude = self.build_matcher(reader, subtract, weights)?;
                Box::new(AndNotMatcher::new(include, exclude)?)
            }
            Query::Every(None) => Box::new(AllMatcher::new(reader.doc_count_all(), 1.0)),
            Query::Boost(child, factor) => Box::new(BoostMatcher::new(
                self.build_matcher(reader, child, weights)?,
                *factor,
            )),
            Query::Constant(child, score) => Box::new(ConstantScoreMatcher::new(
                self.build_matcher(reader, child, weights)?,
                *score,
            )),
            Query::Every(Some(_)) | Query::Prefix { .. } | Query::Wildcard { .. }
            | Query::Range { .. } => unreachable!("resolved before matcher build"),
        })
    }
}

fn union_of(terms: BTreeSet<Term>) -> Query {
    let children: Vec<Query> = terms.into_iter().map(Query::Term).collect();
    match children.len() {
        0 => Query::Or(Vec::new()),
        _ => Query::Or(children),
    }
}
