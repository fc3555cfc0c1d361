use crate::dictionary::Term;
use crate::lengths::decode_length;
use crate::segment::SegmentReader;
use crate::Error;
use fnv::FnvHashMap;

/// The snapshot-wide numbers behind one term's weight: how rare the term
/// is, and how much text its field holds. Gathered once per (term, field)
/// before any matcher is built, so every segment scores against the same
/// idf and length normalization.
#[derive(Default, Debug, Clone)]
pub struct TermStatistics {
    /// Docs in the snapshot, tombstones included; df below counts them
    /// too, which keeps the idf ratio consistent.
    pub docs: u64,
    /// Docs the term appears in, summed across segment dictionaries.
    pub docs_with_term: u64,
    /// Occurrences of the term across the snapshot.
    pub occurrences: u64,
    /// Exact sum of the field's raw (pre-bucketing) lengths, straight off
    /// each segment's lengths artifact.
    pub field_length_total: u64,
}

impl TermStatistics {
    /// Walk a snapshot's readers, summing dictionary entries and the
    /// field's length totals.
    pub fn gather(readers: &[SegmentReader], term: &Term) -> Result<TermStatistics, Error> {
        let mut stats = TermStatistics::default();
        for reader in readers {
            stats.docs += reader.doc_count_all() as u64;
            stats.field_length_total += reader.total_field_length(&term.field);
            if let Some(info) = reader.term_info(term)? {
                stats.docs_with_term += info.df;
                stats.occurrences += info.cf;
            }
        }
        Ok(stats)
    }

    /// What the BM25 denominator normalizes each doc's length against.
    pub fn mean_field_length(&self) -> f32 {
        (self.field_length_total as f64 / std::cmp::max(self.docs, 1) as f64) as f32
    }
}

/// Per-posting scoring contract. `max_quality` must upper-bound `score`
/// over every posting a block can contain, given the block's recorded
/// maximum tf and minimum encoded length.
pub trait Scorer: Send + Sync {
    fn score(&self, tf: u32, length: u32) -> f32;
    fn max_quality(&self, max_tf: u32, min_len_byte: u8) -> f32;
    /// Rescorers can reorder arbitrarily, which disables quality pruning.
    fn uses_final(&self) -> bool {
        false
    }
    fn final_score(&self, score: f32) -> f32 {
        score
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Scoring knobs threaded into the searcher; replaces any notion of a
/// global default scorer.
#[derive(Debug, Clone, Default)]
pub struct ScoringConfig {
    pub default_params: Bm25Params,
    pub per_field: FnvHashMap<String, Bm25Params>,
    pub field_weights: FnvHashMap<String, f32>,
}

impl ScoringConfig {
    pub fn params_for(&self, field: &str) -> Bm25Params {
        self.per_field
            .get(field)
            .cloned()
            .unwrap_or(self.default_params)
    }
    pub fn weight_for(&self, field: &str) -> f32 {
        self.field_weights.get(field).cloned().unwrap_or(1.0)
    }
}

/// One term's bound BM25 weight: idf and collection stats baked in.
#[derive(Debug, Clone)]
pub struct Bm25Weight {
    k1: f32,
    b: f32,
    idf: f32,
    average_length: f32,
    /// field weight times any query-level boost.
    boost: f32,
}

impl Bm25Weight {
    pub fn for_term(
        stats: &TermStatistics,
        config: &ScoringConfig,
        field: &str,
        boost: f32,
    ) -> Self {
        let params = config.params_for(field);
        let n = stats.docs as f32;
        let df = stats.docs_with_term as f32;
        // Lucene-style idf; never negative.
        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
        Self {
            k1: params.k1,
            b: params.b,
            idf,
            average_length: stats.mean_field_length().max(1.0),
            boost: boost * config.weight_for(field),
        }
    }
}

impl Scorer for Bm25Weight {
    fn score(&self, tf: u32, length: u32) -> f32 {
        let tf = tf as f32;
        let length = length as f32;
        let num = tf * (self.k1 + 1.0);
        let denom = tf + self.k1 * (1.0 - self.b + self.b * length / self.average_length);
        self.boost * self.idf * (num / denom)
    }
    /// Monotone up in tf, down in length, so (max tf, min length) bounds
    /// every posting in the block.
    fn max_quality(&self, max_tf: u32, min_len_byte: u8) -> f32 {
        self.score(max_tf, decode_length(min_len_byte))
    }
}

/// Fixed score regardless of tf and length; `Constant(q, score)` and
/// match-everything queries use this.
#[derive(Debug, Clone)]
pub struct ConstScorer {
    pub score: f32,
}

impl Scorer for ConstScorer {
    fn score(&self, _tf: u32, _length: u32) -> f32 {
        self.score
    }
    fn max_quality(&self, _max_tf: u32, _min_len_byte: u8) -> f32 {
        self.score
    }
}
