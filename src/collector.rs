use crate::matcher::Matcher;
use crate::segment::SegmentReader;
use crate::value::Value;
use crate::{DocAddress, DocId, Error};
use fnv::FnvHashSet;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// A candidate in the top-K race. Ranking order: the higher score wins,
/// and between equal scores the doc that comes first in the snapshot's
/// traversal order wins. That makes the result set independent of whether
/// block pruning ran.
#[derive(Debug, Copy, Clone)]
struct RankedHit {
    score: f32,
    address: DocAddress,
}

impl PartialEq for RankedHit {
    fn eq(&self, other: &RankedHit) -> bool {
        self.address == other.address
    }
}
impl Eq for RankedHit {}

impl PartialOrd for RankedHit {
    fn partial_cmp(&self, other: &RankedHit) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedHit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Scores are finite BM25 sums; NaN never reaches the heap.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            // address order flipped: the earlier doc is the stronger hit.
            .then_with(|| other.address.cmp(&self.address))
    }
}

/// Keep `hit` only if it beats the weakest of a full house. The heap holds
/// `Reverse`d entries so the weakest kept hit sits on top.
fn offer(heap: &mut BinaryHeap<Reverse<RankedHit>>, limit: usize, hit: RankedHit) {
    if heap.len() < limit {
        heap.push(Reverse(hit));
    } else if heap.peek().map(|Reverse(weakest)| hit > *weakest).unwrap_or(false) {
        heap.pop();
        heap.push(Reverse(hit));
    }
}

/// Once the house is full, the weakest kept score is the pruning bar.
fn score_threshold(heap: &BinaryHeap<Reverse<RankedHit>>, limit: usize) -> Option<f32> {
    if heap.len() >= limit {
        heap.peek().map(|Reverse(weakest)| weakest.score)
    } else {
        None
    }
}

/// Everything the drive loop consults around the matcher itself.
pub struct CollectOptions {
    pub limit: usize,
    /// Only these docs may match.
    pub filter: Option<FnvHashSet<DocAddress>>,
    /// These docs never match.
    pub mask: Option<FnvHashSet<DocAddress>>,
    pub time_limit: Option<Duration>,
    /// Postings between deadline checks.
    pub check_every: u32,
    /// Order results by this stored field instead of by score; disables
    /// block-quality pruning.
    pub sort_by: Option<String>,
    /// Turn off block-quality pruning even for plain score ranking; the
    /// top K must come out identical either way.
    pub disable_pruning: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filter: None,
            mask: None,
            time_limit: None,
            check_every: 64,
            sort_by: None,
            disable_pruning: false,
        }
    }
}

impl CollectOptions {
    pub fn limit(n: usize) -> Self {
        Self {
            limit: n,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub score: f32,
    pub address: DocAddress,
}

#[derive(Debug, Default)]
pub struct SearchResults {
    pub hits: Vec<Hit>,
    /// Set when the soft deadline expired; hits hold the partial heap.
    pub timed_out: bool,
}

/// Total order over stored values for sort-by-field mode: grouped by kind,
/// numerics merged and compared numerically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (x, y) if rank(x) == 2 && rank(y) == 2 => {
            let xf = x.as_f64().unwrap_or(0.0);
            let yf = y.as_f64().unwrap_or(0.0);
            xf.partial_cmp(&yf).unwrap_or(Ordering::Equal)
        }
        (x, y) => rank(x).cmp(&rank(y)),
    }
}

/// An entry in the sort-by-field heap; top is the *greatest* key so the K
/// smallest survive.
struct KeyedDoc {
    key: Value,
    doc: DocAddress,
}
impl PartialEq for KeyedDoc {
    fn eq(&self, other: &Self) -> bool {
        self.doc == other.doc
    }
}
impl Eq for KeyedDoc {}
impl PartialOrd for KeyedDoc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for KeyedDoc {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.key, &other.key).then(self.doc.cmp(&other.doc))
    }
}

enum Ranking {
    ByScore {
        heap: BinaryHeap<Reverse<RankedHit>>,
        limit: usize,
    },
    ByField {
        field: String,
        heap: BinaryHeap<KeyedDoc>,
        limit: usize,
    },
}

/// Drives matchers segment by segment, keeping the best K under a score or
/// field-value order, with optional filter, mask, and soft deadline.
pub struct TopKCollector {
    options: CollectOptions,
    ranking: Ranking,
    deadline: Option<Instant>,
    postings_seen: u32,
    timed_out: bool,
}

impl TopKCollector {
    pub fn new(options: CollectOptions) -> Self {
        let ranking = match &options.sort_by {
            Some(field) => Ranking::ByField {
                field: field.clone(),
                heap: BinaryHeap::new(),
                limit: options.limit,
            },
            None => Ranking::ByScore {
                heap: BinaryHeap::new(),
                limit: options.limit,
            },
        };
        let deadline = options.time_limit.map(|limit| Instant::now() + limit);
        Self {
            options,
            ranking,
            deadline,
            postings_seen: 0,
            timed_out: false,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Feed one segment's matcher. `segment_ord` is the reader's position
    /// in the snapshot's stable order.
    pub fn collect_segment(
        &mut self,
        matcher: &mut dyn Matcher,
        segment_ord: u32,
        reader: &SegmentReader,
    ) -> Result<(), Error> {
        if self.timed_out {
            return Ok(());
        }
        // Rescoring and field sorts can reorder arbitrarily, so block
        // pruning only runs for plain score ranking.
        let pruning = matches!(self.ranking, Ranking::ByScore { .. })
            && matcher.supports_quality()
            && !self.options.disable_pruning;

        while matcher.is_active() {
            self.postings_seen += 1;
            if self.postings_seen >= self.options.check_every {
                self.postings_seen = 0;
                if let Some(deadline) = self.deadline {
                    if Instant::now() >= deadline {
                        self.timed_out = true;
                        log::debug!("collector deadline expired mid-segment {}", segment_ord);
                        return Ok(());
                    }
                }
            }

            let doc = matcher.doc();
            let address = DocAddress {
                segment: segment_ord,
                doc,
            };
            if self.accepts(address, reader) {
                match &mut self.ranking {
                    Ranking::ByScore { heap, limit } => {
                        let hit = RankedHit {
                            score: matcher.score(),
                            address,
                        };
                        offer(heap, *limit, hit);
                    }
                    Ranking::ByField { field, heap, limit } => {
                        let stored = reader.stored_fields(doc)?;
                        let key = stored.get(field.as_str()).cloned().unwrap_or(Value::Null);
                        heap.push(KeyedDoc { key, doc: address });
                        if heap.len() > *limit {
                            heap.pop();
                        }
                    }
                }
            }
            matcher.next()?;
            if pruning {
                if let Ranking::ByScore { heap, limit } = &self.ranking {
                    if let Some(threshold) = score_threshold(heap, *limit) {
                        matcher.skip_to_quality(threshold)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn accepts(&self, address: DocAddress, reader: &SegmentReader) -> bool {
        if reader.is_deleted(address.doc) {
            return false;
        }
        if let Some(filter) = &self.options.filter {
            if !filter.contains(&address) {
                return false;
            }
        }
        if let Some(mask) = &self.options.mask {
            if mask.contains(&address) {
                return false;
            }
        }
        true
    }

    pub fn into_results(self) -> SearchResults {
        let timed_out = self.timed_out;
        let hits = match self.ranking {
            Ranking::ByScore { heap, .. } => heap
                // ascending over Reverse is descending rank: best first.
                .into_sorted_vec()
                .into_iter()
                .map(|Reverse(hit)| Hit {
                    score: hit.score,
                    address: hit.address,
                })
                .collect(),
            Ranking::ByField { heap, .. } => {
                let mut keyed: Vec<KeyedDoc> = heap.into_vec();
                keyed.sort_by(|a, b| a.cmp(b));
                keyed
                    .into_iter()
                    .map(|kd| Hit {
                        score: 0.0,
                        address: kd.doc,
                    })
                    .collect()
            }
        };
        SearchResults { hits, timed_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(score: f32, segment: u32, doc: u32) -> RankedHit {
        RankedHit {
            score,
            address: DocAddress {
                segment,
                doc: DocId(doc),
            },
        }
    }

    fn drain_best_first(heap: BinaryHeap<Reverse<RankedHit>>) -> Vec<(f32, u32)> {
        heap.into_sorted_vec()
            .into_iter()
            .map(|Reverse(h)| (h.score, h.address.doc.0))
            .collect()
    }

    #[test]
    fn ranking_prefers_score_then_position() {
        assert!(hit(0.7, 0, 5) > hit(0.6, 0, 1));
        // same score: the doc seen earlier outranks the later one.
        assert!(hit(0.5, 0, 1) > hit(0.5, 0, 9));
        // segment order dominates doc order across segments.
        assert!(hit(0.5, 0, 9) > hit(0.5, 1, 0));
    }

    #[test]
    fn full_house_evicts_the_weakest() {
        let mut heap = BinaryHeap::new();
        offer(&mut heap, 2, hit(0.6, 0, 1));
        offer(&mut heap, 2, hit(0.8, 0, 2));
        assert_eq!(None, score_threshold(&heap, 3));
        offer(&mut heap, 2, hit(0.7, 0, 3));
        // 0.6 fell out; the weakest survivor sets the bar.
        assert_eq!(Some(0.7), score_threshold(&heap, 2));
        assert_eq!(vec![(0.8, 2), (0.7, 3)], drain_best_first(heap));
    }

    #[test]
    fn losers_never_displace_anyone() {
        let mut heap = BinaryHeap::new();
        offer(&mut heap, 2, hit(0.9, 0, 1));
        offer(&mut heap, 2, hit(0.8, 0, 2));
        offer(&mut heap, 2, hit(0.2, 0, 3));
        assert_eq!(vec![(0.9, 1), (0.8, 2)], drain_best_first(heap));
    }

    #[test]
    fn equal_scores_keep_the_earliest_docs() {
        let mut heap = BinaryHeap::new();
        for doc in &[9, 1, 4] {
            offer(&mut heap, 2, hit(0.5, 0, *doc));
        }
        assert_eq!(vec![(0.5, 1), (0.5, 4)], drain_best_first(heap));
    }

    #[test]
    fn value_ordering_spans_kinds() {
        assert_eq!(
            Ordering::Less,
            compare_values(&Value::Int(3), &Value::Float(3.5))
        );
        assert_eq!(
            Ordering::Equal,
            compare_values(&Value::Int(3), &Value::Float(3.0))
        );
        assert_eq!(
            Ordering::Less,
            compare_values(&Value::Null, &Value::Str("a".into()))
        );
        assert_eq!(
            Ordering::Less,
            compare_values(&Value::Str("apple".into()), &Value::Str("pear".into()))
        );
    }
}
