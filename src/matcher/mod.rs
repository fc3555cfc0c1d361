pub mod boolean;
pub mod phrase;

use crate::lengths::LengthsReader;
use crate::postings::PostingsCursor;
use crate::scoring::Scorer;
use crate::{DocId, Error};
use std::sync::Arc;

/// Default length handed to scorers when a doc has no recorded length.
pub const DEFAULT_FIELD_LENGTH: u32 = 1;

/// The posting-iterator contract every query node compiles down to. Doc IDs
/// are monotonically non-decreasing across calls on one matcher.
pub trait Matcher {
    /// Positioned on a valid posting?
    fn is_active(&self) -> bool;
    /// Current doc; `DocId::no_more()` once exhausted.
    fn doc(&self) -> DocId;
    /// Step to the next posting, or become inactive.
    fn next(&mut self) -> Result<(), Error>;
    /// Advance until `doc() >= target` or inactive.
    fn skip_to(&mut self, target: DocId) -> Result<(), Error>;
    /// Score-independent weight of the current posting (usually tf).
    fn weight(&self) -> f32;
    fn score(&mut self) -> f32;

    /// Whether block-quality pruning is meaningful for this matcher.
    fn supports_quality(&self) -> bool {
        false
    }
    /// Upper bound on the score of any posting in the current block.
    fn block_quality(&self) -> f32 {
        f32::INFINITY
    }
    /// Upper bound over everything still ahead, current posting included.
    /// Composites lean on this when deciding what their siblings could
    /// still contribute.
    fn max_quality(&self) -> f32 {
        f32::INFINITY
    }
    /// Jump past whole blocks that cannot reach `min`. Blocks whose bound
    /// equals `min` survive so that tie-breaking stays deterministic.
    fn skip_to_quality(&mut self, _min: f32) -> Result<(), Error> {
        Ok(())
    }

    /// Independent, identically-positioned clone.
    fn copy(&self) -> Result<Box<dyn Matcher>, Error>;
}

/// Leaf matcher: one term's postings in one segment, scored on the fly.
pub struct TermMatcher {
    cursor: PostingsCursor,
    scorer: Arc<dyn Scorer>,
    lengths: Arc<LengthsReader>,
    field: String,
    /// suffix_max[i] bounds every posting in blocks i.. of the list.
    suffix_max: Vec<f32>,
}

impl TermMatcher {
    /// The cursor must be freshly opened (sitting on its first block).
    pub fn new(
        cursor: PostingsCursor,
        scorer: Arc<dyn Scorer>,
        lengths: Arc<LengthsReader>,
        field: String,
    ) -> Self {
        let mut suffix_max: Vec<f32> = cursor
            .remaining_blocks()
            .iter()
            .map(|info| scorer.max_quality(info.max_tf, info.min_len_byte))
            .collect();
        for i in (0..suffix_max.len().saturating_sub(1)).rev() {
            suffix_max[i] = suffix_max[i].max(suffix_max[i + 1]);
        }
        Self {
            cursor,
            scorer,
            lengths,
            field,
            suffix_max,
        }
    }

    fn current_length(&self) -> u32 {
        self.lengths
            .doc_field_length(self.cursor.doc(), &self.field, DEFAULT_FIELD_LENGTH)
    }

    /// Positions of the current posting; empty when the field has none.
    pub fn positions(&self) -> &[u32] {
        self.cursor.positions()
    }

    pub fn tf(&self) -> u32 {
        self.cursor.tf()
    }

    /// Concrete-typed positioned clone; phrase matching branches with these.
    pub fn copy_term(&self) -> Result<TermMatcher, Error> {
        let cursor = self.cursor.reopened()?;
        let mut copied = TermMatcher::new(
            cursor,
            self.scorer.clone(),
            self.lengths.clone(),
            self.field.clone(),
        );
        if self.cursor.is_active() {
            copied.skip_to(self.cursor.doc())?;
        } else {
            copied.skip_to(DocId::no_more())?;
        }
        Ok(copied)
    }
}

impl Matcher for TermMatcher {
    fn is_active(&self) -> bool {
        self.cursor.is_active()
    }
    fn doc(&self) -> DocId {
        self.cursor.doc()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.cursor.advance()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.cursor.skip_to(target)
    }
    fn weight(&self) -> f32 {
        self.cursor.tf() as f32
    }
    fn score(&mut self) -> f32 {
        let raw = self.scorer.score(self.cursor.tf(), self.current_length());
        self.scorer.final_score(raw)
    }
    /// Rescoring scorers can reorder arbitrarily, so their block bounds
    /// cannot be trusted for pruning.
    fn supports_quality(&self) -> bool {
        !self.scorer.uses_final()
    }
    fn block_quality(&self) -> f32 {
        if !self.cursor.is_active() {
            return 0.0;
        }
        let info = self.cursor.block_info();
        self.scorer.max_quality(info.max_tf, info.min_len_byte)
    }
    fn max_quality(&self) -> f32 {
        if !self.cursor.is_active() {
            return 0.0;
        }
        self.suffix_max[self.cursor.block_ord()]
    }
    fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
        let scorer = self.scorer.clone();
        self.cursor
            .skip_blocks_while(move |info| scorer.max_quality(info.max_tf, info.min_len_byte) < min)
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(self.copy_term()?))
    }
}

/// Matches every doc 0..n with a fixed score; `Every` queries and filters.
pub struct AllMatcher {
    doc: u32,
    doc_count: u32,
    score: f32,
}

impl AllMatcher {
    pub fn new(doc_count: u32, score: f32) -> Self {
        Self {
            doc: 0,
            doc_count,
            score,
        }
    }
}

impl Matcher for AllMatcher {
    fn is_active(&self) -> bool {
        self.doc < self.doc_count
    }
    fn doc(&self) -> DocId {
        if self.is_active() {
            DocId(self.doc)
        } else {
            DocId::no_more()
        }
    }
    fn next(&mut self) -> Result<(), Error> {
        if self.is_active() {
            self.doc += 1;
        }
        Ok(())
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        if target.0 > self.doc {
            self.doc = std::cmp::min(target.0, self.doc_count);
        }
        Ok(())
    }
    fn weight(&self) -> f32 {
        1.0
    }
    fn score(&mut self) -> f32 {
        self.score
    }
    fn max_quality(&self) -> f32 {
        if self.is_active() {
            self.score
        } else {
            0.0
        }
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(AllMatcher {
            doc: self.doc,
            doc_count: self.doc_count,
            score: self.score,
        }))
    }
}

/// Matches nothing; the compiled form of impossible queries.
pub struct EmptyMatcher;

impl Matcher for EmptyMatcher {
    fn is_active(&self) -> bool {
        false
    }
    fn doc(&self) -> DocId {
        DocId::no_more()
    }
    fn next(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn skip_to(&mut self, _target: DocId) -> Result<(), Error> {
        Ok(())
    }
    fn weight(&self) -> f32 {
        0.0
    }
    fn score(&mut self) -> f32 {
        0.0
    }
    fn supports_quality(&self) -> bool {
        true
    }
    fn block_quality(&self) -> f32 {
        0.0
    }
    fn max_quality(&self) -> f32 {
        0.0
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(EmptyMatcher))
    }
}

/// Multiplies a child's scores (and bounds) by a constant factor.
pub struct BoostMatcher {
    child: Box<dyn Matcher>,
    factor: f32,
}

impl BoostMatcher {
    pub fn new(child: Box<dyn Matcher>, factor: f32) -> Self {
        Self { child, factor }
    }
}

impl Matcher for BoostMatcher {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn doc(&self) -> DocId {
        self.child.doc()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn weight(&self) -> f32 {
        self.child.weight()
    }
    fn score(&mut self) -> f32 {
        self.factor * self.child.score()
    }
    fn supports_quality(&self) -> bool {
        self.child.supports_quality()
    }
    fn block_quality(&self) -> f32 {
        self.factor * self.child.block_quality()
    }
    fn max_quality(&self) -> f32 {
        self.factor * self.child.max_quality()
    }
    fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
        if self.factor > 0.0 {
            self.child.skip_to_quality(min / self.factor)
        } else {
            Ok(())
        }
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(BoostMatcher {
            child: self.child.copy()?,
            factor: self.factor,
        }))
    }
}

/// Replaces a child's scores with a constant; matching is unchanged.
pub struct ConstantScoreMatcher {
    child: Box<dyn Matcher>,
    score: f32,
}

impl ConstantScoreMatcher {
    pub fn new(child: Box<dyn Matcher>, score: f32) -> Self {
        Self { child, score }
    }
}

impl Matcher for ConstantScoreMatcher {
    fn is_active(&self) -> bool {
        self.child.is_active()
    }
    fn doc(&self) -> DocId {
        self.child.doc()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.child.next()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.child.skip_to(target)
    }
    fn weight(&self) -> f32 {
        1.0
    }
    fn score(&mut self) -> f32 {
        self.score
    }
    fn supports_quality(&self) -> bool {
        true
    }
    fn block_quality(&self) -> f32 {
        if self.child.is_active() {
            self.score
        } else {
            0.0
        }
    }
    fn max_quality(&self) -> f32 {
        self.block_quality()
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(ConstantScoreMatcher {
            child: self.child.copy()?,
            score: self.score,
        }))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Matcher over a fixed (doc, score) table; unit tests drive composites
    /// with these instead of real segments.
    pub struct VecMatcher {
        items: Vec<(u32, f32)>,
        at: usize,
    }

    impl VecMatcher {
        pub fn new(items: Vec<(u32, f32)>) -> Self {
            Self { items, at: 0 }
        }
    }

    impl Matcher for VecMatcher {
        fn is_active(&self) -> bool {
            self.at < self.items.len()
        }
        fn doc(&self) -> DocId {
            if self.is_active() {
                DocId(self.items[self.at].0)
            } else {
                DocId::no_more()
            }
        }
        fn next(&mut self) -> Result<(), Error> {
            if self.is_active() {
                self.at += 1;
            }
            Ok(())
        }
        fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
            while self.is_active() && self.doc() < target {
                self.at += 1;
            }
            Ok(())
        }
        fn weight(&self) -> f32 {
            1.0
        }
        fn score(&mut self) -> f32 {
            self.items[self.at].1
        }
        fn supports_quality(&self) -> bool {
            true
        }
        fn block_quality(&self) -> f32 {
            // one big block: bound is the best remaining score.
            self.items[self.at..]
                .iter()
                .map(|(_, s)| *s)
                .fold(0.0, f32::max)
        }
        fn max_quality(&self) -> f32 {
            self.block_quality()
        }
        fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
            if self.is_active() && self.block_quality() < min {
                self.at = self.items.len();
            }
            Ok(())
        }
        fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
            Ok(Box::new(VecMatcher {
                items: self.items.clone(),
                at: self.at,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::VecMatcher;
    use super::*;

    #[test]
    fn all_matcher_walks_every_doc() {
        let mut all = AllMatcher::new(3, 1.0);
        let mut seen = Vec::new();
        while all.is_active() {
            seen.push(all.doc().0);
            all.next().unwrap();
        }
        assert_eq!(vec![0, 1, 2], seen);
        assert!(all.doc().is_done());
    }

    #[test]
    fn boost_scales_scores() {
        let inner = VecMatcher::new(vec![(1, 0.5), (4, 2.0)]);
        let mut boosted = BoostMatcher::new(Box::new(inner), 3.0);
        assert_eq!(1.5, boosted.score());
        assert_eq!(6.0, boosted.block_quality());
        boosted.skip_to(DocId(4)).unwrap();
        assert_eq!(6.0, boosted.score());
    }

    #[test]
    fn constant_score_ignores_child_scores() {
        let inner = VecMatcher::new(vec![(1, 0.5), (4, 2.0)]);
        let mut constant = ConstantScoreMatcher::new(Box::new(inner), 7.0);
        assert_eq!(7.0, constant.score());
        constant.next().unwrap();
        assert_eq!(7.0, constant.score());
        assert_eq!(DocId(4), constant.doc());
    }

    #[test]
    fn copies_are_independent() {
        let mut a = VecMatcher::new(vec![(1, 1.0), (2, 1.0), (3, 1.0)]);
        a.next().unwrap();
        let mut b = a.copy().unwrap();
        assert_eq!(a.doc(), b.doc());
        b.next().unwrap();
        assert_eq!(DocId(2), a.doc());
        assert_eq!(DocId(3), b.doc());
    }
}
