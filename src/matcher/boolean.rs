use super::Matcher;
use crate::{DocId, Error};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Intersection: active only when every child sits on the same doc.
pub struct ConjunctionMatcher {
    children: Vec<Box<dyn Matcher>>,
    active: bool,
}

impl ConjunctionMatcher {
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Result<Self, Error> {
        debug_assert!(!children.is_empty());
        let mut this = Self {
            children,
            active: true,
        };
        this.align()?;
        Ok(this)
    }

    /// Repeatedly skip the lagging children to the leader's doc.
    fn align(&mut self) -> Result<(), Error> {
        'outer: loop {
            let mut target = DocId(0);
            for child in self.children.iter() {
                if !child.is_active() {
                    self.active = false;
                    return Ok(());
                }
                target = std::cmp::max(target, child.doc());
            }
            for child in self.children.iter_mut() {
                if child.doc() < target {
                    child.skip_to(target)?;
                    if !child.is_active() {
                        self.active = false;
                        return Ok(());
                    }
                    if child.doc() > target {
                        // overshot; chase the new leader.
                        continue 'outer;
                    }
                }
            }
            return Ok(());
        }
    }
}

impl Matcher for ConjunctionMatcher {
    fn is_active(&self) -> bool {
        self.active
    }
    fn doc(&self) -> DocId {
        if self.active {
            self.children[0].doc()
        } else {
            DocId::no_more()
        }
    }
    fn next(&mut self) -> Result<(), Error> {
        if !self.active {
            return Ok(());
        }
        self.children[0].next()?;
        self.align()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        if !self.active || self.doc() >= target {
            return Ok(());
        }
        self.children[0].skip_to(target)?;
        self.align()
    }
    fn weight(&self) -> f32 {
        self.children.iter().map(|c| c.weight()).sum()
    }
    fn score(&mut self) -> f32 {
        self.children.iter_mut().map(|c| c.score()).sum()
    }
    fn supports_quality(&self) -> bool {
        self.children.iter().all(|c| c.supports_quality())
    }
    fn block_quality(&self) -> f32 {
        if !self.active {
            return 0.0;
        }
        self.children.iter().map(|c| c.block_quality()).sum()
    }
    fn max_quality(&self) -> f32 {
        if !self.active {
            return 0.0;
        }
        self.children.iter().map(|c| c.max_quality()).sum()
    }
    fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
        // The leader may discard blocks it cannot carry past the bar even
        // with the best the other children can still contribute anywhere.
        while self.active {
            let others: f32 = self.children[1..].iter().map(|c| c.max_quality()).sum();
            let before = self.children[0].doc();
            self.children[0].skip_to_quality(min - others)?;
            if self.children[0].is_active() && self.children[0].doc() == before {
                return Ok(());
            }
            self.align()?;
        }
        Ok(())
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push(child.copy()?);
        }
        Ok(Box::new(ConjunctionMatcher {
            children,
            active: self.active,
        }))
    }
}

/// Union over a heap of active children keyed by their current doc.
pub struct DisjunctionMatcher {
    children: Vec<Box<dyn Matcher>>,
    /// (doc, child index) pairs for children still active.
    heap: BinaryHeap<Reverse<(DocId, usize)>>,
}

impl DisjunctionMatcher {
    pub fn new(children: Vec<Box<dyn Matcher>>) -> Self {
        debug_assert!(!children.is_empty());
        let mut this = Self {
            children,
            heap: BinaryHeap::new(),
        };
        this.rebuild_heap();
        this
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (idx, child) in self.children.iter().enumerate() {
            if child.is_active() {
                self.heap.push(Reverse((child.doc(), idx)));
            }
        }
    }

    /// Indexes of all children sitting on the current doc.
    fn matching(&self) -> Vec<usize> {
        let doc = match self.heap.peek() {
            Some(Reverse((doc, _))) => *doc,
            None => return Vec::new(),
        };
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_active() && c.doc() == doc)
            .map(|(i, _)| i)
            .collect()
    }

    fn advance_past(&mut self, doc: DocId) -> Result<(), Error> {
        while let Some(Reverse((top_doc, idx))) = self.heap.peek().cloned() {
            if top_doc > doc {
                break;
            }
            self.heap.pop();
            let child = &mut self.children[idx];
            child.skip_to(doc.next())?;
            if child.is_active() {
                self.heap.push(Reverse((child.doc(), idx)));
            }
        }
        Ok(())
    }
}

impl Matcher for DisjunctionMatcher {
    fn is_active(&self) -> bool {
        !self.heap.is_empty()
    }
    fn doc(&self) -> DocId {
        match self.heap.peek() {
            Some(Reverse((doc, _))) => *doc,
            None => DocId::no_more(),
        }
    }
    fn next(&mut self) -> Result<(), Error> {
        let doc = self.doc();
        if doc.is_done() {
            return Ok(());
        }
        self.advance_past(doc)
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        if target.0 == 0 {
            return Ok(());
        }
        self.advance_past(DocId(target.0 - 1))
    }
    fn weight(&self) -> f32 {
        self.matching()
            .into_iter()
            .map(|i| self.children[i].weight())
            .sum()
    }
    fn score(&mut self) -> f32 {
        let matching = self.matching();
        matching
            .into_iter()
            .map(|i| self.children[i].score())
            .sum()
    }
    fn supports_quality(&self) -> bool {
        self.children.iter().all(|c| c.supports_quality())
    }
    fn block_quality(&self) -> f32 {
        self.children
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.block_quality())
            .sum()
    }
    fn max_quality(&self) -> f32 {
        self.children
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.max_quality())
            .sum()
    }
    /// WAND-style: a child may discard blocks whose own bound falls below
    /// `min` minus what the other children could still contribute anywhere
    /// in their remaining lists.
    fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
        loop {
            if self.heap.is_empty() {
                return Ok(());
            }
            let total_max: f32 = self.max_quality();
            if total_max < min {
                // nothing ahead can make it anywhere.
                for child in self.children.iter_mut() {
                    child.skip_to(DocId::no_more())?;
                }
                self.heap.clear();
                return Ok(());
            }
            let mut moved = false;
            for child in self.children.iter_mut() {
                if !child.is_active() {
                    continue;
                }
                let others = total_max - child.max_quality();
                let before = child.doc();
                child.skip_to_quality(min - others)?;
                if child.doc() != before {
                    moved = true;
                }
            }
            if !moved {
                return Ok(());
            }
            self.rebuild_heap();
        }
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push(child.copy()?);
        }
        Ok(Box::new(DisjunctionMatcher::new(children)))
    }
}

/// `A AND NOT B`: positions on A's postings, stepping past docs B claims.
pub struct AndNotMatcher {
    include: Box<dyn Matcher>,
    exclude: Box<dyn Matcher>,
}

impl AndNotMatcher {
    pub fn new(include: Box<dyn Matcher>, exclude: Box<dyn Matcher>) -> Result<Self, Error> {
        let mut this = Self { include, exclude };
        this.settle()?;
        Ok(this)
    }

    fn settle(&mut self) -> Result<(), Error> {
        while self.include.is_active() {
            let doc = self.include.doc();
            self.exclude.skip_to(doc)?;
            if self.exclude.is_active() && self.exclude.doc() == doc {
                self.include.next()?;
            } else {
                break;
            }
        }
        Ok(())
    }
}

impl Matcher for AndNotMatcher {
    fn is_active(&self) -> bool {
        self.include.is_active()
    }
    fn doc(&self) -> DocId {
        self.include.doc()
    }
    fn next(&mut self) -> Result<(), Error> {
        self.include.next()?;
        self.settle()
    }
    fn skip_to(&mut self, target: DocId) -> Result<(), Error> {
        self.include.skip_to(target)?;
        self.settle()
    }
    fn weight(&self) -> f32 {
        self.include.weight()
    }
    fn score(&mut self) -> f32 {
        self.include.score()
    }
    fn supports_quality(&self) -> bool {
        self.include.supports_quality()
    }
    fn block_quality(&self) -> f32 {
        self.include.block_quality()
    }
    fn max_quality(&self) -> f32 {
        self.include.max_quality()
    }
    fn skip_to_quality(&mut self, min: f32) -> Result<(), Error> {
        self.include.skip_to_quality(min)?;
        self.settle()
    }
    fn copy(&self) -> Result<Box<dyn Matcher>, Error> {
        Ok(Box::new(AndNotMatcher {
            include: self.include.copy()?,
            exclude: self.exclude.copy()?,
        }))
    }
}
