use crate::dictionary::Term;

/// The parsed-query contract: a tagged tree the searcher compiles into
/// matchers. No parser lives here; callers build these directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Term(Term),
    Phrase {
        field: String,
        terms: Vec<Vec<u8>>,
        slop: u32,
    },
    And(Vec<Query>),
    Or(Vec<Query>),
    AndNot(Box<Query>, Box<Query>),
    /// Bounds are raw term bytes in the field's term order; `None` leaves
    /// that side open.
    Range {
        field: String,
        lo: Option<Vec<u8>>,
        hi: Option<Vec<u8>>,
        incl_lo: bool,
        incl_hi: bool,
    },
    Prefix {
        field: String,
        prefix: Vec<u8>,
    },
    /// `*` matches any run, `?` any single character.
    Wildcard {
        field: String,
        pattern: String,
    },
    /// Every doc; with a field, every doc carrying at least one term of it.
    Every(Option<String>),
    Boost(Box<Query>, f32),
    Constant(Box<Query>, f32),
}

impl Query {
    pub fn term(field: &str, token: &str) -> Query {
        Query::Term(Term::text(field, token))
    }

    pub fn phrase(field: &str, words: &[&str], slop: u32) -> Query {
        Query::Phrase {
            field: field.to_string(),
            terms: words.iter().map(|w| w.as_bytes().to_vec()).collect(),
            slop,
        }
    }

    pub fn and(queries: Vec<Query>) -> Query {
        Query::And(queries)
    }

    pub fn or(queries: Vec<Query>) -> Query {
        Query::Or(queries)
    }

    pub fn and_not(keep: Query, subtract: Query) -> Query {
        Query::AndNot(Box::new(keep), Box::new(subtract))
    }

    pub fn range_str(
        field: &str,
        lo: Option<&str>,
        hi: Option<&str>,
        incl_lo: bool,
        incl_hi: bool,
    ) -> Query {
        Query::Range {
            field: field.to_string(),
            lo: lo.map(|s| s.as_bytes().to_vec()),
            hi: hi.map(|s| s.as_bytes().to_vec()),
            incl_lo,
            incl_hi,
        }
    }

    pub fn range_i64(
        field: &str,
        lo: Option<i64>,
        hi: Option<i64>,
        incl_lo: bool,
        incl_hi: bool,
    ) -> Query {
        Query::Range {
            field: field.to_string(),
            lo: lo.map(|x| Term::i64(field, x).bytes),
            hi: hi.map(|x| Term::i64(field, x).bytes),
            incl_lo,
            incl_hi,
        }
    }

    pub fn prefix(field: &str, prefix: &str) -> Query {
        Query::Prefix {
            field: field.to_string(),
            prefix: prefix.as_bytes().to_vec(),
        }
    }

    pub fn wildcard(field: &str, pattern: &str) -> Query {
        Query::Wildcard {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn boost(self, factor: f32) -> Query {
        Query::Boost(Box::new(self), factor)
    }

    pub fn constant(self, score: f32) -> Query {
        Query::Constant(Box::new(self), score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_shape_the_tree() {
        let q = Query::and(vec![
            Query::term("body", "alpha"),
            Query::and_not(
                Query::Every(None),
                Query::or(vec![Query::term("body", "beta")]),
            ),
        ]);
        match q {
            Query::And(children) => {
                assert_eq!(2, children.len());
                assert_eq!(Query::Term(Term::text("body", "alpha")), children[0]);
            }
            _ => panic!("expected And at the root"),
        }
    }

    #[test]
    fn numeric_range_bounds_are_ordered_bytes() {
        match Query::range_i64("year", Some(1900), Some(2000), true, false) {
            Query::Range { lo, hi, .. } => {
                assert!(lo.unwrap() < hi.unwrap());
            }
            _ => panic!("expected Range"),
        }
    }
}
