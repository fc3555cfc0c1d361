pub mod analysis;
pub mod collector;
pub mod deletes;
pub mod dictionary;
pub mod directory;
pub mod index;
pub mod io_helper;
pub mod lengths;
pub mod matcher;
pub mod postings;
pub mod query;
pub mod schema;
pub mod scoring;
pub mod searcher;
pub mod segment;
pub mod store;
pub mod value;

#[macro_use]
extern crate serde_derive;

use std::{io, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    /// Requested term, document or field is absent.
    NotFound,
    /// Another writer holds the index lock.
    Locked,
    /// Mutation attempted against a read-only index.
    ReadOnly,
    /// A checksum, length, or ordering invariant failed on read.
    Corrupt(String),
    /// Field unknown to the schema, or incompatible schema fingerprint.
    SchemaMismatch(String),
    /// Collector budget exceeded; partial results remain valid.
    TimeLimit,
    /// A document value was inconsistent with its field kind.
    IndexingError(String),
    CompressionError,
    InternalSizeErr,
    IO(io::Error),
    BadManifest(serde_json::Error),
    Utf8DecodeError(Utf8Error),
    Context(String, Box<Error>),
}

impl Error {
    pub fn with_context<S>(self, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Context(msg.into(), Box::new(self))
    }
    /// Strip context wrappers to test against the underlying kind.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context(_, inner) => inner.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::BadManifest(err)
    }
}
impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error::Utf8DecodeError(err)
    }
}

/// Document handle local to one segment: 0-based and dense.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DocId(pub u32);

impl DocId {
    pub fn is_done(&self) -> bool {
        self.0 == std::u32::MAX
    }
    pub fn no_more() -> DocId {
        DocId(std::u32::MAX)
    }
    pub fn next(&self) -> DocId {
        DocId(self.0 + 1)
    }
}

/// A hit addressed across the whole index: which segment, which local doc.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Clone)]
pub struct DocAddress {
    /// Position of the segment in the snapshot's stable order.
    pub segment: u32,
    pub doc: DocId,
}
