use std::fmt;

pub mod mongo;

pub use mongo::{insert_if_absent, MongoStore};

/// How a collection is laid out, chosen once at creation time, never per
/// insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    /// Arbitrary key/value documents, no special indexing.
    General,
    /// Documents carry a `timestamp` field and a `metadata` grouping
    /// sub-document; storage buckets them for time-range queries.
    Timeseries,
}

impl fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionMode::General => write!(f, "general"),
            CollectionMode::Timeseries => write!(f, "timeseries"),
        }
    }
}
