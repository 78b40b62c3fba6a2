//! Search over the session stream
//!
//! ```text
//!  filters ──► FilterMatcher ──► Vec<FilterMatch> ──► SearchMap (matches, stats, scaled map)
//!  patterns ─► ValueFilters  ──► Values (series, min/max)
//!  filters ──► Extractor     ──► ExtractedMatchValue (index untouched)
//! ```
//!
//! The session state owns one `SearchMap` and one `Values` store. Search
//! tasks match chunks outside the actor and commit them back.

mod extract;
mod filter;
mod map;
mod values;

use serde::{Deserialize, Serialize};

pub use extract::{ExtractedMatchValue, Extractor};
pub use filter::{FilterMatcher, SearchFilter};
pub use map::{NearestPosition, ScaledMap, SearchMap};
pub use values::{Point, ValueFilters, Values};

/// A matched stream position and the filters it satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMatch {
    /// Stream position
    pub index: u64,
    /// Filter indexes, ascending
    pub filters: Vec<u8>,
}

/// Result of a nested search inside the match index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedMatch {
    /// Stream position
    pub position: u64,
    /// Index in the match list
    pub index: u64,
}
