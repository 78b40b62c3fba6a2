//! Indexed view of the stream
//!
//! The view is an ordered map from stream position to the natures that put
//! the position into the view: search matches, bookmarks, selections and,
//! in breadcrumbs mode, the context lines around them.
//!
//! ```text
//! stream:  0 1 2 3 4 5 6 7 8 9 10 11 12 ...
//! view:    S B B . . * . . B B S  B  B  ...
//!          S = anchor, B = breadcrumb, * = separator (hidden lines)
//! ```

mod controller;
mod map;

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{NativeError, NativeErrorKind, Severity};
use crate::stream::GrabbedElement;

pub use controller::{Controller, Mode};
pub use map::Map;

/// Why a position is part of the indexed view
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    Search = 0,
    Bookmark = 1,
    Selection = 2,
    Breadcrumb = 3,
    BreadcrumbSeparator = 4,
}

impl Nature {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_anchor(self) -> bool {
        matches!(self, Nature::Search | Nature::Bookmark | Nature::Selection)
    }
}

impl TryFrom<u8> for Nature {
    type Error = NativeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Nature::Search),
            1 => Ok(Nature::Bookmark),
            2 => Ok(Nature::Selection),
            3 => Ok(Nature::Breadcrumb),
            4 => Ok(Nature::BreadcrumbSeparator),
            _ => Err(index_error(format!("Invalid nature: {}", value))),
        }
    }
}

pub(crate) fn index_error(message: impl Into<String>) -> NativeError {
    NativeError::new(Severity::Error, NativeErrorKind::Grabber, message)
}

/// One position of the view with its natures in insertion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub position: u64,
    natures: Vec<Nature>,
}

impl Index {
    pub fn new(position: u64, nature: Nature) -> Self {
        Self {
            position,
            natures: vec![nature],
        }
    }

    pub fn extend(&mut self, nature: Nature) {
        if !self.natures.contains(&nature) {
            self.natures.push(nature);
        }
    }

    /// Drop `nature`; true when nothing is left
    pub fn abbreviate(&mut self, nature: Nature) -> bool {
        self.natures.retain(|n| *n != nature);
        self.natures.is_empty()
    }

    pub fn includes(&self, nature: Nature) -> bool {
        self.natures.contains(&nature)
    }

    pub fn natures(&self) -> &[Nature] {
        &self.natures
    }

    pub fn natures_u8(&self) -> Vec<u8> {
        self.natures.iter().map(|n| n.as_u8()).collect()
    }
}

/// Slice of the view, in view order
#[derive(Debug, Default)]
pub struct Frame<'a> {
    pub indexes: Vec<&'a Index>,
}

impl<'a> Frame<'a> {
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Contiguous stream ranges covered by the frame
    pub fn ranges(&self) -> Vec<RangeInclusive<u64>> {
        collapse_positions(self.indexes.iter().map(|i| i.position))
    }

    /// Copy natures onto grabbed elements, one per index
    pub fn naturalize(&self, elements: &mut [GrabbedElement]) -> Result<(), NativeError> {
        if elements.len() != self.indexes.len() {
            return Err(index_error(format!(
                "Fail to naturalize range. Indexes len: {}; elements len: {}",
                self.indexes.len(),
                elements.len()
            )));
        }
        for (element, index) in elements.iter_mut().zip(&self.indexes) {
            element.nature = index.natures_u8();
        }
        Ok(())
    }
}

/// Collapse ascending positions into inclusive ranges
pub fn collapse_positions(positions: impl IntoIterator<Item = u64>) -> Vec<RangeInclusive<u64>> {
    let mut ranges: Vec<RangeInclusive<u64>> = Vec::new();
    for position in positions {
        match ranges.last_mut() {
            Some(last) if *last.end() + 1 == position => *last = *last.start()..=position,
            _ => ranges.push(position..=position),
        }
    }
    ranges
}
