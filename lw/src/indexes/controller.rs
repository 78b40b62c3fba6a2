//! Indexed view controller
//!
//! Keeps the [`Map`] in step with the stream and the search: anchors are
//! added or removed, and in breadcrumbs mode the context lines are laid out
//! again from the first anchor that changed.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Frame, Map, Nature, collapse_positions, index_error};
use crate::config::BreadcrumbsConfig;
use crate::error::NativeError;

const ANCHORS: [Nature; 3] = [Nature::Search, Nature::Bookmark, Nature::Selection];

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Regular = 0,
    Breadcrumbs = 1,
}

impl TryFrom<u8> for Mode {
    type Error = NativeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Regular),
            1 => Ok(Mode::Breadcrumbs),
            _ => Err(index_error(format!("Invalid indexing mode: {}", value))),
        }
    }
}

#[derive(Debug)]
pub struct Controller {
    map: Map,
    mode: Mode,
    breadcrumbs: BreadcrumbsConfig,
}

impl Controller {
    pub fn new(breadcrumbs: BreadcrumbsConfig) -> Self {
        Self {
            map: Map::new(),
            mode: Mode::Regular,
            breadcrumbs,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), NativeError> {
        debug!(?mode, "Controller::set_mode: called");
        self.mode = mode;
        match mode {
            Mode::Regular => {
                self.map.clean(Nature::Breadcrumb);
                self.map.clean(Nature::BreadcrumbSeparator);
                Ok(())
            }
            Mode::Breadcrumbs => self.rebuild(),
        }
    }

    fn rebuild(&mut self) -> Result<(), NativeError> {
        if self.mode != Mode::Breadcrumbs {
            return Ok(());
        }
        self.map
            .build_breadcrumbs(self.breadcrumbs.min_distance, self.breadcrumbs.min_offset)
    }

    /// Relayout after anchors at or after `changed_from` were touched
    fn refresh_from(&mut self, last_anchor: Option<u64>, changed_from: Option<u64>) -> Result<(), NativeError> {
        if self.mode != Mode::Breadcrumbs {
            return Ok(());
        }
        match (last_anchor, changed_from) {
            (Some(anchor), Some(changed)) if changed >= anchor && self.map.get(anchor).is_some() => self
                .map
                .update_breadcrumbs(anchor, self.breadcrumbs.min_distance, self.breadcrumbs.min_offset),
            _ => self.rebuild(),
        }
    }

    pub fn set_stream_len(&mut self, len: u64) -> Result<(), NativeError> {
        if self.map.stream_len() == len {
            return Ok(());
        }
        self.map.set_stream_len(len);
        let last = self.map.last_key_for(&ANCHORS);
        self.refresh_from(last, last)
    }

    /// Replace every search anchor
    pub fn set_search_results(&mut self, positions: &[u64]) -> Result<(), NativeError> {
        debug!(count = positions.len(), "Controller::set_search_results: called");
        self.map.clean(Nature::Search);
        self.map.insert(positions, Nature::Search);
        self.rebuild()
    }

    /// Add search anchors; positions are ascending
    pub fn append_search_results(&mut self, positions: &[u64]) -> Result<(), NativeError> {
        let Some(first) = positions.first().copied() else {
            return Ok(());
        };
        let last = self.map.last_key_for(&ANCHORS);
        self.map.insert(positions, Nature::Search);
        self.refresh_from(last, Some(first))
    }

    pub fn drop_search(&mut self) -> Result<(), NativeError> {
        debug!("Controller::drop_search: called");
        self.map.clean(Nature::Search);
        self.rebuild()
    }

    pub fn add_bookmark(&mut self, row: u64) -> Result<(), NativeError> {
        self.map.insert(&[row], Nature::Bookmark);
        self.rebuild()
    }

    pub fn remove_bookmark(&mut self, row: u64) -> Result<(), NativeError> {
        self.map.remove(&[row], Nature::Bookmark);
        self.rebuild()
    }

    pub fn set_bookmarks(&mut self, rows: &[u64]) -> Result<(), NativeError> {
        self.map.clean(Nature::Bookmark);
        self.map.insert(rows, Nature::Bookmark);
        self.rebuild()
    }

    pub fn bookmarks(&self) -> Vec<u64> {
        self.map.positions_of(Nature::Bookmark)
    }

    fn check_manual(nature: Nature) -> Result<(), NativeError> {
        match nature {
            Nature::Bookmark | Nature::Selection => Ok(()),
            other => Err(index_error(format!("{:?} cannot be set manually", other))),
        }
    }

    pub fn set_indexes(&mut self, nature: Nature, ranges: &[RangeInclusive<u64>]) -> Result<(), NativeError> {
        Self::check_manual(nature)?;
        for range in ranges {
            self.map.insert_range(range.clone(), nature);
        }
        self.rebuild()
    }

    pub fn unset_indexes(&mut self, nature: Nature, ranges: &[RangeInclusive<u64>]) -> Result<(), NativeError> {
        Self::check_manual(nature)?;
        for range in ranges {
            self.map.remove_range(range.clone(), nature);
        }
        self.rebuild()
    }

    pub fn extend_breadcrumbs(&mut self, separator: u64, offset: u64, above: bool) -> Result<(), NativeError> {
        debug!(separator, offset, above, "Controller::extend_breadcrumbs: called");
        if self.mode != Mode::Breadcrumbs {
            return Err(index_error("Breadcrumbs can be extended only in breadcrumbs mode"));
        }
        self.map.extend_breadcrumbs(separator, offset, above)
    }

    pub fn frame(&self, range: RangeInclusive<u64>) -> Result<Frame<'_>, NativeError> {
        self.map.frame(range)
    }

    pub fn around(&self, position: u64) -> (Option<u64>, Option<u64>) {
        self.map.around(position)
    }

    /// Contiguous ranges of direct search matches
    pub fn search_ranges(&self) -> Vec<RangeInclusive<u64>> {
        collapse_positions(self.map.positions_of(Nature::Search))
    }
}
