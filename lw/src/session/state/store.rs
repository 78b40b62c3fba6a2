//! SessionState - everything the actor owns
//!
//! Every mutation commits first and emits afterwards, so a subscriber that
//! reacts to an event always reads the state the event describes.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use super::messages::CommitProgress;
use crate::config::BreadcrumbsConfig;
use crate::error::{ComputationError, ComputationResult, SearchError};
use crate::events::{AttachmentInfo, EventProvider, SessionEvent};
use crate::indexes::{Controller, Mode, Nature};
use crate::search::{
    FilterMatch, FilterMatcher, NearestPosition, NestedMatch, Point, ScaledMap, SearchMap, ValueFilters, Values,
};
use crate::stream::{GrabbedElement, SourceDefinition, Stream, StreamEntry, StreamStatus};

/// Generation-guarded cursor of a chunked computation
#[derive(Debug, Default)]
struct Cursor {
    generation: u64,
    searched_to: u64,
}

impl Cursor {
    fn restart(&mut self) -> u64 {
        self.generation += 1;
        self.searched_to = 0;
        self.generation
    }

    fn accepts(&self, generation: u64, from: u64) -> bool {
        self.generation == generation && self.searched_to == from
    }

    /// Everything below `to` was already matched inline by live appends
    fn covered(&self, generation: u64, to: u64) -> bool {
        self.generation == generation && self.searched_to >= to
    }
}

pub struct SessionState {
    stream: Stream,
    matcher: Option<FilterMatcher>,
    search: Cursor,
    map: SearchMap,
    value_filters: Option<ValueFilters>,
    values_cursor: Cursor,
    values: Values,
    indexes: Controller,
    attachments: Vec<AttachmentInfo>,
    events: Arc<EventProvider>,
}

impl SessionState {
    pub fn new(events: Arc<EventProvider>, breadcrumbs: BreadcrumbsConfig) -> Self {
        Self {
            stream: Stream::new(),
            matcher: None,
            search: Cursor::default(),
            map: SearchMap::new(),
            value_filters: None,
            values_cursor: Cursor::default(),
            values: Values::new(),
            indexes: Controller::new(breadcrumbs),
            attachments: Vec::new(),
            events,
        }
    }

    // === Stream ===

    pub fn add_source(&mut self, alias: String) -> ComputationResult<u16> {
        Ok(self.stream.add_source(alias)?)
    }

    pub fn sources(&self) -> Vec<SourceDefinition> {
        self.stream.sources().to_vec()
    }

    pub fn status(&self) -> StreamStatus {
        self.stream.status()
    }

    pub fn observe_started(&mut self) {
        self.stream.observe_started();
    }

    pub fn observe_finished(&mut self) {
        self.stream.observe_finished();
    }

    pub fn destroy(&mut self) {
        self.stream.destroy();
    }

    pub fn len(&self) -> u64 {
        self.stream.len()
    }

    pub fn file_read(&self) {
        self.events.emit(SessionEvent::FileRead);
    }

    /// Append entries; live search and values cover them inline
    pub fn append(&mut self, entries: Vec<StreamEntry>) -> ComputationResult<u64> {
        let before = self.stream.len();
        if entries.is_empty() {
            return Ok(before);
        }
        let len = self.stream.append(entries);
        self.map.set_stream_len(len);
        self.indexes.set_stream_len(len)?;
        self.events.emit(SessionEvent::StreamUpdated { len });

        if let Some(matcher) = &self.matcher
            && self.search.searched_to == before
        {
            let content = self.stream.content(before, len - before);
            let matches = matcher.match_lines(content.iter().map(|(p, c)| (*p, c.as_str())));
            self.search.searched_to = len;
            self.apply_matches(matches)?;
        }
        if let Some(filters) = &self.value_filters
            && self.values_cursor.searched_to == before
        {
            let rows: Vec<(u64, Vec<(u8, f64)>)> = self
                .stream
                .content(before, len - before)
                .iter()
                .map(|(position, content)| (*position, filters.extract(content)))
                .collect();
            self.values_cursor.searched_to = len;
            self.apply_values(rows);
        }
        Ok(len)
    }

    pub fn grab(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        Ok(self.stream.grab(start, count)?)
    }

    pub fn grab_ranges(&self, ranges: &[RangeInclusive<u64>]) -> ComputationResult<Vec<GrabbedElement>> {
        Ok(self.stream.grab_ranges(ranges)?)
    }

    pub fn grab_raw(&self, start: u64, count: u64) -> ComputationResult<Vec<Vec<u8>>> {
        Ok(self.stream.grab_raw(start, count)?)
    }

    pub fn content(&self, from: u64, count: u64) -> Vec<(u64, String)> {
        self.stream.content(from, count)
    }

    // === Attachments ===

    pub fn add_attachment(&mut self, attachment: AttachmentInfo) {
        self.attachments.push(attachment.clone());
        self.events.emit(SessionEvent::AttachmentsUpdated {
            len: self.attachments.len() as u64,
            attachment,
        });
    }

    pub fn attachments(&self) -> Vec<AttachmentInfo> {
        self.attachments.clone()
    }

    // === Search ===

    fn emit_search_updated(&self) {
        self.events.emit(SessionEvent::SearchUpdated {
            found: self.map.len() as u64,
            stat: self.map.stats().clone(),
        });
    }

    fn emit_indexed_updated(&self) {
        self.events.emit(SessionEvent::IndexedMapUpdated {
            len: self.indexes.len() as u64,
        });
    }

    fn apply_matches(&mut self, matches: Vec<FilterMatch>) -> ComputationResult<()> {
        if matches.is_empty() {
            return Ok(());
        }
        let positions: Vec<u64> = matches.iter().map(|m| m.index).collect();
        self.indexes.append_search_results(&positions)?;
        let update = serde_json::to_string(&matches).ok();
        let filters = self.matcher.as_ref().map(|m| m.filters().to_vec()).unwrap_or_default();
        self.map.append(matches, &filters);
        self.emit_search_updated();
        self.events.emit(SessionEvent::SearchMapUpdated { update });
        self.emit_indexed_updated();
        Ok(())
    }

    /// Replace the active search; returns its generation
    pub fn set_search(&mut self, matcher: FilterMatcher) -> ComputationResult<u64> {
        let generation = self.search.restart();
        debug!(generation, "SessionState::set_search: called");
        self.matcher = Some(matcher);
        self.map.clear();
        self.map.set_stream_len(self.stream.len());
        self.indexes.drop_search()?;
        self.emit_search_updated();
        self.events.emit(SessionEvent::SearchMapUpdated { update: None });
        self.emit_indexed_updated();
        Ok(generation)
    }

    /// Accept matches of `[from, to)` if they continue the current search
    ///
    /// A chunk that live appends already matched only reports progress.
    pub fn commit_search(
        &mut self,
        generation: u64,
        from: u64,
        to: u64,
        matches: Vec<FilterMatch>,
    ) -> ComputationResult<Option<CommitProgress>> {
        if self.matcher.is_none() || to > self.stream.len() {
            debug!(generation, from, to, "SessionState::commit_search: stale commit dropped");
            return Ok(None);
        }
        if !self.search.accepts(generation, from) {
            if !self.search.covered(generation, to) {
                debug!(generation, from, to, "SessionState::commit_search: stale commit dropped");
                return Ok(None);
            }
            debug!(
                generation,
                from,
                to,
                searched_to = self.search.searched_to,
                "SessionState::commit_search: chunk already matched"
            );
        } else {
            self.search.searched_to = to;
            self.apply_matches(matches)?;
        }
        let complete = self.search.searched_to == self.stream.len();
        if complete {
            self.emit_search_updated();
        }
        Ok(Some(CommitProgress {
            found: self.map.len() as u64,
            complete,
            searched_to: self.search.searched_to,
        }))
    }

    pub fn drop_search(&mut self) -> ComputationResult<()> {
        self.search.restart();
        self.matcher = None;
        self.map.clear();
        self.indexes.drop_search()?;
        self.emit_search_updated();
        self.events.emit(SessionEvent::SearchMapUpdated { update: None });
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn search_len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn grab_search(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        let matches = self.map.indexes(start, count)?;
        let ranges: Vec<RangeInclusive<u64>> = matches.iter().map(|m| m.index..=m.index).collect();
        self.grab_ranges(&ranges)
    }

    pub fn scaled_map(&self, dataset_len: u16, range: Option<RangeInclusive<u64>>) -> ScaledMap {
        self.map.scaled(dataset_len, range)
    }

    pub fn nearest(&self, position: u64) -> Option<NearestPosition> {
        self.map.nearest_to(position)
    }

    /// First match from match index `from` whose content also matches `regex`
    pub fn nested_match(&self, regex: &Regex, from: u64, backward: bool) -> Option<NestedMatch> {
        let matches = self.map.matches();
        let from = usize::try_from(from).ok()?;
        if from >= matches.len() {
            return None;
        }
        let hit = |index: usize| {
            let position = matches[index].index;
            self.stream
                .entry(position)
                .filter(|entry| regex.is_match(&entry.content))
                .map(|_| NestedMatch {
                    position,
                    index: index as u64,
                })
        };
        if backward {
            (0..=from).rev().find_map(hit)
        } else {
            (from..matches.len()).find_map(hit)
        }
    }

    // === Values ===

    fn apply_values(&mut self, rows: Vec<(u64, Vec<(u8, f64)>)>) {
        let mut changed = false;
        for (row, values) in rows {
            if !values.is_empty() {
                self.values.append(row, &values);
                changed = true;
            }
        }
        if changed {
            self.events.emit(SessionEvent::SearchValuesUpdated {
                values: Some(self.values.ranges()),
            });
        }
    }

    pub fn set_values(&mut self, filters: ValueFilters) -> u64 {
        let generation = self.values_cursor.restart();
        self.value_filters = Some(filters);
        self.values.clear();
        self.events.emit(SessionEvent::SearchValuesUpdated { values: None });
        generation
    }

    pub fn commit_values(
        &mut self,
        generation: u64,
        from: u64,
        to: u64,
        rows: Vec<(u64, Vec<(u8, f64)>)>,
    ) -> Option<CommitProgress> {
        if self.value_filters.is_none() || to > self.stream.len() {
            return None;
        }
        if self.values_cursor.accepts(generation, from) {
            self.values_cursor.searched_to = to;
            self.apply_values(rows);
        } else if !self.values_cursor.covered(generation, to) {
            return None;
        }
        Some(CommitProgress {
            found: self.values.ranges().len() as u64,
            complete: self.values_cursor.searched_to == self.stream.len(),
            searched_to: self.values_cursor.searched_to,
        })
    }

    pub fn drop_values(&mut self) {
        self.values_cursor.restart();
        self.value_filters = None;
        self.values.clear();
        self.events.emit(SessionEvent::SearchValuesUpdated { values: None });
    }

    pub fn values(&self, dataset_len: u16, frame: Option<RangeInclusive<u64>>) -> HashMap<u8, Vec<Point>> {
        self.values.get(dataset_len, frame)
    }

    // === Indexed view ===

    pub fn set_indexing_mode(&mut self, mode: Mode) -> ComputationResult<()> {
        self.indexes.set_mode(mode)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn indexed_len(&self) -> u64 {
        self.indexes.len() as u64
    }

    pub fn grab_indexed(&self, start: u64, count: u64) -> ComputationResult<Vec<GrabbedElement>> {
        let invalid = || {
            ComputationError::Grabbing(crate::error::GrabError::InvalidRange {
                range: start..start.saturating_add(count),
                context: format!("indexed view holds {} entries", self.indexes.len()),
            })
        };
        if count == 0 {
            return Err(invalid());
        }
        let end = start.checked_add(count - 1).ok_or_else(invalid)?;
        let frame = self.indexes.frame(start..=end).map_err(|_| invalid())?;
        let mut elements = self.stream.grab_ranges(&frame.ranges())?;
        frame.naturalize(&mut elements)?;
        Ok(elements)
    }

    pub fn expand_breadcrumbs(&mut self, separator: u64, offset: u64, above: bool) -> ComputationResult<()> {
        self.indexes.extend_breadcrumbs(separator, offset, above)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn add_bookmark(&mut self, row: u64) -> ComputationResult<()> {
        self.check_row(row)?;
        self.indexes.add_bookmark(row)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn remove_bookmark(&mut self, row: u64) -> ComputationResult<()> {
        self.indexes.remove_bookmark(row)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn set_bookmarks(&mut self, rows: Vec<u64>) -> ComputationResult<()> {
        for row in &rows {
            self.check_row(*row)?;
        }
        self.indexes.set_bookmarks(&rows)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn set_indexes(&mut self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> ComputationResult<()> {
        for range in &ranges {
            self.check_row(*range.end())?;
        }
        self.indexes.set_indexes(nature, &ranges)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn unset_indexes(&mut self, nature: Nature, ranges: Vec<RangeInclusive<u64>>) -> ComputationResult<()> {
        self.indexes.unset_indexes(nature, &ranges)?;
        self.emit_indexed_updated();
        Ok(())
    }

    pub fn around(&self, position: u64) -> (Option<u64>, Option<u64>) {
        self.indexes.around(position)
    }

    pub fn indexed_ranges(&self) -> Vec<RangeInclusive<u64>> {
        self.indexes.search_ranges()
    }

    fn check_row(&self, row: u64) -> ComputationResult<()> {
        if row >= self.stream.len() {
            return Err(ComputationError::SearchError(SearchError::Input(format!(
                "Row {} is out of stream ({} entries)",
                row,
                self.stream.len()
            ))));
        }
        Ok(())
    }
}
