//! Numeric values captured by value filters

use std::collections::HashMap;
use std::ops::RangeInclusive;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// One point of a value series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub row: u64,
    pub min: f64,
    pub max: f64,
    pub y_value: f64,
}

/// Compiled value patterns; each must capture at least one group
#[derive(Debug, Clone)]
pub struct ValueFilters {
    regexes: Vec<Regex>,
}

impl ValueFilters {
    pub fn new(patterns: &[String]) -> Result<Self, SearchError> {
        if patterns.is_empty() {
            return Err(SearchError::Input("No value patterns given".to_string()));
        }
        if patterns.len() > u8::MAX as usize + 1 {
            return Err(SearchError::Input(format!("Too many value patterns: {}", patterns.len())));
        }
        let mut regexes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let regex = Regex::new(pattern).map_err(|e| SearchError::Regex(format!("{}: {}", pattern, e)))?;
            if regex.captures_len() < 2 {
                return Err(SearchError::Input(format!("Pattern has no capture group: {}", pattern)));
            }
            regexes.push(regex);
        }
        Ok(Self { regexes })
    }

    /// `(filter, value)` for every pattern whose capture parses as a number
    pub fn extract(&self, line: &str) -> Vec<(u8, f64)> {
        self.regexes
            .iter()
            .enumerate()
            .filter_map(|(i, regex)| {
                let captures = regex.captures(line)?;
                captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .find_map(|group| group.as_str().trim().parse::<f64>().ok())
                    .map(|value| (i as u8, value))
            })
            .collect()
    }
}

/// Collected series with running min/max per filter
#[derive(Debug, Default)]
pub struct Values {
    series: HashMap<u8, Vec<(u64, f64)>>,
    ranges: HashMap<u8, (f64, f64)>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.ranges.clear();
    }

    /// Add the values found on row `row`; rows arrive ascending
    pub fn append(&mut self, row: u64, values: &[(u8, f64)]) {
        for (filter, value) in values {
            self.series.entry(*filter).or_default().push((row, *value));
            self.ranges
                .entry(*filter)
                .and_modify(|(min, max)| {
                    *min = min.min(*value);
                    *max = max.max(*value);
                })
                .or_insert((*value, *value));
        }
    }

    /// Min/max per filter
    pub fn ranges(&self) -> HashMap<u8, (f64, f64)> {
        self.ranges.clone()
    }

    /// Series per filter, reduced to at most `dataset_len` points
    ///
    /// Longer series are split into `dataset_len` row slots; each non-empty
    /// slot becomes one point at its first row carrying min, max and average.
    pub fn get(&self, dataset_len: u16, frame: Option<RangeInclusive<u64>>) -> HashMap<u8, Vec<Point>> {
        self.series
            .iter()
            .map(|(filter, series)| (*filter, reduce(series, dataset_len as usize, frame.as_ref())))
            .collect()
    }
}

fn reduce(series: &[(u64, f64)], dataset_len: usize, frame: Option<&RangeInclusive<u64>>) -> Vec<Point> {
    let points: &[(u64, f64)] = match frame {
        Some(frame) => {
            let start = series.partition_point(|(row, _)| row < frame.start());
            let end = series.partition_point(|(row, _)| row <= frame.end());
            &series[start..end.max(start)]
        }
        None => series,
    };
    if points.is_empty() || dataset_len == 0 {
        return Vec::new();
    }
    if points.len() <= dataset_len {
        return points
            .iter()
            .map(|(row, value)| Point {
                row: *row,
                min: *value,
                max: *value,
                y_value: *value,
            })
            .collect();
    }
    let (from, to) = match frame {
        Some(frame) => (*frame.start(), *frame.end()),
        None => (points[0].0, points[points.len() - 1].0),
    };
    let span = (to as u128).saturating_sub(from as u128) + 1;
    let mut reduced: Vec<Point> = Vec::with_capacity(dataset_len);
    let mut current: Option<(usize, Point, f64, u64)> = None;
    for (row, value) in points {
        let slot = ((row - from) as u128 * dataset_len as u128 / span) as usize;
        match current.as_mut() {
            Some((current_slot, point, sum, count)) if *current_slot == slot => {
                point.min = point.min.min(*value);
                point.max = point.max.max(*value);
                *sum += value;
                *count += 1;
            }
            _ => {
                if let Some((_, point, sum, count)) = current.take() {
                    reduced.push(Point {
                        y_value: sum / count as f64,
                        ..point
                    });
                }
                current = Some((
                    slot,
                    Point {
                        row: *row,
                        min: *value,
                        max: *value,
                        y_value: *value,
                    },
                    *value,
                    1,
                ));
            }
        }
    }
    if let Some((_, point, sum, count)) = current {
        reduced.push(Point {
            y_value: sum / count as f64,
            ..point
        });
    }
    reduced
}
