//! Capture-group extraction without touching the match index

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::SearchFilter;
use crate::error::SearchError;

/// Groups captured on one line, per filter index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMatchValue {
    /// Stream position
    pub index: u64,
    pub values: Vec<(usize, Vec<String>)>,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    regexes: Vec<Regex>,
}

impl Extractor {
    pub fn new(filters: &[SearchFilter]) -> Result<Self, SearchError> {
        if filters.is_empty() {
            return Err(SearchError::Input("No filters given".to_string()));
        }
        let regexes = filters.iter().map(SearchFilter::compile).collect::<Result<Vec<_>, _>>()?;
        Ok(Self { regexes })
    }

    pub fn extract(&self, index: u64, line: &str) -> Option<ExtractedMatchValue> {
        let values: Vec<(usize, Vec<String>)> = self
            .regexes
            .iter()
            .enumerate()
            .filter_map(|(i, regex)| {
                let captures = regex.captures(line)?;
                let groups = captures
                    .iter()
                    .skip(1)
                    .flatten()
                    .map(|group| group.as_str().to_string())
                    .collect();
                Some((i, groups))
            })
            .collect();
        (!values.is_empty()).then_some(ExtractedMatchValue { index, values })
    }
}
