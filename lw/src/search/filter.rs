//! Search filters and their compiled form

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::FilterMatch;
use crate::error::SearchError;

/// One filter expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilter {
    pub value: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub ignore_case: bool,
    #[serde(default)]
    pub is_word: bool,
    #[serde(default)]
    pub invert: bool,
}

impl SearchFilter {
    /// Literal text, case sensitive
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            is_regex: false,
            ignore_case: false,
            is_word: false,
            invert: false,
        }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::plain(value)
        }
    }

    pub fn ignore_case(mut self, ignore: bool) -> Self {
        self.ignore_case = ignore;
        self
    }

    pub fn word(mut self, word: bool) -> Self {
        self.is_word = word;
        self
    }

    pub fn invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Pattern handed to the regex engine
    pub fn as_regex(&self) -> String {
        let subject = if self.is_regex {
            self.value.clone()
        } else {
            regex::escape(&self.value)
        };
        if self.is_word {
            format!(r"\b(?:{})\b", subject)
        } else {
            subject
        }
    }

    pub fn compile(&self) -> Result<Regex, SearchError> {
        if self.value.is_empty() {
            return Err(SearchError::Input("Empty filter value".to_string()));
        }
        RegexBuilder::new(&self.as_regex())
            .case_insensitive(self.ignore_case)
            .build()
            .map_err(|e| SearchError::Regex(format!("{}: {}", self.value, e)))
    }
}

/// Compiled filter set; filter indexes follow the given order
#[derive(Debug, Clone)]
pub struct FilterMatcher {
    filters: Vec<SearchFilter>,
    regexes: Vec<Regex>,
}

impl FilterMatcher {
    pub fn new(filters: &[SearchFilter]) -> Result<Self, SearchError> {
        if filters.is_empty() {
            return Err(SearchError::Input("No filters given".to_string()));
        }
        if filters.len() > u8::MAX as usize + 1 {
            return Err(SearchError::Input(format!("Too many filters: {}", filters.len())));
        }
        let regexes = filters.iter().map(SearchFilter::compile).collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            filters: filters.to_vec(),
            regexes,
        })
    }

    pub fn filters(&self) -> &[SearchFilter] {
        &self.filters
    }

    /// Indexes of the filters `line` satisfies, ascending
    pub fn matched(&self, line: &str) -> Vec<u8> {
        self.filters
            .iter()
            .zip(&self.regexes)
            .enumerate()
            .filter(|(_, (filter, regex))| regex.is_match(line) != filter.invert)
            .map(|(i, _)| i as u8)
            .collect()
    }

    pub fn match_lines<'a>(&self, lines: impl IntoIterator<Item = (u64, &'a str)>) -> Vec<FilterMatch> {
        lines
            .into_iter()
            .filter_map(|(index, line)| {
                let filters = self.matched(line);
                (!filters.is_empty()).then_some(FilterMatch { index, filters })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_filter_is_escaped() {
        let filter = SearchFilter::plain("a.b(c)");
        let regex = filter.compile().unwrap();
        assert!(regex.is_match("xx a.b(c) yy"));
        assert!(!regex.is_match("aXb(c)"));
    }

    #[test]
    fn test_ignore_case_and_word() {
        let regex = SearchFilter::plain("err").ignore_case(true).word(true).compile().unwrap();
        assert!(regex.is_match("an ERR here"));
        assert!(!regex.is_match("an ERROR here"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = SearchFilter::regex("(unclosed").compile().unwrap_err();
        assert!(matches!(err, SearchError::Regex(_)));
    }

    #[test]
    fn test_empty_filters_rejected() {
        assert!(matches!(FilterMatcher::new(&[]), Err(SearchError::Input(_))));
    }

    #[test]
    fn test_matched_follows_filter_order_and_invert() {
        let matcher = FilterMatcher::new(&[
            SearchFilter::plain("b"),
            SearchFilter::plain("a"),
            SearchFilter::plain("z").invert(true),
        ])
        .unwrap();
        assert_eq!(matcher.matched("a b"), vec![0, 1, 2]);
        assert_eq!(matcher.matched("a z"), vec![1]);
        assert_eq!(matcher.matched("z"), Vec::<u8>::new());
    }

    #[test]
    fn test_match_lines() {
        let matcher = FilterMatcher::new(&[SearchFilter::plain("x")]).unwrap();
        let lines = vec![(10, "x"), (11, "y"), (12, "xx")];
        let found = matcher.match_lines(lines);
        assert_eq!(found.iter().map(|m| m.index).collect::<Vec<_>>(), vec![10, 12]);
    }
}
