//! Writing stream entries out

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Column indexes to keep, in output order
    #[serde(default)]
    pub columns: Vec<usize>,
    pub spliter: Option<String>,
    pub delimiter: Option<String>,
}

impl ExportOptions {
    /// Options with the configured spliter/delimiter filled in where unset
    pub fn with_defaults(mut self, config: &ExportConfig) -> Self {
        if self.spliter.is_none() {
            self.spliter = config.spliter.clone();
        }
        if self.delimiter.is_none() {
            self.delimiter = config.delimiter.clone();
        }
        self
    }

    fn column_spec(&self) -> Option<(&str, &str)> {
        match (&self.spliter, &self.delimiter) {
            (Some(spliter), Some(delimiter)) if !self.columns.is_empty() && !spliter.is_empty() => {
                Some((spliter.as_str(), delimiter.as_str()))
            }
            _ => None,
        }
    }
}

/// Keep the selected columns of `content`; unchanged unless columns apply
pub fn render_columns<'a>(content: &'a str, options: &ExportOptions) -> std::borrow::Cow<'a, str> {
    let Some((spliter, delimiter)) = options.column_spec() else {
        return std::borrow::Cow::Borrowed(content);
    };
    let parts: Vec<&str> = content.split(spliter).collect();
    let selected: Vec<&str> = options
        .columns
        .iter()
        .filter_map(|column| parts.get(*column).copied())
        .collect();
    std::borrow::Cow::Owned(selected.join(delimiter))
}

/// Write rendered entries, one per line
///
/// `first` tells whether nothing was written before this chunk.
pub fn write_rendered<W: Write>(
    out: &mut W,
    contents: &[String],
    options: &ExportOptions,
    first: bool,
) -> std::io::Result<()> {
    for (i, content) in contents.iter().enumerate() {
        if !(first && i == 0) {
            out.write_all(b"\n")?;
        }
        out.write_all(render_columns(content, options).as_bytes())?;
    }
    Ok(())
}

/// Write stored bytes unchanged
pub fn write_raw<W: Write>(out: &mut W, raws: &[Vec<u8>]) -> std::io::Result<()> {
    for raw in raws {
        out.write_all(raw)?;
    }
    Ok(())
}
