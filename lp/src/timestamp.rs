//! Timestamp format recognition
//!
//! A format string is a template made of tokens and literal characters:
//!
//! | token | meaning                      |
//! |-------|------------------------------|
//! | YYYY  | four digit year              |
//! | yy    | two digit year (20xx)        |
//! | MM    | month, 1-2 digits            |
//! | MMM   | month name (Jan..Dec)        |
//! | DD    | day of month                 |
//! | hh    | hour                         |
//! | mm    | minute                       |
//! | ss    | second                       |
//! | s     | fraction of a second, 1-3 digits |
//! | TZD   | zone: `Z`, `+hh:mm`, `+hhmm` |
//! | a     | AM / PM                      |

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use crate::error::{ParserError, ParserResult};

const TOKENS: &[(&str, &str, &str)] = &[
    ("YYYY", "year", r"\d{4}"),
    ("MMM", "month_name", r"[A-Za-z]{3}"),
    ("TZD", "tz", r"Z|[+-]\d{2}:?\d{2}"),
    ("yy", "short_year", r"\d{2}"),
    ("MM", "month", r"\d{1,2}"),
    ("DD", "day", r"\d{1,2}"),
    ("hh", "hour", r"\d{1,2}"),
    ("mm", "minute", r"\d{2}"),
    ("ss", "second", r"\d{2}"),
    ("s", "fraction", r"\d{1,3}"),
    ("a", "ampm", r"[AaPp][Mm]"),
];

const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];

/// Compiled timestamp format
#[derive(Debug, Clone)]
pub struct TimestampFormat {
    format: String,
    regex: Regex,
}

impl TimestampFormat {
    pub fn new(format: &str) -> ParserResult<Self> {
        let fail = |reason: &str| ParserError::Format {
            format: format.to_string(),
            reason: reason.to_string(),
        };
        let mut pattern = String::new();
        let mut seen: Vec<&str> = Vec::new();
        let mut rest = format;
        'outer: while !rest.is_empty() {
            for (token, group, expr) in TOKENS {
                if let Some(tail) = rest.strip_prefix(token) {
                    if seen.contains(group) {
                        return Err(fail(&format!("token {} used twice", token)));
                    }
                    seen.push(group);
                    pattern.push_str(&format!("(?P<{}>{})", group, expr));
                    rest = tail;
                    continue 'outer;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                pattern.push_str(&regex::escape(&c.to_string()));
            }
            rest = chars.as_str();
        }
        if !seen.contains(&"month") && !seen.contains(&"month_name") {
            return Err(fail("month (MM or MMM) is required"));
        }
        for (group, token) in [("day", "DD"), ("hour", "hh"), ("minute", "mm")] {
            if !seen.contains(&group) {
                return Err(fail(&format!("{} is required", token)));
            }
        }
        if seen.contains(&"year") && seen.contains(&"short_year") {
            return Err(fail("YYYY and yy are exclusive"));
        }
        let regex = Regex::new(&pattern).map_err(|e| fail(&e.to_string()))?;
        Ok(Self {
            format: format.to_string(),
            regex,
        })
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Whether the format carries its own year
    pub fn has_year(&self) -> bool {
        self.format.contains("YYYY") || self.format.contains("yy")
    }

    /// Unix milliseconds of the first timestamp in `line`
    ///
    /// `year` fills formats without a year (current year when `None`).
    /// `offset_ms` is added to the result.
    pub fn extract_ms(&self, line: &str, year: Option<i32>, offset_ms: i64) -> Option<i64> {
        let caps = self.regex.captures(line)?;
        let num = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

        let year = match (caps.name("year"), caps.name("short_year")) {
            (Some(y), _) => y.as_str().parse::<i32>().ok()?,
            (None, Some(y)) => 2000 + y.as_str().parse::<i32>().ok()?,
            (None, None) => year.unwrap_or_else(|| Utc::now().year()),
        };
        let month = match caps.name("month_name") {
            Some(name) => {
                let lower = name.as_str().to_ascii_lowercase();
                MONTHS.iter().position(|m| *m == lower)? as u32 + 1
            }
            None => num("month")?,
        };
        let day = num("day")?;
        let mut hour = num("hour")?;
        let minute = num("minute")?;
        let second = num("second").unwrap_or(0);
        let millis = match caps.name("fraction") {
            Some(frac) => {
                let digits = frac.as_str();
                digits.parse::<u32>().ok()? * 10u32.pow(3 - digits.len() as u32)
            }
            None => 0,
        };
        if let Some(ampm) = caps.name("ampm") {
            let pm = ampm.as_str().eq_ignore_ascii_case("pm");
            if hour == 0 || hour > 12 {
                return None;
            }
            hour = match (pm, hour) {
                (false, 12) => 0,
                (true, 12) => 12,
                (true, h) => h + 12,
                (false, h) => h,
            };
        }
        let datetime = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_milli_opt(hour, minute, second, millis)?;
        let mut ms = datetime.and_utc().timestamp_millis();
        if let Some(tz) = caps.name("tz") {
            ms -= tz_offset_ms(tz.as_str())?;
        }
        Some(ms + offset_ms)
    }
}

fn tz_offset_ms(tz: &str) -> Option<i64> {
    if tz == "Z" {
        return Some(0);
    }
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let digits: String = tz[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i64 = digits[..2].parse().ok()?;
    let minutes: i64 = digits[2..].parse().ok()?;
    Some(sign * (hours * 3600 + minutes * 60) * 1000)
}
