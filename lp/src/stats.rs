//! Per-id statistics of record files

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ParserError, ParserResult};
use crate::record::{Level, Record, find_magic};

/// Counters for one ECU/app/context id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdStats {
    pub count: u64,
    pub levels: BTreeMap<String, u64>,
}

impl IdStats {
    fn add(&mut self, level: Level) {
        self.count += 1;
        *self.levels.entry(level.as_str().to_string()).or_default() += 1;
    }

    fn merge(&mut self, other: &IdStats) {
        self.count += other.count;
        for (level, count) in &other.levels {
            *self.levels.entry(level.clone()).or_default() += count;
        }
    }
}

/// Statistics over one or more record files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: u64,
    pub ecus: BTreeMap<String, IdStats>,
    pub apps: BTreeMap<String, IdStats>,
    pub contexts: BTreeMap<String, IdStats>,
}

impl RecordStats {
    pub fn add(&mut self, record: &Record) {
        self.total += 1;
        self.ecus.entry(record.ecu.clone()).or_default().add(record.level);
        self.apps.entry(record.app.clone()).or_default().add(record.level);
        self.contexts.entry(record.context.clone()).or_default().add(record.level);
    }

    pub fn merge(&mut self, other: &RecordStats) {
        self.total += other.total;
        for (target, source) in [
            (&mut self.ecus, &other.ecus),
            (&mut self.apps, &other.apps),
            (&mut self.contexts, &other.contexts),
        ] {
            for (id, stats) in source {
                target.entry(id.clone()).or_default().merge(stats);
            }
        }
    }
}

/// Count records per id across `paths`
///
/// Corrupt regions are skipped the same way the record parser does.
pub fn collect_stats<P: AsRef<Path>>(paths: &[P], cancel: impl Fn() -> bool) -> ParserResult<RecordStats> {
    let mut stats = RecordStats::default();
    for path in paths {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let mut offset = 0usize;
        while offset < bytes.len() {
            if cancel() {
                return Err(ParserError::Interrupted);
            }
            match Record::decode(&bytes[offset..]) {
                Ok(Some((record, consumed))) => {
                    stats.add(&record);
                    offset += consumed;
                }
                Ok(None) => break,
                Err(_) => match find_magic(&bytes, offset + 1) {
                    Some(next) => offset = next,
                    None => break,
                },
            }
        }
        debug!("collect_stats: {} done, total {}", path.display(), stats.total);
    }
    Ok(stats)
}
