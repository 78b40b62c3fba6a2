//! Debug statistics collected by an event provider
//!
//! Enabled per session with `EventProvider::set_debug`. Records the order in
//! which operations start, end and emit events, plus anything that looked
//! wrong along the way.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One entry of the order log
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OrderEntry {
    OperationStart {
        ts: DateTime<Utc>,
        name: String,
        uuid: Uuid,
    },
    OperationEnd {
        ts: DateTime<Utc>,
        uuid: Uuid,
        duration_ms: u64,
    },
    Event {
        ts: DateTime<Utc>,
        name: String,
    },
}

#[derive(Debug, Default)]
pub struct DebugStat {
    alias: String,
    unsupported: Vec<String>,
    errors: Vec<String>,
    order: Vec<OrderEntry>,
    running: HashMap<Uuid, (String, Instant)>,
}

impl DebugStat {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            ..Default::default()
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn unsupported(&self) -> &[String] {
        &self.unsupported
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn order(&self) -> &[OrderEntry] {
        &self.order
    }

    pub fn add_unsupported(&mut self, name: &str) {
        self.unsupported.push(name.to_string());
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_event(&mut self, name: &str) {
        self.order.push(OrderEntry::Event {
            ts: Utc::now(),
            name: name.to_string(),
        });
    }

    pub fn operation_started(&mut self, name: &str, uuid: Uuid) {
        self.running.insert(uuid, (name.to_string(), Instant::now()));
        self.order.push(OrderEntry::OperationStart {
            ts: Utc::now(),
            name: name.to_string(),
            uuid,
        });
    }

    pub fn operation_ended(&mut self, uuid: Uuid) {
        let duration_ms = self
            .running
            .remove(&uuid)
            .map(|(_, started)| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.order.push(OrderEntry::OperationEnd {
            ts: Utc::now(),
            uuid,
            duration_ms,
        });
    }

    /// Every `OperationEnd` must follow its `OperationStart`
    pub fn check_order(&self) -> Result<(), String> {
        let mut started: Vec<Uuid> = Vec::new();
        for entry in &self.order {
            match entry {
                OrderEntry::OperationStart { uuid, .. } => started.push(*uuid),
                OrderEntry::OperationEnd { uuid, .. } => {
                    if !started.contains(uuid) {
                        return Err(format!("operation {} ended without start", uuid));
                    }
                }
                OrderEntry::Event { .. } => {}
            }
        }
        Ok(())
    }

    /// Human readable summary
    pub fn report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Session: {}", self.alias);
        let names: HashMap<Uuid, &str> = self
            .order
            .iter()
            .filter_map(|entry| match entry {
                OrderEntry::OperationStart { name, uuid, .. } => Some((*uuid, name.as_str())),
                _ => None,
            })
            .collect();
        let mut events: HashMap<&str, usize> = HashMap::new();
        let _ = writeln!(out, "Operations:");
        for entry in &self.order {
            match entry {
                OrderEntry::OperationEnd { uuid, duration_ms, .. } => {
                    let name = names.get(uuid).copied().unwrap_or("unknown");
                    let _ = writeln!(out, "  {} ({}): {} ms", name, uuid, duration_ms);
                }
                OrderEntry::Event { name, .. } => *events.entry(name.as_str()).or_default() += 1,
                OrderEntry::OperationStart { .. } => {}
            }
        }
        for (uuid, (name, started)) in &self.running {
            let _ = writeln!(
                out,
                "  {} ({}): still running after {} ms",
                name,
                uuid,
                started.elapsed().as_millis()
            );
        }
        let mut events: Vec<_> = events.into_iter().collect();
        events.sort();
        let _ = writeln!(out, "Events:");
        for (name, count) in events {
            let _ = writeln!(out, "  {}: {}", name, count);
        }
        if !self.unsupported.is_empty() {
            let _ = writeln!(out, "Unsupported events: {}", self.unsupported.join(", "));
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "Errors:");
            for error in &self.errors {
                let _ = writeln!(out, "  {}", error);
            }
        }
        out
    }
}
