//! Log parsing
//!
//! Turns the raw text of one process log into [`ParsedEvent`]s. Parsing is
//! line-local and never fails: a process killed mid-write leaves a torn last
//! line, and a torn line must not cost us the rest of the log.
//!
//! A significant line looks like
//!
//! ```text
//! [2026-03-01T10:00:00.120Z INFO  primary::core] Committed B12(aGVsbG8=) -> 30 tx samples=4,9
//! ```

use std::str::Lines;

use bench_common::constants::{
    BENCHMARK_END_MARKER, COMMIT_COUNT_SEPARATOR, COMMIT_SAMPLES_TAG, COMMIT_TAG, PANIC_TAG,
    SAMPLE_TAG,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    BlockCommitted {
        round: u64,
        digest: String,
        transactions: u64,
        /// Sample transactions included in the block
        samples: Vec<u64>,
    },
    TxSampled {
        sample_id: u64,
        size: u64,
    },
    /// An error reported by the process, or a tagged line we could not read
    ErrorLogged {
        line: String,
        malformed: bool,
    },
    /// The log ended without the terminal marker
    LogTruncated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedEvent {
    /// Process the log belongs to (e.g. `primary-0`)
    pub node_id: String,
    /// Absent when the line carried no readable timestamp
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

impl ParsedEvent {
    #[must_use]
    pub fn logical_round(&self) -> Option<u64> {
        match self.kind {
            EventKind::BlockCommitted { round, .. } => Some(round),
            _ => None,
        }
    }

    #[must_use]
    pub fn payload_size(&self) -> Option<u64> {
        match self.kind {
            EventKind::TxSampled { size, .. } => Some(size),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self.kind, EventKind::LogTruncated)
    }
}

/// Parser over the full text of one process log
#[derive(Debug, Clone)]
pub struct LogParser {
    node_id: String,
    text: String,
}

impl LogParser {
    pub fn new(node_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            text: text.into(),
        }
    }

    /// Accept arbitrary bytes, replacing invalid UTF-8
    pub fn from_bytes(node_id: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(node_id, String::from_utf8_lossy(bytes).into_owned())
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Lazily yield events in text order
    ///
    /// Every call starts again from the first line.
    #[must_use]
    pub fn events(&self) -> Events<'_> {
        Events {
            node_id: &self.node_id,
            lines: self.text.lines(),
            ended: false,
            done: false,
        }
    }
}

/// Iterator returned by [`LogParser::events`]
pub struct Events<'a> {
    node_id: &'a str,
    lines: Lines<'a>,
    ended: bool,
    done: bool,
}

impl Iterator for Events<'_> {
    type Item = ParsedEvent;

    fn next(&mut self) -> Option<ParsedEvent> {
        if self.done {
            return None;
        }
        for line in self.lines.by_ref() {
            match classify(line) {
                Line::End => self.ended = true,
                Line::Skip => {}
                Line::Event(timestamp, kind) => {
                    return Some(ParsedEvent {
                        node_id: self.node_id.to_string(),
                        timestamp,
                        kind,
                    })
                }
            }
        }
        self.done = true;
        (!self.ended).then(|| ParsedEvent {
            node_id: self.node_id.to_string(),
            timestamp: None,
            kind: EventKind::LogTruncated,
        })
    }
}

enum Line {
    End,
    Skip,
    Event(Option<DateTime<Utc>>, EventKind),
}

struct Prefix<'a> {
    timestamp: Option<DateTime<Utc>>,
    level: &'a str,
    message: &'a str,
}

/// Split `[<timestamp> <LEVEL> <target>] <message>`
fn split_prefix(line: &str) -> Option<Prefix<'_>> {
    let rest = line.strip_prefix('[')?;
    let (header, message) = rest.split_once(']')?;
    let mut fields = header.split_whitespace();
    let timestamp = fields
        .next()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let level = fields.next().unwrap_or_default();
    Some(Prefix {
        timestamp,
        level,
        message: message.trim_start(),
    })
}

fn classify(line: &str) -> Line {
    let prefix = split_prefix(line);
    let message = prefix.as_ref().map_or(line, |p| p.message);

    if message.contains(BENCHMARK_END_MARKER) {
        return Line::End;
    }

    let timestamp = prefix.as_ref().and_then(|p| p.timestamp);
    let error_level = prefix.as_ref().is_some_and(|p| p.level == "ERROR");
    if error_level || line.contains(PANIC_TAG) {
        return Line::Event(timestamp, error(line, false));
    }

    let parsed = if let Some(at) = message.find(COMMIT_TAG) {
        parse_commit(&message[at + COMMIT_TAG.len()..])
    } else if let Some(at) = message.find(SAMPLE_TAG) {
        parse_sample(&message[at + SAMPLE_TAG.len()..])
    } else {
        return Line::Skip;
    };

    // Timing events are useless without a time
    match (timestamp, parsed) {
        (Some(t), Some(kind)) => Line::Event(Some(t), kind),
        (timestamp, _) => Line::Event(timestamp, error(line, true)),
    }
}

fn error(line: &str, malformed: bool) -> EventKind {
    EventKind::ErrorLogged {
        line: line.to_string(),
        malformed,
    }
}

/// `<round>(<digest>) -> <n> tx[ samples=<id>,<id>]`
fn parse_commit(fields: &str) -> Option<EventKind> {
    let (round, rest) = fields.split_once('(')?;
    let (digest, rest) = rest.split_once(')')?;
    let rest = rest.strip_prefix(COMMIT_COUNT_SEPARATOR)?;
    let (transactions, rest) = rest.split_once(" tx")?;
    let rest = rest.trim();

    let samples = if rest.is_empty() {
        Vec::new()
    } else {
        rest.strip_prefix(COMMIT_SAMPLES_TAG)?
            .split(',')
            .map(|id| id.trim().parse().ok())
            .collect::<Option<Vec<u64>>>()?
    };
    if digest.is_empty() {
        return None;
    }

    Some(EventKind::BlockCommitted {
        round: round.trim().parse().ok()?,
        digest: digest.to_string(),
        transactions: transactions.trim().parse().ok()?,
        samples,
    })
}

/// `<id> (<size> B)`
fn parse_sample(fields: &str) -> Option<EventKind> {
    let (id, rest) = fields.split_once(" (")?;
    let size = rest.trim_end().strip_suffix(" B)")?;
    Some(EventKind::TxSampled {
        sample_id: id.trim().parse().ok()?,
        size: size.trim().parse().ok()?,
    })
}
