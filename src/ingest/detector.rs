//! Change detection against the previously known record set.
//!
//! Two strategies:
//! - `FullRescan` reads the whole file every time, so it sees edits and
//!   removals and converges the store to the file exactly.
//! - `IncrementalTail` reads only bytes appended since the last scan. It never
//!   produces deletions. A trailing line without a newline is left unconsumed
//!   until a later scan sees its terminator, so a line is never split across
//!   two reads.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;
use crate::models::{Delta, TelemetryRecord};

use super::parser::parse_lines;
use super::source::SourceFile;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum DetectorMode {
    #[default]
    FullRescan,
    IncrementalTail,
}

impl DetectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorMode::FullRescan => "fullRescan",
            DetectorMode::IncrementalTail => "incrementalTail",
        }
    }
}

#[derive(Debug)]
pub struct TailRead {
    pub delta: Delta,
    pub consumed: usize,
    pub lines: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    WholeFile,
    Offset(u64),
}

#[derive(Debug)]
pub struct ChangeDetector {
    mode: DetectorMode,
    cursor: Cursor,
    /// Position reached by the last `detect`, adopted by `commit` once the
    /// delta has been persisted.
    staged: Option<(Cursor, usize)>,
    /// Drops upserts whose values match the known record. Never hides a
    /// record that actually changed.
    suppress_unchanged: bool,
    /// Line number of the first unconsumed line, for diagnostics only.
    next_line_no: usize,
}

impl ChangeDetector {
    pub fn new(mode: DetectorMode, suppress_unchanged: bool) -> Self {
        let cursor = match mode {
            DetectorMode::FullRescan => Cursor::WholeFile,
            DetectorMode::IncrementalTail => Cursor::Offset(0),
        };
        Self {
            mode,
            cursor,
            staged: None,
            suppress_unchanged,
            next_line_no: 1,
        }
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Observes the source and returns the delta against `known`. In tail
    /// mode the new cursor is staged, not adopted: call [`commit`] after the
    /// delta is persisted, otherwise the same bytes are read again next scan.
    ///
    /// [`commit`]: ChangeDetector::commit
    pub async fn detect(
        &mut self,
        source: &SourceFile,
        known: &BTreeMap<i64, TelemetryRecord>,
    ) -> SyncResult<Delta> {
        self.staged = None;
        match self.cursor {
            Cursor::WholeFile => {
                let text = source.read_all().await?;
                Ok(self.diff_full(&text, known))
            }
            Cursor::Offset(offset) => {
                let size = source.size().await?;
                let (offset, first_line_no) = if size < offset {
                    log::info!(
                        "{} shrank from {offset} to {size} bytes; re-reading from the start",
                        source.path().display()
                    );
                    (0, 1)
                } else {
                    (offset, self.next_line_no)
                };

                if size == offset {
                    self.staged = Some((Cursor::Offset(offset), first_line_no));
                    return Ok(Delta::default());
                }

                let chunk = source.read_range(offset, size - offset).await?;
                let tail = self.diff_tail(&chunk, first_line_no, known);
                self.staged = Some((
                    Cursor::Offset(offset + tail.consumed as u64),
                    first_line_no + tail.lines,
                ));
                Ok(tail.delta)
            }
        }
    }

    /// Adopts the position staged by the last `detect`.
    pub fn commit(&mut self) {
        if let Some((cursor, next_line_no)) = self.staged.take() {
            self.cursor = cursor;
            self.next_line_no = next_line_no;
        }
    }

    /// Full-file diff. The snapshot keeps the last occurrence of each id.
    pub fn diff_full(&self, text: &str, known: &BTreeMap<i64, TelemetryRecord>) -> Delta {
        let batch = parse_lines(text, 1);
        let upserts = dedupe_last_wins(batch.records);
        let present: BTreeSet<i64> = upserts.iter().map(|record| record.id).collect();
        let deletions = known
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();

        Delta {
            upserts: self.filter_unchanged(upserts, known),
            deletions,
            retain: Some(present),
            malformed: batch.malformed,
        }
    }

    /// Parses the complete lines of `chunk`. Bytes after the last newline are
    /// not consumed and wait for the next scan.
    pub fn diff_tail(
        &self,
        chunk: &[u8],
        first_line_no: usize,
        known: &BTreeMap<i64, TelemetryRecord>,
    ) -> TailRead {
        let consumed = match chunk.iter().rposition(|byte| *byte == b'\n') {
            Some(last_newline) => last_newline + 1,
            None => 0,
        };

        let text = String::from_utf8_lossy(&chunk[..consumed]);
        let batch = parse_lines(&text, first_line_no);

        TailRead {
            delta: Delta {
                upserts: self.filter_unchanged(dedupe_last_wins(batch.records), known),
                deletions: BTreeSet::new(),
                retain: None,
                malformed: batch.malformed,
            },
            consumed,
            lines: text.matches('\n').count(),
        }
    }

    fn filter_unchanged(
        &self,
        upserts: Vec<TelemetryRecord>,
        known: &BTreeMap<i64, TelemetryRecord>,
    ) -> Vec<TelemetryRecord> {
        if !self.suppress_unchanged {
            return upserts;
        }
        upserts
            .into_iter()
            .filter(|record| {
                known
                    .get(&record.id)
                    .map_or(true, |previous| !previous.same_values(record))
            })
            .collect()
    }
}

/// Collapses repeated ids: the entry keeps the position of its first
/// occurrence and the values of its last.
fn dedupe_last_wins(records: Vec<TelemetryRecord>) -> Vec<TelemetryRecord> {
    let mut positions: HashMap<i64, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<TelemetryRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.id) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(record.id, unique.len());
                unique.push(record);
            }
        }
    }
    unique
}
