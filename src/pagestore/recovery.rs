//! Block Log Recovery
//!
//! Rebuilds the catalog from the block log at startup.
//!
//! ## Phases
//! ```text
//! Scan ──▶ Reconcile ──▶ Rebuild ──▶ Ready
//! ```
//! - **Scan**: read frames in order, remembering a summary of each (no block
//!   data is kept). Corrupt frames and damaged ranges are counted and
//!   skipped; a tail with no valid frame after it ends the scan.
//! - **Reconcile**: group block frames by `(file_id, seq)`. A group is
//!   committed only if every part `0..parts` is present exactly once and
//!   every frame and block checksum verified.
//! - **Rebuild**: replay frames in log order, applying creates, deletes,
//!   resizes and the blocks of committed groups.
//! - **Ready**: the recovered state can be handed to the namespace.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::catalog::{BlockRef, CatalogCheckpoint, FileEntry};
use crate::error::{NativeIoError, Result};

use super::reader::{LogReader, ScanItem};
use super::record::{FramePointer, LogHeader, LogRecord};

/// Where the scanner is in its state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Scan,
    Reconcile,
    Rebuild,
    Ready,
}

/// Result of a recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Intact frames read
    pub frames_scanned: u64,

    /// Damaged frames or byte ranges skipped
    pub frames_corrupted: u64,

    /// Writes (block groups) found complete and applied
    pub writes_committed: u64,

    /// Writes discarded as incomplete or corrupt
    pub writes_discarded: u64,

    /// Files present after recovery
    pub files_recovered: u64,

    /// Highest valid LSN seen (0 if none)
    pub last_lsn: u64,

    /// Whether a torn tail was found past the last complete frame
    pub was_truncated: bool,

    /// Whether the scan started from a checkpoint instead of the log head
    pub from_checkpoint: bool,
}

/// Catalog state rebuilt from the log
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// Header of the scanned log
    pub header: Option<LogHeader>,

    /// Live files, in name order
    pub files: Vec<FileEntry>,

    pub next_file_id: u64,

    pub next_lsn: u64,

    /// Offset just past the last complete frame
    pub end_offset: u64,

    /// Log bytes referenced by live blocks
    pub live_bytes: u64,
}

// =============================================================================
// Scan Summaries
// =============================================================================

/// What recovery remembers about one intact frame
#[derive(Debug, Clone)]
enum FrameSummary {
    Create {
        file_id: u64,
        name: String,
    },
    Block {
        file_id: u64,
        seq: u64,
        part: u32,
        parts: u32,
        block_index: u64,
        file_len: u64,
        data_len: u32,
        intact: bool,
    },
    SetLength {
        file_id: u64,
        seq: u64,
        length: u64,
    },
    Delete {
        file_id: u64,
    },
}

#[derive(Debug)]
struct ScannedFrame {
    pointer: FramePointer,
    summary: FrameSummary,
}

/// Parts of one write seen so far
#[derive(Debug)]
struct WriteGroup {
    parts: u32,
    seen: Vec<bool>,
    consistent: bool,
    intact: bool,
}

impl WriteGroup {
    fn new(parts: u32) -> Self {
        Self {
            parts,
            seen: vec![false; parts as usize],
            consistent: parts > 0,
            intact: true,
        }
    }

    fn record(&mut self, part: u32, parts: u32, intact: bool) {
        self.intact &= intact;
        if parts != self.parts || part >= self.parts {
            self.consistent = false;
            return;
        }
        let slot = &mut self.seen[part as usize];
        if *slot {
            self.consistent = false;
        }
        *slot = true;
    }

    fn is_committed(&self) -> bool {
        self.consistent && self.intact && self.seen.iter().all(|s| *s)
    }
}

// =============================================================================
// Scanner
// =============================================================================

/// Handles recovery of the catalog from the block log
pub struct RecoveryScanner {
    path: PathBuf,
    phase: RecoveryPhase,
    checkpoint: Option<CatalogCheckpoint>,
    frames: Vec<ScannedFrame>,
    groups: HashMap<(u64, u64), WriteGroup>,
    state: RecoveredState,
    report: RecoveryReport,
}

impl RecoveryScanner {
    /// Prepare to recover the log at `path`, optionally seeded by a
    /// checkpoint (ignored unless it belongs to this log)
    pub fn new(path: &Path, checkpoint: Option<CatalogCheckpoint>) -> Self {
        Self {
            path: path.to_path_buf(),
            phase: RecoveryPhase::Scan,
            checkpoint,
            frames: Vec::new(),
            groups: HashMap::new(),
            state: RecoveredState::default(),
            report: RecoveryReport::default(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    /// Run the current phase and move to the next
    pub fn step(&mut self) -> Result<RecoveryPhase> {
        self.phase = match self.phase {
            RecoveryPhase::Scan => {
                self.scan()?;
                RecoveryPhase::Reconcile
            }
            RecoveryPhase::Reconcile => {
                self.reconcile();
                RecoveryPhase::Rebuild
            }
            RecoveryPhase::Rebuild => {
                self.rebuild()?;
                RecoveryPhase::Ready
            }
            RecoveryPhase::Ready => RecoveryPhase::Ready,
        };
        Ok(self.phase)
    }

    /// Drive the state machine to Ready and hand over the result
    pub fn run(mut self) -> Result<(RecoveredState, RecoveryReport)> {
        while self.phase != RecoveryPhase::Ready {
            self.step()?;
        }
        Ok((self.state, self.report))
    }

    /// Check a log's integrity without a checkpoint and without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryReport> {
        let (_, report) = Self::new(path, None).run()?;
        Ok(report)
    }

    // =========================================================================
    // Scan
    // =========================================================================

    fn scan(&mut self) -> Result<()> {
        let mut reader = LogReader::open(&self.path)?;
        let header = reader.header();
        self.state.header = Some(header);
        self.state.next_lsn = 1;
        self.state.next_file_id = 1;

        if let Some(checkpoint) = self.checkpoint.take() {
            if checkpoint.log_id == header.log_id && checkpoint.covered_offset <= reader.file_len()
            {
                reader.seek(checkpoint.covered_offset)?;
                self.state.next_lsn = checkpoint.next_lsn;
                self.state.next_file_id = checkpoint.next_file_id;
                self.state.files = checkpoint.files;
                self.report.from_checkpoint = true;
            } else {
                tracing::warn!(
                    "Ignoring checkpoint for log {} (current log {})",
                    checkpoint.log_id,
                    header.log_id
                );
            }
        }

        loop {
            match reader.next_frame()? {
                ScanItem::Frame { pointer, frame } => {
                    self.report.frames_scanned += 1;
                    self.report.last_lsn = self.report.last_lsn.max(frame.lsn);
                    let summary = match frame.record {
                        LogRecord::Create { file_id, name } => FrameSummary::Create { file_id, name },
                        LogRecord::Block(block) => FrameSummary::Block {
                            file_id: block.file_id,
                            seq: block.seq,
                            part: block.part,
                            parts: block.parts,
                            block_index: block.block_index,
                            file_len: block.file_len,
                            data_len: block.data.len() as u32,
                            intact: block.verify(),
                        },
                        LogRecord::SetLength {
                            file_id,
                            seq,
                            length,
                        } => FrameSummary::SetLength {
                            file_id,
                            seq,
                            length,
                        },
                        LogRecord::Delete { file_id } => FrameSummary::Delete { file_id },
                    };
                    self.frames.push(ScannedFrame { pointer, summary });
                }
                ScanItem::Corrupt { pointer } => {
                    // The LSN of a damaged frame is not trusted
                    tracing::warn!(
                        "Skipping corrupt frame at offset {} ({} bytes)",
                        pointer.offset,
                        pointer.len
                    );
                    self.report.frames_corrupted += 1;
                }
                ScanItem::Torn { offset } => {
                    self.state.end_offset = offset;
                    self.report.was_truncated = true;
                    break;
                }
                ScanItem::End => {
                    self.state.end_offset = reader.position();
                    break;
                }
            }
        }

        self.state.next_lsn = self.state.next_lsn.max(self.report.last_lsn + 1);
        Ok(())
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    fn reconcile(&mut self) {
        for frame in &self.frames {
            if let FrameSummary::Block {
                file_id,
                seq,
                part,
                parts,
                intact,
                ..
            } = frame.summary
            {
                self.groups
                    .entry((file_id, seq))
                    .or_insert_with(|| WriteGroup::new(parts))
                    .record(part, parts, intact);
            }
        }

        let discarded = self.groups.values().filter(|g| !g.is_committed()).count() as u64;
        if discarded > 0 {
            tracing::warn!("Discarding {} incomplete or corrupt write(s)", discarded);
        }
        self.report.writes_discarded = discarded;
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    fn rebuild(&mut self) -> Result<()> {
        let block_size = self
            .state
            .header
            .map(|h| h.block_size as u64)
            .ok_or_else(|| NativeIoError::Corruption("rebuild before scan".to_string()))?;

        let mut files: HashMap<u64, FileEntry> = std::mem::take(&mut self.state.files)
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();
        let mut names: HashMap<String, u64> =
            files.values().map(|e| (e.name.clone(), e.id)).collect();
        let mut max_file_id = 0u64;
        let mut applied: HashSet<(u64, u64)> = HashSet::new();

        for frame in self.frames.drain(..) {
            match frame.summary {
                FrameSummary::Create { file_id, name } => {
                    max_file_id = max_file_id.max(file_id);
                    if let Some(previous) = names.insert(name.clone(), file_id) {
                        tracing::warn!(
                            "File {:?} recreated as id {} while id {} was live",
                            name,
                            file_id,
                            previous
                        );
                        files.remove(&previous);
                    }
                    files.insert(file_id, FileEntry::new(file_id, name));
                }
                FrameSummary::Block {
                    file_id,
                    seq,
                    block_index,
                    file_len,
                    data_len,
                    ..
                } => {
                    max_file_id = max_file_id.max(file_id);
                    let Some(entry) = files.get_mut(&file_id) else {
                        continue;
                    };
                    entry.observe_seq(seq);

                    let committed = self
                        .groups
                        .get(&(file_id, seq))
                        .map(|g| g.is_committed())
                        .unwrap_or(false);
                    if !committed || seq < entry.seq {
                        continue;
                    }

                    let block = BlockRef {
                        frame: frame.pointer,
                        len: data_len,
                    };
                    entry.apply_block(seq, block_index, file_len, block);
                    applied.insert((file_id, seq));
                }
                FrameSummary::SetLength {
                    file_id,
                    seq,
                    length,
                } => {
                    max_file_id = max_file_id.max(file_id);
                    if let Some(entry) = files.get_mut(&file_id) {
                        entry.observe_seq(seq);
                        if seq > entry.seq {
                            entry.apply_length(seq, length, block_size);
                        }
                    }
                }
                FrameSummary::Delete { file_id } => {
                    max_file_id = max_file_id.max(file_id);
                    if let Some(entry) = files.remove(&file_id) {
                        names.remove(&entry.name);
                    }
                }
            }
        }

        let by_name: BTreeMap<String, FileEntry> = files
            .into_values()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        self.report.writes_committed = applied.len() as u64;
        self.report.files_recovered = by_name.len() as u64;
        self.state.next_file_id = self.state.next_file_id.max(max_file_id + 1);
        self.state.live_bytes = by_name.values().map(|e| e.live_frame_bytes()).sum();
        self.state.files = by_name.into_values().collect();
        self.groups.clear();

        tracing::debug!(
            "Rebuilt {} file(s) from {} frame(s)",
            self.report.files_recovered,
            self.report.frames_scanned
        );
        Ok(())
    }
}
