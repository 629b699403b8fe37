// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::journal::{Journal, JournalOp};
use super::{LedgerError, LedgerResult};
use crate::types::{
    now_ms, BridgeEvent, Direction, FailureReason, ProcessedRecord, RecordStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Journals shorter than this are never compacted on open
const COMPACTION_MIN_LINES: u64 = 1024;
/// Compact when the journal holds this many lines per live entry
const COMPACTION_RATIO: u64 = 4;

struct Partition {
    direction: Direction,
    records: BTreeMap<u64, ProcessedRecord>,
    cursor: Option<u64>,
    journal: Journal,
}

impl Partition {
    fn open(dir: &Path, direction: Direction) -> LedgerResult<Self> {
        let path = dir.join(format!("{}.jsonl", direction.as_str()));
        let (journal, entries) = Journal::open(&path)?;
        let mut records = BTreeMap::new();
        let mut cursor = None;
        for entry in entries {
            match entry.op {
                JournalOp::Record(record) => {
                    records.insert(record.nonce, record);
                }
                JournalOp::Cursor(block) => cursor = Some(block),
            }
        }
        let mut partition = Partition {
            direction,
            records,
            cursor,
            journal,
        };
        if partition.needs_compaction() {
            partition.compact()?;
        }
        info!(
            "[{}] Ledger partition opened: records={}, cursor={:?}, journal={:?}",
            direction,
            partition.records.len(),
            partition.cursor,
            partition.journal.path()
        );
        Ok(partition)
    }

    fn live_entries(&self) -> u64 {
        self.records.len() as u64 + u64::from(self.cursor.is_some())
    }

    fn needs_compaction(&self) -> bool {
        let lines = self.journal.lines();
        lines > COMPACTION_MIN_LINES && lines > COMPACTION_RATIO * self.live_entries().max(1)
    }

    fn compact(&mut self) -> LedgerResult<()> {
        let before = self.journal.lines();
        let mut ops: Vec<JournalOp> = self
            .records
            .values()
            .cloned()
            .map(JournalOp::Record)
            .collect();
        if let Some(cursor) = self.cursor {
            ops.push(JournalOp::Cursor(cursor));
        }
        self.journal.rewrite(ops)?;
        info!(
            "[{}] Compacted ledger journal from {} to {} lines",
            self.direction,
            before,
            self.journal.lines()
        );
        Ok(())
    }

    /// Persist first, then apply, so memory never runs ahead of disk
    fn put(&mut self, record: ProcessedRecord) -> LedgerResult<ProcessedRecord> {
        self.journal.append(JournalOp::Record(record.clone()))?;
        self.records.insert(record.nonce, record.clone());
        Ok(record)
    }
}

/// Counts per status for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub confirmed: u64,
    pub failed: u64,
    /// Sum of amounts over confirmed transfer records
    pub confirmed_amount: u128,
    pub cursor: Option<u64>,
}

pub struct ProcessedEventLedger {
    lock_to_mint: Mutex<Partition>,
    burn_to_unlock: Mutex<Partition>,
    governance: Mutex<Partition>,
}

impl ProcessedEventLedger {
    /// Open (or create) the ledger under `dir`, replaying every partition journal.
    pub fn open(dir: impl AsRef<Path>) -> LedgerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            lock_to_mint: Mutex::new(Partition::open(&dir, Direction::LockToMint)?),
            burn_to_unlock: Mutex::new(Partition::open(&dir, Direction::BurnToUnlock)?),
            governance: Mutex::new(Partition::open(&dir, Direction::Governance)?),
        })
    }

    fn partition(&self, direction: Direction) -> &Mutex<Partition> {
        match direction {
            Direction::LockToMint => &self.lock_to_mint,
            Direction::BurnToUnlock => &self.burn_to_unlock,
            Direction::Governance => &self.governance,
        }
    }

    /// True when a terminal (confirmed or failed) record exists for the nonce
    pub async fn has_processed(&self, direction: Direction, nonce: u64) -> bool {
        let partition = self.partition(direction).lock().await;
        partition
            .records
            .get(&nonce)
            .is_some_and(ProcessedRecord::is_terminal)
    }

    /// Upsert a pending record for `event` and count one more dispatch attempt.
    pub async fn mark_pending(
        &self,
        direction: Direction,
        event: &BridgeEvent,
    ) -> LedgerResult<ProcessedRecord> {
        let nonce = event.nonce();
        let mut partition = self.partition(direction).lock().await;
        let record = match partition.records.get(&nonce) {
            Some(existing) if existing.status == RecordStatus::Confirmed => {
                return Err(LedgerError::AlreadyConfirmed { direction, nonce });
            }
            Some(existing) => ProcessedRecord {
                status: RecordStatus::Pending,
                attempts: existing.attempts.saturating_add(1),
                last_attempt_at_ms: now_ms(),
                failure: None,
                event: Some(event.clone()),
                ..existing.clone()
            },
            None => ProcessedRecord {
                direction,
                nonce,
                status: RecordStatus::Pending,
                attempts: 1,
                last_attempt_at_ms: now_ms(),
                failure: None,
                event: Some(event.clone()),
            },
        };
        debug!(
            "[{}] mark_pending nonce={} attempts={}",
            direction, nonce, record.attempts
        );
        partition.put(record)
    }

    /// Confirming an already confirmed record is a no-op.
    pub async fn mark_confirmed(&self, direction: Direction, nonce: u64) -> LedgerResult<()> {
        let mut partition = self.partition(direction).lock().await;
        let record = match partition.records.get(&nonce) {
            None => return Err(LedgerError::UnknownRecord { direction, nonce }),
            Some(existing) if existing.status == RecordStatus::Confirmed => return Ok(()),
            Some(existing) => ProcessedRecord {
                status: RecordStatus::Confirmed,
                failure: None,
                ..existing.clone()
            },
        };
        debug!("[{}] mark_confirmed nonce={}", direction, nonce);
        partition.put(record)?;
        Ok(())
    }

    /// Records a failure. Creates the record when the event could never be
    /// decoded far enough to mark it pending.
    pub async fn mark_failed(
        &self,
        direction: Direction,
        nonce: u64,
        reason: FailureReason,
    ) -> LedgerResult<()> {
        let mut partition = self.partition(direction).lock().await;
        let record = match partition.records.get(&nonce) {
            Some(existing) if existing.status == RecordStatus::Confirmed => {
                return Err(LedgerError::AlreadyConfirmed { direction, nonce });
            }
            Some(existing) => ProcessedRecord {
                status: RecordStatus::Failed,
                failure: Some(reason),
                ..existing.clone()
            },
            None => ProcessedRecord {
                direction,
                nonce,
                status: RecordStatus::Failed,
                attempts: 0,
                last_attempt_at_ms: now_ms(),
                failure: Some(reason),
                event: None,
            },
        };
        debug!(
            "[{}] mark_failed nonce={} reason={:?}",
            direction, nonce, record.failure
        );
        partition.put(record)?;
        Ok(())
    }

    /// Last scanned block, 0 when the direction never advanced.
    pub async fn get_cursor(&self, direction: Direction) -> u64 {
        self.cursor(direction).await.unwrap_or(0)
    }

    pub async fn cursor(&self, direction: Direction) -> Option<u64> {
        self.partition(direction).lock().await.cursor
    }

    pub async fn advance_cursor(&self, direction: Direction, block: u64) -> LedgerResult<()> {
        let mut partition = self.partition(direction).lock().await;
        match partition.cursor {
            Some(current) if block < current => {
                return Err(LedgerError::CursorRegression {
                    direction,
                    current,
                    requested: block,
                })
            }
            Some(current) if block == current => return Ok(()),
            _ => {}
        }
        partition.journal.append(JournalOp::Cursor(block))?;
        partition.cursor = Some(block);
        Ok(())
    }

    pub async fn get_record(&self, direction: Direction, nonce: u64) -> Option<ProcessedRecord> {
        self.partition(direction)
            .lock()
            .await
            .records
            .get(&nonce)
            .cloned()
    }

    /// Records in ascending nonce order
    pub async fn records_with_status(
        &self,
        direction: Direction,
        status: RecordStatus,
    ) -> Vec<ProcessedRecord> {
        self.partition(direction)
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect()
    }

    /// Pending records left by an interrupted run plus failed records whose
    /// failure is retryable
    pub async fn retry_candidates(&self, direction: Direction) -> Vec<ProcessedRecord> {
        self.partition(direction)
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.is_retry_candidate())
            .cloned()
            .collect()
    }

    pub async fn stats(&self, direction: Direction) -> LedgerStats {
        let partition = self.partition(direction).lock().await;
        let mut stats = LedgerStats {
            cursor: partition.cursor,
            ..Default::default()
        };
        for record in partition.records.values() {
            match record.status {
                RecordStatus::Pending => stats.pending += 1,
                RecordStatus::Failed => stats.failed += 1,
                RecordStatus::Confirmed => {
                    stats.confirmed += 1;
                    stats.confirmed_amount = stats
                        .confirmed_amount
                        .saturating_add(record.event.as_ref().map_or(0, |e| e.amount()));
                }
            }
        }
        stats
    }

    /// Move a failed record back to pending so the next sweep dispatches it again.
    /// Records without a stored event (malformed on observation) can only be
    /// recovered by re-verifying their block range.
    pub async fn requeue_failed(&self, direction: Direction, nonce: u64) -> LedgerResult<()> {
        let mut partition = self.partition(direction).lock().await;
        let record = match partition.records.get(&nonce) {
            None => return Err(LedgerError::UnknownRecord { direction, nonce }),
            Some(existing) if existing.status != RecordStatus::Failed => {
                return Err(LedgerError::NotFailed {
                    direction,
                    nonce,
                    status: existing.status,
                })
            }
            Some(existing) if existing.event.is_none() => {
                return Err(LedgerError::NotRetryable { direction, nonce })
            }
            Some(existing) => ProcessedRecord {
                status: RecordStatus::Pending,
                failure: None,
                ..existing.clone()
            },
        };
        info!("[{}] Requeued failed record nonce={}", direction, nonce);
        partition.put(record)?;
        Ok(())
    }

    /// Rewrite a partition journal to one line per live entry.
    pub async fn compact(&self, direction: Direction) -> LedgerResult<()> {
        self.partition(direction).lock().await.compact()
    }
}
