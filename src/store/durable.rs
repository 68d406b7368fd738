use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info, warn};

use super::error::{StoreError, StoreResult};
use super::keys::{decode_seq, encode_seq, log_key, seq_from_log_key, LAST_SEQ_KEY, LOG_END};
use super::{under_limit, SequencedStore};
use crate::cancel::CancelToken;
use crate::envelope::Envelope;
use crate::event::Event;

/// Envelope log plus the last-sequence marker.
const OUTBOX: TableDefinition<&str, &[u8]> = TableDefinition::new("outbox");
/// Sequences of envelopes that are still pending.
const PENDING: TableDefinition<u64, ()> = TableDefinition::new("pending");

/// redb-backed outbox store.
///
/// Cloning creates another handle to the same database. Every mutation runs
/// in a single redb write transaction, which redb serializes, so sequence
/// allocation is derived from the marker read inside that same transaction.
#[derive(Clone)]
pub struct DurableStore {
    db: Arc<Database>,
    last_seq: Arc<AtomicU64>,
    path: PathBuf,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("path", &self.path)
            .field("last_seq", &self.last_seq())
            .finish()
    }
}

impl DurableStore {
    /// Open (or create) the store file at `path` and load the last sequence.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path)?;
        let last_seq = Self::load_last_seq(&db)?;
        info!(path = %path.display(), last_seq, "opened outbox store");

        Ok(Self {
            db: Arc::new(db),
            last_seq: Arc::new(AtomicU64::new(last_seq)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates both tables on first open and reconciles the marker against
    /// the highest log key, so allocation never lands on an existing envelope.
    fn load_last_seq(db: &Database) -> StoreResult<u64> {
        let txn = db.begin_write()?;
        let last_seq = {
            let mut table = txn.open_table(OUTBOX)?;
            txn.open_table(PENDING)?;

            let marker = table
                .get(LAST_SEQ_KEY)?
                .map(|guard| decode_seq(guard.value()))
                .transpose()?
                .unwrap_or(0);

            let start = log_key(0);
            let highest = match table.range(start.as_str()..LOG_END)?.next_back() {
                Some(entry) => {
                    let (key, _) = entry?;
                    seq_from_log_key(key.value())?
                }
                None => 0,
            };

            if highest > marker {
                warn!(marker, highest, "last sequence marker behind log, reconciling");
                table.insert(LAST_SEQ_KEY, encode_seq(highest).as_slice())?;
            }
            marker.max(highest)
        };
        txn.commit()?;
        Ok(last_seq)
    }

    /// Commit `txn`, or abort it if `cancel` fired after its writes were staged.
    fn commit_unless_cancelled(txn: WriteTransaction, cancel: &CancelToken) -> StoreResult<()> {
        if cancel.is_cancelled() {
            txn.abort()?;
            return Err(StoreError::Cancelled);
        }
        txn.commit()?;
        Ok(())
    }

    fn scan_committed(&self, from: u64, limit: usize) -> StoreResult<Vec<Envelope>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(OUTBOX)?;
        let start = log_key(from);

        let mut out = Vec::new();
        for entry in table.range(start.as_str()..LOG_END)? {
            if !under_limit(out.len(), limit) {
                break;
            }
            let (_, value) = entry?;
            let envelope = Envelope::from_record(value.value())?;
            if envelope.committed {
                out.push(envelope);
            }
        }
        Ok(out)
    }
}

impl SequencedStore for DurableStore {
    fn append_pending(&self, event: &Event, cancel: &CancelToken) -> StoreResult<u64> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        // Dropping an uncommitted write transaction aborts it.
        let txn = self.db.begin_write()?;
        let seq = {
            let mut log = txn.open_table(OUTBOX)?;
            let mut pending = txn.open_table(PENDING)?;

            let last = log
                .get(LAST_SEQ_KEY)?
                .map(|guard| decode_seq(guard.value()))
                .transpose()?
                .unwrap_or(0);
            let seq = last
                .checked_add(1)
                .ok_or_else(|| StoreError::Corrupt("sequence space exhausted".into()))?;

            let record = Envelope::pending(seq, event.clone()).to_record()?;
            log.insert(log_key(seq).as_str(), record.as_slice())?;
            log.insert(LAST_SEQ_KEY, encode_seq(seq).as_slice())?;
            pending.insert(seq, ())?;
            seq
        };

        Self::commit_unless_cancelled(txn, cancel)?;

        self.last_seq.fetch_max(seq, Ordering::SeqCst);
        debug!(seq, event_type = %event.event_type, "appended pending envelope");
        Ok(seq)
    }

    fn mark_committed(&self, seq: u64, cancel: &CancelToken) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let key = log_key(seq);
        let txn = self.db.begin_write()?;
        let changed = {
            let mut log = txn.open_table(OUTBOX)?;
            let mut pending = txn.open_table(PENDING)?;

            let mut envelope = match log.get(key.as_str())? {
                Some(guard) => Envelope::from_record(guard.value())?,
                None => return Err(StoreError::NotFound(seq)),
            };

            if envelope.committed {
                false
            } else {
                envelope.committed = true;
                log.insert(key.as_str(), envelope.to_record()?.as_slice())?;
                pending.remove(seq)?;
                true
            }
        };

        if !changed {
            txn.abort()?;
            return Ok(());
        }
        Self::commit_unless_cancelled(txn, cancel)?;

        debug!(seq, "marked envelope committed");
        Ok(())
    }

    fn read_pending(&self, limit: usize) -> StoreResult<Vec<Envelope>> {
        let txn = self.db.begin_read()?;
        let log = txn.open_table(OUTBOX)?;
        let pending = txn.open_table(PENDING)?;

        let mut out = Vec::new();
        for entry in pending.iter()? {
            if !under_limit(out.len(), limit) {
                break;
            }
            let (seq, _) = entry?;
            let seq = seq.value();
            let envelope = match log.get(log_key(seq).as_str())? {
                Some(guard) => Envelope::from_record(guard.value())?,
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "pending index references missing envelope {}",
                        seq
                    )))
                }
            };
            out.push(envelope);
        }
        Ok(out)
    }

    fn read_committed(&self, since: u64, limit: usize) -> StoreResult<Vec<Envelope>> {
        match since.checked_add(1) {
            Some(from) => self.scan_committed(from, limit),
            None => Ok(Vec::new()),
        }
    }

    fn last_seq(&self) -> u64 {
        self.last_seq.load(Ordering::SeqCst)
    }
}
