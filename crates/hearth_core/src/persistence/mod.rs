//! Durable storage for the committed state.
//!
//! Two backends hold everything:
//!
//! - the **journal**, an append-only log of committed batches
//! - the **snapshot**, the whole state as of some sequence number
//!
//! ## Journal Record Format
//!
//! ```text
//! | magic "HJNL" (4) | version (2) | type (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! A commit is written as `Begin`, one `Apply` per mutation, `Commit`, in a
//! single append. Only batches whose `Commit` is read back are replayed.
//!
//! ## Snapshot Format
//!
//! ```text
//! | magic "HSNP" (4) | version (2) | kind (1) | length (4) | CBOR payload (N) | crc32 (4) |
//! ```
//!
//! ## Invariants
//!
//! - In `Immediate` mode a batch is flushed before the commit returns
//! - Memory is updated only after the batch was accepted
//! - Recovery = snapshot + committed batches with a newer sequence
//! - A checkpoint writes the snapshot before it clears the journal
//! - A reset first writes an empty snapshot at the last sequence, so a
//!   crash at any point of it recovers to an empty store

mod background;
mod image;
mod journal;
mod record;

use crate::config::Durability;
use crate::error::CoreResult;
use crate::state::{Mutation, StoreState};
use crate::types::{SequenceNumber, TransactionId};
use background::BackgroundWriter;
use hearth_storage::StorageBackend;
use journal::{encode_batch, Journal};
use parking_lot::Mutex;
use std::sync::Arc;

/// State rebuilt from durable storage.
#[derive(Debug, Default)]
pub(crate) struct Recovered {
    pub(crate) state: StoreState,
    pub(crate) sequence: SequenceNumber,
    pub(crate) last_txid: TransactionId,
}

/// Binds the in-memory store to its journal and snapshot backends.
pub(crate) struct PersistenceAdapter {
    journal: Arc<Mutex<Journal>>,
    image: Mutex<Box<dyn StorageBackend>>,
    writer: Option<BackgroundWriter>,
    durability: Durability,
}

impl PersistenceAdapter {
    /// Creates an adapter. `Deferred` durability starts the writer thread.
    pub(crate) fn new(
        journal: Box<dyn StorageBackend>,
        image: Box<dyn StorageBackend>,
        durability: Durability,
    ) -> CoreResult<Self> {
        let journal = Arc::new(Mutex::new(Journal::new(journal)));
        let writer = match durability {
            Durability::Immediate => None,
            Durability::Deferred => Some(BackgroundWriter::spawn(Arc::clone(&journal))?),
        };
        Ok(Self {
            journal,
            image: Mutex::new(image),
            writer,
            durability,
        })
    }

    /// Creates an adapter over fresh in-memory backends.
    #[cfg(test)]
    pub(crate) fn in_memory() -> Self {
        use hearth_storage::InMemoryBackend;
        Self::new(
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
            Durability::Immediate,
        )
        .expect("immediate adapter")
    }

    /// Loads the snapshot and replays the journal on top of it.
    pub(crate) fn load(&self, default_log_size: usize) -> CoreResult<Recovered> {
        let image = image::decode(&self.image.lock().read_all()?)?;
        let mut recovered = match image {
            Some(image) => Recovered {
                state: image.state,
                sequence: image.sequence,
                last_txid: image.last_txid,
            },
            None => Recovered::default(),
        };

        let checkpoint = recovered.sequence;
        let mut replayed = 0usize;
        for batch in self.journal.lock().load()? {
            recovered.last_txid = recovered.last_txid.max(batch.txid);
            // already contained in the snapshot
            if batch.sequence <= checkpoint {
                continue;
            }
            for mutation in &batch.mutations {
                recovered.state.apply(mutation, default_log_size);
            }
            recovered.sequence = batch.sequence;
            replayed += 1;
        }

        tracing::info!(
            checkpoint = %checkpoint,
            sequence = %recovered.sequence,
            replayed,
            "store recovered"
        );
        Ok(recovered)
    }

    /// Makes a committed batch durable (or queues it, in deferred mode).
    pub(crate) fn record(
        &self,
        txid: TransactionId,
        sequence: SequenceNumber,
        batch: &[Mutation],
    ) -> CoreResult<()> {
        let bytes = encode_batch(txid, sequence, batch)?;
        match &self.writer {
            Some(writer) => writer.submit(bytes),
            None => self.journal.lock().append(&bytes),
        }
    }

    /// Writes a snapshot of `state` and clears the journal.
    pub(crate) fn checkpoint(
        &self,
        state: &StoreState,
        sequence: SequenceNumber,
        last_txid: TransactionId,
    ) -> CoreResult<()> {
        self.flush()?;
        let bytes = image::encode(state, sequence, last_txid)?;
        self.image.lock().replace(&bytes)?;
        self.journal.lock().clear()
    }

    /// Wipes the journal and the snapshot.
    ///
    /// `sequence` and `last_txid` must cover every journaled batch. An
    /// empty snapshot at that sequence is written first and hides the
    /// journal from recovery; then the journal is cleared and the
    /// snapshot emptied.
    pub(crate) fn reset(&self, sequence: SequenceNumber, last_txid: TransactionId) -> CoreResult<()> {
        if let Some(writer) = &self.writer {
            if let Err(err) = writer.flush() {
                tracing::warn!(error = %err, "discarding failed deferred writes on reset");
            }
            writer.clear_failure();
        }
        let tombstone = image::encode(&StoreState::default(), sequence, last_txid)?;
        let mut image = self.image.lock();
        image.replace(&tombstone)?;
        self.journal.lock().clear()?;
        image.replace(&[])?;
        Ok(())
    }

    /// Waits for queued writes and flushes the journal.
    pub(crate) fn flush(&self) -> CoreResult<()> {
        if let Some(writer) = &self.writer {
            writer.flush()?;
        }
        self.journal.lock().flush()
    }

    /// Flushes and stops the writer thread.
    pub(crate) fn shutdown(&self) -> CoreResult<()> {
        if let Some(writer) = &self.writer {
            writer.shutdown()?;
        }
        self.journal.lock().flush()
    }

    /// Returns the journal size in bytes.
    ///
    /// In deferred mode this lags behind queued batches.
    pub(crate) fn journal_size(&self) -> u64 {
        self.journal.lock().size().unwrap_or(0)
    }

    /// Returns the snapshot size in bytes.
    pub(crate) fn image_size(&self) -> u64 {
        self.image.lock().size().unwrap_or(0)
    }

    /// Returns the durability mode.
    pub(crate) fn durability(&self) -> Durability {
        self.durability
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("durability", &self.durability)
            .field("journal_size", &self.journal_size())
            .finish_non_exhaustive()
    }
}
