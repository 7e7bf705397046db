//! Append-only journal of committed batches.
//!
//! ## Recovery Policy
//!
//! ### Tolerated (treated as a clean end of journal)
//!
//! - A truncated header or payload at the tail
//! - A batch whose `Commit` record never made it to storage
//!
//! Both are what a crash mid-write leaves behind. The tail is cut back to
//! the end of the last committed batch so later appends start clean.
//!
//! ### Fatal (open fails)
//!
//! - CRC mismatch
//! - Invalid magic, unknown record type or a future format version
//! - Records that break batch structure (an `Apply` outside its batch)
//!
//! These mean the bytes were damaged after they were written. No repair
//! is attempted.

use crate::error::{CoreError, CoreResult};
use crate::persistence::record::{
    unseal, JournalRecord, RecordType, Unsealed, JOURNAL_MAGIC, JOURNAL_VERSION,
};
use crate::state::Mutation;
use crate::types::{SequenceNumber, TransactionId};
use hearth_storage::StorageBackend;

/// A batch read back from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBatch {
    /// Transaction that produced the batch.
    pub txid: TransactionId,
    /// Sequence number of the commit.
    pub sequence: SequenceNumber,
    /// The mutations, in order.
    pub mutations: Vec<Mutation>,
}

/// Encodes a committed batch as `Begin`, one `Apply` per mutation, `Commit`.
pub fn encode_batch(
    txid: TransactionId,
    sequence: SequenceNumber,
    mutations: &[Mutation],
) -> CoreResult<Vec<u8>> {
    let mut bytes = JournalRecord::Begin { txid }.encode()?;
    for mutation in mutations {
        bytes.extend(
            JournalRecord::Apply {
                txid,
                mutation: mutation.clone(),
            }
            .encode()?,
        );
    }
    bytes.extend(JournalRecord::Commit { txid, sequence }.encode()?);
    Ok(bytes)
}

/// The journal over a storage backend.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
}

impl Journal {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Appends an encoded batch and flushes it.
    ///
    /// The batch goes to the backend in a single append. If that fails the
    /// journal is cut back to its previous length.
    pub fn append(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let before = self.backend.size()?;
        let written = self
            .backend
            .append(bytes)
            .and_then(|_| self.backend.flush());
        if let Err(err) = written {
            if let Err(undo) = self.backend.truncate(before) {
                tracing::error!(error = %undo, "could not cut back partial journal write");
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Returns the journal size in bytes.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Flushes pending writes.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Removes every record.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.backend.truncate(0)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Reads every committed batch, oldest first.
    ///
    /// Cuts off a torn or uncommitted tail.
    pub fn load(&mut self) -> CoreResult<Vec<CommittedBatch>> {
        let data = self.backend.read_all()?;
        let mut batches = Vec::new();
        let mut open: Option<(TransactionId, Vec<Mutation>)> = None;
        let mut offset = 0usize;
        let mut committed_end = 0usize;

        while offset < data.len() {
            let (kind, payload, len) =
                match unseal(JOURNAL_MAGIC, JOURNAL_VERSION, &data[offset..]) {
                    Ok(Unsealed::Record { kind, payload, len }) => (kind, payload, len),
                    Ok(Unsealed::Truncated) => break,
                    Err(err) => return Err(at_offset(err, offset)),
                };
            let record_type = RecordType::from_byte(kind).ok_or_else(|| {
                CoreError::journal_corruption(format!(
                    "unknown record type {kind} at offset {offset}"
                ))
            })?;
            let record =
                JournalRecord::decode(record_type, payload).map_err(|e| at_offset(e, offset))?;
            offset += len;

            match record {
                JournalRecord::Begin { txid } => {
                    if let Some((abandoned, _)) = open.take() {
                        tracing::warn!(txid = %abandoned, "discarding uncommitted journal batch");
                    }
                    open = Some((txid, Vec::new()));
                }
                JournalRecord::Apply { txid, mutation } => match open.as_mut() {
                    Some((current, mutations)) if *current == txid => mutations.push(mutation),
                    _ => {
                        return Err(CoreError::journal_corruption(format!(
                            "mutation for {txid} outside its batch"
                        )))
                    }
                },
                JournalRecord::Commit { txid, sequence } => match open.take() {
                    Some((current, mutations)) if current == txid => {
                        batches.push(CommittedBatch {
                            txid,
                            sequence,
                            mutations,
                        });
                        committed_end = offset;
                    }
                    _ => {
                        return Err(CoreError::journal_corruption(format!(
                            "commit for {txid} without a matching begin"
                        )))
                    }
                },
            }
        }

        if committed_end < data.len() {
            tracing::warn!(
                valid = committed_end,
                size = data.len(),
                "journal has an incomplete tail; truncating"
            );
            self.backend.truncate(committed_end as u64)?;
        }

        Ok(batches)
    }
}

fn at_offset(err: CoreError, offset: usize) -> CoreError {
    match err {
        CoreError::JournalCorruption { message } => {
            CoreError::journal_corruption(format!("{message} at offset {offset}"))
        }
        other => other,
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("size", &self.backend.size().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Document;
    use hearth_storage::InMemoryBackend;
    use serde_json::json;

    fn put(id: &str) -> Mutation {
        Mutation::Put {
            collection: "parts".into(),
            document: Document::from_value(json!({ "id": id })).unwrap(),
        }
    }

    fn batch(txid: u64, seq: u64, ids: &[&str]) -> Vec<u8> {
        let mutations: Vec<Mutation> = ids.iter().map(|id| put(id)).collect();
        encode_batch(TransactionId::new(txid), SequenceNumber::new(seq), &mutations).unwrap()
    }

    #[test]
    fn append_and_load() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.append(&batch(1, 1, &["a", "b"])).unwrap();
        journal.append(&batch(2, 2, &["c"])).unwrap();

        let batches = journal.load().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].mutations.len(), 2);
        assert_eq!(batches[1].sequence, SequenceNumber::new(2));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let backend = InMemoryBackend::new();
        let handle = backend.share();
        let mut journal = Journal::new(Box::new(backend));

        journal.append(&batch(1, 1, &["a"])).unwrap();
        let good_len = handle.data().len();

        let second = batch(2, 2, &["b"]);
        journal.append(&second[..second.len() - 3]).unwrap();

        let batches = journal.load().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(handle.data().len(), good_len);
    }

    #[test]
    fn batch_without_commit_is_dropped() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.append(&batch(1, 1, &["a"])).unwrap();

        let mut uncommitted = JournalRecord::Begin {
            txid: TransactionId::new(2),
        }
        .encode()
        .unwrap();
        uncommitted.extend(
            JournalRecord::Apply {
                txid: TransactionId::new(2),
                mutation: put("b"),
            }
            .encode()
            .unwrap(),
        );
        journal.append(&uncommitted).unwrap();

        let batches = journal.load().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].txid, TransactionId::new(1));
    }

    #[test]
    fn corruption_is_fatal() {
        let backend = InMemoryBackend::new();
        let handle = backend.share();
        let mut journal = Journal::new(Box::new(backend));
        journal.append(&batch(1, 1, &["a"])).unwrap();
        journal.append(&batch(2, 2, &["b"])).unwrap();

        let mut bytes = handle.data();
        bytes[crate::persistence::record::HEADER_SIZE] ^= 0xFF;
        let mut damaged = Journal::new(Box::new(InMemoryBackend::with_data(bytes)));

        let err = damaged.load().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Persistence);
    }

    proptest::proptest! {
        #[test]
        fn any_cut_keeps_the_batches_before_it(
            sizes in proptest::collection::vec(1usize..4, 1..6),
            cut in proptest::prelude::any::<proptest::sample::Index>(),
        ) {
            let mut bytes = Vec::new();
            let mut ends = Vec::new();
            for (n, size) in sizes.iter().enumerate() {
                let ids: Vec<String> = (0..*size).map(|i| format!("{n}-{i}")).collect();
                let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
                bytes.extend(batch(n as u64 + 1, n as u64 + 1, &ids));
                ends.push(bytes.len());
            }
            let cut = cut.index(bytes.len() + 1);

            let mut journal = Journal::new(Box::new(InMemoryBackend::with_data(bytes[..cut].to_vec())));
            let batches = journal.load().unwrap();

            let expected = ends.iter().filter(|end| **end <= cut).count();
            proptest::prop_assert_eq!(batches.len(), expected);
            let kept = expected.checked_sub(1).map_or(0, |i| ends[i]);
            proptest::prop_assert_eq!(journal.size().unwrap(), kept as u64);
        }
    }

    #[test]
    fn clear_empties_journal() {
        let mut journal = Journal::new(Box::new(InMemoryBackend::new()));
        journal.append(&batch(1, 1, &["a"])).unwrap();
        journal.clear().unwrap();
        assert_eq!(journal.size().unwrap(), 0);
        assert!(journal.load().unwrap().is_empty());
    }
}
