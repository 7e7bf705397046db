//! Background journal writer for deferred durability.

use crate::error::{CoreError, CoreResult};
use crate::persistence::journal::Journal;
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

enum Command {
    Write(Vec<u8>),
    Flush(Sender<()>),
    Shutdown,
}

/// Appends encoded batches to the journal on a dedicated thread.
///
/// The first failed append is sticky: later submissions and flushes
/// report it until [`clear_failure`](BackgroundWriter::clear_failure).
pub(crate) struct BackgroundWriter {
    sender: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl BackgroundWriter {
    /// Starts the writer thread.
    pub(crate) fn spawn(journal: Arc<Mutex<Journal>>) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let failure = Arc::new(Mutex::new(None));
        let thread_failure = Arc::clone(&failure);

        let handle = thread::Builder::new()
            .name("hearth-journal".to_string())
            .spawn(move || run(&journal, &receiver, &thread_failure))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            failure,
        })
    }

    /// Queues an encoded batch.
    pub(crate) fn submit(&self, bytes: Vec<u8>) -> CoreResult<()> {
        self.check()?;
        self.send(Command::Write(bytes))
    }

    /// Waits until every queued batch has been written.
    pub(crate) fn flush(&self) -> CoreResult<()> {
        let (done, wait) = mpsc::channel();
        self.send(Command::Flush(done))?;
        wait.recv()
            .map_err(|_| CoreError::persistence("journal writer stopped"))?;
        self.check()
    }

    /// Forgets a recorded failure.
    pub(crate) fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Drains the queue and stops the thread.
    pub(crate) fn shutdown(&self) -> CoreResult<()> {
        let drained = self.flush();
        if let Some(sender) = self.sender.lock().take() {
            let _ = sender.send(Command::Shutdown);
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                return Err(CoreError::persistence("journal writer panicked"));
            }
        }
        drained
    }

    fn send(&self, command: Command) -> CoreResult<()> {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| CoreError::persistence("journal writer stopped"))?;
        sender
            .send(command)
            .map_err(|_| CoreError::persistence("journal writer stopped"))
    }

    fn check(&self) -> CoreResult<()> {
        match self.failure.lock().as_ref() {
            Some(message) => Err(CoreError::persistence(message.clone())),
            None => Ok(()),
        }
    }
}

fn run(journal: &Mutex<Journal>, receiver: &Receiver<Command>, failure: &Mutex<Option<String>>) {
    for command in receiver {
        match command {
            Command::Write(bytes) => {
                // after a failure the journal is no longer a prefix of memory
                if failure.lock().is_some() {
                    continue;
                }
                if let Err(err) = journal.lock().append(&bytes) {
                    tracing::error!(error = %err, "deferred journal write failed");
                    *failure.lock() = Some(err.to_string());
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => break,
        }
    }
}

impl std::fmt::Debug for BackgroundWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundWriter")
            .field("failed", &self.failure.lock().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::journal::encode_batch;
    use crate::types::{SequenceNumber, TransactionId};
    use hearth_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};

    #[derive(Debug)]
    struct FailingBackend;

    impl StorageBackend for FailingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: 0,
            })
        }
        fn append(&mut self, _data: &[u8]) -> StorageResult<u64> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }
        fn flush(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn size(&self) -> StorageResult<u64> {
            Ok(0)
        }
        fn sync(&mut self) -> StorageResult<()> {
            Ok(())
        }
        fn truncate(&mut self, _new_size: u64) -> StorageResult<()> {
            Ok(())
        }
        fn replace(&mut self, _data: &[u8]) -> StorageResult<()> {
            Ok(())
        }
    }

    fn batch(n: u64) -> Vec<u8> {
        encode_batch(TransactionId::new(n), SequenceNumber::new(n), &[]).unwrap()
    }

    #[test]
    fn flush_waits_for_queued_writes() {
        let backend = InMemoryBackend::new();
        let handle = backend.share();
        let journal = Arc::new(Mutex::new(Journal::new(Box::new(backend))));
        let writer = BackgroundWriter::spawn(Arc::clone(&journal)).unwrap();

        for n in 1..=3 {
            writer.submit(batch(n)).unwrap();
        }
        writer.flush().unwrap();

        assert_eq!(journal.lock().load().unwrap().len(), 3);
        assert!(!handle.data().is_empty());
        writer.shutdown().unwrap();
    }

    #[test]
    fn failure_is_sticky_until_cleared() {
        let journal = Arc::new(Mutex::new(Journal::new(Box::new(FailingBackend))));
        let writer = BackgroundWriter::spawn(journal).unwrap();

        writer.submit(batch(1)).unwrap();
        let err = writer.flush().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Persistence);
        assert!(writer.submit(batch(2)).is_err());

        writer.clear_failure();
        assert!(writer.submit(batch(3)).is_ok());
        assert!(writer.shutdown().is_err());
    }

    #[test]
    fn shutdown_twice_is_harmless() {
        let journal = Arc::new(Mutex::new(Journal::new(Box::new(InMemoryBackend::new()))));
        let writer = BackgroundWriter::spawn(journal).unwrap();
        writer.shutdown().unwrap();
        assert!(writer.shutdown().is_err());
        assert!(writer.submit(batch(1)).is_err());
    }
}
