//! Checkpoint snapshots of the committed state.

use crate::error::{CoreError, CoreResult};
use crate::persistence::record::{from_cbor, seal, to_cbor, unseal, Unsealed};
use crate::state::StoreState;
use crate::types::{SequenceNumber, TransactionId};
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a snapshot.
pub const IMAGE_MAGIC: [u8; 4] = *b"HSNP";

/// Current snapshot format version.
pub const IMAGE_VERSION: u16 = 1;

const IMAGE_KIND: u8 = 1;

#[derive(Serialize)]
struct ImageRef<'a> {
    sequence: SequenceNumber,
    last_txid: TransactionId,
    state: &'a StoreState,
}

/// A decoded snapshot.
#[derive(Debug, Deserialize)]
pub(crate) struct StoreImage {
    pub(crate) sequence: SequenceNumber,
    pub(crate) last_txid: TransactionId,
    pub(crate) state: StoreState,
}

/// Encodes the state as of `sequence`.
pub(crate) fn encode(
    state: &StoreState,
    sequence: SequenceNumber,
    last_txid: TransactionId,
) -> CoreResult<Vec<u8>> {
    let payload = to_cbor(&ImageRef {
        sequence,
        last_txid,
        state,
    })?;
    seal(IMAGE_MAGIC, IMAGE_VERSION, IMAGE_KIND, &payload)
}

/// Decodes a snapshot. Empty storage means no checkpoint was written.
///
/// Snapshots are replaced atomically, so unlike the journal a short
/// snapshot is corruption, not a torn write.
pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Option<StoreImage>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    match unseal(IMAGE_MAGIC, IMAGE_VERSION, bytes).map_err(invalid)? {
        Unsealed::Record { kind, payload, len } => {
            if kind != IMAGE_KIND || len != bytes.len() {
                return Err(CoreError::invalid_format(
                    "snapshot has unexpected kind or trailing bytes",
                ));
            }
            Ok(Some(from_cbor(payload).map_err(invalid)?))
        }
        Unsealed::Truncated => Err(CoreError::invalid_format("snapshot is truncated")),
    }
}

fn invalid(err: CoreError) -> CoreError {
    match err {
        CoreError::ChecksumMismatch { .. } => err,
        other => CoreError::invalid_format(format!("snapshot: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Document;
    use crate::state::Mutation;
    use serde_json::json;

    fn sample_state() -> StoreState {
        let mut state = StoreState::default();
        state.apply(
            &Mutation::Put {
                collection: "parts".into(),
                document: Document::from_value(json!({"id": "p1", "name": "Ada"})).unwrap(),
            },
            10,
        );
        state.apply(
            &Mutation::Append {
                log: "ledger".into(),
                event: json!({"amount": -3}),
            },
            10,
        );
        state
    }

    #[test]
    fn snapshot_restores_state() {
        let state = sample_state();
        let bytes = encode(&state, SequenceNumber::new(7), TransactionId::new(9)).unwrap();
        assert_eq!(&bytes[0..4], b"HSNP");

        let image = decode(&bytes).unwrap().unwrap();
        assert_eq!(image.sequence, SequenceNumber::new(7));
        assert_eq!(image.last_txid, TransactionId::new(9));
        assert_eq!(image.state, state);
    }

    #[test]
    fn empty_means_no_snapshot() {
        assert!(decode(&[]).unwrap().is_none());
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let bytes = encode(&sample_state(), SequenceNumber::new(1), TransactionId::new(1)).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidFormat { .. }));
    }
}
