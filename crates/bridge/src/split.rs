//! Split envelopes and the persisted checkpoint record.
//!
//! An envelope is encoded as a version byte followed by the MessagePack
//! encoding of the connector split, with struct fields by name:
//!
//! ```text
//! ┌─────────┬──────────────────────────────┐
//! │ version │ rmp_serde::to_vec_named(S)   │
//! └─────────┴──────────────────────────────┘
//! ```
//!
//! The encoding is deterministic, so decoding and re-encoding an envelope
//! reproduces its bytes exactly.

use crate::error::SplitCodecError;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use splitbridge_connectorlib::SourceSplit;
use splitbridge_types::CheckpointId;

/// Current envelope format version.
pub const SPLIT_ENVELOPE_VERSION: u8 = 1;

/// Engine-level wrapper around a connector split.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DelegateSourceSplit<S> {
    split: S,
}

impl<S> DelegateSourceSplit<S>
where
    S: SourceSplit,
{
    pub fn new(split: S) -> Self {
        Self { split }
    }

    pub fn split_id(&self) -> String {
        self.split.split_id()
    }

    pub fn inner(&self) -> &S {
        &self.split
    }

    pub fn into_inner(self) -> S {
        self.split
    }
}

/// Encodes and decodes [`DelegateSourceSplit`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct SplitEnvelopeSerializer;

impl SplitEnvelopeSerializer {
    pub fn version(&self) -> u8 {
        SPLIT_ENVELOPE_VERSION
    }

    pub fn serialize<S>(&self, split: &DelegateSourceSplit<S>) -> Result<Vec<u8>, SplitCodecError>
    where
        S: SourceSplit,
    {
        let mut bytes = vec![SPLIT_ENVELOPE_VERSION];
        rmp_serde::encode::write_named(&mut bytes, split)?;
        Ok(bytes)
    }

    pub fn deserialize<S>(&self, bytes: &[u8]) -> Result<DelegateSourceSplit<S>, SplitCodecError>
    where
        S: SourceSplit,
    {
        let (&version, payload) = bytes.split_first().ok_or(SplitCodecError::Empty)?;
        if version != SPLIT_ENVELOPE_VERSION {
            return Err(SplitCodecError::UnsupportedVersion {
                version,
                expected: SPLIT_ENVELOPE_VERSION,
            });
        }
        Ok(rmp_serde::from_slice(payload)?)
    }
}

/// Persisted state of one reader instance at a checkpoint: the encoded
/// envelopes returned by `snapshot_state`, in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderCheckpoint {
    pub checkpoint_id: CheckpointId,
    pub task_index: usize,
    pub splits: Vec<ByteBuf>,
}

impl ReaderCheckpoint {
    pub fn new(checkpoint_id: CheckpointId, task_index: usize, splits: Vec<Vec<u8>>) -> Self {
        Self {
            checkpoint_id,
            task_index,
            splits: splits.into_iter().map(ByteBuf::from).collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SplitCodecError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SplitCodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod test {
    use super::{DelegateSourceSplit, ReaderCheckpoint, SplitEnvelopeSerializer};
    use crate::connectors::FileSplit;
    use crate::error::SplitCodecError;
    use crate::test::MockSplit;
    use serde_json::json;

    #[test]
    fn envelope_round_trips_byte_for_byte() {
        let serializer = SplitEnvelopeSerializer;
        let split = DelegateSourceSplit::new(MockSplit::new(
            "p-0",
            vec![json!({"id": 1}), json!({"id": 2})],
        ));

        let bytes = serializer.serialize(&split).unwrap();
        assert_eq!(bytes[0], serializer.version());

        let decoded = serializer.deserialize::<MockSplit>(&bytes).unwrap();
        assert_eq!(decoded, split);
        assert_eq!(serializer.serialize(&decoded).unwrap(), bytes);
    }

    #[test]
    fn file_split_offset_survives_encoding() {
        let serializer = SplitEnvelopeSerializer;
        let split = DelegateSourceSplit::new(FileSplit::new("/data/orders.jsonl").with_offset(100));
        let bytes = serializer.serialize(&split).unwrap();
        let decoded = serializer.deserialize::<FileSplit>(&bytes).unwrap();
        assert_eq!(decoded.inner().offset, 100);
        assert_eq!(decoded.split_id(), "/data/orders.jsonl");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let serializer = SplitEnvelopeSerializer;
        let mut bytes = serializer
            .serialize(&DelegateSourceSplit::new(MockSplit::new("p-0", vec![])))
            .unwrap();
        bytes[0] = 7;
        assert!(matches!(
            serializer.deserialize::<MockSplit>(&bytes),
            Err(SplitCodecError::UnsupportedVersion {
                version: 7,
                expected: 1
            })
        ));
        assert!(matches!(
            serializer.deserialize::<MockSplit>(&[]),
            Err(SplitCodecError::Empty)
        ));
    }

    #[test]
    fn checkpoint_round_trip() {
        let checkpoint = ReaderCheckpoint::new(12, 3, vec![vec![1, 2, 3], vec![1]]);
        let decoded = ReaderCheckpoint::from_bytes(&checkpoint.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, checkpoint);
    }
}
