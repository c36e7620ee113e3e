//! Frame encoding for merged updates.
//!
//! A frame is `[kind: u32 BE][matrix_id: u32 BE][seq_id: u64 BE]` followed
//! by the raw delta bytes. The transport adds its own length prefix.

use std::io;

use super::{merge::MergedUpdate, message::UpdatePayload};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();
const FIXED_SIZE: usize = HEADER_SIZE + size_of::<u32>() + size_of::<u64>();

const KIND_VECTOR_MERGE: Header = 0;

/// A decoded update frame, used by diagnostics and tests.
#[derive(Debug, PartialEq)]
pub struct UpdateFrame {
    pub matrix_id: u32,
    pub seq_id: u64,
    pub deltas: Vec<f32>,
}

/// Encodes `update` into `buf`, replacing its contents.
pub(crate) fn encode(update: &MergedUpdate, buf: &mut Vec<u8>) {
    buf.clear();

    match &update.payload {
        UpdatePayload::VectorMerge(deltas) => {
            buf.extend_from_slice(&KIND_VECTOR_MERGE.to_be_bytes());
            buf.extend_from_slice(&update.matrix_id.to_be_bytes());
            buf.extend_from_slice(&update.seq_id.to_be_bytes());
            buf.extend_from_slice(bytemuck::cast_slice(deltas));
        }
    }
}

/// Decodes one frame produced by [`encode`].
pub fn decode(buf: &[u8]) -> io::Result<UpdateFrame> {
    if buf.len() < FIXED_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame of {} bytes is too small, must be at least {FIXED_SIZE}",
                buf.len()
            ),
        ));
    }

    let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
    let (matrix_buf, rest) = rest.split_at(size_of::<u32>());
    let (seq_buf, deltas_buf) = rest.split_at(size_of::<u64>());

    // The splits above are exactly the fixed field sizes.
    let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());
    let matrix_id = u32::from_be_bytes(matrix_buf.try_into().unwrap());
    let seq_id = u64::from_be_bytes(seq_buf.try_into().unwrap());

    match kind {
        KIND_VECTOR_MERGE => {
            if deltas_buf.len() % size_of::<f32>() != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("delta section of {} bytes is not float-sized", deltas_buf.len()),
                ));
            }

            // Copies, so the source needs no alignment.
            let deltas = bytemuck::pod_collect_to_vec(deltas_buf);
            Ok(UpdateFrame {
                matrix_id,
                seq_id,
                deltas,
            })
        }
        byte => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received an invalid kind header {byte}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::message::TaskId;

    #[test]
    fn test_frame_carries_update_through() {
        let update = MergedUpdate {
            matrix_id: 42,
            seq_id: 17,
            task: TaskId::new(3),
            payload: UpdatePayload::VectorMerge(vec![1.5, -2.0, 0.25]),
            merged: 4,
        };

        let mut buf = Vec::new();
        encode(&update, &mut buf);
        let frame = decode(&buf).unwrap();

        assert_eq!(frame.matrix_id, 42);
        assert_eq!(frame.seq_id, 17);
        assert_eq!(frame.deltas, vec![1.5, -2.0, 0.25]);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        assert!(decode(&[0, 0, 1]).is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut buf = vec![0u8; FIXED_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(&9u32.to_be_bytes());
        assert!(decode(&buf).is_err());
    }
}
