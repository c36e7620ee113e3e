use log::debug;

use super::message::{OpLogMessage, TaskId, UpdatePayload};

/// The combined result of draining one bucket.
#[derive(Debug)]
pub(crate) struct MergedUpdate {
    pub matrix_id: u32,
    /// Highest sequence number among the merged messages.
    pub seq_id: u64,
    /// Task of the last message folded in, kept for attribution.
    pub task: TaskId,
    pub payload: UpdatePayload,
    /// How many messages this update combines.
    pub merged: usize,
}

impl MergedUpdate {
    /// Repackages the merged result as a single synthetic pending message,
    /// used to requeue a payload whose transmission failed.
    pub fn into_message(self) -> OpLogMessage {
        OpLogMessage::new(self.seq_id, self.task, self.matrix_id, self.payload)
    }
}

/// Combines `messages` in arrival order into one update.
///
/// The fold relies on payload merging being commutative and associative,
/// so arrival order never changes the numeric result. Sequence numbers are
/// diagnostic only: out-of-order arrivals are logged, not reordered.
pub(crate) fn merge(messages: Vec<OpLogMessage>) -> Option<MergedUpdate> {
    let inversions = sequence_inversions(&messages);
    let mut messages = messages.into_iter();
    let first = messages.next()?;

    let matrix_id = first.matrix_id();
    let mut seq_id = first.seq_id();
    let mut task = first.task();
    let mut payload = first.payload().clone();
    let mut merged = 1;

    for message in messages {
        payload.merge_from(message.payload());
        seq_id = seq_id.max(message.seq_id());
        task = message.task();
        merged += 1;
    }

    if inversions > 0 {
        debug!(
            matrix_id = matrix_id, inversions = inversions;
            "merged updates arrived out of sequence order"
        );
    }

    Some(MergedUpdate {
        matrix_id,
        seq_id,
        task,
        payload,
        merged,
    })
}

/// Counts adjacent arrivals from one task whose sequence number did not
/// advance, a sign of out-of-order or duplicate submission.
pub(crate) fn sequence_inversions(messages: &[OpLogMessage]) -> usize {
    messages
        .windows(2)
        .filter(|pair| pair[0].task() == pair[1].task() && pair[1].seq_id() <= pair[0].seq_id())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq_id: u64, task: usize, deltas: Vec<f32>) -> OpLogMessage {
        OpLogMessage::vector_merge(seq_id, TaskId::new(task), 7, deltas)
    }

    #[test]
    fn test_merge_adds_vectors_in_arrival_order() {
        let merged = merge(vec![msg(1, 0, vec![1.0, 2.0]), msg(2, 0, vec![3.0, 4.0])]).unwrap();

        assert_eq!(merged.matrix_id, 7);
        assert_eq!(merged.seq_id, 2);
        assert_eq!(merged.merged, 2);
        assert_eq!(merged.payload, UpdatePayload::VectorMerge(vec![4.0, 6.0]));
    }

    #[test]
    fn test_merge_of_empty_bucket_is_none() {
        assert!(merge(Vec::new()).is_none());
    }

    #[test]
    fn test_merge_pads_shorter_deltas_with_zeros() {
        let merged = merge(vec![msg(1, 0, vec![1.0]), msg(2, 0, vec![1.0, 5.0])]).unwrap();
        assert_eq!(merged.payload, UpdatePayload::VectorMerge(vec![2.0, 5.0]));
    }

    #[test]
    fn test_merge_keeps_highest_seq_across_interleaving() {
        let merged = merge(vec![
            msg(9, 0, vec![1.0]),
            msg(3, 0, vec![1.0]),
            msg(5, 0, vec![1.0]),
        ])
        .unwrap();
        assert_eq!(merged.seq_id, 9);
        assert_eq!(merged.payload, UpdatePayload::VectorMerge(vec![3.0]));
    }

    #[test]
    fn test_inversions_counted_per_task_only() {
        // Task 0 regresses once; task 1 interleaving is not an inversion.
        let messages = vec![
            msg(2, 0, vec![0.0]),
            msg(1, 0, vec![0.0]),
            msg(1, 1, vec![0.0]),
            msg(2, 1, vec![0.0]),
        ];
        assert_eq!(sequence_inversions(&messages), 1);
    }

    #[test]
    fn test_duplicate_seq_counts_as_inversion() {
        let messages = vec![msg(4, 0, vec![0.0]), msg(4, 0, vec![0.0])];
        assert_eq!(sequence_inversions(&messages), 1);
    }
}
