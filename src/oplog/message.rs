/// Opaque handle identifying the task that produced an update.
///
/// Supplied by the task-management layer and carried through for failure
/// attribution; never used as a merge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

/// Discriminant of an update payload, part of the merge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    VectorMerge,
}

/// The shape-specific body of an update.
///
/// A closed sum type: adding a kind means extending this enum, and every
/// merge dispatch is an exhaustive match over it.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdatePayload {
    /// A numeric vector delta, combined with same-key deltas by
    /// element-wise addition.
    VectorMerge(Vec<f32>),
}

impl UpdatePayload {
    pub fn kind(&self) -> UpdateKind {
        match self {
            UpdatePayload::VectorMerge(_) => UpdateKind::VectorMerge,
        }
    }

    /// Folds `other` into `self`.
    ///
    /// Both payloads share a bucket, so their kinds always match. Vector
    /// deltas of unequal length accumulate into the longer one, the missing
    /// tail reading as zeros.
    pub(crate) fn merge_from(&mut self, other: &UpdatePayload) {
        match (self, other) {
            (UpdatePayload::VectorMerge(acc), UpdatePayload::VectorMerge(delta)) => {
                if delta.len() > acc.len() {
                    acc.resize(delta.len(), 0.0);
                }
                acc.iter_mut().zip(delta).for_each(|(a, d)| *a += d);
            }
        }
    }
}

/// One logical update submission addressed to a matrix.
///
/// Immutable once constructed; merging reads messages and produces a new
/// combined payload.
#[derive(Debug, Clone)]
pub struct OpLogMessage {
    seq_id: u64,
    matrix_id: u32,
    task: TaskId,
    payload: UpdatePayload,
}

impl OpLogMessage {
    /// Creates a vector-merge update for `matrix_id`.
    ///
    /// # Arguments
    /// * `seq_id` - Per-task monotonic sequence number, kept for
    ///   diagnostics and gap detection.
    /// * `task` - The originating task.
    /// * `matrix_id` - The target matrix and merge key.
    /// * `deltas` - The numeric delta to apply.
    pub fn vector_merge(seq_id: u64, task: TaskId, matrix_id: u32, deltas: Vec<f32>) -> Self {
        Self {
            seq_id,
            matrix_id,
            task,
            payload: UpdatePayload::VectorMerge(deltas),
        }
    }

    pub(crate) fn new(seq_id: u64, task: TaskId, matrix_id: u32, payload: UpdatePayload) -> Self {
        Self {
            seq_id,
            matrix_id,
            task,
            payload,
        }
    }

    pub fn seq_id(&self) -> u64 {
        self.seq_id
    }

    pub fn matrix_id(&self) -> u32 {
        self.matrix_id
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn payload(&self) -> &UpdatePayload {
        &self.payload
    }
}
