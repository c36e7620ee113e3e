use std::{error::Error, fmt, io};

use crate::transport::PoolErr;

/// The oplog module's result type.
pub type Result<T> = std::result::Result<T, FlushErr>;

/// Failures surfaced by a bucket flush.
///
/// Either way the merged payload stays in the bucket as a single pending
/// message, so a later flush retries it; nothing is propagated back to the
/// original submitters.
#[derive(Debug)]
pub enum FlushErr {
    /// Transmission kept failing until the flush budget ran out.
    SendFailed { matrix_id: u32, source: io::Error },
    /// Channel acquisition failed, ending the flush attempt.
    Pool(PoolErr),
}

impl fmt::Display for FlushErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushErr::SendFailed { matrix_id, source } => {
                write!(f, "sending merged update for matrix {matrix_id} failed: {source}")
            }
            FlushErr::Pool(e) => write!(f, "channel acquisition failed: {e}"),
        }
    }
}

impl Error for FlushErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FlushErr::SendFailed { source, .. } => Some(source),
            FlushErr::Pool(e) => Some(e),
        }
    }
}

impl From<PoolErr> for FlushErr {
    fn from(value: PoolErr) -> Self {
        Self::Pool(value)
    }
}
