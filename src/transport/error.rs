use std::{error::Error, fmt, io, net::SocketAddr, time::Duration};

/// The transport module's result type.
pub type Result<T> = std::result::Result<T, PoolErr>;

/// Channel pool failures.
#[derive(Debug)]
pub enum PoolErr {
    InvalidConfig {
        max_active: usize,
        min_active: usize,
    },
    Exhausted {
        dest: SocketAddr,
        waited: Duration,
    },
    Closed,
    Io(io::Error),
}

impl fmt::Display for PoolErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolErr::InvalidConfig {
                max_active,
                min_active,
            } => write!(
                f,
                "invalid pool bounds: max_active {max_active} is below min_active {min_active}"
            ),
            PoolErr::Exhausted { dest, waited } => {
                write!(f, "no channel for {dest} became available within {waited:?}")
            }
            PoolErr::Closed => write!(f, "channel pool is shut down"),
            PoolErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for PoolErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PoolErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PoolErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
