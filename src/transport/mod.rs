//! Bounded, health-managed channel pooling toward parameter-server shards.

mod channel;
mod config;
mod error;
mod pool;
mod tcp;

pub use channel::{Channel, ChannelState, Conn, Connector};
pub use config::PoolConfig;
pub use error::{PoolErr, Result};
pub use pool::{ChannelPool, PoolStats, PooledChannel};
pub use tcp::{TcpConn, TcpConnector};
