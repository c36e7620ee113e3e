//! Client-side update pipeline for a distributed parameter server.
//!
//! Worker tasks produce partial updates to shared matrices and ship them to
//! remote parameter-server shards over a bounded set of reusable channels.
//! The [`transport`] module owns those channels: a [`ChannelPool`]
//! multiplexes many logical senders over at most `max_active` connections
//! per destination, with timeout-bound acquisition and idle reclamation.
//! The [`oplog`] module sits in front of it: a [`MergeCache`] coalesces
//! pending same-matrix updates into one combined payload before handing it
//! to the pool for transmission.
//!
//! What the updates mean numerically, how matrices are stored server-side
//! and who routes a matrix to its shard are all collaborators outside this
//! crate.

pub mod oplog;
pub mod transport;

pub use oplog::{CacheConfig, MergeCache, OpLogMessage, TaskId, UpdateKind, UpdatePayload};
pub use transport::{ChannelPool, Conn, Connector, PoolConfig, PoolErr, TcpConnector};
