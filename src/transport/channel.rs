use std::{
    io,
    net::SocketAddr,
    time::{Duration, Instant},
};

use async_trait::async_trait;

/// A single framed connection to a remote endpoint.
///
/// Implementations own the underlying stream; `send` writes one complete
/// frame and must leave the connection unusable (`is_open` returning
/// `false`) after a transport failure.
#[async_trait]
pub trait Conn: Send + 'static {
    /// Writes one encoded frame to the remote end.
    async fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Reports whether the connection is still believed usable.
    fn is_open(&self) -> bool;
}

/// Factory for the connections a pool manages.
///
/// Injected at pool construction so tests can run against in-memory
/// transports while production uses TCP.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Conn;

    /// Opens a new connection to `dest`.
    async fn connect(&self, dest: SocketAddr) -> io::Result<Self::Conn>;
}

/// Lifecycle state of a pooled channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Active,
    Closed,
}

/// A reusable network channel owned by the pool.
///
/// Callers only ever touch a `Channel` through the borrowed handle returned
/// by acquire; the pool keeps exclusive ownership across the lifecycle.
pub struct Channel<T> {
    destination: SocketAddr,
    state: ChannelState,
    last_used_at: Instant,
    conn: T,
}

impl<T: Conn> Channel<T> {
    pub(crate) fn new(destination: SocketAddr, conn: T) -> Self {
        Self {
            destination,
            state: ChannelState::Idle,
            last_used_at: Instant::now(),
            conn,
        }
    }

    /// The remote endpoint this channel is connected to.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// The channel's lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Liveness check run at acquire time.
    pub(crate) fn is_open(&self) -> bool {
        self.state != ChannelState::Closed && self.conn.is_open()
    }

    /// How long the channel has sat unused.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    pub(crate) fn activate(&mut self) {
        self.state = ChannelState::Active;
    }

    /// Returns the channel to the idle state and refreshes its use stamp.
    pub(crate) fn deactivate(&mut self) {
        self.state = ChannelState::Idle;
        self.last_used_at = Instant::now();
    }

    pub(crate) fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Sends one frame, marking the channel closed on transport failure so
    /// the pool never returns it to the idle set.
    pub(crate) async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        match self.conn.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ChannelState::Closed;
                Err(e)
            }
        }
    }
}
