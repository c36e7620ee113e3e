//! TCP-backed connections with length-prefixed framing.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, net::TcpStream};

use super::{Conn, Connector};

type LenType = u64;

/// Opens framed TCP connections to parameter-server shards.
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConn;

    async fn connect(&self, dest: SocketAddr) -> io::Result<TcpConn> {
        let stream = TcpStream::connect(dest).await?;
        stream.set_nodelay(true)?;
        Ok(TcpConn { stream, open: true })
    }
}

/// One framed TCP connection.
///
/// Frames go out as a big-endian length prefix followed by the payload
/// bytes. Any write failure poisons the connection.
pub struct TcpConn {
    stream: TcpStream,
    open: bool,
}

impl TcpConn {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let header = (frame.len() as LenType).to_be_bytes();
        self.stream.write_all(&header).await?;
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }
}

#[async_trait]
impl Conn for TcpConn {
    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let res = self.write_frame(frame).await;
        if res.is_err() {
            self.open = false;
        }
        res
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
