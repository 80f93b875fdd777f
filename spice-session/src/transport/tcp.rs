//! TCP transport backend.

use super::{Transport, TransportReader, TransportWriter};
use crate::error::Result;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

pub struct TcpTransport {
    stream: TcpStream,
}

pub async fn connect(addr: SocketAddr) -> Result<Box<dyn Transport>> {
    let stream = TcpStream::connect(addr).await?;
    // Latency matters more than throughput for a protocol of tiny
    // packets; disable Nagle for the lifetime of the channel.
    stream.set_nodelay(true)?;
    debug!("TCP transport connected to {}", addr);
    Ok(Box::new(TcpTransport { stream }))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream.read_exact(buf).await.map(|_| ())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(TcpTransportReader { half: read }),
            Box::new(TcpTransportWriter { half: write }),
        )
    }
}

pub struct TcpTransportReader {
    half: OwnedReadHalf,
}

#[async_trait]
impl TransportReader for TcpTransportReader {
    async fn readable(&self) -> io::Result<()> {
        self.half.readable().await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.half.read_exact(buf).await.map(|_| ())
    }
}

pub struct TcpTransportWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for TcpTransportWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.half.write_all(buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}
