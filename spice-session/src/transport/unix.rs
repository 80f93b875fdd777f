//! Unix domain socket transport backend, selected when the configured
//! port is zero and the host string is a filesystem path.

use super::{Transport, TransportReader, TransportWriter};
use crate::error::Result;
use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::debug;

pub struct UnixTransport {
    stream: UnixStream,
}

pub async fn connect(path: &Path) -> Result<Box<dyn Transport>> {
    let stream = UnixStream::connect(path).await?;
    debug!("unix transport connected to {}", path.display());
    Ok(Box::new(UnixTransport { stream }))
}

#[async_trait]
impl Transport for UnixTransport {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream.read_exact(buf).await.map(|_| ())
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf).await
    }

    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(UnixTransportReader { half: read }),
            Box::new(UnixTransportWriter { half: write }),
        )
    }
}

pub struct UnixTransportReader {
    half: OwnedReadHalf,
}

#[async_trait]
impl TransportReader for UnixTransportReader {
    async fn readable(&self) -> io::Result<()> {
        self.half.readable().await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.half.read_exact(buf).await.map(|_| ())
    }
}

pub struct UnixTransportWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for UnixTransportWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.half.write_all(buf).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.half.shutdown().await
    }
}
