//! Network transport abstraction.
//!
//! A session connects each channel over its own stream socket: TCP when
//! the configuration carries a port, a Unix domain socket when the port
//! is zero and the host string is a filesystem path. The handshake runs
//! on the whole stream; once a channel is ready the transport is split
//! into an owned read half (driven by `process`) and an owned write half
//! (guarded by the channel's send lock).

use crate::error::{Result, SpiceError};
use async_trait::async_trait;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

pub mod tcp;
pub mod unix;

/// Where the server lives, resolved once at connect time.
#[derive(Debug, Clone)]
pub enum TransportAddress {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

// Unix sun_path is 108 bytes including the terminator.
const MAX_UNIX_PATH: usize = 107;

impl TransportAddress {
    /// Resolve the configured host/port pair: port 0 selects a Unix
    /// socket path, otherwise the host must be an IPv4 literal.
    pub fn resolve(host: &str, port: u16) -> Result<TransportAddress> {
        if port == 0 {
            if host.is_empty() || host.len() > MAX_UNIX_PATH {
                return Err(SpiceError::Config(format!(
                    "invalid unix socket path: {host:?}"
                )));
            }
            Ok(TransportAddress::Unix(PathBuf::from(host)))
        } else {
            let ip: Ipv4Addr = host
                .parse()
                .map_err(|_| SpiceError::Config(format!("not an IPv4 literal: {host:?}")))?;
            Ok(TransportAddress::Tcp(SocketAddr::from((ip, port))))
        }
    }
}

/// A connected, not yet split channel stream.
#[async_trait]
pub trait Transport: Send {
    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Split into independently usable read and write halves.
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// Read half of a channel stream. `readable` integrates with the
/// session poller; `read_exact` performs the short, length-bounded reads
/// of the framing state machine.
#[async_trait]
pub trait TransportReader: Send + Sync {
    async fn readable(&self) -> io::Result<()>;

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Write half of a channel stream.
#[async_trait]
pub trait TransportWriter: Send {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Half-close: shut down the write direction, leaving the read half
    /// to drain until EOF.
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// Open a stream to the resolved address.
pub async fn create_transport(address: &TransportAddress) -> Result<Box<dyn Transport>> {
    match address {
        TransportAddress::Tcp(addr) => tcp::connect(*addr).await,
        TransportAddress::Unix(path) => unix::connect(path).await,
    }
}
