//! Seams to the onion-routing collaborator.
//!
//! The core never talks to the onion router directly. It asks a [`Provisioner`]
//! for rendezvous addresses, a [`Dialer`] for outbound streams and an
//! [`Acceptor`] for inbound ones.

use crate::transport::DataConn;
use crate::utils::{Result, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream usable as a connection
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased connection stream
pub type BoxedStream = Box<dyn AsyncStream>;

/// Framed connection over a type-erased stream
pub type Connection = DataConn<BoxedStream>;

/// Hands out rendezvous addresses for new identities
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Obtain an address on which this daemon can be reached
    async fn acquire_address(&self) -> Result<String>;
}

/// Opens streams to rendezvous addresses through the onion network
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `address` on `port`
    async fn dial(&self, address: &str, port: u16) -> Result<BoxedStream>;
}

/// Source of inbound connections for one listening port
#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next inbound connection
    async fn accept(&mut self) -> Result<BoxedStream>;
}

/// Dial and wrap the stream in record framing, bounded by `timeout`
pub async fn connect(
    dialer: &dyn Dialer,
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<Connection> {
    match tokio::time::timeout(timeout, dialer.dial(address, port)).await {
        Ok(stream) => Ok(DataConn::new(stream?)),
        Err(_) => Err(TransportError::Dial {
            address: address.to_string(),
            port,
            reason: format!("no connection after {}s", timeout.as_secs()),
        }
        .into()),
    }
}

#[async_trait]
impl Acceptor for tokio::net::TcpListener {
    async fn accept(&mut self) -> Result<BoxedStream> {
        let (stream, peer) = tokio::net::TcpListener::accept(self).await?;
        log::trace!("Accepted connection from {}", peer);
        Ok(Box::new(stream))
    }
}
