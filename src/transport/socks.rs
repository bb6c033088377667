//! Onion router access over its SOCKS5 port.
//!
//! Outbound connections go through the router's SOCKS5 proxy with the onion
//! hostname passed unresolved, so name resolution happens inside the onion
//! network. Rendezvous addresses come from a hidden service the operator has
//! already configured for this daemon.

use crate::transport::{BoxedStream, Dialer, Provisioner};
use crate::utils::{Result, TransportError};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_socks::tcp::Socks5Stream;

/// Dials rendezvous addresses through a SOCKS5 proxy
#[derive(Debug, Clone)]
pub struct SocksDialer {
    proxy: SocketAddr,
}

/// Hands every identity the same pre-provisioned hidden service address
#[derive(Debug, Clone)]
pub struct StaticProvisioner {
    address: String,
}

impl SocksDialer {
    /// Use the SOCKS5 proxy listening at `proxy`
    pub fn new(proxy: SocketAddr) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl Dialer for SocksDialer {
    async fn dial(&self, address: &str, port: u16) -> Result<BoxedStream> {
        let stream = Socks5Stream::connect(self.proxy, (address, port))
            .await
            .map_err(|e| TransportError::Dial {
                address: address.to_string(),
                port,
                reason: format!("via {}: {}", self.proxy, e),
            })?;

        log::debug!("Connected to {}:{} via {}", address, port, self.proxy);
        Ok(Box::new(stream))
    }
}

impl StaticProvisioner {
    /// Provision `address` for every identity
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Provisioner for StaticProvisioner {
    async fn acquire_address(&self) -> Result<String> {
        Ok(self.address.clone())
    }
}
