use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::LinkConfig;
use crate::error::{RecvError, SendError};
use crate::link::{Link, LinkState};
use crate::persistence::SequenceStore;
use crate::transport::UdpTransport;

/// EndPoint is where the parts come together: it binds the UDP transport, restores the link's
///  sequence state, and runs the receive loop feeding incoming datagrams into the link.
pub struct EndPoint {
    link: Arc<Link>,
    local_addr: SocketAddr,
    recv_loop: JoinHandle<()>,
}

impl EndPoint {
    pub async fn new(config: LinkConfig, store: Arc<dyn SequenceStore>) -> anyhow::Result<EndPoint> {
        config.validate()?;
        let config = Arc::new(config);

        let transport = Arc::new(UdpTransport::bind(&config).await?);
        let local_addr = transport.local_addr()?;
        let link = Arc::new(Link::restore(config.clone(), transport.sender(), store).await);

        let recv_loop = {
            let link = link.clone();
            tokio::spawn(async move { transport.recv_loop(link).await })
        };

        info!("link end point on {:?} talking to {:?}", local_addr, config.destination);
        Ok(EndPoint {
            link,
            local_addr,
            recv_loop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        self.link.send(payload).await
    }

    pub async fn receive(&self) -> Result<Bytes, RecvError> {
        self.link.receive().await
    }

    pub async fn probe(&self, timeout: Duration) -> Result<Duration, SendError> {
        self.link.probe(timeout).await
    }

    pub async fn reset(&self) {
        self.link.reset().await
    }

    pub async fn state(&self) -> LinkState {
        self.link.state().await
    }

    /// Stops the receive loop and resets the link, failing all suspended callers
    pub async fn shutdown(self) {
        info!("shutting down link end point on {:?}", self.local_addr);
        self.recv_loop.abort();
        self.link.reset().await;
    }
}

impl Drop for EndPoint {
    fn drop(&mut self) {
        self.recv_loop.abort();
    }
}
