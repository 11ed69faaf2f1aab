use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{error, info, trace, warn};

use crate::config::LinkConfig;
use crate::fragments::{InboundDatagram, OutboundDatagram};
use crate::frame::HEADER_LEN;

/// This is an abstraction for handing a datagram to the unreliable transport, introduced to
///  facilitate mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSender: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &OutboundDatagram) -> io::Result<()>;
}

/// Receives every datagram the transport reads, in arrival order
#[async_trait]
pub trait DatagramHandler: Send + Sync + 'static {
    async fn on_datagram(&self, datagram: InboundDatagram);
}

#[async_trait]
impl DatagramSender for Arc<UdpSocket> {
    async fn send_datagram(&self, to: SocketAddr, datagram: &OutboundDatagram) -> io::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.total_len(), to);

        let buf = datagram.to_contiguous();
        let num_sent = self.send_to(&buf, to).await?;
        if num_sent != buf.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, format!("sent {} of {} bytes", num_sent, buf.len())));
        }
        Ok(())
    }
}

/// UDP as the unreliable datagram transport underneath a link
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    max_datagram_len: usize,
}

impl UdpTransport {
    pub async fn bind(config: &LinkConfig) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        if config.broadcast {
            socket.set_broadcast(true)?;
        }
        info!("bound UDP socket to {:?} (broadcast: {})", socket.local_addr()?, config.broadcast);

        Ok(UdpTransport {
            socket: Arc::new(socket),
            // one byte of slack so that oversized datagrams are detected rather than truncated
            max_datagram_len: HEADER_LEN + config.max_payload_len + 1,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn sender(&self) -> Arc<dyn DatagramSender> {
        Arc::new(self.socket.clone())
    }

    /// Reads datagrams until the surrounding task is aborted, passing each one to `handler`.
    ///  Socket errors are logged and do not end the loop.
    pub async fn recv_loop(&self, handler: Arc<dyn DatagramHandler>) {
        info!("starting receive loop");

        let mut buf = vec![0u8; self.max_datagram_len];
        loop {
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            if num_read == buf.len() {
                warn!("received datagram from {:?} exceeding {} bytes - dropping", from, buf.len() - 1);
                continue;
            }

            trace!("received datagram from {:?}: {:?}", from, &buf[..num_read]);
            handler.on_datagram(InboundDatagram::single(from, Bytes::copy_from_slice(&buf[..num_read]))).await;
        }
    }
}
