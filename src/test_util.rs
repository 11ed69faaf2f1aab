use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;

use crate::fragments::{InboundDatagram, OutboundDatagram};
use crate::frame::{decode, Frame};
use crate::transport::{DatagramHandler, DatagramSender};

/// convenience method for unit test code: the same number generates the same address, different
///  numbers different addresses
pub fn test_addr(number: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, number))
}

/// Decrements `counter` if it is positive, returning whether it was
fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

/// Records every frame handed to the transport. Failures can be injected for the next n sends;
///  failed sends are not recorded.
#[derive(Default)]
pub struct TrackingDatagramSender {
    tracker: RwLock<Vec<(SocketAddr, Frame)>>,
    failures_pending: AtomicUsize,
}
impl TrackingDatagramSender {
    pub fn fail_next(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    pub async fn assert_frame_sent(&self, to: SocketAddr, frame: Frame) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no frame was sent, expected {:?} to {:?}", frame, to);
        }

        let (actual_to, actual_frame) = lock.remove(0);
        assert_eq!(actual_frame, frame);
        assert_eq!(actual_to, to);
    }

    pub async fn assert_no_remaining_frames(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected frames: {:?}", lock);
    }
}

#[async_trait]
impl DatagramSender for TrackingDatagramSender {
    async fn send_datagram(&self, to: SocketAddr, datagram: &OutboundDatagram) -> io::Result<()> {
        if take_one(&self.failures_pending) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected failure"));
        }

        let frame = decode(&datagram.to_contiguous())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.tracker.write().await.push((to, frame));
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingDatagramHandler {
    received: RwLock<Vec<InboundDatagram>>,
    arrived: Notify,
}
impl CollectingDatagramHandler {
    /// Waits until at least `n` datagrams arrived or `timeout` passed, returning what arrived
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<InboundDatagram> {
        let _ = time::timeout(timeout, async {
            loop {
                let notified = self.arrived.notified();
                if self.received.read().await.len() >= n {
                    return;
                }
                notified.await;
            }
        }).await;

        self.received.read().await.clone()
    }
}

#[async_trait]
impl DatagramHandler for CollectingDatagramHandler {
    async fn on_datagram(&self, datagram: InboundDatagram) {
        self.received.write().await.push(datagram);
        self.arrived.notify_waiters();
    }
}

/// An in-memory transport from one address to a single peer. Datagrams are queued and delivered
///  by a separate task, so sending never re-enters the receiving side.
pub struct LoopbackSender {
    self_addr: SocketAddr,
    queue: mpsc::UnboundedSender<InboundDatagram>,
    drops_pending: AtomicUsize,
}
impl LoopbackSender {
    /// Silently loses the next `n` datagrams
    pub fn drop_next(&self, n: usize) {
        self.drops_pending.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatagramSender for LoopbackSender {
    async fn send_datagram(&self, to: SocketAddr, datagram: &OutboundDatagram) -> io::Result<()> {
        if take_one(&self.drops_pending) {
            trace!("loopback: losing datagram from {:?} to {:?}", self.self_addr, to);
            return Ok(());
        }
        self.queue.send(InboundDatagram::single(self.self_addr, datagram.to_contiguous()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback peer is gone"))
    }
}

/// Creates a sender for `self_addr`, and the queue of everything it sends
pub fn loopback(self_addr: SocketAddr) -> (Arc<LoopbackSender>, mpsc::UnboundedReceiver<InboundDatagram>) {
    let (queue, incoming) = mpsc::unbounded_channel();
    let sender = Arc::new(LoopbackSender {
        self_addr,
        queue,
        drops_pending: AtomicUsize::new(0),
    });
    (sender, incoming)
}

/// Spawns a task delivering the datagrams of a [loopback] queue to `peer`
pub fn deliver_to(mut incoming: mpsc::UnboundedReceiver<InboundDatagram>, peer: Arc<dyn DatagramHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(datagram) = incoming.recv().await {
            peer.on_datagram(datagram).await;
        }
    })
}
