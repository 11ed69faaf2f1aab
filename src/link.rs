use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{RecvError, SendError};
use crate::fragments::{package_outbound, InboundDatagram, OutboundDatagram};
use crate::frame::OpCode;
use crate::persistence::{NoSequenceStore, SequenceStore};
use crate::timer::RetransmitTimer;
use crate::transport::{DatagramHandler, DatagramSender};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LinkState {
    /// ready to send, or passively receiving
    Idle,
    /// one DATA frame is outstanding, the retransmission timer is running
    AwaitingAck,
}

/// The single unacknowledged DATA frame
struct PendingOutbound {
    seq: u32,
    datagram: OutboundDatagram,
    destination: SocketAddr,
    retransmissions: u32,
    completion: oneshot::Sender<Result<(), SendError>>,
}

struct PendingProbe {
    seq: u32,
    sent_at: Instant,
    completion: oneshot::Sender<Result<Duration, SendError>>,
}

struct LinkInner {
    config: Arc<LinkConfig>,
    sender: Arc<dyn DatagramSender>,

    state: LinkState,
    /// sequence number of the last DATA frame that went out, whether or not it was acknowledged
    last_sent_seq: u32,
    last_received_seq: Option<u32>,
    pending_outbound: Option<PendingOutbound>,
    /// a delivered payload that was not yet picked up by [`Link::receive`]
    pending_inbound: Option<Bytes>,
    destination: SocketAddr,
    resend_timer: RetransmitTimer,
    /// incremented on every reset, so that suspended receivers notice a reset
    reset_epoch: u64,

    next_probe_seq: u32,
    pending_probe: Option<PendingProbe>,
}

impl LinkInner {
    /// Returns the link to `Idle`, resolving a suspended `send()` with `result`. The timer is
    ///  cancelled in the same critical section, so no retransmission can follow the transition.
    ///
    /// The frame's sequence number counts as used for every outcome: the peer may have accepted
    ///  it even if its ACK never arrived, and would discard a different payload under the same
    ///  number as a duplicate.
    fn finish_send(&mut self, result: Result<(), SendError>) {
        self.resend_timer.cancel();
        self.state = LinkState::Idle;

        if let Some(pending) = self.pending_outbound.take() {
            self.last_sent_seq = pending.seq;
            if pending.completion.send(result).is_err() {
                debug!("send of seq {} completed after the caller went away", pending.seq);
            }
        }
    }

    /// Called on every tick of the retransmission timer. Returns `false` when the timer has no
    ///  more work to do.
    async fn on_resend_timer(&mut self, generation: u64) -> bool {
        if !self.resend_timer.is_current(generation) || self.state != LinkState::AwaitingAck {
            trace!("stale retransmission timer tick {} - ignoring", generation);
            return false;
        }
        let Some(pending) = &self.pending_outbound else {
            return false;
        };

        if let Some(max) = self.config.max_retransmissions {
            if pending.retransmissions >= max {
                let attempts = pending.retransmissions + 1;
                warn!("no acknowledgement for seq {} after {} transmissions - giving up", pending.seq, attempts);
                self.finish_send(Err(SendError::RetriesExhausted { attempts }));
                return false;
            }
        }

        let Some(pending) = &mut self.pending_outbound else {
            return false;
        };
        pending.retransmissions += 1;
        debug!("retransmitting seq {} to {:?} (retransmission #{})", pending.seq, pending.destination, pending.retransmissions);

        if let Err(e) = self.sender.send_datagram(pending.destination, &pending.datagram).await {
            // the medium is unreliable anyway, the next tick tries again
            warn!("error retransmitting seq {} to {:?}: {}", pending.seq, pending.destination, e);
        }
        true
    }

    /// Returns `true` if a new payload was delivered
    async fn on_data(&mut self, seq: u32, datagram: &InboundDatagram) -> bool {
        let source = datagram.source;

        if datagram.payload_len() > self.config.max_payload_len {
            warn!("DATA seq {} from {:?} has {} bytes of payload, maximum is {} - dropping", seq, source, datagram.payload_len(), self.config.max_payload_len);
            return false;
        }

        let is_duplicate = self.last_received_seq == Some(seq);
        if !is_duplicate && self.pending_inbound.is_some() {
            // no ACK, so the peer keeps retransmitting until the application caught up
            debug!("previous payload not consumed yet - stalling DATA seq {} from {:?}", seq, source);
            return false;
        }

        let payload = if is_duplicate {
            None
        }
        else {
            match datagram.reassemble_payload() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    error!("dropping DATA seq {} from {:?}: {}", seq, source, e);
                    return false;
                }
            }
        };

        if self.state == LinkState::AwaitingAck {
            if let Some(own_seq) = self.pending_outbound.as_ref().map(|p| p.seq) {
                info!("DATA seq {} from {:?} preempts our outstanding seq {}", seq, source, own_seq);
                self.finish_send(Err(SendError::Preempted { seq: own_seq }));
            }
        }

        let delivered = match payload {
            None => {
                debug!("duplicate DATA seq {} from {:?} - acknowledging again", seq, source);
                false
            }
            Some(payload) => {
                trace!("accepted DATA seq {} from {:?}: {} bytes", seq, source, payload.len());
                self.last_received_seq = Some(seq);
                self.pending_inbound = Some(payload);
                if self.config.learn_peer_addr && self.destination != source {
                    debug!("peer address is now {:?}", source);
                    self.destination = source;
                }
                true
            }
        };

        self.send_control(source, seq, OpCode::DataAck).await;
        delivered
    }

    fn on_data_ack(&mut self, seq: u32, source: SocketAddr) {
        let awaiting = self.pending_outbound.as_ref()
            .map(|p| (p.seq, p.retransmissions));

        match awaiting {
            Some((pending_seq, retransmissions)) if pending_seq == seq => {
                debug!("seq {} acknowledged by {:?} after {} retransmissions", seq, source, retransmissions);
                self.finish_send(Ok(()));
            }
            Some((pending_seq, _)) => {
                debug!("stale DATA_ACK seq {} from {:?} while awaiting seq {} - dropping", seq, source, pending_seq);
            }
            None => {
                debug!("unexpected DATA_ACK seq {} from {:?} - dropping", seq, source);
            }
        }
    }

    fn on_probe_ack(&mut self, seq: u32, source: SocketAddr) {
        match self.pending_probe.take() {
            Some(probe) if probe.seq == seq => {
                let rtt = probe.sent_at.elapsed();
                debug!("PROBE_ACK seq {} from {:?} after {:?}", seq, source, rtt);
                let _ = probe.completion.send(Ok(rtt));
            }
            other => {
                debug!("unexpected PROBE_ACK seq {} from {:?} - dropping", seq, source);
                self.pending_probe = other;
            }
        }
    }

    async fn send_control(&self, to: SocketAddr, seq: u32, opcode: OpCode) {
        let datagram = match package_outbound(seq, opcode, &[]) {
            Ok(d) => d,
            Err(e) => {
                error!("unable to send {:?} seq {} to {:?}: {}", opcode, seq, to, e);
                return;
            }
        };

        trace!("sending {:?} seq {} to {:?}", opcode, seq, to);
        if let Err(e) = self.sender.send_datagram(to, &datagram).await {
            // the peer retransmits, and we answer again
            warn!("error sending {:?} seq {} to {:?}: {}", opcode, seq, to, e);
        }
    }
}

/// A stop-and-wait ARQ link to a single peer.
///
/// At most one DATA frame is unacknowledged at any time. It is retransmitted unchanged on every
///  tick of the retransmission timer until the peer acknowledges it, the peer preempts it with
///  DATA of its own, or the link is reset. Incoming DATA is acknowledged and delivered exactly
///  once per sequence number, and only after the previous payload was picked up by
///  [`Link::receive`].
///
/// All state transitions (API calls, incoming datagrams, timer ticks) are serialized by a single
///  mutex.
pub struct Link {
    inner: Arc<Mutex<LinkInner>>,
    inbound_ready: Notify,
    store: Arc<dyn SequenceStore>,
}

impl Link {
    /// A link without persistence, starting at sequence number 1
    pub fn new(config: Arc<LinkConfig>, sender: Arc<dyn DatagramSender>) -> Link {
        Self::with_last_sent_seq(config, sender, Arc::new(NoSequenceStore), 0)
    }

    /// Creates a link that continues after the sequence number saved in `store`
    pub async fn restore(config: Arc<LinkConfig>, sender: Arc<dyn DatagramSender>, store: Arc<dyn SequenceStore>) -> Link {
        let last_sent_seq = match store.load().await {
            Ok(Some(seq)) => {
                info!("restored last sent sequence number {}", seq);
                seq
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("unable to load last sent sequence number, starting from scratch: {}", e);
                0
            }
        };
        Self::with_last_sent_seq(config, sender, store, last_sent_seq)
    }

    fn with_last_sent_seq(config: Arc<LinkConfig>, sender: Arc<dyn DatagramSender>, store: Arc<dyn SequenceStore>, last_sent_seq: u32) -> Link {
        let inner = LinkInner {
            sender,
            state: LinkState::Idle,
            last_sent_seq,
            last_received_seq: None,
            pending_outbound: None,
            pending_inbound: None,
            destination: config.destination,
            resend_timer: RetransmitTimer::new(config.resend_interval),
            reset_epoch: 0,
            next_probe_seq: 0,
            pending_probe: None,
            config,
        };

        Link {
            inner: Arc::new(Mutex::new(inner)),
            inbound_ready: Notify::new(),
            store,
        }
    }

    /// Sends `payload` to the peer and waits until it is acknowledged.
    ///
    /// Fails immediately with [`SendError::LinkBusy`] if a previous send is still awaiting its
    ///  acknowledgement. A send that fails after its DATA frame went out
    ///  ([`SendError::Preempted`], [`SendError::LinkReset`], [`SendError::RetriesExhausted`]) may
    ///  or may not have been delivered. Its sequence number is used up either way, so the next
    ///  send is never mistaken for a duplicate, and resending the same payload may deliver it twice.
    pub async fn send(&self, payload: &[u8]) -> Result<(), SendError> {
        let (seq, completion) = {
            let mut inner = self.inner.lock().await;

            if payload.is_empty() {
                return Err(SendError::EmptyPayload);
            }
            if payload.len() > inner.config.max_payload_len {
                return Err(SendError::PayloadTooLarge { len: payload.len(), max: inner.config.max_payload_len });
            }
            if inner.state == LinkState::AwaitingAck {
                debug!("send rejected: a frame is awaiting acknowledgement");
                return Err(SendError::LinkBusy);
            }

            let seq = inner.last_sent_seq.wrapping_add(1);
            let datagram = package_outbound(seq, OpCode::Data, payload)?;
            let destination = inner.destination;

            trace!("sending DATA seq {} to {:?}: {} bytes", seq, destination, payload.len());
            if let Err(e) = inner.sender.send_datagram(destination, &datagram).await {
                warn!("error sending DATA seq {} to {:?}: {}", seq, destination, e);
                return Err(SendError::TransportSendFailed(e));
            }

            let (completion_sender, completion) = oneshot::channel();
            inner.state = LinkState::AwaitingAck;
            inner.pending_outbound = Some(PendingOutbound {
                seq,
                datagram,
                destination,
                retransmissions: 0,
                completion: completion_sender,
            });

            let weak_inner = Arc::downgrade(&self.inner);
            inner.resend_timer.arm(move |generation| on_resend_timer(weak_inner.clone(), generation));

            (seq, completion)
        };

        // the sender half is only dropped without a result when the link itself goes away
        let result = completion.await
            .unwrap_or(Err(SendError::LinkReset));

        if let Err(e) = self.store.save(seq).await {
            error!("unable to persist last sent sequence number {}: {}", seq, e);
        }
        result
    }

    /// Waits for the next payload from the peer. Each accepted sequence number is returned
    ///  exactly once.
    pub async fn receive(&self) -> Result<Bytes, RecvError> {
        let epoch = self.inner.lock().await.reset_epoch;

        loop {
            // registered before checking, so a delivery between the check and the await is not lost
            let notified = self.inbound_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if inner.reset_epoch != epoch {
                    return Err(RecvError::LinkReset);
                }
                if let Some(payload) = inner.pending_inbound.take() {
                    return Ok(payload);
                }
            }

            notified.await;
        }
    }

    /// Forcibly returns the link to `Idle`: cancels the retransmission timer, discards the
    ///  outstanding frame and any undelivered payload, and fails suspended `send()`, `receive()`
    ///  and `probe()` calls with `LinkReset`. Sequence numbers are kept.
    pub async fn reset(&self) {
        {
            let mut inner = self.inner.lock().await;

            inner.finish_send(Err(SendError::LinkReset));
            if inner.pending_inbound.take().is_some() {
                debug!("discarding unconsumed payload of seq {:?}", inner.last_received_seq);
            }
            if let Some(probe) = inner.pending_probe.take() {
                let _ = probe.completion.send(Err(SendError::LinkReset));
            }
            inner.reset_epoch += 1;
        }

        self.inbound_ready.notify_waiters();
        info!("link reset");
    }

    /// Sends a PROBE to the peer and waits for the matching PROBE_ACK, returning the round trip
    ///  time. Probes are independent of DATA exchange and work in any state.
    pub async fn probe(&self, timeout: Duration) -> Result<Duration, SendError> {
        let completion = {
            let mut inner = self.inner.lock().await;

            let seq = inner.next_probe_seq;
            inner.next_probe_seq = seq.wrapping_add(1);
            let datagram = package_outbound(seq, OpCode::Probe, &[])?;
            let destination = inner.destination;

            trace!("sending PROBE seq {} to {:?}", seq, destination);
            inner.sender.send_datagram(destination, &datagram).await
                .map_err(SendError::TransportSendFailed)?;

            let (completion_sender, completion) = oneshot::channel();
            // replacing a probe that is still waiting drops its sender, so it fails right away
            inner.pending_probe = Some(PendingProbe {
                seq,
                sent_at: Instant::now(),
                completion: completion_sender,
            });
            completion
        };

        match time::timeout(timeout, completion).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(SendError::NoProbeResponse(timeout)),
        }
    }

    pub async fn state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn last_sent_seq(&self) -> u32 {
        self.inner.lock().await.last_sent_seq
    }

    pub async fn last_received_seq(&self) -> Option<u32> {
        self.inner.lock().await.last_received_seq
    }

    pub async fn destination(&self) -> SocketAddr {
        self.inner.lock().await.destination
    }

    pub async fn is_retransmission_timer_armed(&self) -> bool {
        self.inner.lock().await.resend_timer.is_armed()
    }
}

#[async_trait]
impl DatagramHandler for Link {
    async fn on_datagram(&self, datagram: InboundDatagram) {
        let header = match datagram.decode_header() {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping datagram from {:?}: {}", datagram.source, e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        match header.opcode {
            OpCode::Data => {
                if inner.on_data(header.seq, &datagram).await {
                    drop(inner);
                    self.inbound_ready.notify_waiters();
                }
            }
            OpCode::DataAck => inner.on_data_ack(header.seq, datagram.source),
            OpCode::Probe => inner.send_control(datagram.source, header.seq, OpCode::ProbeAck).await,
            OpCode::ProbeAck => inner.on_probe_ack(header.seq, datagram.source),
        }
    }
}

async fn on_resend_timer(inner: Weak<Mutex<LinkInner>>, generation: u64) -> bool {
    match inner.upgrade() {
        Some(inner) => inner.lock().await.on_resend_timer(generation).await,
        None => false,
    }
}
