//! A stop-and-wait ARQ link layer on top of an unreliable, unordered datagram transport.
//!
//! The link provides exactly-once, in-order delivery of single-datagram payloads between two
//!  peers that otherwise only have best-effort delivery: no guaranteed arrival, no ordering, no
//!  deduplication. It does so in the simplest possible way:
//! * There is at most one unacknowledged DATA frame at any time (window size 1). A send while
//!   a frame is outstanding is rejected rather than queued.
//! * The outstanding frame is re-sent unchanged on every tick of a fixed-period timer until the
//!   peer acknowledges it. By default there is no upper bound on the number of retransmissions,
//!   see [`config::LinkConfig::max_retransmissions`].
//! * The receiver acknowledges every DATA frame, and delivers a payload only if its sequence
//!   number differs from the last accepted one. A retransmitted frame whose ACK got lost is
//!   therefore acknowledged again but not delivered twice.
//! * A delivered payload must be consumed by the application before the next one is accepted.
//!   Until then new DATA is not acknowledged, so the peer keeps retransmitting.
//! * If DATA arrives while our own frame is outstanding, the peer wins: our send attempt is
//!   given up (and fails with [`error::SendError::Preempted`]), and the link resynchronizes on the
//!   peer's frame. The given-up frame may have been delivered nevertheless.
//!
//! Explicitly *not* covered: congestion control, windows larger than a single frame, encryption
//!  or authentication, and multiplexing several peers over one link.
//!
//! ## Frame format
//!
//! Every datagram carries exactly one frame - all numbers in network byte order (BE):
//! ```ascii
//! 0: sequence number (u32)
//! 4: opcode (u32):
//!    * 1 DATA      - payload follows, must be at least one byte
//!    * 2 DATA_ACK  - acknowledges the DATA frame with the same sequence number
//!    * 3 PROBE     - liveness check, the sequence number is chosen by the prober
//!    * 4 PROBE_ACK - answers the PROBE with the same sequence number
//! 8: payload (DATA only), opaque to the link
//! ```
//!
//! Datagrams shorter than the 8 byte header, DATA frames without payload and unknown opcodes are
//!  dropped without any notification - noise is expected on an unreliable medium.
//!
//! ## Sequence numbers
//!
//! The sender numbers its DATA frames consecutively, wrapping around at `u32::MAX`. A number is
//!  used up as soon as its frame went out, even if the send fails later on: the peer may have
//!  accepted the frame with only the ACK getting lost. The last used number can be persisted through a
//!  [`persistence::SequenceStore`] so that a restarted sender does not reuse numbers a receiver
//!  would discard as duplicates. The receiver's state is not persisted.
//!
//! PROBE frames have their own counter and do not interfere with DATA sequencing.

pub mod config;
pub mod end_point;
pub mod error;
pub mod fragments;
pub mod frame;
pub mod link;
pub mod persistence;
pub mod timer;
pub mod transport;

#[cfg(test)]
pub mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
