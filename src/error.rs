use std::io;
use std::time::Duration;

/// Reasons an inbound datagram is not a valid frame. These never reach the application: the
///  link drops such datagrams and logs them.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("datagram of {len} bytes is too short for a frame")]
    TooShort { len: usize },
    #[error("unknown opcode {0}")]
    UnknownOpCode(u32),
}

/// Error returned by [`crate::link::Link::send`] and [`crate::link::Link::probe`].
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("a frame is already awaiting acknowledgement")]
    LinkBusy,
    #[error("transport rejected the frame: {0}")]
    TransportSendFailed(#[source] io::Error),
    #[error("link was reset")]
    LinkReset,
    #[error("failed to allocate a buffer of {len} bytes")]
    OutOfResources { len: usize },
    #[error("payload must not be empty")]
    EmptyPayload,
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("no acknowledgement after {attempts} transmissions")]
    RetriesExhausted { attempts: u32 },
    #[error("send of seq {seq} was preempted by incoming data from the peer")]
    Preempted { seq: u32 },
    #[error("no probe response within {0:?}")]
    NoProbeResponse(Duration),
}

/// Error returned by [`crate::link::Link::receive`].
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RecvError {
    #[error("link was reset")]
    LinkReset,
}
