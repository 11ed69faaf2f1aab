use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, SendError};
use crate::frame::{FrameHeader, OpCode, HEADER_LEN};

/// A datagram as handed over by the transport: the source address and an ordered list of
///  fragments. The frame header sits at the start of the datagram, but may itself span several
///  fragments.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub source: SocketAddr,
    pub fragments: Vec<Bytes>,
}

impl InboundDatagram {
    pub fn new(source: SocketAddr, fragments: Vec<Bytes>) -> InboundDatagram {
        InboundDatagram {
            source,
            fragments,
        }
    }

    pub fn single(source: SocketAddr, datagram: Bytes) -> InboundDatagram {
        Self::new(source, vec![datagram])
    }

    pub fn total_len(&self) -> usize {
        self.fragments.iter()
            .map(|f| f.len())
            .sum()
    }

    /// Number of payload bytes, i.e. the datagram length minus the frame header.
    pub fn payload_len(&self) -> usize {
        self.total_len().saturating_sub(HEADER_LEN)
    }

    pub fn decode_header(&self) -> Result<FrameHeader, FrameError> {
        let total_len = self.total_len();
        if total_len < HEADER_LEN {
            return Err(FrameError::TooShort { len: total_len });
        }

        let mut raw = [0u8; HEADER_LEN];
        let mut filled = 0;
        for fragment in &self.fragments {
            let n = (HEADER_LEN - filled).min(fragment.len());
            raw[filled..filled + n].copy_from_slice(&fragment[..n]);
            filled += n;
            if filled == HEADER_LEN {
                break;
            }
        }

        let header = FrameHeader::deser(&mut raw.as_slice())?;
        if header.opcode.requires_payload() && total_len == HEADER_LEN {
            return Err(FrameError::TooShort { len: total_len });
        }
        Ok(header)
    }

    /// Copies the fragments in order into one contiguous buffer, skipping the frame header.
    pub fn reassemble_payload(&self) -> Result<Bytes, SendError> {
        let payload_len = self.payload_len();

        // a single fragment needs no copy
        if let [only] = self.fragments.as_slice() {
            if only.len() >= HEADER_LEN {
                return Ok(only.slice(HEADER_LEN..));
            }
        }

        let mut buf = try_alloc(payload_len)?;
        let mut to_skip = HEADER_LEN;
        for fragment in &self.fragments {
            if to_skip >= fragment.len() {
                to_skip -= fragment.len();
                continue;
            }
            buf.put_slice(&fragment[to_skip..]);
            to_skip = 0;
        }
        Ok(Bytes::from(buf))
    }
}

/// The transport-facing representation of an outgoing frame. Frames are always packaged into
///  a single fragment, but the type keeps the fragment list so transports can treat inbound
///  and outbound datagrams alike.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutboundDatagram {
    fragments: Vec<Bytes>,
}

impl OutboundDatagram {
    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    pub fn total_len(&self) -> usize {
        self.fragments.iter()
            .map(|f| f.len())
            .sum()
    }

    pub fn header(&self) -> Result<FrameHeader, FrameError> {
        let mut buf = self.fragments.first()
            .map(|f| f.as_ref())
            .unwrap_or_default();
        FrameHeader::deser(&mut buf)
    }

    /// The wire representation as one buffer. Outbound datagrams have a single fragment, so this
    ///  does not copy.
    pub fn to_contiguous(&self) -> Bytes {
        match self.fragments.as_slice() {
            [only] => only.clone(),
            fragments => {
                let mut buf = BytesMut::with_capacity(self.total_len());
                for f in fragments {
                    buf.put_slice(f);
                }
                buf.freeze()
            }
        }
    }
}

/// Packages header and payload into a single fragment. Allocation failure is reported as
///  [`SendError::OutOfResources`] rather than aborting the process.
pub fn package_outbound(seq: u32, opcode: OpCode, payload: &[u8]) -> Result<OutboundDatagram, SendError> {
    let mut buf = try_alloc(HEADER_LEN + payload.len())?;
    FrameHeader { seq, opcode }.ser(&mut buf);
    buf.put_slice(payload);

    Ok(OutboundDatagram {
        fragments: vec![Bytes::from(buf)],
    })
}

fn try_alloc(len: usize) -> Result<Vec<u8>, SendError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| SendError::OutOfResources { len })?;
    Ok(buf)
}
