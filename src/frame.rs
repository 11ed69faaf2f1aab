use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::FrameError;

/// Size of the fixed frame header: sequence number (u32 BE) followed by opcode (u32 BE)
pub const HEADER_LEN: usize = 8;

/// The kind of a frame. The numeric values go on the wire and must match between peers.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum OpCode {
    /// application payload, sequenced and acknowledged
    Data = 1,
    /// acknowledges the DATA frame with the same sequence number
    DataAck = 2,
    /// liveness check, answered with PROBE_ACK
    Probe = 3,
    ProbeAck = 4,
}

impl OpCode {
    /// Only DATA frames carry a payload, so only DATA frames must be longer than the header.
    pub fn requires_payload(self) -> bool {
        self == OpCode::Data
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameHeader {
    pub seq: u32,
    pub opcode: OpCode,
}

impl FrameHeader {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.seq);
        buf.put_u32(self.opcode.into());
    }

    pub fn deser(buf: &mut impl Buf) -> Result<FrameHeader, FrameError> {
        if buf.remaining() < HEADER_LEN {
            return Err(FrameError::TooShort { len: buf.remaining() });
        }

        let seq = buf.get_u32();
        let raw_opcode = buf.get_u32();
        let opcode = OpCode::try_from(raw_opcode)
            .map_err(|_| FrameError::UnknownOpCode(raw_opcode))?;

        Ok(FrameHeader {
            seq,
            opcode,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Frame {
    pub seq: u32,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            seq: self.seq,
            opcode: self.opcode,
        }
    }
}

pub fn encode(seq: u32, opcode: OpCode, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    FrameHeader { seq, opcode }.ser(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn decode(datagram: &[u8]) -> Result<Frame, FrameError> {
    let mut buf = datagram;
    let header = FrameHeader::deser(&mut buf)?;

    if header.opcode.requires_payload() && buf.is_empty() {
        return Err(FrameError::TooShort { len: datagram.len() });
    }

    Ok(Frame {
        seq: header.seq,
        opcode: header.opcode,
        payload: Bytes::copy_from_slice(buf),
    })
}
