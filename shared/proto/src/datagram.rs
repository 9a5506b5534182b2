//! A/V datagram headers.
//!
//! Video (port default 8889):
//!   0:  u32_be client_id
//!   4:  u32_be sequence
//!   8:  u32_be frame_size
//!   12: frame_size bytes of codec-compressed frame
//!
//! Audio (port default 8890):
//!   0:  u32_be client_id
//!   4:  u32_be timestamp
//!   8:  payload bytes
//!
//! Payloads are opaque; the hub forwards the datagram verbatim and never
//! transcodes. Sequence numbers pass through for client-side reordering.

use bytes::{Buf, BufMut, BytesMut};

use crate::{WireError, WireResult};

pub const VIDEO_HEADER_LEN: usize = 12;
pub const AUDIO_HEADER_LEN: usize = 8;

/// Hard cap on a single datagram (LAN jumbo headroom).
pub const MAX_DATAGRAM_BYTES: usize = 9000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoHeader {
    pub client_id: u32,
    pub sequence: u32,
    pub frame_size: u32,
}

impl VideoHeader {
    /// Validate and parse the header of `datagram`.
    ///
    /// The declared `frame_size` must match the bytes actually present;
    /// trailing garbage means a corrupt or forged packet.
    pub fn parse(datagram: &[u8]) -> WireResult<Self> {
        if datagram.len() > MAX_DATAGRAM_BYTES {
            return Err(WireError::Oversize(datagram.len(), MAX_DATAGRAM_BYTES));
        }
        if datagram.len() < VIDEO_HEADER_LEN {
            return Err(WireError::ShortDatagram(datagram.len()));
        }
        let mut buf = datagram;
        let hdr = Self {
            client_id: buf.get_u32(),
            sequence: buf.get_u32(),
            frame_size: buf.get_u32(),
        };
        let actual = datagram.len() - VIDEO_HEADER_LEN;
        if hdr.frame_size as usize != actual {
            return Err(WireError::LengthMismatch { declared: hdr.frame_size as usize, actual });
        }
        Ok(hdr)
    }

    pub fn encode(&self, payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(VIDEO_HEADER_LEN + payload.len());
        out.put_u32(self.client_id);
        out.put_u32(self.sequence);
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioHeader {
    pub client_id: u32,
    pub timestamp: u32,
}

impl AudioHeader {
    pub fn parse(datagram: &[u8]) -> WireResult<Self> {
        if datagram.len() > MAX_DATAGRAM_BYTES {
            return Err(WireError::Oversize(datagram.len(), MAX_DATAGRAM_BYTES));
        }
        if datagram.len() < AUDIO_HEADER_LEN {
            return Err(WireError::ShortDatagram(datagram.len()));
        }
        let mut buf = datagram;
        Ok(Self { client_id: buf.get_u32(), timestamp: buf.get_u32() })
    }

    pub fn encode(&self, payload: &[u8]) -> BytesMut {
        let mut out = BytesMut::with_capacity(AUDIO_HEADER_LEN + payload.len());
        out.put_u32(self.client_id);
        out.put_u32(self.timestamp);
        out.put_slice(payload);
        out
    }
}
