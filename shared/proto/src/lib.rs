//! Wire formats for the meeting hub.
//!
//! Two transports, two formats:
//! - the reliable control channel carries `u32_be` length-prefixed JSON
//!   records tagged by a `type` field ([`frame`], [`message`]);
//! - the video/audio datagram ports carry fixed-header binary packets whose
//!   payload the hub never inspects ([`datagram`]).

pub mod datagram;
pub mod frame;
pub mod message;

pub use datagram::{AudioHeader, VideoHeader, AUDIO_HEADER_LEN, MAX_DATAGRAM_BYTES, VIDEO_HEADER_LEN};
pub use frame::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use message::{ChatRecord, Decoded, Envelope, FileRecord, Message, ParticipantRecord};

use thiserror::Error;

pub type WireResult<T> = Result<T, WireError>;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame too large: {0} > {1}")]
    Oversize(usize, usize),

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("record missing required `type` field")]
    MissingType,

    #[error("datagram too short: {0} bytes")]
    ShortDatagram(usize),

    #[error("datagram length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("read timed out mid-frame")]
    ReadTimeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
