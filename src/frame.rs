//! Low-level framing for the ORDA capture format
//!
//! An ORDA file is a flat sequence of frames, each consisting of a fixed
//! 9-byte header (4-byte magic, 1-byte frame type, 4-byte little-endian
//! payload length) followed by the payload. This module knows nothing about
//! what the payloads mean; see [`crate::capture`] for the semantic layer.

use std::io::Read;

use snafu::{ensure, ResultExt, Snafu};

/// Magic literal at the start of every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"ORDA";

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 9;

/// Malformed file content. Always fatal to the current file: once framing
/// is off, every subsequent frame boundary is suspect.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FormatError {
    #[snafu(display("failed to read from capture stream"))]
    Read { source: std::io::Error },

    #[snafu(display("bad frame magic {found:02x?}, expected {FRAME_MAGIC:02x?}"))]
    BadMagic { found: [u8; 4] },

    #[snafu(display("truncated frame header: got {got} of {FRAME_HEADER_LEN} bytes"))]
    TruncatedHeader { got: usize },

    #[snafu(display("truncated frame payload: header declared {declared} bytes"))]
    TruncatedPayload { declared: usize },

    #[snafu(display("header key/value table length {len} is not a multiple of 4"))]
    KeyTableLength { len: usize },

    #[snafu(display("header is missing required key {key}"))]
    MissingHeaderKey { key: u16 },

    #[snafu(display(
        "header timestamp fields do not form a valid UTC instant: \
         {year}-{month}-{day} {hour}:{minute}:{second}.{millisecond:03}"
    ))]
    BadTimestamp {
        year: u16,
        month: u16,
        day: u16,
        hour: u16,
        minute: u16,
        second: u16,
        millisecond: u16,
    },

    #[snafu(display(
        "I/Q payload is {payload_len} bytes, expected {} for {samplecount} samples",
        samplecount * 4
    ))]
    IqSizeMismatch {
        samplecount: usize,
        payload_len: usize,
    },
}

/// Frame type tag.
///
/// The format reserves type values beyond the three in active use; those
/// decode to [`FrameKind::Unknown`] and are skipped by the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Type 1: per-channel header (channel, center frequency, timestamp).
    LocalHeader,
    /// Type 2: one block of I/Q samples.
    IqData,
    /// Type 3: global header (samplerate, samplecount).
    GlobalHeader,
    /// Reserved/diagnostic frame types, skipped on read.
    Unknown(u8),
}

impl From<u8> for FrameKind {
    fn from(type_byte: u8) -> Self {
        match type_byte {
            1 => FrameKind::LocalHeader,
            2 => FrameKind::IqData,
            3 => FrameKind::GlobalHeader,
            other => FrameKind::Unknown(other),
        }
    }
}

impl FrameKind {
    pub fn type_byte(self) -> u8 {
        match self {
            FrameKind::LocalHeader => 1,
            FrameKind::IqData => 2,
            FrameKind::GlobalHeader => 3,
            FrameKind::Unknown(other) => other,
        }
    }
}

/// One decoded frame: type tag plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

/// Sequential frame decoder over a byte source.
///
/// Stateless apart from the position of the underlying reader; the running
/// header state lives in [`crate::capture::CaptureStream`].
pub struct FrameReader<R> {
    reader: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next frame, or `None` at a clean end of stream.
    ///
    /// A clean end is zero bytes available at a frame boundary. Anything
    /// else (partial header, wrong magic, short payload) is a
    /// [`FormatError`].
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FormatError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut filled = 0;

        while filled < FRAME_HEADER_LEN {
            let n = self.reader.read(&mut header[filled..]).context(ReadSnafu)?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        ensure!(filled == FRAME_HEADER_LEN, TruncatedHeaderSnafu { got: filled });

        let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
        ensure!(magic == FRAME_MAGIC, BadMagicSnafu { found: magic });

        let kind = FrameKind::from(header[4]);
        let declared =
            u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;

        let mut payload = vec![0u8; declared];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FormatError::TruncatedPayload { declared }
            } else {
                FormatError::Read { source: e }
            }
        })?;

        Ok(Some(Frame { kind, payload }))
    }
}
