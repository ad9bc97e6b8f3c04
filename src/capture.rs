//! Capture assembly over the ORDA frame stream
//!
//! A [`CaptureStream`] consumes frames from a [`FrameReader`] and turns each
//! I/Q data frame into one immutable [`Capture`] record, carrying forward the
//! most recent global header (samplerate/samplecount) and local header
//! (channel/center frequency/timestamp). Trigger numbers are not transmitted
//! in the file; they are assigned here as a 0-based running counter per
//! channel.
//!
//! Decoding is an inherently sequential scan: the meaning of a data frame
//! depends on the headers that preceded it. Use one `CaptureStream` per
//! file; files share nothing and may be decoded concurrently.

use std::fmt;
use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use num::complex::Complex64;
use snafu::{ensure, OptionExt, Snafu};
use tracing::{debug, trace};

use crate::frame::{
    BadTimestampSnafu, FormatError, Frame, FrameKind, FrameReader, IqSizeMismatchSnafu,
    KeyTableLengthSnafu, MissingHeaderKeySnafu,
};

/// Corrupt or reordered stream: a data frame arrived before the headers
/// required to interpret it. Fatal to the current file.
#[derive(Debug, Snafu)]
pub enum StateError {
    #[snafu(display("I/Q data frame before any global header"))]
    DataBeforeGlobalHeader,

    #[snafu(display("I/Q data frame before any local header"))]
    DataBeforeLocalHeader,
}

/// Anything that can go wrong while decoding a capture file.
#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(transparent)]
    Format { source: FormatError },

    #[snafu(transparent)]
    State { source: StateError },
}

/// One digitized acquisition window with its metadata.
///
/// Constructed exactly once, when its data frame is fully read. All fields
/// are public; `trigger_number` in particular is reassigned by workflows
/// that need a different windowing of repeats than arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// 0-based sequence index within this capture's channel.
    pub trigger_number: u32,
    /// Hardware channel the samples came from.
    pub channel_number: u16,
    /// Acquisition time, millisecond resolution.
    pub timestamp: DateTime<Utc>,
    /// Tuned center frequency in Hz.
    ///
    /// A value of 0 is a known hardware quirk (leakage artifact); consumers
    /// are expected to filter such captures out.
    pub center_freq: u64,
    /// Sample rate in Hz.
    pub samplerate: u64,
    /// Number of complex samples in this block.
    pub samplecount: usize,
    /// Raw I/Q sample codes, `iq.len() == samplecount`. No scaling to
    /// physical units is applied at this layer.
    pub iq: Vec<Complex64>,
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Capture(trigger_number={}, channel={}, timestamp={}, \
             center_freq={}, samplerate={}, samplecount={})",
            self.trigger_number,
            self.channel_number,
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.center_freq,
            self.samplerate,
            self.samplecount,
        )
    }
}

/// State carried from the most recent type-3 frame.
#[derive(Debug, Clone, Copy)]
struct GlobalHeader {
    samplerate: u64,
    samplecount: usize,
}

/// State carried from the most recent type-1 frame.
#[derive(Debug, Clone, Copy)]
struct LocalHeader {
    channel: u16,
    center_freq: u64,
    timestamp: DateTime<Utc>,
}

/// Header payloads are a table of little-endian `(key, value)` u16 pairs,
/// 4 bytes per record. Later duplicates win; unknown keys are ignored for
/// forward compatibility.
fn parse_key_table(payload: &[u8]) -> Result<Vec<(u16, u16)>, FormatError> {
    ensure!(
        payload.len() % 4 == 0,
        KeyTableLengthSnafu { len: payload.len() }
    );

    Ok(payload
        .chunks_exact(4)
        .map(|rec| {
            let key = u16::from_le_bytes([rec[0], rec[1]]);
            let value = u16::from_le_bytes([rec[2], rec[3]]);
            (key, value)
        })
        .collect())
}

fn require_key(pairs: &[(u16, u16)], key: u16) -> Result<u16, FormatError> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .context(MissingHeaderKeySnafu { key })
}

/// Global header keys: 30 = samplerate in kHz, 3 = samples per block.
fn parse_global(payload: &[u8]) -> Result<GlobalHeader, FormatError> {
    let pairs = parse_key_table(payload)?;
    let header = GlobalHeader {
        samplerate: u64::from(require_key(&pairs, 30)?) * 1000,
        samplecount: usize::from(require_key(&pairs, 3)?),
    };
    debug!(
        samplerate = header.samplerate,
        samplecount = header.samplecount,
        "global header"
    );
    Ok(header)
}

/// Local header keys: 7 = channel, 16/17 = center frequency in kHz split
/// into low/high u16 halves, 9..13 = packed timestamp fields.
fn parse_local(payload: &[u8]) -> Result<LocalHeader, FormatError> {
    let pairs = parse_key_table(payload)?;

    let channel = require_key(&pairs, 7)?;
    let freq_lo = u64::from(require_key(&pairs, 16)?);
    let freq_hi = u64::from(require_key(&pairs, 17)?);
    let center_freq = (freq_hi * 65536 + freq_lo) * 1000;

    let year = require_key(&pairs, 9)?;
    let month_day = require_key(&pairs, 10)?;
    let hour_minute = require_key(&pairs, 11)?;
    let second = require_key(&pairs, 12)?;
    let millisecond = require_key(&pairs, 13)?;

    let month = month_day / 256;
    let day = month_day & 0xFF;
    let hour = hour_minute & 0xFF;
    let minute = hour_minute / 256;

    let timestamp = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
        .and_then(|date| {
            date.and_hms_milli_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                u32::from(millisecond),
            )
        })
        .map(|naive| naive.and_utc())
        .context(BadTimestampSnafu {
            year,
            month,
            day,
            hour,
            minute,
            second,
            millisecond,
        })?;

    debug!(channel, center_freq, %timestamp, "local header");
    Ok(LocalHeader {
        channel,
        center_freq,
        timestamp,
    })
}

/// Data payload is `2 * samplecount` little-endian i16: the FIRST half is
/// the imaginary parts, the SECOND half the real parts.
fn decode_iq(payload: &[u8], samplecount: usize) -> Result<Vec<Complex64>, FormatError> {
    ensure!(
        payload.len() == samplecount * 4,
        IqSizeMismatchSnafu {
            samplecount,
            payload_len: payload.len()
        }
    );

    let (imag_bytes, real_bytes) = payload.split_at(samplecount * 2);
    let iq = real_bytes
        .chunks_exact(2)
        .zip(imag_bytes.chunks_exact(2))
        .map(|(re, im)| {
            Complex64::new(
                f64::from(i16::from_le_bytes([re[0], re[1]])),
                f64::from(i16::from_le_bytes([im[0], im[1]])),
            )
        })
        .collect();
    Ok(iq)
}

/// Stateful assembler turning a frame stream into [`Capture`] records.
///
/// The iterator is lazy and drains the underlying byte stream; construct a
/// fresh `CaptureStream` per stream, it is not restartable.
pub struct CaptureStream<R> {
    frames: FrameReader<R>,
    global: Option<GlobalHeader>,
    local: Option<LocalHeader>,
    /// Per-channel trigger counters, grown lazily as channels appear.
    triggers: Vec<u32>,
}

impl<R: Read> CaptureStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            frames: FrameReader::new(reader),
            global: None,
            local: None,
            triggers: Vec::new(),
        }
    }

    /// Advance to the next I/Q data frame and assemble a capture from it,
    /// or `None` at a clean end of stream.
    pub fn next_capture(&mut self) -> Result<Option<Capture>, DecodeError> {
        while let Some(frame) = self.frames.next_frame()? {
            match frame.kind {
                FrameKind::GlobalHeader => self.global = Some(parse_global(&frame.payload)?),
                FrameKind::LocalHeader => self.local = Some(parse_local(&frame.payload)?),
                FrameKind::IqData => return Ok(Some(self.assemble(&frame)?)),
                FrameKind::Unknown(type_byte) => {
                    trace!(type_byte, len = frame.payload.len(), "skipping unknown frame");
                }
            }
        }
        Ok(None)
    }

    /// Eagerly decode the rest of the stream into an ordered collection.
    pub fn all_captures(mut self) -> Result<Vec<Capture>, DecodeError> {
        let mut captures = Vec::new();
        while let Some(capture) = self.next_capture()? {
            captures.push(capture);
        }
        Ok(captures)
    }

    fn assemble(&mut self, frame: &Frame) -> Result<Capture, DecodeError> {
        let global = self.global.ok_or(StateError::DataBeforeGlobalHeader)?;
        let local = self.local.ok_or(StateError::DataBeforeLocalHeader)?;

        let iq = decode_iq(&frame.payload, global.samplecount)?;

        let channel = usize::from(local.channel);
        if self.triggers.len() <= channel {
            self.triggers.resize(channel + 1, 0);
        }
        let trigger_number = self.triggers[channel];
        self.triggers[channel] += 1;

        Ok(Capture {
            trigger_number,
            channel_number: local.channel,
            timestamp: local.timestamp,
            center_freq: local.center_freq,
            samplerate: global.samplerate,
            samplecount: global.samplecount,
            iq,
        })
    }
}

impl<R: Read> Iterator for CaptureStream<R> {
    type Item = Result<Capture, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_capture().transpose()
    }
}
