// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing for events.
//!
//! A frame is a fixed-width header, a section-length block and four JSON
//! sections:
//!
//! ```text
//! #frameNewframe#v3.0:001234\n
//! 04,1,000060,1,000080,1,000005,1,000000\n
//! <routing><envelope><sys-params><exec-params>
//! ```
//!
//! The six-digit payload length counts everything after the first
//! newline. Any section may be zero length. Parsing is strict on the
//! header shape and tolerant of unknown JSON keys inside sections.

use crate::event::{Event, EventKind, ExecParams, SysParams};
use crate::route::ReturnRoute;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FRAME_HEADER: &str = "#frameNewframe#v";
pub const PROTOCOL_VERSION: &str = "3.0";

/// `#frameNewframe#v` + `3.0` + `:NNNNNN\n`
pub const FRAME_HEADER_LEN: usize = 27;

/// `04,1,NNNNNN,1,NNNNNN,1,NNNNNN,1,NNNNNN\n`
pub const BLOCK_HEADER_LEN: usize = 39;

const SECTION_COUNT: usize = 4;
const MAX_PAYLOAD_LEN: usize = 999_999;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("truncated payload: have {have} bytes, need {need}")]
    TruncatedPayload { have: usize, need: usize },

    #[error("section {section} parse error: {source}")]
    SectionParse {
        section: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("frame payload too large: {len} bytes")]
    PayloadTooLarge { len: usize },
}

/// Routing section — always present.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RoutingSection {
    #[serde(rename = "eventType", default)]
    event_type: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    reference: String,
    #[serde(rename = "returnFd", default, skip_serializing_if = "String::is_empty")]
    return_fd: String,
    #[serde(rename = "destQueue", default, skip_serializing_if = "String::is_empty")]
    dest_queue: String,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn default_lifetime() -> i64 {
    -1
}

fn is_default_lifetime(v: &i64) -> bool {
    *v == -1
}

/// Envelope section — trace, expiry, retry and addressing metadata.
/// Zero-valued fields are omitted, so a default envelope serializes to
/// nothing at all.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct EnvelopeSection {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    trace: String,
    #[serde(rename = "traceTimestamp", default, skip_serializing_if = "String::is_empty")]
    trace_timestamp: String,
    #[serde(rename = "expiryTime", default, skip_serializing_if = "is_zero_u64")]
    expiry_time: u64,
    #[serde(default = "default_lifetime", skip_serializing_if = "is_default_lifetime")]
    lifetime: i64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    retries: u32,
    #[serde(rename = "wpid", default, skip_serializing_if = "is_zero_u32")]
    worker_pid: u32,
    #[serde(rename = "readyTime", default, skip_serializing_if = "is_zero_u64")]
    ready_time: u64,
}

/// Serialize an event into one complete frame.
pub fn serialize(event: &Event) -> Result<Vec<u8>, FrameError> {
    let routing = RoutingSection {
        event_type: event.kind.wire_code(),
        reference: event.reference.clone(),
        return_fd: event.return_route.to_string(),
        dest_queue: event.dest_queue.clone(),
    };
    let envelope = EnvelopeSection {
        trace: event.trace.clone(),
        trace_timestamp: event.trace_timestamp.clone(),
        expiry_time: event.expiry,
        lifetime: event.lifetime,
        retries: event.retries,
        worker_pid: event.worker_pid,
        ready_time: event.ready_time,
    };

    let s1 = serde_json::to_string(&routing)
        .map_err(|e| FrameError::MalformedFrame(format!("routing encode: {}", e)))?;
    let s2 = if envelope == EnvelopeSection::default() {
        String::new()
    } else {
        serde_json::to_string(&envelope)
            .map_err(|e| FrameError::MalformedFrame(format!("envelope encode: {}", e)))?
    };
    let s3 = if event.sys.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&event.sys)
            .map_err(|e| FrameError::MalformedFrame(format!("sys encode: {}", e)))?
    };
    let s4 = if event.params.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&event.params)
            .map_err(|e| FrameError::MalformedFrame(format!("params encode: {}", e)))?
    };

    let payload_len = BLOCK_HEADER_LEN + s1.len() + s2.len() + s3.len() + s4.len();
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge { len: payload_len });
    }

    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload_len);
    out.extend_from_slice(
        format!("{}{}:{:06}\n", FRAME_HEADER, PROTOCOL_VERSION, payload_len).as_bytes(),
    );
    out.extend_from_slice(
        format!(
            "{:02},1,{:06},1,{:06},1,{:06},1,{:06}\n",
            SECTION_COUNT,
            s1.len(),
            s2.len(),
            s3.len(),
            s4.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(s1.as_bytes());
    out.extend_from_slice(s2.as_bytes());
    out.extend_from_slice(s3.as_bytes());
    out.extend_from_slice(s4.as_bytes());
    Ok(out)
}

/// Validate the fixed-width frame header and return the payload length.
///
/// `header` must hold at least [`FRAME_HEADER_LEN`] bytes; incremental
/// readers call this on the first 27 bytes, then read the payload.
pub fn parse_header(header: &[u8]) -> Result<usize, FrameError> {
    if header.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TruncatedPayload { have: header.len(), need: FRAME_HEADER_LEN });
    }
    let expected = format!("{}{}:", FRAME_HEADER, PROTOCOL_VERSION);
    if &header[..expected.len()] != expected.as_bytes() {
        return Err(FrameError::MalformedFrame("bad frame magic or protocol version".into()));
    }
    if header[FRAME_HEADER_LEN - 1] != b'\n' {
        return Err(FrameError::MalformedFrame("missing header terminator".into()));
    }
    let digits = &header[expected.len()..FRAME_HEADER_LEN - 1];
    let len_str = std::str::from_utf8(digits)
        .map_err(|_| FrameError::MalformedFrame("non-ascii payload length".into()))?;
    len_str
        .parse::<usize>()
        .map_err(|_| FrameError::MalformedFrame(format!("bad payload length '{}'", len_str)))
}

/// Parse the payload (everything after the frame header) into an event.
pub fn parse_payload(payload: &[u8]) -> Result<Event, FrameError> {
    if payload.len() < BLOCK_HEADER_LEN {
        return Err(FrameError::TruncatedPayload { have: payload.len(), need: BLOCK_HEADER_LEN });
    }
    let block = std::str::from_utf8(&payload[..BLOCK_HEADER_LEN])
        .map_err(|_| FrameError::MalformedFrame("non-ascii section block".into()))?;
    if !block.ends_with('\n') {
        return Err(FrameError::MalformedFrame("missing section block terminator".into()));
    }

    // 04,1,NNNNNN,1,NNNNNN,1,NNNNNN,1,NNNNNN
    let fields: Vec<&str> = block.trim_end().split(',').collect();
    if fields.len() != 1 + 2 * SECTION_COUNT {
        return Err(FrameError::MalformedFrame(format!("bad section block '{}'", block.trim_end())));
    }
    let count: usize = fields[0]
        .parse()
        .map_err(|_| FrameError::MalformedFrame(format!("bad section count '{}'", fields[0])))?;
    if count != SECTION_COUNT {
        return Err(FrameError::MalformedFrame(format!("unsupported section count {}", count)));
    }
    let mut lens = [0usize; SECTION_COUNT];
    for (i, len) in lens.iter_mut().enumerate() {
        if fields[1 + 2 * i] != "1" {
            return Err(FrameError::MalformedFrame(format!(
                "bad section type marker '{}'",
                fields[1 + 2 * i]
            )));
        }
        *len = fields[2 + 2 * i].parse().map_err(|_| {
            FrameError::MalformedFrame(format!("bad section length '{}'", fields[2 + 2 * i]))
        })?;
    }

    let need = BLOCK_HEADER_LEN + lens.iter().sum::<usize>();
    if payload.len() < need {
        return Err(FrameError::TruncatedPayload { have: payload.len(), need });
    }

    let mut offset = BLOCK_HEADER_LEN;
    let mut sections: [&[u8]; SECTION_COUNT] = [&[]; SECTION_COUNT];
    for (i, len) in lens.iter().enumerate() {
        sections[i] = &payload[offset..offset + len];
        offset += len;
    }

    let routing: RoutingSection = parse_section(1, sections[0])?;
    let envelope: EnvelopeSection = parse_section(2, sections[1])?;
    let sys: SysParams = parse_section(3, sections[2])?;
    let params: ExecParams = if sections[3].is_empty() {
        ExecParams::Empty
    } else {
        serde_json::from_slice(sections[3])
            .map_err(|source| FrameError::SectionParse { section: 4, source })?
    };

    let mut event = Event::new(EventKind::from_wire(routing.event_type));
    event.reference = routing.reference;
    event.return_route = ReturnRoute::parse(&routing.return_fd);
    event.dest_queue = routing.dest_queue;
    event.trace = envelope.trace;
    event.trace_timestamp = envelope.trace_timestamp;
    event.expiry = envelope.expiry_time;
    event.lifetime = envelope.lifetime;
    event.retries = envelope.retries;
    event.worker_pid = envelope.worker_pid;
    event.ready_time = envelope.ready_time;
    event.sys = sys;
    event.params = params;
    Ok(event)
}

fn parse_section<T: Default + for<'de> Deserialize<'de>>(
    section: usize,
    bytes: &[u8],
) -> Result<T, FrameError> {
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|source| FrameError::SectionParse { section, source })
}

/// Parse one complete frame. Trailing bytes beyond the framed length are
/// an error — stream readers must split frames before calling this.
pub fn parse(bytes: &[u8]) -> Result<Event, FrameError> {
    let payload_len = parse_header(bytes)?;
    let payload = &bytes[FRAME_HEADER_LEN..];
    if payload.len() < payload_len {
        return Err(FrameError::TruncatedPayload {
            have: payload.len(),
            need: payload_len,
        });
    }
    if payload.len() > payload_len {
        return Err(FrameError::MalformedFrame(format!(
            "{} trailing bytes after frame",
            payload.len() - payload_len
        )));
    }
    parse_payload(payload)
}

/// A frame being written to a non-blocking sink.
///
/// `write_to` pushes as many bytes as the sink will take; on
/// `WouldBlock` it returns `Ok(false)` and the caller retries under
/// write-readiness with the same `PartialFrame`.
#[derive(Debug)]
pub struct PartialFrame {
    buf: Vec<u8>,
    written: usize,
}

impl PartialFrame {
    pub fn new(event: &Event) -> Result<Self, FrameError> {
        Ok(Self { buf: serialize(event)?, written: 0 })
    }

    pub fn is_complete(&self) -> bool {
        self.written >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    pub fn write_to<W: std::io::Write>(&mut self, w: &mut W) -> std::io::Result<bool> {
        while self.written < self.buf.len() {
            match w.write(&self.buf[self.written..]) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "sink accepted zero bytes",
                    ))
                }
                Ok(n) => self.written += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
