//! Request framing and response frame decoding.

use thiserror::Error;

use crate::command::Command;
use crate::crc::checksum;

/// Header sent in front of every query.
pub const REQUEST_HEADER: [u8; 6] = [0x02, 0xFD, 0xD0, 0xE0, 0x00, 0x00];

/// Header of an ordinary reply. Checksum is enforced.
pub const REPLY_HEADER: [u8; 6] = [0x02, 0xFD, 0xE0, 0xD0, 0x00, 0x00];

/// Header of a long reply (seen e.g. for `MP,NR=16`). The controller sends a
/// fixed checksum byte of 0x00 for these.
pub const REPLY_HEADER_LONG: [u8; 6] = [0x02, 0xFD, 0xE0, 0xD0, 0x04, 0x00];

/// Header of an error-style reply. The controller may declare a length of
/// zero and sends a fixed checksum byte of 0x75.
pub const REPLY_HEADER_ERROR: [u8; 6] = [0x02, 0xFD, 0xE0, 0xD0, 0x02, 0x00];

/// Byte separating the header/length from the ASCII payload. Counted by the
/// length byte.
pub const PREFIX: u8 = 0x7E;

/// Checksum byte the controller sends with [`REPLY_HEADER_ERROR`] frames.
const ERROR_REPLY_CRC: u8 = 0x75;

/// Frame-level decoding failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected reply header {0:02x?}")]
    Header([u8; 6]),
    #[error("unexpected payload prefix {0:#04x} (want 0x7e)")]
    Prefix(u8),
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    Checksum { computed: u8, received: u8 },
    #[error("declared payload length {0} is invalid")]
    Length(u8),
}

/// A successfully decoded reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// ASCII payload with the prefix byte and any trailing CRLF removed.
    pub payload: Vec<u8>,
    /// Number of bytes of the input buffer this frame occupied. Anything
    /// beyond it belongs to a following frame.
    pub consumed: usize,
}

/// Frame a command for transmission.
///
/// Layout: header, length byte (prefix + command), prefix, ASCII command,
/// checksum over everything before it.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let ascii = command.wire_bytes();
    let mut frame = Vec::with_capacity(REQUEST_HEADER.len() + 2 + ascii.len() + 1);
    frame.extend_from_slice(&REQUEST_HEADER);
    frame.push((ascii.len() + 1) as u8);
    frame.push(PREFIX);
    frame.extend_from_slice(&ascii);
    frame.push(checksum(&frame));
    frame
}

/// Frame a reply payload the way the controller does.
///
/// Used by device simulators in tests; the exporter itself only decodes.
pub fn encode_reply(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REPLY_HEADER.len() + 2 + payload.len() + 1);
    frame.extend_from_slice(&REPLY_HEADER);
    frame.push((payload.len() + 1) as u8);
    frame.push(PREFIX);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Try to decode one reply frame from the front of `buf`.
///
/// Returns `Ok(None)` while the buffer does not yet hold a complete frame.
/// Bytes beyond the decoded frame are left for the caller (`consumed` tells
/// where the frame ended); an incomplete frame never yields partial data.
pub fn decode_frame(buf: &[u8]) -> Result<Option<DecodedFrame>, FrameError> {
    // header (6) + length (1) + prefix (1) at minimum before we can judge
    if buf.len() < 8 {
        return Ok(None);
    }

    let header: [u8; 6] = buf[..6].try_into().unwrap();
    if header != REPLY_HEADER && header != REPLY_HEADER_LONG && header != REPLY_HEADER_ERROR {
        return Err(FrameError::Header(header));
    }

    let declared = buf[6] as usize;
    let length = if declared == 0 {
        if header != REPLY_HEADER_ERROR {
            return Err(FrameError::Length(0));
        }
        // Error replies declare length 0; treat the rest of the buffer as
        // one frame (prefix + payload + checksum).
        if buf.len() < 9 {
            return Ok(None);
        }
        buf.len() - 6 - 1 - 1
    } else {
        declared
    };

    let total = 6 + 1 + length + 1;
    if buf.len() < total {
        return Ok(None);
    }

    let received = buf[total - 1];
    let computed = checksum(&buf[..total - 1]);
    if received != computed {
        let exempt = (header == REPLY_HEADER_LONG && received == 0)
            || (header == REPLY_HEADER_ERROR && received == ERROR_REPLY_CRC);
        if !exempt {
            return Err(FrameError::Checksum { computed, received });
        }
    }

    if buf[7] != PREFIX {
        return Err(FrameError::Prefix(buf[7]));
    }

    let mut payload = buf[8..total - 1].to_vec();
    if payload.ends_with(b"\r\n") {
        payload.truncate(payload.len() - 2);
    }

    Ok(Some(DecodedFrame {
        payload,
        consumed: total,
    }))
}

/// Number of leading bytes to discard to reach the next plausible frame
/// start. Used to resynchronize after garbage on the line.
pub fn resync(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|&b| b == 0x02)
        .map(|pos| pos + 1)
        .unwrap_or(buf.len())
}
