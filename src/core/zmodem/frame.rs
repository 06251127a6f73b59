//! ZMODEM header and subpacket framing
//!
//! Headers and data subpackets arrive fragmented across socket reads, so every
//! parser here works against an accumulating buffer and reports how many bytes
//! it consumed; the caller advances the buffer only on `Ok` or `Bad`.

use super::codec::{self, ZDLE};
use super::{EndType, FrameType, TransferError, CAN, XON, ZPAD};

/// How a parse attempt against the buffer head turned out.
#[derive(Debug, PartialEq)]
pub enum Parsed<T> {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// The head is not a valid frame; drop `consumed` bytes and rescan.
    Bad {
        /// Bytes that belonged to the rejected frame.
        consumed: usize,
    },
    /// A frame parsed; drop `consumed` bytes.
    Ok {
        /// The parsed value.
        value: T,
        /// Bytes the frame occupied on the wire.
        consumed: usize,
    },
}

/// Header encoding as found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `** ZDLE B` + 14 hex digits, CRC-16
    Hex,
    /// `* ZDLE A`, escaped binary, CRC-16
    Bin16,
    /// `* ZDLE C`, escaped binary, CRC-32
    Bin32,
}

impl Encoding {
    /// Whether data subpackets following this header carry CRC-32.
    pub fn uses_crc32(self) -> bool {
        matches!(self, Encoding::Bin32)
    }
}

/// A protocol header: frame type plus four flag/position bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type.
    pub frame: FrameType,
    /// p0..p3: flags, or a little-endian file offset.
    pub flags: [u8; 4],
}

impl Header {
    /// Header with all-zero flags.
    pub fn new(frame: FrameType) -> Self {
        Self {
            frame,
            flags: [0; 4],
        }
    }

    /// Header with explicit flag bytes.
    pub fn with_flags(frame: FrameType, flags: [u8; 4]) -> Self {
        Self { frame, flags }
    }

    /// Header carrying a 32-bit file offset (little-endian in p0..p3).
    pub fn with_pos(frame: FrameType, pos: u32) -> Self {
        Self {
            frame,
            flags: pos.to_le_bytes(),
        }
    }

    /// The file offset encoded in p0..p3.
    pub fn pos(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    fn raw(&self) -> [u8; 5] {
        [
            self.frame as u8,
            self.flags[0],
            self.flags[1],
            self.flags[2],
            self.flags[3],
        ]
    }

    /// Serialize as a hex header: `** ZDLE B`, 14 hex digits over
    /// type+flags+CRC-16, CRLF, and XON except after ZACK and ZFIN.
    pub fn to_hex(&self) -> Vec<u8> {
        let raw = self.raw();
        let mut body = raw.to_vec();
        body.extend_from_slice(&codec::crc16(&raw).to_be_bytes());

        let mut out = vec![ZPAD, ZPAD, ZDLE, b'B'];
        out.extend_from_slice(hex::encode(&body).as_bytes());
        out.push(b'\r');
        out.push(b'\n');
        if !matches!(self.frame, FrameType::Zack | FrameType::Zfin) {
            out.push(XON);
        }
        out
    }

    /// Serialize as a binary header with ZDLE-escaped payload and CRC.
    pub fn to_binary(&self, use_crc32: bool) -> Vec<u8> {
        let raw = self.raw();
        let mut out = vec![ZPAD, ZDLE, if use_crc32 { b'C' } else { b'A' }];
        codec::extend_escaped(&mut out, &raw);
        if use_crc32 {
            codec::extend_escaped(&mut out, &codec::crc32(&raw).to_le_bytes());
        } else {
            codec::extend_escaped(&mut out, &codec::crc16(&raw).to_be_bytes());
        }
        out
    }
}

/// Pull one ZDLE-decoded byte starting at `*i`, advancing past it.
fn read_escaped(buf: &[u8], i: &mut usize) -> Option<u8> {
    let b = *buf.get(*i)?;
    if b == ZDLE {
        let next = *buf.get(*i + 1)?;
        *i += 2;
        Some(codec::unescape(next))
    } else {
        *i += 1;
        Some(b)
    }
}

/// Parse a header at the head of `buf`. The head must be the leading ZPAD.
pub fn parse_header(buf: &[u8]) -> Parsed<(Header, Encoding)> {
    if buf.is_empty() {
        return Parsed::NeedMore;
    }
    if buf[0] != ZPAD {
        return Parsed::Bad { consumed: 1 };
    }

    let mut i = 1;
    match buf.get(i) {
        None => return Parsed::NeedMore,
        Some(&ZPAD) => i += 1,
        Some(_) => {}
    }
    match buf.get(i) {
        None => return Parsed::NeedMore,
        Some(&ZDLE) => i += 1,
        Some(_) => return Parsed::Bad { consumed: i },
    }
    let encoding = match buf.get(i).copied() {
        None => return Parsed::NeedMore,
        Some(b'B') => Encoding::Hex,
        Some(b'A') => Encoding::Bin16,
        Some(b'C') => Encoding::Bin32,
        Some(_) => return Parsed::Bad { consumed: i },
    };
    i += 1;

    match encoding {
        Encoding::Hex => parse_hex_body(buf, i),
        Encoding::Bin16 | Encoding::Bin32 => parse_binary_body(buf, i, encoding),
    }
}

fn parse_hex_body(buf: &[u8], mut i: usize) -> Parsed<(Header, Encoding)> {
    if buf.len() < i + 14 {
        return Parsed::NeedMore;
    }
    let digits = &buf[i..i + 14];
    i += 14;

    let bytes = match hex::decode(digits) {
        Ok(b) => b,
        Err(_) => return Parsed::Bad { consumed: i },
    };
    let wire_crc = u16::from_be_bytes([bytes[5], bytes[6]]);
    if codec::crc16(&bytes[..5]) != wire_crc {
        return Parsed::Bad { consumed: i };
    }
    let frame = match FrameType::try_from(bytes[0]) {
        Ok(f) => f,
        Err(_) => return Parsed::Bad { consumed: i },
    };

    // Trailing CR LF (possibly with the high bit set) and XON are part of the
    // frame when already buffered; if they arrive later the resync scan will
    // discard them.
    while matches!(buf.get(i).copied(), Some(0x0D | 0x8D | 0x0A | 0x8A | XON)) {
        i += 1;
    }

    let header = Header::with_flags(frame, [bytes[1], bytes[2], bytes[3], bytes[4]]);
    Parsed::Ok {
        value: (header, Encoding::Hex),
        consumed: i,
    }
}

fn parse_binary_body(buf: &[u8], mut i: usize, encoding: Encoding) -> Parsed<(Header, Encoding)> {
    let mut raw = [0u8; 5];
    for slot in &mut raw {
        match read_escaped(buf, &mut i) {
            Some(b) => *slot = b,
            None => return Parsed::NeedMore,
        }
    }

    let crc_len = if encoding == Encoding::Bin32 { 4 } else { 2 };
    let mut crc = [0u8; 4];
    for slot in crc.iter_mut().take(crc_len) {
        match read_escaped(buf, &mut i) {
            Some(b) => *slot = b,
            None => return Parsed::NeedMore,
        }
    }

    let crc_ok = if encoding == Encoding::Bin32 {
        codec::crc32(&raw) == u32::from_le_bytes(crc)
    } else {
        codec::crc16(&raw) == u16::from_be_bytes([crc[0], crc[1]])
    };
    if !crc_ok {
        return Parsed::Bad { consumed: i };
    }
    let frame = match FrameType::try_from(raw[0]) {
        Ok(f) => f,
        Err(_) => return Parsed::Bad { consumed: i },
    };

    let header = Header::with_flags(frame, [raw[1], raw[2], raw[3], raw[4]]);
    Parsed::Ok {
        value: (header, encoding),
        consumed: i,
    }
}

/// A decoded data subpacket.
#[derive(Debug, PartialEq)]
pub struct Subpacket {
    /// Unescaped payload bytes.
    pub payload: Vec<u8>,
    /// How the subpacket terminated.
    pub end: EndType,
}

/// Serialize a data subpacket: escaped payload, `ZDLE end`, escaped CRC over
/// payload plus the end byte.
pub fn build_subpacket(payload: &[u8], end: EndType, use_crc32: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + payload.len() / 8 + 8);
    codec::extend_escaped(&mut out, payload);
    out.push(ZDLE);
    out.push(end as u8);

    let mut crc_input = payload.to_vec();
    crc_input.push(end as u8);
    if use_crc32 {
        codec::extend_escaped(&mut out, &codec::crc32(&crc_input).to_le_bytes());
    } else {
        codec::extend_escaped(&mut out, &codec::crc16(&crc_input).to_be_bytes());
    }
    out
}

/// Parse a data subpacket at the head of `buf`.
pub fn parse_subpacket(buf: &[u8], use_crc32: bool) -> Parsed<Subpacket> {
    let mut payload = Vec::new();
    let mut i = 0;

    let end = loop {
        let Some(&b) = buf.get(i) else {
            return Parsed::NeedMore;
        };
        if b == ZDLE {
            let Some(&next) = buf.get(i + 1) else {
                return Parsed::NeedMore;
            };
            i += 2;
            match EndType::try_from(next) {
                Ok(end) => break end,
                Err(_) => payload.push(codec::unescape(next)),
            }
        } else {
            payload.push(b);
            i += 1;
        }
    };

    let crc_len = if use_crc32 { 4 } else { 2 };
    let mut crc = [0u8; 4];
    for slot in crc.iter_mut().take(crc_len) {
        match read_escaped(buf, &mut i) {
            Some(b) => *slot = b,
            None => return Parsed::NeedMore,
        }
    }

    let mut crc_input = payload.clone();
    crc_input.push(end as u8);
    let crc_ok = if use_crc32 {
        codec::crc32(&crc_input) == u32::from_le_bytes(crc)
    } else {
        codec::crc16(&crc_input) == u16::from_be_bytes([crc[0], crc[1]])
    };
    if !crc_ok {
        return Parsed::Bad { consumed: i };
    }

    Parsed::Ok {
        value: Subpacket { payload, end },
        consumed: i,
    }
}

/// Stuck-prefix bound: once this much unparseable data sits at the head of
/// the buffer, resync by hunting for the next ZPAD.
const RESYNC_THRESHOLD: usize = 1024;

/// Scan the buffer for the next parseable header, discarding garbage.
///
/// Returns `Ok(None)` when more data is needed, and `Err(Cancelled)` when a
/// run of five CAN characters (the wire form of a session abort) is seen.
pub(crate) fn take_header(
    buf: &mut Vec<u8>,
) -> Result<Option<(Header, Encoding)>, TransferError> {
    loop {
        if has_cancel_run(buf) {
            return Err(TransferError::Cancelled);
        }

        // Bytes ahead of the first ZPAD can never start a header.
        match buf.iter().position(|&b| b == ZPAD) {
            Some(0) => {}
            Some(pos) => {
                buf.drain(..pos);
            }
            None => {
                if buf.len() > RESYNC_THRESHOLD {
                    buf.clear();
                }
                return Ok(None);
            }
        }

        match parse_header(buf) {
            Parsed::Ok { value, consumed } => {
                buf.drain(..consumed);
                return Ok(Some(value));
            }
            Parsed::Bad { consumed } => {
                buf.drain(..consumed.max(1));
            }
            Parsed::NeedMore => {
                if buf.len() > RESYNC_THRESHOLD {
                    // A prefix that long without completing is garbage that
                    // happens to start with ZPAD; skip past it.
                    match buf[1..].iter().position(|&b| b == ZPAD) {
                        Some(pos) => {
                            buf.drain(..pos + 1);
                            continue;
                        }
                        None => buf.clear(),
                    }
                }
                return Ok(None);
            }
        }
    }
}

/// Whether the buffer contains a run of five CAN characters.
pub(crate) fn has_cancel_run(buf: &[u8]) -> bool {
    buf.windows(5).any(|w| w.iter().all(|&b| b == CAN))
}
