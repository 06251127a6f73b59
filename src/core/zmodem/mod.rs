//! ZMODEM file transfer engine
//!
//! ZMODEM is a streaming file transfer protocol with:
//! - CRC-framed headers (hex and binary, 16- or 32-bit)
//! - ZDLE byte stuffing so frames survive software flow control
//! - Resume via receiver-driven ZRPOS repositioning
//! - Batch transfers (multiple files per session)
//!
//! The receiver and sender here are synchronous state machines fed from the
//! telnet reader task: bytes in, wire bytes and progress events out. All file
//! I/O happens inline from the feeding task.

pub mod codec;
pub mod frame;
pub mod receive;
pub mod send;

pub use receive::Receiver;
pub use send::Sender;

use bitflags::bitflags;
use std::path::PathBuf;
use thiserror::Error;

/// Frame padding character.
pub const ZPAD: u8 = b'*';

/// Session abort character; a run of five cancels the transfer.
pub const CAN: u8 = 0x18;

/// Software flow-control resume, appended to most hex headers.
pub const XON: u8 = 0x11;

/// Unescaped data subpacket payload size, per the 1988 protocol description.
pub const BLOCK_SIZE: usize = 1024;

/// Hard cap on the reassembly buffer. Exceeding it is a fatal protocol error.
pub const MAX_BUFFER: usize = 64 * 1024;

/// Largest file either side will agree to move.
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Transfer-level retry bound (ZRPOS rounds, garbled subpackets).
pub const MAX_RETRIES: u32 = 5;

/// Frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Request receive init
    Zrqinit = 0,
    /// Receiver capabilities
    Zrinit = 1,
    /// Sender init sequence (optional)
    Zsinit = 2,
    /// ACK to ZCRCQ/ZCRCW data or ZSINIT
    Zack = 3,
    /// File name and info from sender
    Zfile = 4,
    /// To sender: skip this file
    Zskip = 5,
    /// Last frame was garbled
    Znak = 6,
    /// Abort batch transfers
    Zabort = 7,
    /// Finish session
    Zfin = 8,
    /// Resume data at this position
    Zrpos = 9,
    /// Data subpackets follow
    Zdata = 10,
    /// End of file
    Zeof = 11,
    /// Other end cancelled the session
    Zcan = 16,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => Self::Zrqinit,
            1 => Self::Zrinit,
            2 => Self::Zsinit,
            3 => Self::Zack,
            4 => Self::Zfile,
            5 => Self::Zskip,
            6 => Self::Znak,
            7 => Self::Zabort,
            8 => Self::Zfin,
            9 => Self::Zrpos,
            10 => Self::Zdata,
            11 => Self::Zeof,
            16 => Self::Zcan,
            other => return Err(other),
        })
    }
}

/// Data subpacket terminators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EndType {
    /// Frame ends, header follows
    Zcrce = 0x68,
    /// Frame continues nonstop
    Zcrcg = 0x69,
    /// Frame continues, ZACK expected
    Zcrcq = 0x6A,
    /// Frame ends, ZACK expected
    Zcrcw = 0x6B,
}

impl TryFrom<u8> for EndType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x68 => Self::Zcrce,
            0x69 => Self::Zcrcg,
            0x6A => Self::Zcrcq,
            0x6B => Self::Zcrcw,
            other => return Err(other),
        })
    }
}

bitflags! {
    /// Receiver capability flags carried in ZRINIT p3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Zrinit: u8 {
        /// Can send and receive in full duplex
        const CANFDX = 0x01;
        /// Can receive data in parallel with disk I/O
        const CANOVIO = 0x02;
        /// Can send a break signal
        const CANBRK = 0x04;
        /// Can use 32-bit frame checks
        const CANFC32 = 0x20;
    }
}

/// The out-of-band abort sequence: eight CANs to kill the remote state
/// machine, eight backspaces to erase them from a terminal that echoed them.
pub fn abort_sequence() -> [u8; 16] {
    let mut seq = [0x08u8; 16];
    seq[..8].fill(CAN);
    seq
}

/// Progress and lifecycle notifications produced by either engine.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A file transfer has been negotiated.
    Started {
        /// Name as it appears on the wire (receiver: after normalization).
        name: String,
        /// Declared size in bytes; 0 when unknown.
        size: u64,
    },
    /// Bytes moved.
    Progress {
        /// Bytes transferred so far.
        bytes: u64,
        /// Declared total; 0 when unknown.
        total: u64,
        /// Observed rate in kB/s.
        rate_kbps: f64,
    },
    /// A file (receive) or the transfer (send) concluded.
    Finished {
        /// Materialized path (receive) or source path (send).
        path: PathBuf,
        /// False when the transfer was cancelled or aborted.
        success: bool,
    },
    /// The transfer failed; the engine is done.
    Error(String),
}

/// ZMODEM transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// File I/O failed
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reassembly buffer exceeded the 64 KB cap
    #[error("protocol buffer overflow")]
    BufferOverflow,

    /// Resolved target escapes the download directory
    #[error("path traversal")]
    PathTraversal,

    /// Retry bound exhausted
    #[error("too many retries")]
    TooManyRetries,

    /// A transfer-level timeout fired
    #[error("transfer timed out: {0}")]
    Timeout(&'static str),

    /// The remote side cancelled the session
    #[error("cancelled by server")]
    Cancelled,

    /// Upload source does not exist
    #[error("file not found: {0}")]
    FileMissing(PathBuf),

    /// Upload source is not a regular file
    #[error("not a regular file: {0}")]
    NotAFile(PathBuf),

    /// Upload source exceeds the 4 GB protocol limit
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_round_trip() {
        for code in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 16] {
            let frame = FrameType::try_from(code).unwrap();
            assert_eq!(frame as u8, code);
        }
        assert!(FrameType::try_from(12).is_err());
        assert!(FrameType::try_from(255).is_err());
    }

    #[test]
    fn test_abort_sequence_shape() {
        let seq = abort_sequence();
        assert!(seq[..8].iter().all(|&b| b == CAN));
        assert!(seq[8..].iter().all(|&b| b == 0x08));
    }
}
