//! Core module containing the main functionality of bbsterm
//!
//! This module provides:
//! - Telnet connection with IAC framing and option negotiation
//! - ANSI/VT100 terminal emulation over a CP437 byte stream
//! - ZMODEM file transfer (receive and send) steered inline from the stream
//! - Session coordination, capture logging, and key encoding

pub mod keys;
pub mod logger;
pub mod session;
pub mod telnet;
pub mod terminal;
pub mod zmodem;

use std::io;
use std::path::Path;

/// Create a directory (and parents) readable only by the owner.
pub(crate) fn create_private_dir(path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
