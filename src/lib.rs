//! # bbsterm
//!
//! A BBS terminal client core: connect to bulletin-board systems over
//! Telnet, render their CP437/ANSI output on an 80×25 screen, and move files
//! with ZMODEM detected inline in the stream.
//!
//! ## Features
//!
//! - Telnet option negotiation (TTYPE, NAWS, SGA, BINARY, ECHO) with
//!   IAC sequences preserved across read boundaries
//! - ANSI/VT100 emulation: SGR in 16/256/truecolor, cursor addressing,
//!   scrolling, erase operations, device status replies
//! - ZMODEM receive and send with CRC-16/CRC-32 framing, batch transfers,
//!   and filesystem-safe file materialization
//! - Session capture logs and atomic screen snapshots for a renderer
//!
//! ## Example
//!
//! ```rust,no_run
//! use bbsterm::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::new("my-bbs", "bbs.example.org");
//!     let (session, mut events) = Session::connect(config).await?;
//!
//!     session.send_text("guest").await?;
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{ClientConfig, TerminalConfig};
pub use crate::core::keys::Key;
pub use crate::core::logger::SessionLogger;
pub use crate::core::session::{Session, SessionConfig, SessionEvent, SessionState};
pub use crate::core::telnet::{ConnStats, TelnetConfig, TelnetConnection, TelnetError};
pub use crate::core::terminal::{
    Cell, CellStyle, Color, CursorPos, ScreenSnapshot, SnapshotCell, Terminal, TerminalSize,
};
pub use crate::core::zmodem::{TransferError, TransferEvent};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
