//! Session coordination
//!
//! A [`Session`] owns one BBS connection end to end: it wires the telnet
//! layer's cleaned output into the ANSI screen, appends the decoded stream to
//! the capture log, routes the screen's status-report replies back onto the
//! wire, and fans lifecycle and transfer events out to the host.
//!
//! The screen is the only state shared across tasks; a single mutex
//! serializes `feed` against `snapshot`, so a renderer always sees a cursor
//! that belongs to the grid it was handed.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

use super::keys::Key;
use super::logger::SessionLogger;
use super::telnet::{ConnStats, TelnetConfig, TelnetConnection, TelnetError};
use super::terminal::{cp437, ScreenSnapshot, Terminal, TerminalSize};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected
    Disconnected,
    /// Connected and active
    Connected,
    /// Connection error occurred
    Error,
}

/// Session lifecycle and transfer events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Connection established to the remote endpoint
    Connected(String),
    /// Connection ended, with the reason
    Disconnected(String),
    /// A non-fatal error surfaced to the host
    Error(String),
    /// A ZMODEM transfer began
    ZmodemStarted {
        /// File name on the wire
        name: String,
        /// Declared size; 0 when unknown
        size: u64,
    },
    /// Transfer progress
    ZmodemProgress {
        /// Bytes moved so far
        bytes: u64,
        /// Declared total; 0 when unknown
        total: u64,
        /// Observed rate in kB/s
        rate_kbps: f64,
    },
    /// A file or transfer concluded
    ZmodemFinished {
        /// Materialized or source path
        path: PathBuf,
        /// Whether it concluded cleanly
        success: bool,
    },
    /// A transfer failed
    ZmodemError(String),
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name (used in the capture log file name)
    pub name: String,
    /// Host to dial
    pub host: String,
    /// Port (default 23)
    pub port: u16,
    /// Where ZMODEM downloads land
    pub download_dir: PathBuf,
    /// Where capture logs are written
    pub logs_dir: PathBuf,
    /// Whether to write a capture log
    pub logging_enabled: bool,
    /// Screen dimensions
    pub size: TerminalSize,
}

impl SessionConfig {
    /// Create a configuration for `name` dialing `host`.
    pub fn new(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            port: 23,
            download_dir: PathBuf::from("downloads"),
            logs_dir: PathBuf::from("logs"),
            logging_enabled: true,
            size: TerminalSize::default(),
        }
    }

    /// Set port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the download directory
    #[must_use]
    pub fn download_dir(mut self, dir: &Path) -> Self {
        self.download_dir = dir.to_path_buf();
        self
    }

    /// Set the capture log directory
    #[must_use]
    pub fn logs_dir(mut self, dir: &Path) -> Self {
        self.logs_dir = dir.to_path_buf();
        self
    }

    /// Enable or disable capture logging
    #[must_use]
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }
}

struct Shared {
    state: SessionState,
    logger: Option<SessionLogger>,
}

/// An active BBS session.
pub struct Session {
    id: Uuid,
    name: String,
    terminal: Arc<Mutex<Terminal>>,
    conn: TelnetConnection,
    shared: Arc<Mutex<Shared>>,
}

impl Session {
    /// Connect and start the wiring task.
    ///
    /// Returns the session and the ordered stream of [`SessionEvent`]s.
    pub async fn connect(
        config: SessionConfig,
    ) -> Result<(Self, UnboundedReceiver<SessionEvent>), TelnetError> {
        let telnet_config = TelnetConfig::new(&config.host)
            .port(config.port)
            .download_dir(&config.download_dir)
            .terminal_size(config.size.cols, config.size.rows);
        let (conn, mut chunk_rx, mut conn_events) = TelnetConnection::connect(telnet_config).await?;

        let logger = if config.logging_enabled {
            Some(SessionLogger::create(&config.logs_dir, &config.name)?)
        } else {
            None
        };

        // The screen answers DSR queries; replies loop back to the wire.
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let mut terminal = Terminal::with_size(config.size);
        terminal.set_responder(Box::new(move |bytes| {
            let _ = reply_tx.send(bytes);
        }));
        let terminal = Arc::new(Mutex::new(terminal));

        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Connected,
            logger,
        }));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let session = Self {
            id: Uuid::new_v4(),
            name: config.name,
            terminal: terminal.clone(),
            conn: conn.clone(),
            shared: shared.clone(),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = conn_events.recv() => match event {
                        Some(event) => handle_event(event, &shared, &out_tx),
                        None => break,
                    },
                    reply = reply_rx.recv() => {
                        if let Some(bytes) = reply {
                            let _ = conn.send(&bytes).await;
                        }
                    }
                    chunk = chunk_rx.recv() => match chunk {
                        Some(bytes) => {
                            let text = cp437::decode(&bytes);
                            terminal.lock().feed(&text);
                            if let Some(logger) = shared.lock().logger.as_mut() {
                                logger.write(text.as_bytes());
                            }
                        }
                        None => {
                            // Reader gone; flush any queued events, then stop.
                            while let Ok(event) = conn_events.try_recv() {
                                handle_event(event, &shared, &out_tx);
                            }
                            break;
                        }
                    },
                }
            }
            let mut shared = shared.lock();
            if let Some(logger) = shared.logger.take() {
                logger.close();
            }
            if shared.state == SessionState::Connected {
                shared.state = SessionState::Disconnected;
            }
        });

        Ok((session, out_rx))
    }

    /// Unique session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Whether the connection is up.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Atomic deep copy of the screen.
    pub fn snapshot(&self) -> ScreenSnapshot {
        self.terminal.lock().snapshot()
    }

    /// Send a key press.
    pub async fn send_key(&self, key: Key) -> Result<(), TelnetError> {
        let bytes = key.encode();
        if bytes.is_empty() {
            return Ok(());
        }
        self.conn.send(&bytes).await
    }

    /// Send a line of text as individual ASCII bytes.
    pub async fn send_text(&self, text: &str) -> Result<(), TelnetError> {
        let bytes: Vec<u8> = text
            .chars()
            .filter(|c| c.is_ascii() && !c.is_ascii_control())
            .map(|c| c as u8)
            .collect();
        if bytes.is_empty() {
            return Ok(());
        }
        self.conn.send(&bytes).await
    }

    /// Start a ZMODEM upload.
    pub async fn upload(&self, path: &Path) -> Result<(), TelnetError> {
        self.conn.start_upload(path).await
    }

    /// Cancel the active transfer, if any.
    pub async fn cancel_transfer(&self) {
        self.conn.cancel_transfer().await;
    }

    /// Tear the session down: state flag, socket, capture log, event.
    pub async fn disconnect(&self) {
        self.shared.lock().state = SessionState::Disconnected;
        self.conn.disconnect().await;
    }

    /// Connection statistics.
    pub fn stats(&self) -> ConnStats {
        self.conn.stats()
    }

    /// `telnet://host:port` description.
    pub fn connection_info(&self) -> String {
        self.conn.connection_info()
    }

    /// Path of the capture log, while one is open.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.shared
            .lock()
            .logger
            .as_ref()
            .map(|l| l.path().to_path_buf())
    }
}

fn handle_event(
    event: SessionEvent,
    shared: &Arc<Mutex<Shared>>,
    out_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    if let SessionEvent::Disconnected(_) = &event {
        let mut shared = shared.lock();
        shared.state = SessionState::Disconnected;
        if let Some(logger) = shared.logger.take() {
            logger.close();
        }
    }
    let _ = out_tx.send(event);
}
