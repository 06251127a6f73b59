//! Telnet connection
//!
//! Implements the client side of the Telnet protocol (RFC 854): outbound TCP,
//! IAC framing and option negotiation, plus the inline steering that diverts
//! the cleaned stream into a ZMODEM engine when a transfer announces itself.
//!
//! One background reader task owns the socket's read half and every protocol
//! state machine. Clean bytes and lifecycle events leave over unbounded
//! channels, so the reader never races a slow consumer and never drops data.
//! The short read deadline doubles as the tick for ZMODEM transfer timeouts.

mod detect;
mod parser;

use bytes::Bytes;
use parking_lot::{Mutex as StateMutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::session::SessionEvent;
use super::zmodem::{Receiver, Sender, TransferError, TransferEvent};
use detect::ZmodemDetector;
use parser::{TelnetParser, IAC};

/// Outbound TCP connect bound.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Read deadline; also the cadence of transfer timeout checks.
const READ_DEADLINE: Duration = Duration::from_millis(500);
/// Read deadline while a sender is streaming file data, so outbound pumping
/// interleaves tightly with inbound ZRPOS/ZCAN frames.
const STREAM_READ_DEADLINE: Duration = Duration::from_millis(5);

/// Telnet error types
#[derive(Error, Debug)]
pub enum TelnetError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("connection timeout after {0} seconds")]
    Timeout(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Not connected
    #[error("not connected")]
    NotConnected,

    /// A transfer is already running on this connection
    #[error("a transfer is already active")]
    TransferBusy,

    /// ZMODEM transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// Telnet connection configuration
#[derive(Debug, Clone)]
pub struct TelnetConfig {
    /// Host address
    pub host: String,
    /// Port number (default: 23)
    pub port: u16,
    /// Terminal type advertised in TTYPE subnegotiation
    pub terminal_type: String,
    /// Advertised window columns
    pub cols: u16,
    /// Advertised window rows
    pub rows: u16,
    /// Where received files land
    pub download_dir: PathBuf,
}

impl TelnetConfig {
    /// Create a new Telnet configuration
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            port: 23,
            terminal_type: "ANSI".to_string(),
            cols: 80,
            rows: 25,
            download_dir: PathBuf::from("downloads"),
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

    /// Set the advertised terminal size
    #[must_use]
    pub fn terminal_size(mut self, cols: u16, rows: u16) -> Self {
        self.cols = cols;
        self.rows = rows;
        self
    }
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// The ZMODEM side currently steering the clean stream.
enum Transfer {
    Receive(Receiver),
    Send(Sender),
}

impl Transfer {
    fn feed(&mut self, data: &[u8], out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        match self {
            Transfer::Receive(rx) => rx.feed(data, out, events),
            Transfer::Send(tx) => tx.feed(data, out, events),
        }
    }

    fn tick(&mut self, now: Instant, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        match self {
            Transfer::Receive(rx) => rx.tick(now, out, events),
            Transfer::Send(tx) => tx.tick(now, out, events),
        }
    }

    fn cancel(&mut self, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        match self {
            Transfer::Receive(rx) => rx.cancel(out, events),
            Transfer::Send(tx) => tx.cancel(out, events),
        }
    }

    fn pump(&mut self, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if let Transfer::Send(tx) = self {
            tx.pump(out, events);
        }
    }

    fn is_done(&self) -> bool {
        match self {
            Transfer::Receive(rx) => rx.is_done(),
            Transfer::Send(tx) => tx.is_done(),
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(self, Transfer::Send(tx) if tx.is_streaming())
    }
}

/// A live telnet connection.
///
/// Cheap to clone; all state is shared. The read half lives inside the
/// spawned reader task, which exits on remote close, fatal I/O error, or
/// cancellation via [`TelnetConnection::disconnect`].
#[derive(Clone)]
pub struct TelnetConnection {
    config: TelnetConfig,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
    connected_at: Instant,
    cancel: CancellationToken,
    transfer: Arc<StateMutex<Option<Transfer>>>,
    stats: Arc<RwLock<ConnStats>>,
    event_tx: UnboundedSender<SessionEvent>,
}

impl TelnetConnection {
    /// Connect and spawn the background reader.
    ///
    /// Returns the connection handle, the stream of cleaned output chunks,
    /// and the stream of lifecycle events.
    pub async fn connect(
        config: TelnetConfig,
    ) -> Result<
        (
            Self,
            UnboundedReceiver<Bytes>,
            UnboundedReceiver<SessionEvent>,
        ),
        TelnetError,
    > {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| TelnetError::Timeout(CONNECT_TIMEOUT.as_secs()))?
            .map_err(|e| TelnetError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let connection = Self {
            writer: Arc::new(tokio::sync::Mutex::new(write_half)),
            connected: Arc::new(AtomicBool::new(true)),
            connected_at: Instant::now(),
            cancel: CancellationToken::new(),
            transfer: Arc::new(StateMutex::new(None)),
            stats: Arc::new(RwLock::new(ConnStats::default())),
            event_tx: event_tx.clone(),
            config: config.clone(),
        };
        let _ = event_tx.send(SessionEvent::Connected(addr));

        let reader = Reader {
            read_half,
            writer: connection.writer.clone(),
            parser: TelnetParser::new(&config.terminal_type, config.cols, config.rows),
            detector: ZmodemDetector::new(),
            transfer: connection.transfer.clone(),
            chunk_tx,
            event_tx,
            connected: connection.connected.clone(),
            cancel: connection.cancel.clone(),
            download_dir: config.download_dir.clone(),
            stats: connection.stats.clone(),
        };
        tokio::spawn(reader.run());

        Ok((connection, chunk_rx, event_rx))
    }

    /// Whether the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connection statistics.
    pub fn stats(&self) -> ConnStats {
        let mut stats = self.stats.read().clone();
        if self.is_connected() {
            stats.uptime_secs = self.connected_at.elapsed().as_secs();
        }
        stats
    }

    /// Connection info string.
    pub fn connection_info(&self) -> String {
        format!("telnet://{}:{}", self.config.host, self.config.port)
    }

    /// Send application bytes, escaping any literal IAC.
    pub async fn send(&self, data: &[u8]) -> Result<(), TelnetError> {
        if !self.is_connected() {
            return Err(TelnetError::NotConnected);
        }
        let mut escaped = Vec::with_capacity(data.len());
        for &byte in data {
            if byte == IAC {
                escaped.push(IAC);
            }
            escaped.push(byte);
        }

        let result = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(&escaped).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(()) => {
                self.stats.write().bytes_sent += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.mark_disconnected(&format!("write failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Begin a ZMODEM upload of `path`.
    pub async fn start_upload(&self, path: &Path) -> Result<(), TelnetError> {
        if !self.is_connected() {
            return Err(TelnetError::NotConnected);
        }
        if self.transfer.lock().is_some() {
            return Err(TelnetError::TransferBusy);
        }
        let mut sender = Sender::new(path)?;
        let mut out = Vec::new();
        sender.start(&mut out);
        *self.transfer.lock() = Some(Transfer::Send(sender));
        self.send(&out).await
    }

    /// Cancel whatever transfer is active.
    pub async fn cancel_transfer(&self) {
        let (out, events) = {
            let mut slot = self.transfer.lock();
            match slot.take() {
                Some(mut transfer) => {
                    let mut out = Vec::new();
                    let mut events = Vec::new();
                    transfer.cancel(&mut out, &mut events);
                    (out, events)
                }
                None => return,
            }
        };
        for event in events {
            let _ = self.event_tx.send(to_session_event(event));
        }
        let _ = self.send(&out).await;
    }

    /// Close the connection: flag down, wake and stop the reader, shut the
    /// socket, then report.
    pub async fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.cancel.cancel();
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        if was_connected {
            let _ = self
                .event_tx
                .send(SessionEvent::Disconnected("disconnected by user".to_string()));
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .event_tx
                .send(SessionEvent::Disconnected(reason.to_string()));
        }
        self.cancel.cancel();
    }
}

/// The background reader: owns the read half and drives every state machine.
struct Reader {
    read_half: OwnedReadHalf,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    parser: TelnetParser,
    detector: ZmodemDetector,
    transfer: Arc<StateMutex<Option<Transfer>>>,
    chunk_tx: UnboundedSender<Bytes>,
    event_tx: UnboundedSender<SessionEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    download_dir: PathBuf,
    stats: Arc<RwLock<ConnStats>>,
}

impl Reader {
    async fn run(mut self) {
        let mut buf = vec![0u8; 4096];
        loop {
            if self.cancel.is_cancelled() {
                self.connected.store(false, Ordering::SeqCst);
                break;
            }
            let deadline = if self.is_streaming() {
                STREAM_READ_DEADLINE
            } else {
                READ_DEADLINE
            };
            match tokio::time::timeout(deadline, self.read_half.read(&mut buf)).await {
                // Benign: the timeout is the transfer-timeout tick.
                Err(_) => {
                    if self.on_tick().await.is_err() {
                        break;
                    }
                }
                Ok(Ok(0)) => {
                    self.finish("connection closed by remote host");
                    break;
                }
                Ok(Ok(n)) => {
                    self.stats.write().bytes_received += n as u64;
                    let (clean, replies) = self.parser.process(&buf[..n]);
                    if !replies.is_empty() && self.write(&replies).await.is_err() {
                        break;
                    }
                    if !clean.is_empty() && self.route(clean).await.is_err() {
                        break;
                    }
                    if self.pump().await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    if self.cancel.is_cancelled() {
                        self.connected.store(false, Ordering::SeqCst);
                    } else {
                        self.finish(&format!("read error: {e}"));
                    }
                    break;
                }
            }
        }
        tracing::debug!("telnet reader task exited");
    }

    /// Dispatch one cleaned chunk: active transfer, fresh detection, or the
    /// terminal path.
    async fn route(&mut self, clean: Vec<u8>) -> Result<(), ()> {
        let mut out = Vec::new();
        let mut events = Vec::new();
        let mut consumed = true;
        {
            let mut slot = self.transfer.lock();
            if let Some(transfer) = slot.as_mut() {
                transfer.feed(&clean, &mut out, &mut events);
                if transfer.is_done() {
                    *slot = None;
                    self.detector.reset();
                }
            } else if let Some(initial) = self.detector.scan(&clean) {
                let mut receiver = Receiver::new(&self.download_dir);
                receiver.start(&mut out);
                receiver.feed(&initial, &mut out, &mut events);
                if receiver.is_done() {
                    self.detector.reset();
                } else {
                    *slot = Some(Transfer::Receive(receiver));
                }
            } else {
                consumed = false;
            }
        }

        if !consumed {
            // Unbounded: the reader must never drop or block on this handoff.
            let _ = self.chunk_tx.send(Bytes::from(clean));
        }
        self.emit(events);
        if out.is_empty() {
            Ok(())
        } else {
            self.write(&out).await
        }
    }

    /// Read-timeout tick: advance transfer timeouts.
    async fn on_tick(&mut self) -> Result<(), ()> {
        let now = Instant::now();
        let mut out = Vec::new();
        let mut events = Vec::new();
        {
            let mut slot = self.transfer.lock();
            if let Some(transfer) = slot.as_mut() {
                transfer.tick(now, &mut out, &mut events);
                if transfer.is_done() {
                    *slot = None;
                    self.detector.reset();
                }
            }
        }
        self.emit(events);
        if !out.is_empty() {
            self.write(&out).await?;
        }
        self.pump().await
    }

    /// Emit the next batch of outbound file data while a sender streams.
    async fn pump(&mut self) -> Result<(), ()> {
        let mut out = Vec::new();
        let mut events = Vec::new();
        {
            let mut slot = self.transfer.lock();
            match slot.as_mut() {
                Some(transfer) if transfer.is_streaming() => {
                    transfer.pump(&mut out, &mut events);
                    if transfer.is_done() {
                        *slot = None;
                        self.detector.reset();
                    }
                }
                _ => return Ok(()),
            }
        }
        self.emit(events);
        if out.is_empty() {
            Ok(())
        } else {
            self.write(&out).await
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(&*self.transfer.lock(), Some(t) if t.is_streaming())
    }

    fn emit(&self, events: Vec<TransferEvent>) {
        for event in events {
            let _ = self.event_tx.send(to_session_event(event));
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), ()> {
        let result = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(data).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        match result {
            Ok(()) => {
                self.stats.write().bytes_sent += data.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.finish(&format!("write failed: {e}"));
                Err(())
            }
        }
    }

    fn finish(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self
                .event_tx
                .send(SessionEvent::Disconnected(reason.to_string()));
        }
    }
}

fn to_session_event(event: TransferEvent) -> SessionEvent {
    match event {
        TransferEvent::Started { name, size } => SessionEvent::ZmodemStarted { name, size },
        TransferEvent::Progress {
            bytes,
            total,
            rate_kbps,
        } => SessionEvent::ZmodemProgress {
            bytes,
            total,
            rate_kbps,
        },
        TransferEvent::Finished { path, success } => SessionEvent::ZmodemFinished { path, success },
        TransferEvent::Error(message) => SessionEvent::ZmodemError(message),
    }
}
