//! ZMODEM receiver
//!
//! State machine for inbound transfers. Driven synchronously from the telnet
//! reader task: `feed` with cleaned bytes, `tick` on every read-timeout so the
//! transfer-level timeouts fire even when the line goes quiet.
//!
//! Incoming filenames are untrusted. They are normalized to a single safe
//! component, and the resolved target is verified to sit under the download
//! directory before a file handle is ever opened.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::frame::{self, Encoding, Header, Parsed};
use super::{
    EndType, FrameType, TransferError, TransferEvent, Zrinit, MAX_BUFFER, MAX_FILE_SIZE,
    MAX_RETRIES,
};

/// Abort when the auto-detector fired but no ZFILE ever followed.
const ZFILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Abort when nothing has arrived for this long and no payload was written.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Absolute bound on a single transfer session.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// What the receiver expects next while a file frame is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvMode {
    /// The subpacket carrying `filename\0size ...` after a ZFILE header.
    FileInfo,
    /// A header: ZDATA, ZEOF, or session control.
    Frame,
    /// Data subpackets inside a ZDATA frame.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    /// Constructed, nothing sent yet.
    Idle,
    /// ZRINIT sent after auto-detect, nothing heard back.
    Init,
    /// Ready for the next ZFILE (initial, or between batch files).
    WaitZFile,
    /// A ZFILE frame is in progress.
    Receiving(RecvMode),
    /// Session over; the telnet layer returns routing to the screen.
    Done,
}

/// Inbound ZMODEM transfer state machine.
pub struct Receiver {
    state: RecvState,
    download_dir: PathBuf,
    buf: Vec<u8>,
    use_crc32: bool,
    file: Option<File>,
    file_name: String,
    file_path: PathBuf,
    file_size: u64,
    received: u64,
    retries: u32,
    got_zfile: bool,
    created: Instant,
    last_data: Instant,
}

impl Receiver {
    /// Create a receiver that will materialize files under `download_dir`.
    pub fn new(download_dir: &Path) -> Self {
        let now = Instant::now();
        Self {
            state: RecvState::Idle,
            download_dir: download_dir.to_path_buf(),
            buf: Vec::new(),
            use_crc32: false,
            file: None,
            file_name: String::new(),
            file_path: PathBuf::new(),
            file_size: 0,
            received: 0,
            retries: 0,
            got_zfile: false,
            created: now,
            last_data: now,
        }
    }

    /// Announce readiness: sends ZRINIT with our capability flags.
    pub fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&zrinit().to_hex());
        self.state = RecvState::Init;
    }

    /// Whether the session has concluded (normally or not).
    pub fn is_done(&self) -> bool {
        self.state == RecvState::Done
    }

    /// Consume cleaned inbound bytes, producing wire replies and events.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == RecvState::Done {
            return;
        }
        if !data.is_empty() {
            self.last_data = Instant::now();
            self.buf.extend_from_slice(data);
        }
        if self.buf.len() > MAX_BUFFER {
            self.fail(TransferError::BufferOverflow, out, events);
            return;
        }
        if let Err(e) = self.drive(out, events) {
            self.fail(e, out, events);
        }
    }

    /// Timeout check, called on every reader tick.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == RecvState::Done {
            return;
        }
        let err = if !self.got_zfile && now.duration_since(self.created) > ZFILE_TIMEOUT {
            Some(TransferError::Timeout("no file offered after auto-detect"))
        } else if self.received == 0 && now.duration_since(self.last_data) > STALL_TIMEOUT {
            Some(TransferError::Timeout("no data from sender"))
        } else if now.duration_since(self.created) > TOTAL_TIMEOUT {
            Some(TransferError::Timeout("session time limit exceeded"))
        } else {
            None
        };
        if let Some(e) = err {
            self.fail(e, out, events);
        }
    }

    /// Abort the transfer locally: abort sequence, discard the partial file.
    pub fn cancel(&mut self, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == RecvState::Done {
            return;
        }
        out.extend_from_slice(&super::abort_sequence());
        self.discard_partial();
        events.push(TransferEvent::Finished {
            path: self.file_path.clone(),
            success: false,
        });
        self.state = RecvState::Done;
    }

    fn drive(
        &mut self,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        loop {
            match self.state {
                RecvState::Idle | RecvState::Done => return Ok(()),
                RecvState::Init | RecvState::WaitZFile | RecvState::Receiving(RecvMode::Frame) => {
                    match frame::take_header(&mut self.buf)? {
                        Some((header, encoding)) => self.on_header(header, encoding, out, events)?,
                        None => return Ok(()),
                    }
                }
                RecvState::Receiving(RecvMode::FileInfo) => {
                    match frame::parse_subpacket(&self.buf, self.use_crc32) {
                        Parsed::NeedMore => return Ok(()),
                        Parsed::Bad { consumed } => {
                            self.buf.drain(..consumed.max(1));
                            self.bump_retries()?;
                            // Ask for a clean ZFILE resend.
                            out.extend_from_slice(&Header::new(FrameType::Znak).to_hex());
                            self.state = RecvState::WaitZFile;
                        }
                        Parsed::Ok { value, consumed } => {
                            self.buf.drain(..consumed);
                            self.on_file_info(&value.payload, out, events)?;
                        }
                    }
                }
                RecvState::Receiving(RecvMode::Data) => {
                    if frame::has_cancel_run(&self.buf) {
                        return Err(TransferError::Cancelled);
                    }
                    match frame::parse_subpacket(&self.buf, self.use_crc32) {
                        Parsed::NeedMore => return Ok(()),
                        Parsed::Bad { consumed } => {
                            self.buf.drain(..consumed.max(1));
                            self.bump_retries()?;
                            out.extend_from_slice(
                                &Header::with_pos(FrameType::Zrpos, self.received as u32).to_hex(),
                            );
                            self.state = RecvState::Receiving(RecvMode::Frame);
                        }
                        Parsed::Ok { value, consumed } => {
                            self.buf.drain(..consumed);
                            self.on_data(&value.payload, value.end, out, events)?;
                        }
                    }
                }
            }
        }
    }

    fn on_header(
        &mut self,
        header: Header,
        encoding: Encoding,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        tracing::debug!(frame = ?header.frame, ?encoding, "zmodem rx header");
        match header.frame {
            FrameType::Zrqinit => {
                out.extend_from_slice(&zrinit().to_hex());
                self.state = RecvState::WaitZFile;
            }
            FrameType::Zfile => {
                self.use_crc32 = encoding.uses_crc32();
                self.state = RecvState::Receiving(RecvMode::FileInfo);
            }
            FrameType::Zsinit => {
                out.extend_from_slice(&Header::new(FrameType::Zack).to_hex());
            }
            FrameType::Zdata => {
                if self.file.is_none() {
                    // No open file: stale frame from a previous attempt.
                    out.extend_from_slice(&zrinit().to_hex());
                    return Ok(());
                }
                self.use_crc32 = encoding.uses_crc32();
                let offset = u64::from(header.pos());
                if offset != self.received {
                    if let Some(file) = self.file.as_mut() {
                        file.seek(SeekFrom::Start(offset))?;
                    }
                    self.received = offset;
                }
                self.state = RecvState::Receiving(RecvMode::Data);
            }
            FrameType::Zeof => {
                if self.file.is_some() {
                    if u64::from(header.pos()) != self.received {
                        // A fresh ZDATA for the missing range is on its way.
                        tracing::debug!(
                            eof = header.pos(),
                            received = self.received,
                            "ZEOF offset mismatch, ignoring"
                        );
                        return Ok(());
                    }
                    self.file = None;
                    events.push(TransferEvent::Finished {
                        path: std::mem::take(&mut self.file_path),
                        success: true,
                    });
                    self.file_name.clear();
                    self.file_size = 0;
                    self.received = 0;
                    // Batch-ready: invite the next file.
                    out.extend_from_slice(&zrinit().to_hex());
                    self.state = RecvState::WaitZFile;
                }
            }
            FrameType::Zfin => {
                out.extend_from_slice(&Header::new(FrameType::Zfin).to_hex());
                self.state = RecvState::Done;
            }
            FrameType::Zcan => return Err(TransferError::Cancelled),
            other => {
                tracing::debug!(frame = ?other, "ignoring unexpected frame");
            }
        }
        Ok(())
    }

    fn on_file_info(
        &mut self,
        payload: &[u8],
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        let (raw_name, declared_size) = parse_file_info(payload);
        self.got_zfile = true;
        self.file_name = normalize_name(&raw_name);
        self.file_size = if declared_size > MAX_FILE_SIZE {
            0
        } else {
            declared_size
        };

        let target = self.resolve_target()?;
        let (file, path) = open_unique(&target)?;
        self.file = Some(file);
        self.file_path = path;
        self.received = 0;
        self.retries = 0;

        events.push(TransferEvent::Started {
            name: self.file_name.clone(),
            size: self.file_size,
        });
        out.extend_from_slice(&Header::with_pos(FrameType::Zrpos, 0).to_hex());
        self.state = RecvState::Receiving(RecvMode::Frame);
        Ok(())
    }

    fn on_data(
        &mut self,
        payload: &[u8],
        end: EndType,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(payload)?;
        }
        self.received += payload.len() as u64;

        let elapsed = self.created.elapsed().as_secs_f64().max(0.001);
        events.push(TransferEvent::Progress {
            bytes: self.received,
            total: self.file_size,
            rate_kbps: self.received as f64 / 1024.0 / elapsed,
        });

        match end {
            EndType::Zcrcg => {}
            EndType::Zcrcq => {
                out.extend_from_slice(
                    &Header::with_pos(FrameType::Zack, self.received as u32).to_hex(),
                );
            }
            EndType::Zcrce => self.state = RecvState::Receiving(RecvMode::Frame),
            EndType::Zcrcw => {
                out.extend_from_slice(
                    &Header::with_pos(FrameType::Zack, self.received as u32).to_hex(),
                );
                self.state = RecvState::Receiving(RecvMode::Frame);
            }
        }
        Ok(())
    }

    fn bump_retries(&mut self) -> Result<(), TransferError> {
        self.retries += 1;
        if self.retries > MAX_RETRIES {
            Err(TransferError::TooManyRetries)
        } else {
            Ok(())
        }
    }

    /// Join the normalized name with the download directory and verify the
    /// absolute result stays strictly inside it.
    fn resolve_target(&self) -> Result<PathBuf, TransferError> {
        crate::core::create_private_dir(&self.download_dir)?;
        let dir = self.download_dir.canonicalize()?;
        let candidate = dir.join(&self.file_name);
        if candidate == dir || !candidate.starts_with(&dir) {
            return Err(TransferError::PathTraversal);
        }
        Ok(candidate)
    }

    fn fail(&mut self, err: TransferError, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == RecvState::Done {
            return;
        }
        if !matches!(err, TransferError::Cancelled) {
            out.extend_from_slice(&super::abort_sequence());
        }
        self.discard_partial();
        tracing::warn!(error = %err, "zmodem receive failed");
        events.push(TransferEvent::Error(err.to_string()));
        self.state = RecvState::Done;
    }

    fn discard_partial(&mut self) {
        if self.file.take().is_some() {
            let _ = fs::remove_file(&self.file_path);
        }
    }
}

fn zrinit() -> Header {
    let caps = Zrinit::CANFDX | Zrinit::CANOVIO | Zrinit::CANFC32;
    Header::with_flags(FrameType::Zrinit, [0, 0, 0, caps.bits()])
}

/// Split a ZFILE info payload (`filename\0size [mtime [mode [serial]]]\0`)
/// into the raw name and the declared decimal byte size (0 when absent).
fn parse_file_info(payload: &[u8]) -> (String, u64) {
    let mut fields = payload.split(|&b| b == 0);
    let name = fields
        .next()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .unwrap_or_default();
    let size = fields
        .next()
        .and_then(|f| {
            let text = String::from_utf8_lossy(f);
            text.split_ascii_whitespace()
                .next()
                .and_then(|t| t.parse::<u64>().ok())
        })
        .unwrap_or(0);
    (name, size)
}

/// Reduce an untrusted wire filename to one filesystem-safe component.
///
/// Backslashes count as separators. A name carrying `..` components keeps all
/// of its safe components joined with `_` (so the attempt stays visible in the
/// saved name); a plain relative path keeps its last component. Anything
/// outside `[A-Za-z0-9._-]` becomes `_`, and names that end up empty, dotted,
/// or hidden fall back to `download`.
fn normalize_name(raw: &str) -> String {
    let slashed = raw.replace('\\', "/");
    let had_traversal = slashed.split('/').any(|part| part == "..");
    let parts: Vec<&str> = slashed
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect();

    let base = if had_traversal {
        parts.join("_")
    } else {
        parts.last().copied().unwrap_or("").to_string()
    };

    let mut name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
        name = "download".to_string();
    }
    name
}

/// Open the target for writing, appending `_N` before the extension until the
/// name is unused.
fn open_unique(target: &Path) -> Result<(File, PathBuf), TransferError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name.as_str(), ""),
    };

    let mut path = target.to_path_buf();
    let mut n = 1;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                path = dir.join(format!("{stem}_{n}{ext}"));
                n += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
