//! ZMODEM sender
//!
//! State machine for outbound transfers. The receiver drives positioning:
//! every ZRPOS reopens the source and restarts the data stream at the given
//! offset, so the sender never needs its own acknowledgement bookkeeping.
//!
//! File data is not emitted in one burst. `pump` produces a bounded batch of
//! subpackets per call and the telnet reader keeps calling it while the
//! sender reports `is_streaming`, which keeps memory flat and leaves gaps for
//! inbound ZRPOS/ZCAN frames to be noticed mid-file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::frame::{self, Header};
use super::{
    EndType, FrameType, TransferError, TransferEvent, Zrinit, BLOCK_SIZE, MAX_BUFFER,
    MAX_FILE_SIZE, MAX_RETRIES,
};

/// Abort when the receiver has gone quiet before any data moved.
const STALL_TIMEOUT: Duration = Duration::from_secs(60);
/// Absolute bound on a single transfer session.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Subpackets emitted per `pump` call (64 KB of payload).
const PUMP_BLOCKS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Idle,
    WaitRInit,
    WaitZRPos,
    Sending,
    WaitAck,
    WaitZFin,
    Done,
}

/// Outbound ZMODEM transfer state machine.
pub struct Sender {
    state: SendState,
    path: PathBuf,
    name: String,
    size: u64,
    sent: u64,
    use_crc32: bool,
    buf: Vec<u8>,
    file: Option<File>,
    retries: u32,
    zdata_open: bool,
    created: Instant,
    last_rx: Instant,
}

impl Sender {
    /// Validate the upload source. The transfer begins with [`Sender::start`].
    pub fn new(path: &Path) -> Result<Self, TransferError> {
        let meta =
            std::fs::metadata(path).map_err(|_| TransferError::FileMissing(path.to_path_buf()))?;
        if !meta.is_file() {
            return Err(TransferError::NotAFile(path.to_path_buf()));
        }
        if meta.len() > MAX_FILE_SIZE {
            return Err(TransferError::FileTooLarge(meta.len()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let now = Instant::now();
        Ok(Self {
            state: SendState::Idle,
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            sent: 0,
            use_crc32: false,
            buf: Vec::new(),
            file: None,
            retries: 0,
            zdata_open: false,
            created: now,
            last_rx: now,
        })
    }

    /// Kick the session off: sends ZRQINIT.
    pub fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&Header::new(FrameType::Zrqinit).to_hex());
        self.state = SendState::WaitRInit;
    }

    /// Whether the session has concluded.
    pub fn is_done(&self) -> bool {
        self.state == SendState::Done
    }

    /// Whether file data still needs pumping.
    pub fn is_streaming(&self) -> bool {
        self.state == SendState::Sending
    }

    /// Consume cleaned inbound bytes, producing wire replies and events.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == SendState::Done {
            return;
        }
        if !data.is_empty() {
            self.last_rx = Instant::now();
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

    /// Emit the next batch of data subpackets while in the streaming state.
    pub fn pump(&mut self, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state != SendState::Sending {
            return;
        }
        if let Err(e) = self.pump_blocks(out, events) {
            self.fail(e, out, events);
        }
    }

    /// Timeout check, called on every reader tick.
    pub fn tick(&mut self, now: Instant, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == SendState::Done {
            return;
        }
        let err = if self.sent == 0 && now.duration_since(self.last_rx) > STALL_TIMEOUT {
            Some(TransferError::Timeout("receiver not responding"))
        } else if now.duration_since(self.created) > TOTAL_TIMEOUT {
            Some(TransferError::Timeout("session time limit exceeded"))
        } else {
            None
        };
        if let Some(e) = err {
            self.fail(e, out, events);
        }
    }

    /// Abort the transfer locally.
    pub fn cancel(&mut self, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == SendState::Done {
            return;
        }
        out.extend_from_slice(&super::abort_sequence());
        self.file = None;
        events.push(TransferEvent::Finished {
            path: self.path.clone(),
            success: false,
        });
        self.state = SendState::Done;
    }

    fn drive(
        &mut self,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        while let Some((header, _encoding)) = frame::take_header(&mut self.buf)? {
            self.on_header(header, out, events)?;
            if self.state == SendState::Done {
                break;
            }
        }
        Ok(())
    }

    fn on_header(
        &mut self,
        header: Header,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        tracing::debug!(frame = ?header.frame, state = ?self.state, "zmodem tx header");
        match header.frame {
            FrameType::Zrinit => match self.state {
                SendState::WaitRInit => {
                    let caps = Zrinit::from_bits_truncate(header.flags[3]);
                    self.use_crc32 = caps.contains(Zrinit::CANFC32);
                    events.push(TransferEvent::Started {
                        name: self.name.clone(),
                        size: self.size,
                    });
                    self.send_zfile(out);
                    self.state = SendState::WaitZRPos;
                }
                SendState::WaitAck => {
                    events.push(TransferEvent::Finished {
                        path: self.path.clone(),
                        success: true,
                    });
                    self.file = None;
                    out.extend_from_slice(&Header::new(FrameType::Zfin).to_hex());
                    self.state = SendState::WaitZFin;
                }
                // Receiver retransmit; the ZFILE answer is already in flight.
                _ => {}
            },
            FrameType::Zrpos => match self.state {
                SendState::WaitZRPos | SendState::Sending | SendState::WaitAck => {
                    self.retries += 1;
                    if self.retries > MAX_RETRIES {
                        return Err(TransferError::TooManyRetries);
                    }
                    // Drop the old handle before reopening.
                    self.file = None;
                    let offset = u64::from(header.pos());
                    let mut file = File::open(&self.path)?;
                    file.seek(SeekFrom::Start(offset))?;
                    self.file = Some(file);
                    self.sent = offset;
                    self.zdata_open = false;
                    self.state = SendState::Sending;
                }
                _ => {}
            },
            FrameType::Znak => {
                if self.state == SendState::WaitZRPos {
                    // The file info subpacket got garbled; offer it again.
                    self.send_zfile(out);
                }
            }
            FrameType::Zack => {}
            FrameType::Zskip => {
                self.file = None;
                out.extend_from_slice(&Header::new(FrameType::Zfin).to_hex());
                events.push(TransferEvent::Finished {
                    path: self.path.clone(),
                    success: true,
                });
                self.state = SendState::Done;
            }
            FrameType::Zfin => {
                if self.state == SendState::WaitZFin {
                    out.extend_from_slice(b"OO");
                    self.state = SendState::Done;
                }
            }
            FrameType::Zcan => return Err(TransferError::Cancelled),
            other => {
                tracing::debug!(frame = ?other, "ignoring unexpected frame");
            }
        }
        Ok(())
    }

    fn send_zfile(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&Header::new(FrameType::Zfile).to_binary(self.use_crc32));
        let mut info = self.name.as_bytes().to_vec();
        info.push(0);
        info.extend_from_slice(format!("{} 0 0", self.size).as_bytes());
        info.push(0);
        out.extend_from_slice(&frame::build_subpacket(&info, EndType::Zcrcw, self.use_crc32));
    }

    fn pump_blocks(
        &mut self,
        out: &mut Vec<u8>,
        events: &mut Vec<TransferEvent>,
    ) -> Result<(), TransferError> {
        for _ in 0..PUMP_BLOCKS {
            let mut block = [0u8; BLOCK_SIZE];
            let n = match self.file.as_mut() {
                Some(file) => read_full(file, &mut block)?,
                None => 0,
            };

            if n == 0 {
                // Source exhausted (possibly a zero-length file, in which
                // case no ZDATA frame was ever opened).
                out.extend_from_slice(
                    &Header::with_pos(FrameType::Zeof, self.sent as u32)
                        .to_binary(self.use_crc32),
                );
                self.zdata_open = false;
                self.state = SendState::WaitAck;
                return Ok(());
            }

            if !self.zdata_open {
                out.extend_from_slice(
                    &Header::with_pos(FrameType::Zdata, self.sent as u32)
                        .to_binary(self.use_crc32),
                );
                self.zdata_open = true;
            }

            let last = self.sent + n as u64 >= self.size;
            let end = if last { EndType::Zcrce } else { EndType::Zcrcg };
            out.extend_from_slice(&frame::build_subpacket(&block[..n], end, self.use_crc32));
            self.sent += n as u64;

            let elapsed = self.created.elapsed().as_secs_f64().max(0.001);
            events.push(TransferEvent::Progress {
                bytes: self.sent,
                total: self.size,
                rate_kbps: self.sent as f64 / 1024.0 / elapsed,
            });

            if last {
                out.extend_from_slice(
                    &Header::with_pos(FrameType::Zeof, self.sent as u32)
                        .to_binary(self.use_crc32),
                );
                self.zdata_open = false;
                self.state = SendState::WaitAck;
                return Ok(());
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: TransferError, out: &mut Vec<u8>, events: &mut Vec<TransferEvent>) {
        if self.state == SendState::Done {
            return;
        }
        if !matches!(err, TransferError::Cancelled) {
            out.extend_from_slice(&super::abort_sequence());
        }
        self.file = None;
        tracing::warn!(error = %err, "zmodem send failed");
        events.push(TransferEvent::Error(err.to_string()));
        self.state = SendState::Done;
    }
}

/// Fill as much of `buf` as the file can provide.
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
