use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use crate::com::{ConnectionEvent, DataConnection};

use super::{
    build_subpacket, parse_bin_header, parse_hex_header, transfer_rate, zrinit_flag, FrameType,
    Header, TransmissionError, ABORT_SEQ, BLOCK_SIZE, MAX_BUF_SIZE, MAX_FILE_SIZE, MAX_RETRIES,
    ZCRCE, ZCRCG, ZCRCW,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendState {
    Idle,
    WaitRInit,
    WaitZRPos,
    Sending,
    WaitAck,
    WaitZFin,
    Done,
}

/// ZMODEM upload side. Streams a local file to the remote in 1 KB
/// subpackets, restarting from whatever offset the receiver asks for.
pub struct Sz {
    state: SendState,
    use_crc32: bool,
    file_path: PathBuf,
    file_name: String,
    file_size: u64,
    bytes_sent: u64,
    retries: u32,
    buf: Vec<u8>,
    file: Option<File>,
    started_at: Instant,
    events: UnboundedSender<ConnectionEvent>,
}

impl Sz {
    pub fn new(events: UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            state: SendState::Idle,
            use_crc32: false,
            file_path: PathBuf::new(),
            file_name: String::new(),
            file_size: 0,
            bytes_sent: 0,
            retries: 0,
            buf: Vec::new(),
            file: None,
            started_at: Instant::now(),
            events,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, SendState::Idle | SendState::Done)
    }

    /// Validates the source file and opens the session with ZRQINIT.
    pub fn start_upload(&mut self, com: &mut dyn DataConnection, path: &Path) {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) if !metadata.is_dir() => metadata,
            _ => {
                self.emit(ConnectionEvent::ZmodemError(format!(
                    "file not found: {}",
                    path.display()
                )));
                return;
            }
        };
        if metadata.len() > MAX_FILE_SIZE {
            self.emit(ConnectionEvent::ZmodemError(format!(
                "file too large: {} MB (max {} GB)",
                metadata.len() / 1024 / 1024,
                MAX_FILE_SIZE / 1024 / 1024 / 1024
            )));
            return;
        }

        self.file_path = path.to_path_buf();
        self.file_name = path
            .file_name()
            .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().to_string());
        self.file_size = metadata.len();
        self.bytes_sent = 0;
        self.retries = 0;
        self.started_at = Instant::now();

        log::debug!("zmodem tx: offering {} ({} bytes)", self.file_name, self.file_size);
        self.send(com, Header::empty(FrameType::ZRQInit).build_hex());
        self.set_state(SendState::WaitRInit);
    }

    pub fn feed(&mut self, com: &mut dyn DataConnection, data: &[u8]) {
        if !self.is_active() {
            return;
        }
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BUF_SIZE {
            self.emit(ConnectionEvent::ZmodemError(
                TransmissionError::BufferOverflow(self.buf.len()).to_string(),
            ));
            self.cancel(com);
            return;
        }
        self.process_buffer(com);
    }

    /// Sends the abort sequence once, releases the source file and ends the
    /// transfer.
    pub fn cancel(&mut self, com: &mut dyn DataConnection) {
        let _ = com.send(ABORT_SEQ.to_vec());
        self.cleanup();
        self.state = SendState::Done;
    }

    fn cleanup(&mut self) {
        self.file = None;
    }

    fn set_state(&mut self, state: SendState) {
        // Done is terminal; a lost connection mid-handling must stay lost
        if self.state != SendState::Done {
            self.state = state;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn send(&mut self, com: &mut dyn DataConnection, data: Vec<u8>) {
        if com.send(data).is_err() {
            self.cleanup();
            self.state = SendState::Done;
        }
    }

    fn process_buffer(&mut self, com: &mut dyn DataConnection) {
        while self.is_active() {
            let header = if let Some(parsed) = parse_hex_header(&self.buf) {
                self.buf.drain(..parsed.consumed);
                parsed.header
            } else if let Some(parsed) = parse_bin_header(&self.buf) {
                self.buf.drain(..parsed.consumed);
                parsed.header
            } else {
                return;
            };
            self.handle_header(com, header);
        }
    }

    fn handle_header(&mut self, com: &mut dyn DataConnection, header: Header) {
        log::debug!("zmodem tx: {header} in {:?}", self.state);
        match header.frame_type {
            FrameType::ZRInit => {
                // ZF0 flags ride in p3
                self.use_crc32 = header.p3() & zrinit_flag::CANFC32 != 0;
                match self.state {
                    SendState::WaitRInit => {
                        self.send_zfile(com);
                        self.set_state(SendState::WaitZRPos);
                    }
                    SendState::WaitZRPos => {
                        // receiver retransmitted its init, nothing to do
                    }
                    SendState::WaitAck => {
                        // receiver re-arms after our ZEOF: the file went through
                        self.cleanup();
                        self.emit(ConnectionEvent::ZmodemFinished {
                            path: self.file_path.clone(),
                            success: true,
                        });
                        self.send(com, Header::empty(FrameType::ZFin).build_hex());
                        self.set_state(SendState::WaitZFin);
                    }
                    _ => {}
                }
            }
            FrameType::ZRPos => {
                self.retries += 1;
                if self.retries > MAX_RETRIES {
                    self.emit(ConnectionEvent::ZmodemError(format!(
                        "upload failed: {}",
                        TransmissionError::TooManyRetries
                    )));
                    self.cancel(com);
                    return;
                }
                self.start_sending(com, header.number());
            }
            FrameType::ZAck => {
                log::debug!("zmodem tx: ack at {}", header.number());
            }
            FrameType::ZSkip => {
                self.cleanup();
                self.send(com, Header::empty(FrameType::ZFin).build_hex());
                self.state = SendState::Done;
            }
            FrameType::ZFin => {
                if self.state == SendState::WaitZFin {
                    // over and out
                    self.send(com, b"OO".to_vec());
                    self.state = SendState::Done;
                }
            }
            FrameType::ZCan => {
                self.cleanup();
                self.state = SendState::Done;
                self.emit(ConnectionEvent::ZmodemError(
                    TransmissionError::Cancelled.to_string(),
                ));
            }
            other => {
                log::debug!("zmodem tx: ignoring {other:?}");
            }
        }
    }

    /// ZFILE binary header immediately followed by the file-info subpacket.
    fn send_zfile(&mut self, com: &mut dyn DataConnection) {
        let mut out = Header::empty(FrameType::ZFile).build_bin(self.use_crc32);

        let mut info = Vec::with_capacity(self.file_name.len() + 16);
        info.extend_from_slice(self.file_name.as_bytes());
        info.push(0);
        info.extend_from_slice(format!("{} 0 0", self.file_size).as_bytes());
        info.push(0);
        out.extend(build_subpacket(&info, ZCRCW, self.use_crc32));

        self.send(com, out);
        self.emit(ConnectionEvent::ZmodemStarted {
            file_name: self.file_name.clone(),
            size: self.file_size,
        });
    }

    /// (Re)opens the source, seeks to the requested offset and streams the
    /// rest of the file, then announces ZEOF.
    fn start_sending(&mut self, com: &mut dyn DataConnection, offset: u32) {
        // a retry must not leak the previous handle
        self.cleanup();

        let mut file = match File::open(&self.file_path) {
            Ok(file) => file,
            Err(err) => {
                self.emit(ConnectionEvent::ZmodemError(format!(
                    "cannot read file: {err}"
                )));
                self.cancel(com);
                return;
            }
        };
        if offset > 0 && file.seek(SeekFrom::Start(u64::from(offset))).is_err() {
            self.emit(ConnectionEvent::ZmodemError(
                "cannot seek to requested offset".to_string(),
            ));
            self.cancel(com);
            return;
        }
        self.file = Some(file);
        self.bytes_sent = u64::from(offset);
        self.set_state(SendState::Sending);

        self.send(
            com,
            Header::from_number(FrameType::ZData, offset).build_bin(self.use_crc32),
        );

        let mut block = [0u8; BLOCK_SIZE];
        loop {
            let read = match self.file.as_mut() {
                Some(file) => file.read(&mut block).unwrap_or(0),
                None => 0, // send failure mid-stream released the handle
            };
            if read == 0 {
                break;
            }
            self.bytes_sent += read as u64;
            let end_type = if self.bytes_sent >= self.file_size {
                ZCRCE
            } else {
                ZCRCG
            };
            let subpacket = build_subpacket(&block[..read], end_type, self.use_crc32);
            self.send(com, subpacket);
            self.emit(ConnectionEvent::ZmodemProgress {
                bytes: self.bytes_sent,
                total: self.file_size,
                rate_kbs: transfer_rate(self.bytes_sent, self.started_at),
            });
        }

        if self.state != SendState::Sending {
            return; // the connection went away mid-stream
        }
        self.cleanup();
        self.send(
            com,
            Header::from_number(FrameType::ZEof, self.bytes_sent as u32).build_hex(),
        );
        self.set_state(SendState::WaitAck);
    }
}
