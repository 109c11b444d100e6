use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;

use crate::com::{ConnectionEvent, DataConnection};
use crate::util::create_private_dir;

use super::{
    parse_bin_header, parse_hex_header, parse_subpacket, transfer_rate, FrameType, Header,
    Subpacket, TransmissionError, ABORT_SEQ, MAX_BUF_SIZE, MAX_FILE_SIZE, RECEIVER_FLAGS,
    SCAN_DISCARD_SIZE, ZPAD,
};

/// Whole transfer gives up after this long.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(300);
/// Abort when nothing at all arrived for this long.
const NO_DATA_TIMEOUT: Duration = Duration::from_secs(60);
/// A detector hit that is not followed by a file offer within this window
/// was a false positive.
const ZFILE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    Idle,
    Init,
    WaitZFile,
    Receiving,
    Done,
}

/// ZMODEM download side. Fed with cleaned bytes from the telnet reader, it
/// materializes incoming files under the download directory and answers the
/// sender over the same connection.
pub struct Rz {
    state: RecvState,
    download_dir: PathBuf,
    use_crc32: bool,
    file_name: String,
    file_path: PathBuf,
    file_size: u64,
    bytes_received: u64,
    buf: Vec<u8>,
    file: Option<File>,
    pub(crate) started_at: Instant,
    pub(crate) state_since: Instant,
    events: UnboundedSender<ConnectionEvent>,
}

impl Rz {
    pub fn new(download_dir: PathBuf, events: UnboundedSender<ConnectionEvent>) -> Self {
        Self {
            state: RecvState::Idle,
            download_dir,
            use_crc32: false,
            file_name: String::new(),
            file_path: PathBuf::new(),
            file_size: 0,
            bytes_received: 0,
            buf: Vec::new(),
            file: None,
            started_at: Instant::now(),
            state_since: Instant::now(),
            events,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, RecvState::Idle | RecvState::Done)
    }

    /// Answers the detector hit: advertises ZRINIT and consumes whatever was
    /// already read (usually the sender's ZRQINIT).
    pub fn start(&mut self, com: &mut dyn DataConnection, initial_data: &[u8]) {
        if let Err(err) = create_private_dir(&self.download_dir) {
            self.emit(ConnectionEvent::ZmodemError(format!(
                "cannot create download directory: {err}"
            )));
            self.state = RecvState::Done;
            return;
        }
        self.set_state(RecvState::Init);
        self.started_at = Instant::now();
        self.buf.clear();
        self.buf.extend_from_slice(initial_data);
        self.send_zrinit(com);
        self.set_state(RecvState::WaitZFile);
        self.process_buffer(com);
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

    /// Driven by the telnet read-timeout tick.
    pub fn check_timeout(&mut self, com: &mut dyn DataConnection) {
        if !self.is_active() {
            return;
        }
        if self.started_at.elapsed() > TOTAL_TIMEOUT {
            self.fail(com, TransmissionError::Timeout("transfer exceeded 5 minutes"));
        } else if self.bytes_received == 0 && self.started_at.elapsed() > NO_DATA_TIMEOUT {
            self.fail(com, TransmissionError::Timeout("no data received"));
        } else if self.state == RecvState::WaitZFile && self.state_since.elapsed() > ZFILE_TIMEOUT {
            self.fail(com, TransmissionError::Timeout("no file offer received"));
        }
    }

    /// Sends the abort sequence once, releases the target file and ends the
    /// transfer.
    pub fn cancel(&mut self, com: &mut dyn DataConnection) {
        let _ = com.send(ABORT_SEQ.to_vec());
        self.cleanup();
        self.state = RecvState::Done;
    }

    fn fail(&mut self, com: &mut dyn DataConnection, err: TransmissionError) {
        self.emit(ConnectionEvent::ZmodemError(err.to_string()));
        self.cancel(com);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: RecvState) {
        // Done is terminal; a lost connection mid-handling must stay lost
        if self.state == RecvState::Done {
            return;
        }
        self.state = state;
        self.state_since = Instant::now();
    }

    fn cleanup(&mut self) {
        self.file = None;
    }

    fn send(&mut self, com: &mut dyn DataConnection, data: Vec<u8>) {
        if com.send(data).is_err() {
            self.cleanup();
            self.state = RecvState::Done;
        }
    }

    fn send_zrinit(&mut self, com: &mut dyn DataConnection) {
        let zrinit = Header::from_flags(FrameType::ZRInit, 0, 0, 0, RECEIVER_FLAGS).build_hex();
        self.send(com, zrinit);
    }

    fn process_buffer(&mut self, com: &mut dyn DataConnection) {
        for _ in 0..200 {
            if self.buf.is_empty() {
                break;
            }
            let progressed = match self.state {
                RecvState::Init | RecvState::WaitZFile => self.try_parse_header(com),
                RecvState::Receiving => self.try_parse_data(com),
                RecvState::Idle | RecvState::Done => return,
            };
            if !progressed {
                return;
            }
        }
    }

    fn take_header(&mut self) -> Option<Header> {
        if let Some(parsed) = parse_hex_header(&self.buf) {
            self.buf.drain(..parsed.consumed);
            return Some(parsed.header);
        }
        if let Some(parsed) = parse_bin_header(&self.buf) {
            self.buf.drain(..parsed.consumed);
            if parsed.crc32 {
                self.use_crc32 = true;
            }
            return Some(parsed.header);
        }
        None
    }

    fn try_parse_header(&mut self, com: &mut dyn DataConnection) -> bool {
        if let Some(header) = self.take_header() {
            self.handle_header(com, header);
            return true;
        }
        // No parseable header. Once enough garbage piled up, drop everything
        // before the next ZPAD so line noise cannot wedge the scan.
        if self.buf.len() > SCAN_DISCARD_SIZE {
            if let Some(offset) = self.buf.iter().skip(1).position(|b| *b == ZPAD) {
                self.buf.drain(..=offset);
                return true;
            }
            self.buf.clear();
        }
        false
    }

    fn try_parse_data(&mut self, com: &mut dyn DataConnection) -> bool {
        // Frame-end headers (ZEOF, ZFIN, ...) may show up between subpackets.
        if let Some(header) = self.take_header() {
            self.handle_header(com, header);
            return true;
        }
        if let Some(subpacket) = parse_subpacket(&self.buf, self.use_crc32) {
            self.buf.drain(..subpacket.consumed);
            self.handle_data(com, &subpacket);
            return true;
        }
        false
    }

    fn handle_header(&mut self, com: &mut dyn DataConnection, header: Header) {
        log::debug!("zmodem rx: {header}");
        match header.frame_type {
            FrameType::ZRQInit => {
                self.send_zrinit(com);
                self.set_state(RecvState::WaitZFile);
            }
            FrameType::ZFile => {
                // the data subpacket following this header carries the file info
                self.set_state(RecvState::Receiving);
            }
            FrameType::ZData => {
                let offset = u64::from(header.number());
                if let Some(file) = &mut self.file {
                    if offset != self.bytes_received && file.seek(SeekFrom::Start(offset)).is_ok() {
                        self.bytes_received = offset;
                    }
                }
                self.set_state(RecvState::Receiving);
            }
            FrameType::ZEof => {
                self.cleanup();
                if !self.file_path.as_os_str().is_empty() {
                    self.emit(ConnectionEvent::ZmodemFinished {
                        path: self.file_path.clone(),
                        success: true,
                    });
                }
                // ready for the next file of the batch
                self.send_zrinit(com);
                self.set_state(RecvState::WaitZFile);
            }
            FrameType::ZFin => {
                self.send(com, Header::empty(FrameType::ZFin).build_hex());
                self.cleanup();
                self.state = RecvState::Done;
            }
            FrameType::ZSInit => {
                self.send(com, Header::empty(FrameType::ZAck).build_hex());
            }
            FrameType::ZCan => {
                self.cleanup();
                self.state = RecvState::Done;
                self.emit(ConnectionEvent::ZmodemError(
                    TransmissionError::Cancelled.to_string(),
                ));
            }
            other => {
                log::debug!("zmodem rx: ignoring {other:?}");
            }
        }
    }

    fn handle_data(&mut self, com: &mut dyn DataConnection, subpacket: &Subpacket) {
        if subpacket.payload.is_empty() {
            return;
        }
        if self.file.is_none() {
            self.parse_file_info(com, &subpacket.payload);
            return;
        }

        let written = match &mut self.file {
            Some(file) => file.write_all(&subpacket.payload),
            None => return,
        };
        if let Err(err) = written {
            self.emit(ConnectionEvent::ZmodemError(format!("write error: {err}")));
            self.cancel(com);
            return;
        }
        self.bytes_received += subpacket.payload.len() as u64;
        self.emit(ConnectionEvent::ZmodemProgress {
            bytes: self.bytes_received,
            total: self.file_size,
            rate_kbs: transfer_rate(self.bytes_received, self.started_at),
        });

        if subpacket.expects_ack() {
            let ack = Header::from_number(FrameType::ZAck, self.bytes_received as u32).build_hex();
            self.send(com, ack);
        }
    }

    /// The first data subpacket after ZFILE: `filename\0 size [mtime [mode
    /// [serial]]]\0`. Opens the target file and asks for data from offset 0.
    fn parse_file_info(&mut self, com: &mut dyn DataConnection, payload: &[u8]) {
        let mut parts = payload.split(|b| *b == 0);
        let raw_name = match parts.next() {
            Some(bytes) => String::from_utf8_lossy(bytes).to_string(),
            None => return,
        };

        self.file_size = 0;
        if let Some(meta) = parts.next() {
            let meta = String::from_utf8_lossy(meta);
            if let Some(field) = meta.split_whitespace().next() {
                if let Ok(size) = field.parse::<u64>() {
                    if size <= MAX_FILE_SIZE {
                        self.file_size = size;
                    }
                }
            }
        }

        self.file_name = sanitize_file_name(&raw_name);

        let candidate = self.download_dir.join(&self.file_name);
        let (resolved, dir_abs) = match (
            std::path::absolute(&candidate),
            std::path::absolute(&self.download_dir),
        ) {
            (Ok(resolved), Ok(dir_abs)) => (resolved, dir_abs),
            _ => {
                self.emit(ConnectionEvent::ZmodemError(format!(
                    "cannot resolve download path for {}",
                    self.file_name
                )));
                self.cancel(com);
                return;
            }
        };
        if !resolved.starts_with(&dir_abs) || resolved == dir_abs {
            log::warn!("zmodem rx: blocked escape attempt to {}", resolved.display());
            self.fail(com, TransmissionError::PathTraversal(self.file_name.clone()));
            return;
        }

        self.file_path = unique_path(resolved);
        match File::create(&self.file_path) {
            Ok(file) => self.file = Some(file),
            Err(err) => {
                self.emit(ConnectionEvent::ZmodemError(format!(
                    "cannot create file: {err}"
                )));
                self.cancel(com);
                return;
            }
        }
        self.bytes_received = 0;
        self.started_at = Instant::now();
        log::debug!(
            "zmodem rx: receiving {} ({} bytes declared)",
            self.file_path.display(),
            self.file_size
        );
        self.emit(ConnectionEvent::ZmodemStarted {
            file_name: self.file_name.clone(),
            size: self.file_size,
        });
        let zrpos = Header::from_number(FrameType::ZRPos, 0).build_hex();
        self.send(com, zrpos);
    }
}

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new("[^A-Za-z0-9._-]").unwrap();
}

/// Reduces a sender-supplied filename to a safe basename: backslashes are
/// unified to slashes, only the basename is kept, anything outside
/// `[A-Za-z0-9._-]` becomes `_`, and dotfiles or empty results fall back to
/// "download".
pub(crate) fn sanitize_file_name(raw: &str) -> String {
    let unified = raw.replace('\\', "/");
    let base = unified.rsplit('/').next().unwrap_or("");
    let safe = UNSAFE_CHARS.replace_all(base, "_").to_string();
    if safe.is_empty() || safe == "." || safe == ".." || safe.starts_with('.') {
        "download".to_string()
    } else {
        safe
    }
}

/// Appends `_1`, `_2`, ... before the extension until the path is unused.
fn unique_path(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download")
        .to_string();
    let extension = path.extension().and_then(|s| s.to_str()).map(str::to_string);
    let dir = path.parent().map_or_else(PathBuf::new, Path::to_path_buf);
    let mut counter = 1u32;
    loop {
        let name = match &extension {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
