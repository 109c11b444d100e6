use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use crate::model::Size;
use crate::protocol::zmodem::{self, Rz, Sz};
use crate::TerminalResult;

use super::{ConnectionEvent, DataConnection};

pub const DEFAULT_PORT: u16 = 23;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Short read deadline; doubles as the tick for ZMODEM transfer timeouts
/// and keeps shutdown responsive.
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const RECV_BUF_SIZE: usize = 8192;
/// Cleaned bytes kept across reads so a ZMODEM start split over two reads
/// is still spotted.
const DETECT_TAIL_SIZE: usize = 64;
/// Subnegotiation payloads longer than this are truncated.
const MAX_SUB_BUF: usize = 1024;

mod telnet_cmd {
    /// End of subnegotiation parameters.
    pub const SE: u8 = 0xF0;
    /// Indicates that what follows is subnegotiation of the given option.
    pub const SB: u8 = 0xFA;
    /// Sender wants to begin performing the option itself.
    pub const WILL: u8 = 0xFB;
    /// Sender refuses to perform the option.
    pub const WONT: u8 = 0xFC;
    /// Sender asks the peer to perform the option.
    pub const DO: u8 = 0xFD;
    /// Sender demands the peer stop performing the option.
    pub const DONT: u8 = 0xFE;
    /// Interpret As Command.
    pub const IAC: u8 = 0xFF;
}

/// <http://www.iana.org/assignments/telnet-options/telnet-options.xhtml>
mod telnet_option {
    /// <https://www.rfc-editor.org/rfc/rfc856>
    pub const TRANSMIT_BINARY: u8 = 0x00;
    /// <https://www.rfc-editor.org/rfc/rfc857>
    pub const ECHO: u8 = 0x01;
    /// <https://www.rfc-editor.org/rfc/rfc858>
    pub const SUPPRESS_GO_AHEAD: u8 = 0x03;
    /// <https://www.rfc-editor.org/rfc/rfc1091>
    pub const TERMINAL_TYPE: u8 = 24;
    /// <https://www.rfc-editor.org/rfc/rfc1073>
    pub const NAWS: u8 = 31;
}

mod terminal_type {
    pub const IS: u8 = 0x00;
    pub const SEND: u8 = 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IacState {
    Data,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    SubData,
    SubIac,
}

/// Escapes literal 0xFF bytes for transmission inside a telnet stream.
pub(crate) fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if b == telnet_cmd::IAC {
            out.extend_from_slice(&[telnet_cmd::IAC, telnet_cmd::IAC]);
        } else {
            out.push(b);
        }
    }
    out
}

/// Byte-fed IAC state machine. Because the state lives across calls, a
/// command sequence split over two socket reads is handled like any other;
/// no byte is ever dropped at a read boundary.
pub(crate) struct TelnetParser {
    state: IacState,
    sub_buffer: Vec<u8>,
    window_size: Size<u16>,
    term_type: String,
}

impl TelnetParser {
    pub fn new(window_size: Size<u16>) -> Self {
        Self {
            state: IacState::Data,
            sub_buffer: Vec::new(),
            window_size,
            term_type: "ANSI".to_string(),
        }
    }

    /// Splits `data` into clean application bytes (returned) and option
    /// negotiation, answering the latter through `out`.
    pub fn parse(&mut self, data: &[u8], out: &mut dyn DataConnection) -> TerminalResult<Vec<u8>> {
        let mut clean = Vec::with_capacity(data.len());
        for &b in data {
            match self.state {
                IacState::Data => {
                    if b == telnet_cmd::IAC {
                        self.state = IacState::Iac;
                    } else {
                        clean.push(b);
                    }
                }

                IacState::Iac => match b {
                    telnet_cmd::IAC => {
                        clean.push(telnet_cmd::IAC);
                        self.state = IacState::Data;
                    }
                    telnet_cmd::WILL => self.state = IacState::Will,
                    telnet_cmd::WONT => self.state = IacState::Wont,
                    telnet_cmd::DO => self.state = IacState::Do,
                    telnet_cmd::DONT => self.state = IacState::Dont,
                    telnet_cmd::SB => {
                        self.sub_buffer.clear();
                        self.state = IacState::SubData;
                    }
                    other => {
                        log::debug!("telnet: skipping IAC command 0x{other:02X}");
                        self.state = IacState::Data;
                    }
                },

                IacState::Will => {
                    self.state = IacState::Data;
                    match b {
                        telnet_option::ECHO
                        | telnet_option::SUPPRESS_GO_AHEAD
                        | telnet_option::TRANSMIT_BINARY => {
                            out.send(vec![telnet_cmd::IAC, telnet_cmd::DO, b])?;
                        }
                        other => {
                            log::debug!("telnet: refusing will option {other}");
                            out.send(vec![telnet_cmd::IAC, telnet_cmd::DONT, other])?;
                        }
                    }
                }

                IacState::Wont => {
                    self.state = IacState::Data;
                    out.send(vec![telnet_cmd::IAC, telnet_cmd::DONT, b])?;
                }

                IacState::Do => {
                    self.state = IacState::Data;
                    match b {
                        telnet_option::TERMINAL_TYPE
                        | telnet_option::SUPPRESS_GO_AHEAD
                        | telnet_option::TRANSMIT_BINARY => {
                            out.send(vec![telnet_cmd::IAC, telnet_cmd::WILL, b])?;
                        }
                        telnet_option::NAWS => {
                            out.send(vec![
                                telnet_cmd::IAC,
                                telnet_cmd::WILL,
                                telnet_option::NAWS,
                            ])?;
                            self.send_naws(out)?;
                        }
                        other => {
                            log::debug!("telnet: refusing do option {other}");
                            out.send(vec![telnet_cmd::IAC, telnet_cmd::WONT, other])?;
                        }
                    }
                }

                IacState::Dont => {
                    self.state = IacState::Data;
                    out.send(vec![telnet_cmd::IAC, telnet_cmd::WONT, b])?;
                }

                IacState::SubData => {
                    if b == telnet_cmd::IAC {
                        self.state = IacState::SubIac;
                    } else if self.sub_buffer.len() < MAX_SUB_BUF {
                        self.sub_buffer.push(b);
                    }
                }

                IacState::SubIac => match b {
                    telnet_cmd::SE => {
                        let payload = std::mem::take(&mut self.sub_buffer);
                        self.subnegotiate(&payload, out)?;
                        self.state = IacState::Data;
                    }
                    telnet_cmd::IAC => {
                        self.sub_buffer.push(telnet_cmd::IAC);
                        self.state = IacState::SubData;
                    }
                    _ => {
                        // malformed subnegotiation, drop it
                        self.sub_buffer.clear();
                        self.state = IacState::Data;
                    }
                },
            }
        }
        Ok(clean)
    }

    fn subnegotiate(&self, payload: &[u8], out: &mut dyn DataConnection) -> TerminalResult<()> {
        if payload.len() >= 2
            && payload[0] == telnet_option::TERMINAL_TYPE
            && payload[1] == terminal_type::SEND
        {
            let mut reply = vec![
                telnet_cmd::IAC,
                telnet_cmd::SB,
                telnet_option::TERMINAL_TYPE,
                terminal_type::IS,
            ];
            reply.extend_from_slice(self.term_type.as_bytes());
            reply.extend_from_slice(&[telnet_cmd::IAC, telnet_cmd::SE]);
            out.send(reply)?;
        }
        Ok(())
    }

    /// NAWS payload: two 16-bit big-endian integers, cols then rows.
    fn send_naws(&self, out: &mut dyn DataConnection) -> TerminalResult<()> {
        let mut reply = vec![telnet_cmd::IAC, telnet_cmd::SB, telnet_option::NAWS];
        reply.extend_from_slice(&self.window_size.width.to_be_bytes());
        reply.extend_from_slice(&self.window_size.height.to_be_bytes());
        reply.extend_from_slice(&[telnet_cmd::IAC, telnet_cmd::SE]);
        out.send(reply)
    }
}

/// Cloneable handle onto the outbound byte channel. The writer task drains
/// it; enqueueing never blocks and never drops.
#[derive(Clone)]
pub struct SendHandle {
    tx: UnboundedSender<Vec<u8>>,
}

impl SendHandle {
    pub(crate) fn push(&self, data: Vec<u8>) -> TerminalResult<()> {
        self.tx
            .send(data)
            .map_err(|_| "connection closed".into())
    }
}

impl DataConnection for SendHandle {
    fn send(&mut self, data: Vec<u8>) -> TerminalResult<()> {
        self.push(data)
    }
}

/// The ZMODEM side currently consuming the cleaned stream, if any.
enum ActiveTransfer {
    None,
    Receive(Rz),
    Send(Sz),
}

/// Telnet client connection to a BBS.
///
/// `open` dials the host and spawns a reader and a writer task. Cleaned
/// application bytes arrive on the data channel, lifecycle and transfer
/// notifications on the event channel. When the inline detector spots a
/// ZMODEM session start, the cleaned stream is diverted to a receiver until
/// the transfer ends.
pub struct TelnetConnection {
    addr: String,
    connected: Arc<AtomicBool>,
    sender: SendHandle,
    stop: watch::Sender<bool>,
    transfer: Arc<Mutex<ActiveTransfer>>,
    events: UnboundedSender<ConnectionEvent>,
    download_dir: PathBuf,
}

struct ReaderTask {
    read_half: OwnedReadHalf,
    stop: watch::Receiver<bool>,
    parser: TelnetParser,
    sender: SendHandle,
    data_tx: UnboundedSender<Vec<u8>>,
    events: UnboundedSender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
    transfer: Arc<Mutex<ActiveTransfer>>,
    download_dir: PathBuf,
    detect_tail: Vec<u8>,
}

impl TelnetConnection {
    /// Dials `host:port` (15 s timeout) and starts the background tasks.
    /// Returns the connection plus its data and event channels.
    pub async fn open(
        host: &str,
        port: u16,
        window_size: Size<u16>,
        download_dir: PathBuf,
    ) -> TerminalResult<(
        TelnetConnection,
        UnboundedReceiver<Vec<u8>>,
        UnboundedReceiver<ConnectionEvent>,
    )> {
        let addr = format!("{host}:{port}");
        log::info!("telnet: connecting to {addr}");
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| format!("connection to {addr} timed out"))??;
        let (read_half, write_half) = stream.into_split();

        let (out_tx, out_rx) = unbounded_channel();
        let (data_tx, data_rx) = unbounded_channel();
        let (event_tx, event_rx) = unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));
        let transfer = Arc::new(Mutex::new(ActiveTransfer::None));
        let sender = SendHandle { tx: out_tx };

        let _ = event_tx.send(ConnectionEvent::Connected(addr.clone()));

        tokio::spawn(writer_loop(
            write_half,
            out_rx,
            stop_rx.clone(),
            event_tx.clone(),
            connected.clone(),
        ));
        tokio::spawn(reader_loop(ReaderTask {
            read_half,
            stop: stop_rx,
            parser: TelnetParser::new(window_size),
            sender: sender.clone(),
            data_tx,
            events: event_tx.clone(),
            connected: connected.clone(),
            transfer: transfer.clone(),
            download_dir: download_dir.clone(),
            detect_tail: Vec::with_capacity(DETECT_TAIL_SIZE),
        }));

        Ok((
            TelnetConnection {
                addr,
                connected,
                sender,
                stop: stop_tx,
                transfer,
                events: event_tx,
                download_dir,
            },
            data_rx,
            event_rx,
        ))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Raw outbound handle, bypassing IAC escaping. Used to loop device
    /// status replies straight back to the wire.
    pub fn send_handle(&self) -> SendHandle {
        self.sender.clone()
    }

    /// Queues `data` for transmission, escaping literal 0xFF bytes.
    pub fn send(&self, data: &[u8]) -> TerminalResult<()> {
        if !self.is_connected() {
            return Err("not connected".into());
        }
        self.sender.push(escape_iac(data))
    }

    /// Stops both background tasks; the writer shuts the socket down, which
    /// also wakes the reader.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.stop.send(true);
    }

    /// Starts a ZMODEM upload of `path`. Subsequent inbound bytes drive the
    /// sender state machine until the session ends.
    pub fn start_upload(&self, path: &Path) -> TerminalResult<()> {
        if !self.is_connected() {
            return Err("not connected".into());
        }
        let mut guard = self
            .transfer
            .lock()
            .map_err(|_| "transfer state poisoned")?;
        if !matches!(&*guard, ActiveTransfer::None) {
            return Err("a transfer is already in progress".into());
        }
        let mut sz = Sz::new(self.events.clone());
        let mut sender = self.sender.clone();
        sz.start_upload(&mut sender, path);
        if sz.is_active() {
            *guard = ActiveTransfer::Send(sz);
        }
        Ok(())
    }

    /// Aborts whatever transfer is running and returns the stream to the
    /// terminal.
    pub fn cancel_transfer(&self) {
        if let Ok(mut guard) = self.transfer.lock() {
            let mut sender = self.sender.clone();
            match &mut *guard {
                ActiveTransfer::Receive(rz) => rz.cancel(&mut sender),
                ActiveTransfer::Send(sz) => sz.cancel(&mut sender),
                ActiveTransfer::None => {}
            }
            *guard = ActiveTransfer::None;
        }
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }
}

fn mark_disconnected(
    connected: &AtomicBool,
    events: &UnboundedSender<ConnectionEvent>,
    reason: String,
) {
    if connected.swap(false, Ordering::SeqCst) {
        let _ = events.send(ConnectionEvent::Disconnected(reason));
    }
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut out_rx: UnboundedReceiver<Vec<u8>>,
    mut stop: watch::Receiver<bool>,
    events: UnboundedSender<ConnectionEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            chunk = out_rx.recv() => match chunk {
                None => break,
                Some(chunk) => {
                    if let Err(err) = write_half.write_all(&chunk).await {
                        mark_disconnected(&connected, &events, err.to_string());
                        break;
                    }
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
}

async fn reader_loop(mut task: ReaderTask) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        let read_result = tokio::select! {
            _ = task.stop.changed() => break,
            result = tokio::time::timeout(READ_TIMEOUT, task.read_half.read(&mut buf)) => result,
        };
        let n = match read_result {
            // benign read deadline; it drives the transfer timeouts
            Err(_) => {
                tick_transfer(&task.transfer, &mut task.sender);
                continue;
            }
            Ok(Ok(0)) => {
                mark_disconnected(
                    &task.connected,
                    &task.events,
                    "connection closed by remote host".to_string(),
                );
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(err)) => {
                mark_disconnected(&task.connected, &task.events, err.to_string());
                break;
            }
        };

        let clean = match task.parser.parse(&buf[..n], &mut task.sender) {
            Ok(clean) => clean,
            Err(err) => {
                mark_disconnected(&task.connected, &task.events, err.to_string());
                break;
            }
        };
        if clean.is_empty() {
            continue;
        }

        if feed_transfer(&task.transfer, &mut task.sender, &clean) {
            continue;
        }

        // inline ZMODEM detection over the previous tail plus this chunk
        let mut window = Vec::with_capacity(task.detect_tail.len() + clean.len());
        window.extend_from_slice(&task.detect_tail);
        window.extend_from_slice(&clean);
        if zmodem::detect(&window) {
            log::info!("telnet: ZMODEM transfer detected, starting receiver");
            task.detect_tail.clear();
            let mut rz = Rz::new(task.download_dir.clone(), task.events.clone());
            rz.start(&mut task.sender, &window);
            if rz.is_active() {
                if let Ok(mut guard) = task.transfer.lock() {
                    *guard = ActiveTransfer::Receive(rz);
                }
            }
            continue;
        }

        let keep = clean.len().min(DETECT_TAIL_SIZE);
        task.detect_tail.clear();
        task.detect_tail.extend_from_slice(&clean[clean.len() - keep..]);

        if task.data_tx.send(clean).is_err() {
            break; // the host side is gone
        }
    }
}

/// Routes a cleaned chunk into the active transfer. Returns false when no
/// transfer is running and the chunk belongs to the terminal.
fn feed_transfer(
    transfer: &Mutex<ActiveTransfer>,
    sender: &mut SendHandle,
    clean: &[u8],
) -> bool {
    let Ok(mut guard) = transfer.lock() else {
        return false;
    };
    match &mut *guard {
        ActiveTransfer::Receive(rz) => {
            rz.feed(sender, clean);
            if !rz.is_active() {
                *guard = ActiveTransfer::None;
            }
            true
        }
        ActiveTransfer::Send(sz) => {
            sz.feed(sender, clean);
            if !sz.is_active() {
                *guard = ActiveTransfer::None;
            }
            true
        }
        ActiveTransfer::None => false,
    }
}

/// Read-timeout tick: lets the receiver notice stalls and false positives.
fn tick_transfer(transfer: &Mutex<ActiveTransfer>, sender: &mut SendHandle) {
    let Ok(mut guard) = transfer.lock() else {
        return;
    };
    if let ActiveTransfer::Receive(rz) = &mut *guard {
        rz.check_timeout(sender);
        if !rz.is_active() {
            *guard = ActiveTransfer::None;
        }
    }
}
