mod log;
pub use log::SessionLog;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::com::{ConnectionEvent, TelnetConnection};
use crate::keys::{ctrl_key, SpecialKey};
use crate::model::{decode_cp437, encode_cp437, Screen, ScreenSnapshot, Size, DEFAULT_COLS, DEFAULT_ROWS};
use crate::TerminalResult;

const CLEAR_SCREEN_SEQ: &str = "\x1b[2J";

/// Replays a recorded session, one clear-screen-delimited page at a time.
struct LogViewer {
    pages: Vec<String>,
    index: usize,
}

struct SessionState {
    connected: bool,
    connection: Option<TelnetConnection>,
    session_log: SessionLog,
    log_viewer: Option<LogViewer>,
    download_dir: PathBuf,
}

/// Wires the telnet connection to the screen emulator and the session log,
/// forwards connection events to the host, and exposes the atomic screen
/// snapshot the renderer consumes.
///
/// The screen sits behind its own mutex so snapshots are consistent with
/// feeds; everything else (connected flag, log viewer, session log, download
/// directory) shares the session mutex. Neither lock is held across I/O.
pub struct Session {
    screen: Arc<Mutex<Screen>>,
    state: Arc<Mutex<SessionState>>,
    events_tx: UnboundedSender<ConnectionEvent>,
}

impl Session {
    /// Creates a session plus the event stream the host listens on.
    pub fn new(
        download_dir: PathBuf,
        log_dir: PathBuf,
    ) -> (Session, UnboundedReceiver<ConnectionEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        let session = Session {
            screen: Arc::new(Mutex::new(Screen::new(DEFAULT_COLS, DEFAULT_ROWS))),
            state: Arc::new(Mutex::new(SessionState {
                connected: false,
                connection: None,
                session_log: SessionLog::new(log_dir),
                log_viewer: None,
                download_dir,
            })),
            events_tx,
        };
        (session, events_rx)
    }

    /// Where downloads land when the caller has no preference.
    pub fn default_download_dir() -> PathBuf {
        directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    /// Where session logs land when the caller has no preference.
    pub fn default_log_dir() -> PathBuf {
        directories::ProjectDirs::from("org", "EmberTerm", "ember_term")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    /// Dials the BBS, starts the session log and the pump task that feeds
    /// the screen. `bbs_name` labels the log file; empty falls back to the
    /// host name.
    pub async fn connect(&self, host: &str, port: u16, bbs_name: &str) -> TerminalResult<()> {
        let download_dir = {
            let mut state = self.lock_state();
            if state.connected {
                return Err("already connected".into());
            }
            let name = if bbs_name.is_empty() { host } else { bbs_name };
            // a session without a log is still a session
            let _ = state.session_log.start(name, host, port);
            state.log_viewer = None;
            state.download_dir.clone()
        };

        // a fresh connection starts from a clean grid
        self.lock_screen().reset();

        let window = Size::from(DEFAULT_COLS as u16, DEFAULT_ROWS as u16);
        let opened = TelnetConnection::open(host, port, window, download_dir).await;
        let (connection, data_rx, event_rx) = match opened {
            Ok(parts) => parts,
            Err(err) => {
                self.lock_state().session_log.stop();
                return Err(err);
            }
        };

        // cursor position reports go straight back to the wire
        let reply_handle = connection.send_handle();
        self.lock_screen()
            .set_response_callback(Box::new(move |bytes| {
                let _ = reply_handle.push(bytes.to_vec());
            }));

        self.lock_state().connection = Some(connection);

        tokio::spawn(pump_loop(
            data_rx,
            event_rx,
            self.screen.clone(),
            self.state.clone(),
            self.events_tx.clone(),
        ));
        Ok(())
    }

    /// Closes the connection, the session log, and tells the host.
    pub fn disconnect(&self) {
        {
            let mut state = self.lock_state();
            if let Some(connection) = &state.connection {
                connection.disconnect();
            }
            state.connection = None;
            state.connected = false;
            state.session_log.stop();
        }
        let _ = self
            .events_tx
            .send(ConnectionEvent::Disconnected("disconnected".to_string()));
    }

    pub fn is_connected(&self) -> bool {
        self.lock_state().connected
    }

    /// One atomic call: the resolved grid plus the cursor that belongs to it.
    pub fn snapshot(&self) -> ScreenSnapshot {
        self.lock_screen().snapshot()
    }

    pub fn clear_screen(&self) {
        self.lock_screen().reset();
    }

    pub fn send_bytes(&self, data: &[u8]) -> TerminalResult<()> {
        let state = self.lock_state();
        if !state.connected {
            return Err("not connected".into());
        }
        match &state.connection {
            Some(connection) => connection.send(data),
            None => Err("not connected".into()),
        }
    }

    /// Sends text typed by the user, CP437-encoded.
    pub fn send_text(&self, text: &str) -> TerminalResult<()> {
        let bytes: Vec<u8> = text.chars().map(encode_cp437).collect();
        self.send_bytes(&bytes)
    }

    pub fn send_key(&self, key: SpecialKey) -> TerminalResult<()> {
        self.send_bytes(key.sequence())
    }

    pub fn send_ctrl(&self, letter: char) -> TerminalResult<()> {
        match ctrl_key(letter) {
            Some(byte) => self.send_bytes(&[byte]),
            None => Ok(()),
        }
    }

    /// Starts a ZMODEM upload of `path` over the current connection.
    pub fn upload_file(&self, path: &Path) -> TerminalResult<()> {
        let state = self.lock_state();
        match &state.connection {
            Some(connection) => connection.start_upload(path),
            None => Err("not connected".into()),
        }
    }

    pub fn cancel_transfer(&self) {
        let state = self.lock_state();
        if let Some(connection) = &state.connection {
            connection.cancel_transfer();
        }
    }

    // log viewer

    /// Loads a recorded session log and replays its first page into the
    /// screen. Disconnects first if a session is running.
    pub fn load_log(&self, path: &Path) -> TerminalResult<()> {
        let content = std::fs::read_to_string(path)?;
        if self.is_connected() {
            self.disconnect();
        }

        let text = strip_log_markers(&content);
        let mut pages: Vec<String> = Vec::new();
        for (i, part) in text.split(CLEAR_SCREEN_SEQ).enumerate() {
            if part.trim().is_empty() {
                continue;
            }
            if i > 0 {
                pages.push(format!("{CLEAR_SCREEN_SEQ}{part}"));
            } else {
                pages.push(part.to_string());
            }
        }
        if pages.is_empty() {
            pages.push(text.into_owned());
        }

        self.lock_state().log_viewer = Some(LogViewer { pages, index: 0 });
        self.show_log_page();
        Ok(())
    }

    pub fn is_viewing_log(&self) -> bool {
        self.lock_state().log_viewer.is_some()
    }

    pub fn log_next_page(&self) {
        {
            let mut state = self.lock_state();
            let Some(viewer) = &mut state.log_viewer else {
                return;
            };
            if viewer.index + 1 < viewer.pages.len() {
                viewer.index += 1;
            }
        }
        self.show_log_page();
    }

    pub fn log_prev_page(&self) {
        {
            let mut state = self.lock_state();
            let Some(viewer) = &mut state.log_viewer else {
                return;
            };
            viewer.index = viewer.index.saturating_sub(1);
        }
        self.show_log_page();
    }

    pub fn exit_log_view(&self) {
        self.lock_state().log_viewer = None;
        self.lock_screen().reset();
    }

    fn show_log_page(&self) {
        let Some((page, current, total)) = ({
            let state = self.lock_state();
            state
                .log_viewer
                .as_ref()
                .map(|v| (v.pages[v.index].clone(), v.index + 1, v.pages.len()))
        }) else {
            return;
        };

        let mut screen = self.lock_screen();
        screen.reset();
        screen.feed(&page);

        // reverse-video navigation bar on the bottom row
        let hint = if current < total {
            "SPACE next | LEFT back | ESC exit"
        } else {
            "LAST PAGE | LEFT back | ESC exit"
        };
        let mut bar = format!(" Log [{current}/{total}]  {hint} ");
        while bar.chars().count() < screen.cols() {
            bar.push(' ');
        }
        let rows = screen.rows();
        screen.feed(&format!("\x1b[{rows};1H\x1b[0;7m{bar}\x1b[0m"));
    }

    fn lock_screen(&self) -> std::sync::MutexGuard<'_, Screen> {
        match self.screen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

lazy_static! {
    static ref LOG_HEADER: Regex = Regex::new(r"(?m)^=== Session .+===\n?").unwrap();
    static ref LOG_FOOTER: Regex = Regex::new(r"\n?=== End of session .+===\s*$").unwrap();
}

fn strip_log_markers(content: &str) -> std::borrow::Cow<'_, str> {
    match LOG_FOOTER.replace(content, "") {
        std::borrow::Cow::Borrowed(text) => LOG_HEADER.replace_all(text, ""),
        std::borrow::Cow::Owned(text) => {
            std::borrow::Cow::Owned(LOG_HEADER.replace_all(&text, "").into_owned())
        }
    }
}

/// Drains the connection's channels: bytes into the screen and the session
/// log, events to the host after the connected flag is maintained.
async fn pump_loop(
    mut data_rx: UnboundedReceiver<Vec<u8>>,
    mut event_rx: UnboundedReceiver<ConnectionEvent>,
    screen: Arc<Mutex<Screen>>,
    state: Arc<Mutex<SessionState>>,
    events: UnboundedSender<ConnectionEvent>,
) {
    loop {
        tokio::select! {
            chunk = data_rx.recv() => match chunk {
                Some(chunk) => {
                    let text = decode_cp437(&chunk);
                    if let Ok(mut screen) = screen.lock() {
                        screen.feed(&text);
                    }
                    if let Ok(mut state) = state.lock() {
                        state.session_log.write(&text);
                    }
                }
                None => break,
            },
            event = event_rx.recv() => match event {
                Some(event) => {
                    if let Ok(mut state) = state.lock() {
                        match &event {
                            ConnectionEvent::Connected(_) => state.connected = true,
                            ConnectionEvent::Disconnected(_) | ConnectionEvent::Error(_) => {
                                state.connected = false;
                                state.connection = None;
                                state.session_log.stop();
                            }
                            _ => {}
                        }
                    }
                    let _ = events.send(event);
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::Session;
    use crate::com::ConnectionEvent;

    fn make_session(tmp: &std::path::Path) -> (Session, tokio::sync::mpsc::UnboundedReceiver<ConnectionEvent>) {
        Session::new(tmp.join("downloads"), tmp.join("logs"))
    }

    fn screen_text(session: &Session, row: usize) -> String {
        let snap = session.snapshot();
        snap.cells[row * snap.cols..(row + 1) * snap.cols]
            .iter()
            .map(|c| c.ch)
            .collect()
    }

    #[test]
    fn refuses_to_send_when_offline() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _events) = make_session(tmp.path());
        assert!(!session.is_connected());
        assert!(session.send_text("hello").is_err());
    }

    #[test]
    fn replays_a_recorded_log_in_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, _events) = make_session(tmp.path());

        let log_path = tmp.path().join("old_session.log");
        std::fs::write(
            &log_path,
            "=== Session Old BBS (host:23) at 2024-01-01 10:00:00 ===\n\
             first page\x1b[2Jsecond page\n\
             === End of session at 2024-01-01 10:30:00 ===\n",
        )
        .unwrap();

        session.load_log(&log_path).unwrap();
        assert!(session.is_viewing_log());
        assert!(screen_text(&session, 0).starts_with("first page"));
        assert!(screen_text(&session, 24).contains("Log [1/2]"));

        session.log_next_page();
        assert!(screen_text(&session, 0).starts_with("second page"));
        assert!(screen_text(&session, 24).contains("LAST PAGE"));

        session.log_prev_page();
        assert!(screen_text(&session, 0).starts_with("first page"));

        session.exit_log_view();
        assert!(!session.is_viewing_log());
        assert_eq!(screen_text(&session, 0).trim(), "");
    }

    #[tokio::test]
    async fn full_session_against_a_loopback_bbs() {
        let tmp = tempfile::tempdir().unwrap();
        let (session, mut events) = make_session(tmp.path());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // CP437 box drawing plus a colored banner
            sock.write_all(&[0xC9, 0xCD, 0xBB]).await.unwrap();
            sock.write_all(b"\r\n\x1b[1;32mWELCOME\x1b[0m").await.unwrap();
            // ask where the cursor is
            sock.write_all(b"\x1b[6n").await.unwrap();
            let mut reply = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                sock.read_exact(&mut byte).await.unwrap();
                reply.push(byte[0]);
                if byte[0] == b'R' {
                    break;
                }
            }
            reply
        });

        session.connect("127.0.0.1", port, "Loopback BBS").await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(ConnectionEvent::Connected(_))
        ));

        // wait for the banner to land on the grid
        let mut seen = false;
        for _ in 0..100 {
            if screen_text(&session, 1).contains("WELCOME") {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(seen, "banner never reached the screen");
        assert!(screen_text(&session, 0).starts_with("╔═╗"));
        assert!(session.is_connected());

        // the cursor report went back over the wire: row 2, after WELCOME
        let report = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, b"\x1b[2;8R");

        session.disconnect();
        assert!(!session.is_connected());

        // the whole exchange was captured in the session log
        let logs: Vec<_> = std::fs::read_dir(tmp.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        let content = std::fs::read_to_string(&logs[0]).unwrap();
        assert!(content.starts_with("=== Session Loopback BBS"));
        assert!(content.contains("WELCOME"));
        assert!(content.trim_end().ends_with("==="));
    }
}
