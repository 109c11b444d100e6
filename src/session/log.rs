use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::util::create_private_dir;

/// A flooding session cannot grow a log past this; further writes are
/// dropped.
const MAX_LOG_SIZE: u64 = 50 * 1024 * 1024;

/// Appends the decoded session stream (ANSI escapes included) to a log file
/// that can be replayed later.
pub struct SessionLog {
    dir: PathBuf,
    file: Option<File>,
    path: Option<PathBuf>,
    written: u64,
    warned: bool,
}

impl SessionLog {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            file: None,
            path: None,
            written: 0,
            warned: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Opens `logs/<name>_<YYYY-MM-DD_HHMMSS>.log` and writes the session
    /// header. A log that is already running is closed first.
    pub fn start(&mut self, bbs_name: &str, host: &str, port: u16) -> io::Result<()> {
        self.stop();
        create_private_dir(&self.dir)?;

        let safe = if bbs_name.is_empty() {
            sanitize_name(host)
        } else {
            sanitize_name(bbs_name)
        };
        let timestamp = Local::now().format("%Y-%m-%d_%H%M%S");
        let path = self.dir.join(format!("{safe}_{timestamp}.log"));
        let mut file = File::create(&path)?;

        let header = format!(
            "=== Session {bbs_name} ({host}:{port}) at {} ===\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        file.write_all(header.as_bytes())?;

        self.file = Some(file);
        self.path = Some(path);
        self.written = 0;
        self.warned = false;
        Ok(())
    }

    pub fn write(&mut self, text: &str) {
        let Some(file) = &mut self.file else {
            return;
        };
        if self.written > MAX_LOG_SIZE {
            if !self.warned {
                log::warn!("session log reached its 50 MiB cap, dropping further output");
                self.warned = true;
            }
            return;
        }
        if file.write_all(text.as_bytes()).is_ok() {
            self.written += text.len() as u64;
        }
    }

    /// Writes the session footer and closes the file.
    pub fn stop(&mut self) {
        if let Some(mut file) = self.file.take() {
            let footer = format!(
                "\n=== End of session at {} ===\n",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            let _ = file.write_all(footer.as_bytes());
        }
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
