#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::struct_excessive_bools
)]

//! Terminal core for dialing bulletin-board systems over Telnet.
//!
//! The crate is built from three byte-stream engines and a coordinator:
//!
//! * [`com::TelnetConnection`]: TCP transport, IAC option negotiation and
//!   inline ZMODEM steering
//! * [`model::Screen`]: an 80x25 ANSI/VT100 emulator fed with CP437-decoded
//!   text
//! * [`protocol::zmodem`]: the ZMODEM receiver and sender state machines
//! * [`session::Session`]: wires the above and exposes screen snapshots plus
//!   a session event stream to the hosting front-end

use std::error::Error;

pub mod address_book;
pub mod com;
pub mod keys;
pub mod model;
pub mod protocol;
pub mod session;
pub mod util;

pub type TerminalResult<T> = Result<T, Box<dyn Error + Send + Sync>>;
