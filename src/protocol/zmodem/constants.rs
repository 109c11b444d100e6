#![allow(dead_code)]

//
// Constants from the ZMODEM protocol description:
//
//   Z M O D E M . H     Manifest constants for ZMODEM
//    application to application file transfer protocol
//    04-17-89  Chuck Forsberg Omen Technology Inc
//
// See http://cristal.inria.fr/~doligez/zmodem/zmodem.txt

pub const ZPAD: u8 = b'*'; // padding character, begins frames
pub const ZDLE: u8 = 0x18; // Ctrl-X, the ZMODEM data link escape
pub const ZDLEE: u8 = 0x58; // escaped ZDLE as transmitted
pub const ZBIN: u8 = b'A'; // binary frame indicator (CRC-16)
pub const ZHEX: u8 = b'B'; // hex frame indicator
pub const ZBIN32: u8 = b'C'; // binary frame with 32 bit FCS

pub const CAN: u8 = 0x18;
pub const XON: u8 = 0x11;
pub const XOFF: u8 = 0x13;

/// ZDLE subpacket terminators.
/// CRC next, frame ends, header packet follows
pub const ZCRCE: u8 = 0x68;
/// CRC next, frame continues nonstop
pub const ZCRCG: u8 = 0x69;
/// CRC next, frame continues, ZACK expected
pub const ZCRCQ: u8 = 0x6A;
/// CRC next, ZACK expected, end of frame
pub const ZCRCW: u8 = 0x6B;

/// Bytes that must be ZDLE-escaped on the wire. 0xFF is included so the
/// encoded stream stays transparent to the Telnet IAC byte.
pub const ZDLE_ESCAPED: [u8; 10] = [0x18, 0x10, 0x11, 0x13, 0x90, 0x91, 0x93, 0x0D, 0x8D, 0xFF];

/// Abort sequence: eight CAN followed by eight BS.
pub const ABORT_SEQ: [u8; 16] = [
    0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x18, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08, 0x08,
];

/// Largest file either side will accept (4 GB).
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;
/// Hard cap on the receive/send accumulation buffer; exceeding it is a fatal
/// protocol error.
pub const MAX_BUF_SIZE: usize = 64 * 1024;
/// Scan forward for the next ZPAD once this much unparseable data piled up.
pub const SCAN_DISCARD_SIZE: usize = 1024;
/// Data subpacket payload size used when sending.
pub const BLOCK_SIZE: usize = 1024;
/// Transfer gives up after this many retries.
pub const MAX_RETRIES: u32 = 5;

pub mod zrinit_flag {
    //! Bit masks for the ZRINIT flags byte ZF0.

    /// Rx can send and receive true full duplex
    pub const CANFDX: u8 = 0x01;
    /// Rx can receive data during disk I/O
    pub const CANOVIO: u8 = 0x02;
    /// Rx can send a break signal
    pub const CANBRK: u8 = 0x04;
    /// Receiver can use 32 bit frame check
    pub const CANFC32: u8 = 0x20;
    /// Receiver expects ctl chars to be escaped
    pub const ESCCTL: u8 = 0x40;
    /// Receiver expects 8th bit to be escaped
    pub const ESC8: u8 = 0x80;
}

/// Receiver capabilities advertised in our ZRINIT.
pub const RECEIVER_FLAGS: u8 =
    zrinit_flag::CANFDX | zrinit_flag::CANOVIO | zrinit_flag::CANFC32;
