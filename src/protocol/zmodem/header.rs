use std::fmt::Display;

use super::crc::{get_crc16, get_crc32};
use super::{zdle_encode, XON, ZBIN, ZBIN32, ZCRCE, ZCRCG, ZCRCQ, ZCRCW, ZDLE, ZHEX, ZPAD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    ZRQInit = 0,
    ZRInit = 1,
    ZSInit = 2,
    ZAck = 3,
    ZFile = 4,
    ZSkip = 5,
    ZNak = 6,
    ZAbort = 7,
    ZFin = 8,
    ZRPos = 9,
    ZData = 10,
    ZEof = 11,
    ZFErr = 12,
    ZCrc = 13,
    ZChallenge = 14,
    ZCompl = 15,
    ZCan = 16,
}

impl FrameType {
    pub fn from_byte(byte: u8) -> Option<FrameType> {
        Some(match byte {
            0 => FrameType::ZRQInit,
            1 => FrameType::ZRInit,
            2 => FrameType::ZSInit,
            3 => FrameType::ZAck,
            4 => FrameType::ZFile,
            5 => FrameType::ZSkip,
            6 => FrameType::ZNak,
            7 => FrameType::ZAbort,
            8 => FrameType::ZFin,
            9 => FrameType::ZRPos,
            10 => FrameType::ZData,
            11 => FrameType::ZEof,
            12 => FrameType::ZFErr,
            13 => FrameType::ZCrc,
            14 => FrameType::ZChallenge,
            15 => FrameType::ZCompl,
            16 => FrameType::ZCan,
            _ => return None,
        })
    }
}

/// A ZMODEM frame header: a frame type plus four parameter bytes.
///
/// `data` holds p0..p3 in wire order. Position-carrying frames (ZRPOS, ZDATA,
/// ZEOF, ZACK) encode a 32-bit little-endian offset in them; flag-carrying
/// frames (ZRINIT) keep their ZF0 flags byte in p3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub frame_type: FrameType,
    pub data: [u8; 4],
}

impl Display for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.frame_type {
            FrameType::ZRPos | FrameType::ZData | FrameType::ZEof | FrameType::ZAck => {
                write!(f, "[{:?} pos={}]", self.frame_type, self.number())
            }
            _ => write!(
                f,
                "[{:?} p=[{}, {}, {}, {}]]",
                self.frame_type,
                self.p0(),
                self.p1(),
                self.p2(),
                self.p3()
            ),
        }
    }
}

impl Header {
    pub fn empty(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            data: [0, 0, 0, 0],
        }
    }

    pub fn from_flags(frame_type: FrameType, p0: u8, p1: u8, p2: u8, p3: u8) -> Self {
        Self {
            frame_type,
            data: [p0, p1, p2, p3],
        }
    }

    pub fn from_number(frame_type: FrameType, number: u32) -> Self {
        Self {
            frame_type,
            data: u32::to_le_bytes(number),
        }
    }

    pub fn p0(&self) -> u8 {
        self.data[0]
    }

    pub fn p1(&self) -> u8 {
        self.data[1]
    }

    pub fn p2(&self) -> u8 {
        self.data[2]
    }

    pub fn p3(&self) -> u8 {
        self.data[3]
    }

    pub fn number(&self) -> u32 {
        u32::from_le_bytes(self.data)
    }

    fn raw_bytes(&self) -> [u8; 5] {
        [
            self.frame_type as u8,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
        ]
    }

    /// Hex header: `* * ZDLE B` then fourteen hex digits (type, p0..p3 and
    /// CRC16 high/low), terminated with CR LF.
    pub fn build_hex(&self) -> Vec<u8> {
        let raw = self.raw_bytes();
        let mut out = Vec::with_capacity(22);
        out.extend_from_slice(&[ZPAD, ZPAD, ZDLE, ZHEX]);
        for b in raw {
            push_hex(&mut out, b);
        }
        let crc = get_crc16(&raw, 0);
        push_hex(&mut out, (crc >> 8) as u8);
        push_hex(&mut out, (crc & 0xFF) as u8);
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Binary header: `* ZDLE A` (CRC16, big-endian) or `* ZDLE C` (CRC32,
    /// little-endian) with the five header bytes and the CRC ZDLE-escaped.
    pub fn build_bin(&self, use_crc32: bool) -> Vec<u8> {
        let raw = self.raw_bytes();
        let mut out = Vec::with_capacity(20);
        if use_crc32 {
            out.extend_from_slice(&[ZPAD, ZDLE, ZBIN32]);
            out.extend(zdle_encode(&raw));
            out.extend(zdle_encode(&get_crc32(&raw).to_le_bytes()));
        } else {
            out.extend_from_slice(&[ZPAD, ZDLE, ZBIN]);
            out.extend(zdle_encode(&raw));
            out.extend(zdle_encode(&get_crc16(&raw, 0).to_be_bytes()));
        }
        out
    }
}

/// A header parsed out of an accumulation buffer. `consumed` is how many
/// bytes of that buffer the parse used up, including skipped garbage before
/// the frame start and any trailing CR/LF/XON after a hex header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeader {
    pub header: Header,
    pub consumed: usize,
    pub crc32: bool,
}

fn push_hex(out: &mut Vec<u8>, byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    out.push(DIGITS[usize::from(byte >> 4)]);
    out.push(DIGITS[usize::from(byte & 0xF)]);
}

fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Tries to parse a hex header anywhere in `data`. Returns `None` on short
/// input, bad hex digits or a CRC mismatch.
pub fn parse_hex_header(data: &[u8]) -> Option<ParsedHeader> {
    let n = data.len();
    let mut idx = 0;
    loop {
        if idx + 3 >= n {
            return None;
        }
        if data[idx] == ZPAD && data[idx + 1] == ZPAD && data[idx + 2] == ZDLE && data[idx + 3] == ZHEX
        {
            break;
        }
        idx += 1;
    }
    idx += 4;

    // type, p0..p3 and crc as 14 hex digits
    if idx + 14 > n {
        return None;
    }
    let mut vals = [0u8; 7];
    for (i, val) in vals.iter_mut().enumerate() {
        *val = (hex_val(data[idx + i * 2])? << 4) | hex_val(data[idx + i * 2 + 1])?;
    }
    idx += 14;

    if get_crc16(&vals[0..5], 0) != u16::from_be_bytes([vals[5], vals[6]]) {
        return None;
    }
    let frame_type = FrameType::from_byte(vals[0])?;

    // skip the CR LF trailer plus the XON / 0x8A some senders append
    while idx < n && matches!(data[idx], 0x0D | 0x0A | XON | 0x8A) {
        idx += 1;
    }

    Some(ParsedHeader {
        header: Header {
            frame_type,
            data: [vals[1], vals[2], vals[3], vals[4]],
        },
        consumed: idx,
        crc32: false,
    })
}

fn unescape_into(data: &[u8], idx: &mut usize, out: &mut [u8]) -> usize {
    let n = data.len();
    let mut got = 0;
    while got < out.len() && *idx < n {
        if data[*idx] == ZDLE {
            *idx += 1;
            if *idx < n {
                out[got] = data[*idx] ^ 0x40;
                got += 1;
            }
        } else {
            out[got] = data[*idx];
            got += 1;
        }
        *idx += 1;
    }
    got
}

/// Tries to parse a binary (CRC16 or CRC32) header anywhere in `data`.
pub fn parse_bin_header(data: &[u8]) -> Option<ParsedHeader> {
    let n = data.len();
    let mut idx = 0;
    loop {
        if idx + 2 >= n {
            return None;
        }
        if data[idx] == ZPAD
            && data[idx + 1] == ZDLE
            && (data[idx + 2] == ZBIN || data[idx + 2] == ZBIN32)
        {
            break;
        }
        idx += 1;
    }
    let crc32 = data[idx + 2] == ZBIN32;
    idx += 3;

    let mut raw = [0u8; 5];
    if unescape_into(data, &mut idx, &mut raw) < 5 {
        return None;
    }

    let crc_len = if crc32 { 4 } else { 2 };
    let mut crc_bytes = [0u8; 4];
    if unescape_into(data, &mut idx, &mut crc_bytes[..crc_len]) < crc_len {
        return None;
    }

    if crc32 {
        if u32::from_le_bytes(crc_bytes) != get_crc32(&raw) {
            return None;
        }
    } else if u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]) != get_crc16(&raw, 0) {
        return None;
    }

    let frame_type = FrameType::from_byte(raw[0])?;
    Some(ParsedHeader {
        header: Header {
            frame_type,
            data: [raw[1], raw[2], raw[3], raw[4]],
        },
        consumed: idx,
        crc32,
    })
}

/// A data subpacket parsed out of an accumulation buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpacket {
    pub payload: Vec<u8>,
    pub end_type: u8,
    pub consumed: usize,
}

impl Subpacket {
    /// ZCRCE / ZCRCW terminate the frame; ZCRCG / ZCRCQ continue it.
    pub fn ends_frame(&self) -> bool {
        matches!(self.end_type, ZCRCE | ZCRCW)
    }

    /// ZCRCQ / ZCRCW ask the receiver to acknowledge with ZACK.
    pub fn expects_ack(&self) -> bool {
        matches!(self.end_type, ZCRCQ | ZCRCW)
    }
}

/// Builds a data subpacket: ZDLE-escaped payload, `ZDLE end_type`, then the
/// escaped CRC over payload plus end byte.
pub fn build_subpacket(data: &[u8], end_type: u8, use_crc32: bool) -> Vec<u8> {
    let mut out = zdle_encode(data);
    out.extend_from_slice(&[ZDLE, end_type]);

    let mut check = Vec::with_capacity(data.len() + 1);
    check.extend_from_slice(data);
    check.push(end_type);
    if use_crc32 {
        out.extend(zdle_encode(&get_crc32(&check).to_le_bytes()));
    } else {
        out.extend(zdle_encode(&get_crc16(&check, 0).to_be_bytes()));
    }
    out
}

/// Tries to parse a data subpacket from the start of `data`. Returns `None`
/// while the packet is still incomplete and on CRC mismatch.
pub fn parse_subpacket(data: &[u8], use_crc32: bool) -> Option<Subpacket> {
    let n = data.len();
    let mut payload = Vec::with_capacity(n.min(super::BLOCK_SIZE));
    let mut idx = 0;
    let mut end_type = None;

    while idx < n {
        let b = data[idx];
        if b == ZDLE {
            idx += 1;
            if idx >= n {
                return None;
            }
            let next = data[idx];
            if matches!(next, ZCRCE | ZCRCG | ZCRCQ | ZCRCW) {
                end_type = Some(next);
                idx += 1;
                break;
            }
            payload.push(next ^ 0x40);
        } else {
            payload.push(b);
        }
        idx += 1;
    }
    let end_type = end_type?;

    let crc_len = if use_crc32 { 4 } else { 2 };
    let mut crc_bytes = [0u8; 4];
    if unescape_into(data, &mut idx, &mut crc_bytes[..crc_len]) < crc_len {
        return None;
    }

    let mut check = payload.clone();
    check.push(end_type);
    if use_crc32 {
        if u32::from_le_bytes(crc_bytes) != get_crc32(&check) {
            return None;
        }
    } else if u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]) != get_crc16(&check, 0) {
        return None;
    }

    Some(Subpacket {
        payload,
        end_type,
        consumed: idx,
    })
}
