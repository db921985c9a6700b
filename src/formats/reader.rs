//! Bounds-checked, endian-aware field reads shared by all format parsers.

use crate::error::DetectorError;
use crate::image::Endianness;
use std::fmt;

/// Low-level failure inside a format parser; surfaces as `MalformedBinary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Truncated { offset: usize, needed: usize },
    InvalidOffset { offset: usize },
    InvalidValue { offset: usize, what: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset, needed } => {
                write!(f, "Truncated at {:#x}, needed {} bytes", offset, needed)
            }
            Self::InvalidOffset { offset } => write!(f, "Invalid offset: {:#x}", offset),
            Self::InvalidValue { offset, what } => {
                write!(f, "Invalid {} at {:#x}", what, offset)
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            Self::Truncated { offset, .. }
            | Self::InvalidOffset { offset }
            | Self::InvalidValue { offset, .. } => *offset,
        }
    }
}

impl From<ParseError> for DetectorError {
    fn from(err: ParseError) -> Self {
        DetectorError::malformed(err.offset() as u64, err.to_string())
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Reading fixed-width integers at an offset with a given byte order.
pub trait EndianRead {
    fn read_u8_at(&self, offset: usize) -> ParseResult<u8>;
    fn read_u16_at(&self, offset: usize, endian: Endianness) -> ParseResult<u16>;
    fn read_u32_at(&self, offset: usize, endian: Endianness) -> ParseResult<u32>;
    fn read_u64_at(&self, offset: usize, endian: Endianness) -> ParseResult<u64>;
}

fn take<const N: usize>(data: &[u8], offset: usize) -> ParseResult<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| data.get(offset..end))
        .and_then(|s| s.try_into().ok())
        .ok_or(ParseError::Truncated { offset, needed: N })
}

impl EndianRead for [u8] {
    fn read_u8_at(&self, offset: usize) -> ParseResult<u8> {
        take::<1>(self, offset).map(|b| b[0])
    }

    fn read_u16_at(&self, offset: usize, endian: Endianness) -> ParseResult<u16> {
        let bytes = take::<2>(self, offset)?;
        Ok(match endian {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32_at(&self, offset: usize, endian: Endianness) -> ParseResult<u32> {
        let bytes = take::<4>(self, offset)?;
        Ok(match endian {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64_at(&self, offset: usize, endian: Endianness) -> ParseResult<u64> {
        let bytes = take::<8>(self, offset)?;
        Ok(match endian {
            Endianness::Little => u64::from_le_bytes(bytes),
            Endianness::Big => u64::from_be_bytes(bytes),
        })
    }
}

/// Read a word that is 4 bytes on 32-bit images and 8 bytes on 64-bit ones.
pub fn read_word(data: &[u8], offset: usize, is_64: bool, endian: Endianness) -> ParseResult<u64> {
    if is_64 {
        data.read_u64_at(offset, endian)
    } else {
        data.read_u32_at(offset, endian).map(u64::from)
    }
}

/// Read a NUL-terminated string; invalid UTF-8 is replaced rather than rejected.
pub fn read_cstring(data: &[u8], offset: usize) -> ParseResult<String> {
    let slice = data
        .get(offset..)
        .filter(|s| !s.is_empty())
        .ok_or(ParseError::InvalidOffset { offset })?;
    let end = memchr::memchr(0, slice).unwrap_or(slice.len());
    Ok(String::from_utf8_lossy(&slice[..end]).into_owned())
}

/// Read a fixed-width, NUL-padded name field (Mach-O segment and section names).
pub fn read_fixed_name(data: &[u8], offset: usize, width: usize) -> ParseResult<String> {
    let raw = offset
        .checked_add(width)
        .and_then(|end| data.get(offset..end))
        .ok_or(ParseError::Truncated {
            offset,
            needed: width,
        })?;
    let end = memchr::memchr(0, raw).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Require `offset + size` to stay within `len`.
pub fn check_range(offset: u64, size: u64, len: usize) -> ParseResult<()> {
    match offset.checked_add(size) {
        Some(end) if end <= len as u64 => Ok(()),
        _ => Err(ParseError::Truncated {
            offset: offset as usize,
            needed: size as usize,
        }),
    }
}
