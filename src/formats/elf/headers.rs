//! ELF header parsing

use crate::formats::elf::types::*;
use crate::formats::reader::{read_word, EndianRead, ParseError, ParseResult};
use crate::image::Endianness;

/// Parse ELF identification bytes
pub fn parse_ident(data: &[u8]) -> ParseResult<ElfIdent> {
    if data.len() < 16 {
        return Err(ParseError::Truncated {
            offset: 0,
            needed: 16,
        });
    }
    if &data[0..4] != ELF_MAGIC {
        return Err(ParseError::InvalidValue {
            offset: 0,
            what: "ELF magic",
        });
    }

    let is_64 = match data[4] {
        ELFCLASS32 => false,
        ELFCLASS64 => true,
        _ => {
            return Err(ParseError::InvalidValue {
                offset: 4,
                what: "ELF class",
            })
        }
    };
    let endian = match data[5] {
        ELFDATA2LSB => Endianness::Little,
        ELFDATA2MSB => Endianness::Big,
        _ => {
            return Err(ParseError::InvalidValue {
                offset: 5,
                what: "ELF data encoding",
            })
        }
    };

    Ok(ElfIdent { is_64, endian })
}

/// Parse ELF header
pub fn parse_header(data: &[u8]) -> ParseResult<ElfHeader> {
    let ident = parse_ident(data)?;
    let endian = ident.endian;

    let header_size = if ident.is_64 { 64 } else { 52 };
    if data.len() < header_size {
        return Err(ParseError::Truncated {
            offset: 0,
            needed: header_size,
        });
    }

    // Offsets after e_entry shift by the word size.
    let word = if ident.is_64 { 8 } else { 4 };
    let e_entry = read_word(data, 24, ident.is_64, endian)?;
    let e_phoff = read_word(data, 24 + word, ident.is_64, endian)?;
    let e_shoff = read_word(data, 24 + 2 * word, ident.is_64, endian)?;
    let tail = 24 + 3 * word + 4; // skip e_flags

    let header = ElfHeader {
        ident,
        e_type: data.read_u16_at(16, endian)?,
        e_machine: data.read_u16_at(18, endian)?,
        e_entry,
        e_phoff,
        e_shoff,
        e_phentsize: data.read_u16_at(tail + 2, endian)?,
        e_phnum: data.read_u16_at(tail + 4, endian)?,
        e_shentsize: data.read_u16_at(tail + 6, endian)?,
        e_shnum: data.read_u16_at(tail + 8, endian)?,
        e_shstrndx: data.read_u16_at(tail + 10, endian)?,
    };

    let expected_phentsize = if ident.is_64 { 56 } else { 32 };
    if header.e_phnum > 0 && header.e_phentsize != expected_phentsize {
        return Err(ParseError::InvalidValue {
            offset: tail + 2,
            what: "e_phentsize",
        });
    }
    let expected_shentsize = if ident.is_64 { 64 } else { 40 };
    if header.e_shnum > 0 && header.e_shentsize != expected_shentsize {
        return Err(ParseError::InvalidValue {
            offset: tail + 6,
            what: "e_shentsize",
        });
    }

    Ok(header)
}
