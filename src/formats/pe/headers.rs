//! PE header parsing

use crate::formats::pe::types::*;
use crate::formats::reader::{check_range, read_fixed_name, EndianRead, ParseError, ParseResult};
use crate::image::Endianness::Little;

/// Parse DOS header from data
pub fn parse_dos_header(data: &[u8]) -> ParseResult<DosHeader> {
    if data.len() < 64 {
        return Err(ParseError::Truncated {
            offset: 0,
            needed: 64,
        });
    }
    let e_magic = data.read_u16_at(0, Little)?;
    if e_magic != DOS_SIGNATURE {
        return Err(ParseError::InvalidValue {
            offset: 0,
            what: "DOS signature",
        });
    }
    Ok(DosHeader {
        e_magic,
        e_lfanew: data.read_u32_at(0x3c, Little)?,
    })
}

/// Check the `PE\0\0` signature at `e_lfanew`.
pub fn check_pe_signature(data: &[u8], offset: usize) -> ParseResult<()> {
    let sig = offset
        .checked_add(4)
        .and_then(|end| data.get(offset..end))
        .ok_or(ParseError::Truncated { offset, needed: 4 })?;
    if sig != PE_SIGNATURE {
        return Err(ParseError::InvalidValue {
            offset,
            what: "PE signature",
        });
    }
    Ok(())
}

/// Parse COFF header from data at offset
pub fn parse_coff_header(data: &[u8], offset: usize) -> ParseResult<CoffHeader> {
    check_range(offset as u64, 20, data.len())?;
    Ok(CoffHeader {
        machine: data.read_u16_at(offset, Little)?,
        number_of_sections: data.read_u16_at(offset + 2, Little)?,
        size_of_optional_header: data.read_u16_at(offset + 16, Little)?,
        characteristics: data.read_u16_at(offset + 18, Little)?,
    })
}

/// Parse optional header from data at offset. ROM images are reported by magic
/// so the caller can classify them.
pub fn parse_optional_header(data: &[u8], offset: usize, size: u16) -> ParseResult<OptionalHeader> {
    check_range(offset as u64, size as u64, data.len())?;
    let magic = data.read_u16_at(offset, Little)?;
    let (dir_count_at, dirs_at) = match magic {
        PE32_MAGIC => (92, 96),
        PE32PLUS_MAGIC => (108, 112),
        _ => {
            return Err(ParseError::InvalidValue {
                offset,
                what: "optional header magic",
            })
        }
    };
    if (size as usize) < dirs_at {
        return Err(ParseError::Truncated {
            offset,
            needed: dirs_at,
        });
    }

    let image_base = if magic == PE32PLUS_MAGIC {
        data.read_u64_at(offset + 24, Little)?
    } else {
        data.read_u32_at(offset + 28, Little)? as u64
    };

    // Only directories that fit inside the declared optional header are read.
    let declared = data.read_u32_at(offset + dir_count_at, Little)? as usize;
    let fitting = (size as usize - dirs_at) / 8;
    let data_directories = (0..declared.min(fitting).min(16))
        .map(|i| {
            let at = offset + dirs_at + i * 8;
            Ok(DataDirectory {
                virtual_address: data.read_u32_at(at, Little)?,
                size: data.read_u32_at(at + 4, Little)?,
            })
        })
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(OptionalHeader {
        magic,
        address_of_entry_point: data.read_u32_at(offset + 16, Little)?,
        image_base,
        dll_characteristics: data.read_u16_at(offset + 70, Little)?,
        data_directories,
    })
}

/// Parse the section table
pub fn parse_section_headers(
    data: &[u8],
    offset: usize,
    count: u16,
) -> ParseResult<Vec<SectionHeader>> {
    check_range(offset as u64, count as u64 * 40, data.len())?;
    (0..count as usize)
        .map(|i| {
            let at = offset + i * 40;
            Ok(SectionHeader {
                name: read_fixed_name(data, at, 8)?,
                virtual_size: data.read_u32_at(at + 8, Little)?,
                virtual_address: data.read_u32_at(at + 12, Little)?,
                size_of_raw_data: data.read_u32_at(at + 16, Little)?,
                pointer_to_raw_data: data.read_u32_at(at + 20, Little)?,
                characteristics: data.read_u32_at(at + 36, Little)?,
            })
        })
        .collect()
}
