//! `IMAGE_LOAD_CONFIG_DIRECTORY` decoding.
//!
//! The structure grows with every toolchain release; its leading `Size` field
//! says how much of it the linker wrote. Fields past that size read as zero.

use crate::formats::pe::types::*;
use crate::formats::reader::{check_range, EndianRead, ParseResult};
use crate::image::Endianness::Little;
use crate::image::LoadConfig;

/// Field offsets that differ between PE32 and PE32+.
struct Layout {
    security_cookie: usize,
    se_handler_table: usize,
    se_handler_count: usize,
    guard_flags: usize,
    word: usize,
}

const LAYOUT_32: Layout = Layout {
    security_cookie: 60,
    se_handler_table: 64,
    se_handler_count: 68,
    guard_flags: 88,
    word: 4,
};

const LAYOUT_64: Layout = Layout {
    security_cookie: 88,
    se_handler_table: 96,
    se_handler_count: 104,
    guard_flags: 144,
    word: 8,
};

/// Parse the load config directory, if the image has one that maps into the file.
pub fn parse_load_config(
    data: &[u8],
    optional: &OptionalHeader,
    sections: &[SectionHeader],
) -> ParseResult<Option<LoadConfig>> {
    let Some(dir) = optional.data_directory(IMAGE_DIRECTORY_ENTRY_LOAD_CONFIG) else {
        return Ok(None);
    };
    let Some(offset) = rva_to_offset(sections, dir.virtual_address) else {
        tracing::debug!(
            rva = dir.virtual_address,
            "load config directory does not map to file data"
        );
        return Ok(None);
    };

    let size = data.read_u32_at(offset, Little)?;
    check_range(offset as u64, size as u64, data.len())?;

    let layout = if optional.is_64() { &LAYOUT_64 } else { &LAYOUT_32 };
    let size_usize = size as usize;
    let field = |at: usize, width: usize| -> ParseResult<u64> {
        if at + width > size_usize {
            return Ok(0);
        }
        match width {
            8 => data.read_u64_at(offset + at, Little),
            _ => data.read_u32_at(offset + at, Little).map(u64::from),
        }
    };

    Ok(Some(LoadConfig {
        size,
        security_cookie: field(layout.security_cookie, layout.word)?,
        se_handler_table: field(layout.se_handler_table, layout.word)?,
        se_handler_count: field(layout.se_handler_count, layout.word)?,
        guard_flags: field(layout.guard_flags, 4)? as u32,
    }))
}
