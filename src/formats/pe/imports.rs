//! Import directory parsing
//!
//! Only DLL names and imported function names are kept. Descriptors or thunks
//! whose RVAs do not map to file data are skipped rather than rejected, since
//! packers routinely leave such entries behind.

use crate::formats::pe::types::*;
use crate::formats::reader::{read_cstring, EndianRead, ParseError, ParseResult};
use crate::image::{Endianness::Little, SymbolKind, SymbolRef};

/// Upper bound on imported functions collected from one image.
pub const MAX_IMPORTS: usize = 10_000;

const DESCRIPTOR_SIZE: usize = 20;

/// DLLs and functions named by the import directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Imports {
    pub dlls: Vec<String>,
    pub functions: Vec<SymbolRef>,
}

pub fn parse_imports(
    data: &[u8],
    optional: &OptionalHeader,
    sections: &[SectionHeader],
) -> ParseResult<Imports> {
    let mut imports = Imports::default();
    let Some(dir) = optional.data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT) else {
        return Ok(imports);
    };
    let Some(mut offset) = rva_to_offset(sections, dir.virtual_address) else {
        tracing::debug!(rva = dir.virtual_address, "import directory does not map to file data");
        return Ok(imports);
    };

    while offset + DESCRIPTOR_SIZE <= data.len() {
        let descriptor = &data[offset..offset + DESCRIPTOR_SIZE];
        if descriptor.iter().all(|&b| b == 0) {
            break;
        }
        let original_first_thunk = data.read_u32_at(offset, Little)?;
        let name_rva = data.read_u32_at(offset + 12, Little)?;
        let first_thunk = data.read_u32_at(offset + 16, Little)?;
        offset += DESCRIPTOR_SIZE;

        let Some(dll) = rva_to_offset(sections, name_rva).and_then(|o| read_cstring(data, o).ok())
        else {
            continue;
        };
        imports.dlls.push(dll);

        let thunk_rva = if original_first_thunk != 0 {
            original_first_thunk
        } else {
            first_thunk
        };
        parse_thunks(data, sections, optional, thunk_rva, first_thunk, &mut imports.functions)?;
        if imports.functions.len() >= MAX_IMPORTS {
            tracing::warn!(limit = MAX_IMPORTS, "import table truncated");
            break;
        }
    }
    Ok(imports)
}

fn parse_thunks(
    data: &[u8],
    sections: &[SectionHeader],
    optional: &OptionalHeader,
    thunk_rva: u32,
    first_thunk: u32,
    out: &mut Vec<SymbolRef>,
) -> ParseResult<()> {
    let Some(mut offset) = rva_to_offset(sections, thunk_rva) else {
        return Ok(());
    };
    let is_64 = optional.is_64();
    let entry_size = if is_64 { 8 } else { 4 };
    let ordinal_flag = if is_64 { 1u64 << 63 } else { 1u64 << 31 };

    let mut index = 0u64;
    while offset + entry_size <= data.len() && out.len() < MAX_IMPORTS {
        let value = if is_64 {
            data.read_u64_at(offset, Little)?
        } else {
            data.read_u32_at(offset, Little)? as u64
        };
        if value == 0 {
            break;
        }
        let iat = (first_thunk as u64)
            .checked_add(index * entry_size as u64)
            .and_then(|rva| optional.image_base.checked_add(rva))
            .ok_or(ParseError::InvalidValue {
                offset,
                what: "import address table entry",
            })?;
        offset += entry_size;
        index += 1;

        if value & ordinal_flag != 0 {
            continue;
        }
        // IMAGE_IMPORT_BY_NAME: u16 hint, then the name.
        let name = rva_to_offset(sections, (value & 0x7fff_ffff) as u32)
            .and_then(|o| read_cstring(data, o + 2).ok());
        if let Some(name) = name {
            out.push(SymbolRef {
                name,
                address: iat,
                size: 0,
                kind: SymbolKind::Import,
                is_function: true,
            });
        }
    }
    Ok(())
}
