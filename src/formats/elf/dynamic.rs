//! Dynamic section and symbol table parsing

use crate::formats::elf::tables::section_bytes;
use crate::formats::elf::types::*;
use crate::formats::reader::{read_cstring, read_word, EndianRead, ParseResult};
use crate::image::{DynamicInfo, SymbolKind, SymbolRef};

const DT_STRTAB: u64 = 5;

/// Parse `.dynamic`. Falls back to `PT_DYNAMIC` when section headers are stripped.
pub fn parse_dynamic(
    data: &[u8],
    header: &ElfHeader,
    sections: &[SectionHeader],
    segments: &[ProgramHeader],
) -> ParseResult<Option<DynamicInfo>> {
    if let Some(dyn_sh) = sections.iter().find(|sh| sh.sh_type == SHT_DYNAMIC) {
        let Some(bytes) = section_bytes(data, dyn_sh) else {
            return Ok(None);
        };
        let strtab = sections
            .get(dyn_sh.sh_link as usize)
            .and_then(|sh| section_bytes(data, sh))
            .unwrap_or(&[]);
        let entries = parse_entries(bytes, header.ident)?;
        return Ok(Some(build_info(&entries, strtab)));
    }

    let Some(ph) = segments.iter().find(|ph| ph.p_type == PT_DYNAMIC) else {
        return Ok(None);
    };
    let Some(bytes) = file_slice(data, ph.p_offset, ph.p_filesz) else {
        return Ok(None);
    };
    let entries = parse_entries(bytes, header.ident)?;
    let strtab = entries
        .iter()
        .find(|(tag, _)| *tag == DT_STRTAB)
        .and_then(|(_, vaddr)| vaddr_to_offset(segments, *vaddr))
        .and_then(|off| data.get(off as usize..))
        .unwrap_or(&[]);
    Ok(Some(build_info(&entries, strtab)))
}

fn parse_entries(bytes: &[u8], ident: ElfIdent) -> ParseResult<Vec<(u64, u64)>> {
    let word = if ident.is_64 { 8 } else { 4 };
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset + 2 * word <= bytes.len() {
        let tag = read_word(bytes, offset, ident.is_64, ident.endian)?;
        let val = read_word(bytes, offset + word, ident.is_64, ident.endian)?;
        if tag == DT_NULL {
            break;
        }
        entries.push((tag, val));
        offset += 2 * word;
    }
    Ok(entries)
}

fn build_info(entries: &[(u64, u64)], strtab: &[u8]) -> DynamicInfo {
    let string = |val: u64| read_cstring(strtab, val as usize).ok();
    let paths = |tag: u64| -> Vec<String> {
        entries
            .iter()
            .filter(|(t, _)| *t == tag)
            .filter_map(|(_, v)| string(*v))
            .flat_map(|s| s.split(':').map(str::to_string).collect::<Vec<_>>())
            .filter(|p| !p.is_empty())
            .collect()
    };

    let mut info = DynamicInfo::default();
    for &(tag, val) in entries {
        match tag {
            DT_NEEDED => {
                if let Some(name) = string(val) {
                    info.needed.push(name);
                }
            }
            DT_FLAGS => info.flags |= val,
            DT_FLAGS_1 => info.flags_1 |= val,
            DT_BIND_NOW => info.bind_now_tag = true,
            _ => {}
        }
    }
    info.rpath = paths(DT_RPATH);
    info.runpath = paths(DT_RUNPATH);
    info
}

fn file_slice(data: &[u8], offset: u64, size: u64) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(size).ok()?)?;
    data.get(start..end)
}

fn vaddr_to_offset(segments: &[ProgramHeader], vaddr: u64) -> Option<u64> {
    segments
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .find_map(|ph| {
            let delta = vaddr.checked_sub(ph.p_vaddr)?;
            if delta >= ph.p_filesz {
                return None;
            }
            ph.p_offset.checked_add(delta)
        })
}

/// Parse `.symtab` and `.dynsym` into symbol references.
pub fn parse_symbols(
    data: &[u8],
    header: &ElfHeader,
    sections: &[SectionHeader],
) -> ParseResult<Vec<SymbolRef>> {
    let mut symbols = Vec::new();
    for sh in sections
        .iter()
        .filter(|sh| sh.sh_type == SHT_SYMTAB || sh.sh_type == SHT_DYNSYM)
    {
        let Some(table) = section_bytes(data, sh) else {
            continue;
        };
        let strtab = sections
            .get(sh.sh_link as usize)
            .and_then(|s| section_bytes(data, s))
            .unwrap_or(&[]);
        parse_symbol_table(table, strtab, header.ident, &mut symbols)?;
    }
    Ok(symbols)
}

fn parse_symbol_table(
    table: &[u8],
    strtab: &[u8],
    ident: ElfIdent,
    out: &mut Vec<SymbolRef>,
) -> ParseResult<()> {
    let e = ident.endian;
    let entry_size = if ident.is_64 { 24 } else { 16 };
    let mut offset = 0;
    while offset + entry_size <= table.len() {
        let (st_name, st_info, st_shndx, st_value, st_size) = if ident.is_64 {
            (
                table.read_u32_at(offset, e)?,
                table.read_u8_at(offset + 4)?,
                table.read_u16_at(offset + 6, e)?,
                table.read_u64_at(offset + 8, e)?,
                table.read_u64_at(offset + 16, e)?,
            )
        } else {
            (
                table.read_u32_at(offset, e)?,
                table.read_u8_at(offset + 12)?,
                table.read_u16_at(offset + 14, e)?,
                table.read_u32_at(offset + 4, e)? as u64,
                table.read_u32_at(offset + 8, e)? as u64,
            )
        };
        offset += entry_size;

        if st_name == 0 {
            continue;
        }
        let Ok(name) = read_cstring(strtab, st_name as usize) else {
            continue;
        };
        let st_type = st_info & 0xf;
        out.push(SymbolRef {
            name,
            address: st_value,
            size: st_size,
            kind: if st_shndx == SHN_UNDEF {
                SymbolKind::Import
            } else {
                SymbolKind::Defined
            },
            is_function: st_type == STT_FUNC || st_type == STT_GNU_IFUNC,
        });
    }
    Ok(())
}
