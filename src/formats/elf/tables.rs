//! Section and program header tables

use crate::formats::elf::types::*;
use crate::formats::reader::{check_range, read_cstring, read_word, EndianRead, ParseResult};

/// Parse the section header table. An absent table yields an empty vector.
pub fn parse_section_headers(data: &[u8], header: &ElfHeader) -> ParseResult<Vec<SectionHeader>> {
    let count = header.e_shnum as usize;
    if count == 0 || header.e_shoff == 0 {
        return Ok(Vec::new());
    }
    let entsize = header.e_shentsize as usize;
    check_range(header.e_shoff, (count * entsize) as u64, data.len())?;

    let base = header.e_shoff as usize;
    (0..count)
        .map(|i| parse_section_header(data, base + i * entsize, header.ident))
        .collect()
}

fn parse_section_header(data: &[u8], offset: usize, ident: ElfIdent) -> ParseResult<SectionHeader> {
    let e = ident.endian;
    if ident.is_64 {
        Ok(SectionHeader {
            sh_name: data.read_u32_at(offset, e)?,
            sh_type: data.read_u32_at(offset + 4, e)?,
            sh_flags: data.read_u64_at(offset + 8, e)?,
            sh_addr: data.read_u64_at(offset + 16, e)?,
            sh_offset: data.read_u64_at(offset + 24, e)?,
            sh_size: data.read_u64_at(offset + 32, e)?,
            sh_link: data.read_u32_at(offset + 40, e)?,
        })
    } else {
        Ok(SectionHeader {
            sh_name: data.read_u32_at(offset, e)?,
            sh_type: data.read_u32_at(offset + 4, e)?,
            sh_flags: data.read_u32_at(offset + 8, e)? as u64,
            sh_addr: data.read_u32_at(offset + 12, e)? as u64,
            sh_offset: data.read_u32_at(offset + 16, e)? as u64,
            sh_size: data.read_u32_at(offset + 20, e)? as u64,
            sh_link: data.read_u32_at(offset + 24, e)?,
        })
    }
}

/// Resolve section names through `.shstrtab`. Unresolvable names become empty.
pub fn section_names(data: &[u8], header: &ElfHeader, sections: &[SectionHeader]) -> Vec<String> {
    let strtab = sections
        .get(header.e_shstrndx as usize)
        .and_then(|sh| section_bytes(data, sh));
    sections
        .iter()
        .map(|sh| {
            strtab
                .and_then(|s| read_cstring(s, sh.sh_name as usize).ok())
                .unwrap_or_default()
        })
        .collect()
}

/// File bytes of a section, if they lie inside the buffer.
pub fn section_bytes<'a>(data: &'a [u8], sh: &SectionHeader) -> Option<&'a [u8]> {
    let start = usize::try_from(sh.sh_offset).ok()?;
    let end = start.checked_add(usize::try_from(sh.file_size()).ok()?)?;
    data.get(start..end)
}

/// Parse the program header table. An absent table yields an empty vector.
pub fn parse_program_headers(data: &[u8], header: &ElfHeader) -> ParseResult<Vec<ProgramHeader>> {
    let count = header.e_phnum as usize;
    if count == 0 || header.e_phoff == 0 {
        return Ok(Vec::new());
    }
    let entsize = header.e_phentsize as usize;
    check_range(header.e_phoff, (count * entsize) as u64, data.len())?;

    let base = header.e_phoff as usize;
    (0..count)
        .map(|i| parse_program_header(data, base + i * entsize, header.ident))
        .collect()
}

fn parse_program_header(data: &[u8], offset: usize, ident: ElfIdent) -> ParseResult<ProgramHeader> {
    let e = ident.endian;
    if ident.is_64 {
        Ok(ProgramHeader {
            p_type: data.read_u32_at(offset, e)?,
            p_flags: data.read_u32_at(offset + 4, e)?,
            p_offset: data.read_u64_at(offset + 8, e)?,
            p_vaddr: data.read_u64_at(offset + 16, e)?,
            p_filesz: data.read_u64_at(offset + 32, e)?,
            p_memsz: data.read_u64_at(offset + 40, e)?,
        })
    } else {
        Ok(ProgramHeader {
            p_type: data.read_u32_at(offset, e)?,
            p_offset: read_word(data, offset + 4, false, e)?,
            p_vaddr: read_word(data, offset + 8, false, e)?,
            p_filesz: read_word(data, offset + 16, false, e)?,
            p_memsz: read_word(data, offset + 20, false, e)?,
            p_flags: data.read_u32_at(offset + 24, e)?,
        })
    }
}

/// Interpreter path from `PT_INTERP`, trailing NUL removed.
pub fn interpreter(data: &[u8], headers: &[ProgramHeader]) -> Option<String> {
    let ph = headers.iter().find(|ph| ph.p_type == PT_INTERP)?;
    let start = usize::try_from(ph.p_offset).ok()?;
    let end = start.checked_add(usize::try_from(ph.p_filesz).ok()?)?;
    let bytes = data.get(start..end)?;
    read_cstring(bytes, 0).ok()
}
