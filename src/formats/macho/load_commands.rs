//! Load command walking

use crate::formats::macho::types::*;
use crate::formats::reader::{
    check_range, read_cstring, read_fixed_name, read_word, EndianRead, ParseError, ParseResult,
};
use crate::image::{LoadCommand, Section, SectionFlags, Segment, SymbolKind, SymbolRef};

/// Everything collected from one pass over the load commands.
#[derive(Debug, Default)]
pub struct Commands {
    pub load_commands: Vec<LoadCommand>,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
    pub symbols: Vec<SymbolRef>,
    pub code_signature_size: Option<u32>,
    pub crypt_id: Option<u32>,
    pub rpaths: Vec<String>,
    pub dylibs: Vec<String>,
    pub entry_offset: Option<u64>,
}

pub fn parse_load_commands(data: &[u8], header: &MachHeader) -> ParseResult<Commands> {
    let start = header.size();
    check_range(start as u64, header.sizeofcmds as u64, data.len())?;
    let end = start + header.sizeofcmds as usize;
    let e = header.endian;

    let mut out = Commands::default();
    let mut offset = start;
    for _ in 0..header.ncmds {
        if offset + 8 > end {
            return Err(ParseError::Truncated { offset, needed: 8 });
        }
        let cmd = data.read_u32_at(offset, e)?;
        let cmdsize = data.read_u32_at(offset + 4, e)? as usize;
        if cmdsize < 8 || offset + cmdsize > end {
            return Err(ParseError::InvalidValue {
                offset: offset + 4,
                what: "cmdsize",
            });
        }
        let body = &data[offset..offset + cmdsize];

        match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                parse_segment(body, offset, cmd == LC_SEGMENT_64, header, &mut out)?
            }
            LC_SYMTAB => parse_symtab(data, body, header, &mut out)?,
            LC_CODE_SIGNATURE => out.code_signature_size = Some(body.read_u32_at(12, e)?),
            LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                out.crypt_id = Some(body.read_u32_at(16, e)?)
            }
            LC_RPATH => out.rpaths.push(lc_str(body, header)?),
            LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LAZY_LOAD_DYLIB
            | LC_LOAD_UPWARD_DYLIB => out.dylibs.push(lc_str(body, header)?),
            LC_MAIN => out.entry_offset = Some(body.read_u64_at(8, e)?),
            _ => {}
        }

        out.load_commands.push(LoadCommand {
            name: load_command_name(cmd),
            cmd,
            offset: offset as u64,
            size: cmdsize as u64,
        });
        offset += cmdsize;
    }
    Ok(out)
}

/// `lc_str` at offset 8 of the command, relative to the command start.
fn lc_str(body: &[u8], header: &MachHeader) -> ParseResult<String> {
    let at = body.read_u32_at(8, header.endian)? as usize;
    read_cstring(body, at)
}

fn prot_flags(prot: u32) -> SectionFlags {
    let mut flags = SectionFlags::empty();
    if prot & VM_PROT_READ != 0 {
        flags |= SectionFlags::READ;
    }
    if prot & VM_PROT_WRITE != 0 {
        flags |= SectionFlags::WRITE;
    }
    if prot & VM_PROT_EXECUTE != 0 {
        flags |= SectionFlags::EXEC;
    }
    flags
}

fn parse_segment(
    body: &[u8],
    cmd_offset: usize,
    is_64: bool,
    header: &MachHeader,
    out: &mut Commands,
) -> ParseResult<()> {
    let e = header.endian;
    let w = if is_64 { 8 } else { 4 };
    let name = read_fixed_name(body, 8, 16)?;
    let vmaddr = read_word(body, 24, is_64, e)?;
    let vmsize = read_word(body, 24 + w, is_64, e)?;
    let fileoff = read_word(body, 24 + 2 * w, is_64, e)?;
    let filesize = read_word(body, 24 + 3 * w, is_64, e)?;
    let initprot = body.read_u32_at(24 + 4 * w + 4, e)?;
    let nsects = body.read_u32_at(24 + 4 * w + 8, e)? as usize;

    let seg_flags = prot_flags(initprot);
    out.segments.push(Segment {
        name: name.clone(),
        kind: if is_64 { LC_SEGMENT_64 } else { LC_SEGMENT },
        offset: fileoff,
        file_size: filesize,
        vaddr: vmaddr,
        mem_size: vmsize,
        flags: seg_flags | SectionFlags::ALLOC,
    });

    let (first, entsize) = if is_64 { (72, 80) } else { (56, 68) };
    let needed = nsects
        .checked_mul(entsize)
        .and_then(|n| n.checked_add(first))
        .ok_or(ParseError::InvalidValue {
            offset: cmd_offset,
            what: "nsects",
        })?;
    if needed > body.len() {
        return Err(ParseError::Truncated {
            offset: cmd_offset,
            needed,
        });
    }

    for i in 0..nsects {
        let at = first + i * entsize;
        let sectname = read_fixed_name(body, at, 16)?;
        let addr = read_word(body, at + 32, is_64, e)?;
        let size = read_word(body, at + 32 + w, is_64, e)?;
        let file_off = body.read_u32_at(at + 32 + 2 * w, e)? as u64;
        let flags = body.read_u32_at(at + 32 + 2 * w + 16, e)?;

        let mut sec_flags = (seg_flags & !SectionFlags::EXEC) | SectionFlags::ALLOC;
        if flags & (S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS) != 0 {
            sec_flags |= SectionFlags::EXEC;
        }
        out.sections.push(Section {
            name: format!("{},{}", name, sectname),
            offset: file_off,
            file_size: if is_zerofill(flags) { 0 } else { size },
            addr,
            mem_size: size,
            flags: sec_flags,
        });
    }
    Ok(())
}

fn parse_symtab(
    data: &[u8],
    body: &[u8],
    header: &MachHeader,
    out: &mut Commands,
) -> ParseResult<()> {
    let e = header.endian;
    let symoff = body.read_u32_at(8, e)? as u64;
    let nsyms = body.read_u32_at(12, e)? as u64;
    let stroff = body.read_u32_at(16, e)? as u64;
    let strsize = body.read_u32_at(20, e)? as u64;
    let entsize: u64 = if header.is_64 { 16 } else { 12 };

    check_range(symoff, nsyms * entsize, data.len())?;
    check_range(stroff, strsize, data.len())?;
    let strtab = &data[stroff as usize..(stroff + strsize) as usize];

    for i in 0..nsyms {
        let at = (symoff + i * entsize) as usize;
        let n_strx = data.read_u32_at(at, e)? as usize;
        let n_type = data.read_u8_at(at + 4)?;
        let n_sect = data.read_u8_at(at + 5)?;
        let n_value = read_word(data, at + 8, header.is_64, e)?;

        if n_type & N_STAB != 0 || n_strx == 0 {
            continue;
        }
        let Ok(name) = read_cstring(strtab, n_strx) else {
            continue;
        };
        let kind = match n_type & N_TYPE {
            N_UNDF if n_type & N_EXT != 0 => SymbolKind::Import,
            N_SECT => SymbolKind::Defined,
            _ => continue,
        };
        // n_sect is a 1-based index over all sections in load command order.
        let is_function = kind == SymbolKind::Defined
            && out
                .sections
                .get((n_sect as usize).wrapping_sub(1))
                .is_some_and(|s| s.is_executable());
        out.symbols.push(SymbolRef {
            name,
            address: n_value,
            size: 0,
            kind,
            is_function,
        });
    }
    Ok(())
}
