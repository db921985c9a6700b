//! Mach-O parser (thin images only)

pub mod load_commands;
pub mod types;

use crate::error::{DetectorError, Result};
use crate::formats::reader::{EndianRead, ParseError};
use crate::image::{
    Arch, BinaryImage, Endianness, Format, FormatDetails, ImageHeader, ImageKind, ImageParts,
    MachODetails, Segment,
};
pub use types::*;

/// Parse the mach header, resolving byte order from the magic.
pub fn parse_header(data: &[u8]) -> Result<MachHeader> {
    let magic = data.read_u32_at(0, Endianness::Little)?;
    let (is_64, endian) = match magic {
        MH_MAGIC => (false, Endianness::Little),
        MH_MAGIC_64 => (true, Endianness::Little),
        MH_CIGAM => (false, Endianness::Big),
        MH_CIGAM_64 => (true, Endianness::Big),
        _ => {
            return Err(ParseError::InvalidValue {
                offset: 0,
                what: "Mach-O magic",
            }
            .into())
        }
    };
    let size = if is_64 { 32 } else { 28 };
    if data.len() < size {
        return Err(ParseError::Truncated {
            offset: 0,
            needed: size,
        }
        .into());
    }
    Ok(MachHeader {
        is_64,
        endian,
        cputype: data.read_u32_at(4, endian)?,
        filetype: data.read_u32_at(12, endian)?,
        ncmds: data.read_u32_at(16, endian)?,
        sizeofcmds: data.read_u32_at(20, endian)?,
        flags: data.read_u32_at(24, endian)?,
    })
}

/// Parse a thin Mach-O buffer into a `BinaryImage`.
pub fn parse(data: &[u8]) -> Result<BinaryImage<'_>> {
    let header = parse_header(data)?;
    let commands = load_commands::parse_load_commands(data, &header)?;

    tracing::debug!(
        load_commands = commands.load_commands.len(),
        sections = commands.sections.len(),
        symbols = commands.symbols.len(),
        "parsed Mach-O image"
    );

    let image_header = ImageHeader {
        format: Format::MachO,
        arch: arch_from_cputype(header.cputype),
        endianness: header.endian,
        bits: if header.is_64 { 64 } else { 32 },
        kind: match header.filetype {
            MH_EXECUTE => ImageKind::Executable,
            MH_DYLIB | MH_BUNDLE => ImageKind::SharedObject,
            MH_OBJECT => ImageKind::Relocatable,
            _ => ImageKind::Other,
        },
        entry: commands
            .entry_offset
            .and_then(|off| entry_address(off, &commands.segments))
            .unwrap_or(0),
    };
    let details = MachODetails {
        filetype: header.filetype,
        flags: header.flags,
        code_signature_size: commands.code_signature_size,
        crypt_id: commands.crypt_id,
        rpaths: commands.rpaths,
        dylibs: commands.dylibs,
    };
    let parts = ImageParts {
        sections: commands.sections,
        segments: commands.segments,
        load_commands: commands.load_commands,
        symbols: commands.symbols,
    };
    BinaryImage::assemble(data, image_header, parts, FormatDetails::MachO(details))
}

/// `LC_MAIN` records the entry point as a file offset; map it through the
/// segment holding that offset to get a virtual address like ELF and PE.
fn entry_address(entryoff: u64, segments: &[Segment]) -> Option<u64> {
    segments.iter().find_map(|seg| {
        let delta = entryoff.checked_sub(seg.offset)?;
        if delta >= seg.file_size {
            return None;
        }
        seg.vaddr.checked_add(delta)
    })
}

/// Tell a universal binary from a Java class file; both start with `CAFEBABE`.
pub fn classify_fat(data: &[u8]) -> DetectorError {
    // Class files put the minor/major version here; fat headers an arch count.
    match data.read_u32_at(4, Endianness::Big) {
        Ok(n) if n > 0 && n < 45 => {
            DetectorError::UnsupportedFormat(format!("universal Mach-O with {} slices", n))
        }
        Ok(_) => DetectorError::UnsupportedFormat("Java class file".to_string()),
        Err(e) => e.into(),
    }
}

fn arch_from_cputype(cputype: u32) -> Arch {
    match cputype {
        7 => Arch::X86,
        0x0100_0007 => Arch::X86_64,
        12 => Arch::ARM,
        0x0100_000c => Arch::AArch64,
        18 => Arch::PPC,
        0x0100_0012 => Arch::PPC64,
        _ => Arch::Unknown,
    }
}
