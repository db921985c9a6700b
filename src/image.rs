//! Format-independent structural view of a parsed binary.
//!
//! A `BinaryImage` borrows the caller's buffer and owns only the metadata the
//! parsers extracted from it. Downstream components get it by shared reference.

use crate::error::{DetectorError, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary container formats handled by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    /// Executable and Linkable Format
    ELF,
    /// Portable Executable (Windows)
    PE,
    /// Mach Object (Apple)
    MachO,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::ELF => write!(f, "ELF"),
            Format::PE => write!(f, "PE"),
            Format::MachO => write!(f, "Mach-O"),
        }
    }
}

/// CPU architecture of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arch {
    X86,
    X86_64,
    ARM,
    AArch64,
    MIPS,
    MIPS64,
    PPC,
    PPC64,
    RISCV,
    RISCV64,
    Unknown,
}

impl Arch {
    pub fn is_x86_family(&self) -> bool {
        matches!(self, Arch::X86 | Arch::X86_64)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::ARM => "arm",
            Arch::AArch64 => "aarch64",
            Arch::MIPS => "mips",
            Arch::MIPS64 => "mips64",
            Arch::PPC => "ppc",
            Arch::PPC64 => "ppc64",
            Arch::RISCV => "riscv",
            Arch::RISCV64 => "riscv64",
            Arch::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Byte order of multi-byte header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// What the image is meant to be loaded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageKind {
    Executable,
    SharedObject,
    Relocatable,
    Other,
}

/// Header metadata common to all formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub format: Format,
    pub arch: Arch,
    pub endianness: Endianness,
    pub bits: u8,
    pub kind: ImageKind,
    /// Virtual address of the entry point, 0 when the image declares none
    pub entry: u64,
}

bitflags! {
    /// Access rights of a section or segment, normalized across formats.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SectionFlags: u32 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const EXEC = 0b0100;
        const ALLOC = 0b1000;
    }
}

/// A named section. `file_size` is zero for zero-fill sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub offset: u64,
    pub file_size: u64,
    pub addr: u64,
    pub mem_size: u64,
    pub flags: SectionFlags,
}

impl Section {
    pub fn is_executable(&self) -> bool {
        self.flags.contains(SectionFlags::EXEC)
    }

    /// Map a file offset inside this section to its virtual address.
    pub fn addr_of_offset(&self, offset: u64) -> Option<u64> {
        let delta = offset.checked_sub(self.offset)?;
        if delta >= self.file_size {
            return None;
        }
        self.addr.checked_add(delta)
    }

    /// Whether `addr` lies in the section's loaded range.
    pub fn contains_addr(&self, addr: u64) -> bool {
        self.flags.contains(SectionFlags::ALLOC)
            && addr
                .checked_sub(self.addr)
                .is_some_and(|delta| delta < self.mem_size)
    }
}

/// A loadable segment (ELF program header, Mach-O segment command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub kind: u32,
    pub offset: u64,
    pub file_size: u64,
    pub vaddr: u64,
    pub mem_size: u64,
    pub flags: SectionFlags,
}

/// A raw structural directive (Mach-O load command).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCommand {
    pub name: String,
    pub cmd: u32,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// Undefined here, resolved from another image at load time
    Import,
    /// Defined in this image
    Defined,
}

/// A symbol table entry with its resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub kind: SymbolKind,
    pub is_function: bool,
}

impl SymbolRef {
    pub fn is_import(&self) -> bool {
        self.kind == SymbolKind::Import
    }
}

/// ELF dynamic linking information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicInfo {
    pub flags: u64,
    pub flags_1: u64,
    pub bind_now_tag: bool,
    pub needed: Vec<String>,
    pub rpath: Vec<String>,
    pub runpath: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElfDetails {
    pub e_type: u16,
    pub program_header_count: usize,
    /// `p_flags` of `PT_GNU_STACK`, if the segment exists
    pub gnu_stack_flags: Option<u32>,
    pub has_gnu_relro: bool,
    pub interpreter: Option<String>,
    pub dynamic: Option<DynamicInfo>,
}

/// The subset of `IMAGE_LOAD_CONFIG_DIRECTORY` the rules look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub size: u32,
    pub security_cookie: u64,
    pub se_handler_table: u64,
    pub se_handler_count: u64,
    pub guard_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeDetails {
    pub is_64: bool,
    pub characteristics: u16,
    pub dll_characteristics: u16,
    pub load_config: Option<LoadConfig>,
    /// Size of the certificate (security) data directory
    pub certificate_size: u32,
    /// Size of the CLR runtime header directory, non-zero for .NET assemblies
    pub clr_header_size: u32,
    /// DLL names from the import directory
    pub imported_libraries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachODetails {
    pub filetype: u32,
    pub flags: u32,
    /// `datasize` of `LC_CODE_SIGNATURE`
    pub code_signature_size: Option<u32>,
    /// `cryptid` of `LC_ENCRYPTION_INFO(_64)`
    pub crypt_id: Option<u32>,
    pub rpaths: Vec<String>,
    pub dylibs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatDetails {
    Elf(ElfDetails),
    Pe(PeDetails),
    MachO(MachODetails),
}

/// Structural entries collected by a format parser, before bounds validation.
#[derive(Debug, Default)]
pub struct ImageParts {
    pub sections: Vec<Section>,
    pub segments: Vec<Segment>,
    pub load_commands: Vec<LoadCommand>,
    pub symbols: Vec<SymbolRef>,
}

/// Parsed binary: the input buffer plus validated structure.
#[derive(Debug, Clone)]
pub struct BinaryImage<'data> {
    data: &'data [u8],
    header: ImageHeader,
    sections: Vec<Section>,
    segments: Vec<Segment>,
    load_commands: Vec<LoadCommand>,
    symbols: Vec<SymbolRef>,
    details: FormatDetails,
}

impl<'data> BinaryImage<'data> {
    /// Assemble an image, rejecting any entry whose file range escapes `data`.
    pub fn assemble(
        data: &'data [u8],
        header: ImageHeader,
        parts: ImageParts,
        details: FormatDetails,
    ) -> Result<Self> {
        let len = data.len() as u64;
        let ranges = parts
            .sections
            .iter()
            .map(|s| (s.name.as_str(), s.offset, s.file_size))
            .chain(
                parts
                    .segments
                    .iter()
                    .map(|s| (s.name.as_str(), s.offset, s.file_size)),
            )
            .chain(
                parts
                    .load_commands
                    .iter()
                    .map(|c| (c.name.as_str(), c.offset, c.size)),
            );
        for (name, offset, size) in ranges {
            let end = offset.checked_add(size).ok_or_else(|| {
                DetectorError::malformed(offset, format!("{} size overflows", name))
            })?;
            if end > len {
                return Err(DetectorError::malformed(
                    offset,
                    format!(
                        "{} declares {:#x}..{:#x} beyond buffer of {:#x} bytes",
                        name, offset, end, len
                    ),
                ));
            }
        }

        Ok(Self {
            data,
            header,
            sections: parts.sections,
            segments: parts.segments,
            load_commands: parts.load_commands,
            symbols: parts.symbols,
            details,
        })
    }

    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    pub fn header(&self) -> &ImageHeader {
        &self.header
    }

    pub fn format(&self) -> Format {
        self.header.format
    }

    pub fn arch(&self) -> Arch {
        self.header.arch
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.load_commands
    }

    pub fn symbols(&self) -> &[SymbolRef] {
        &self.symbols
    }

    pub fn details(&self) -> &FormatDetails {
        &self.details
    }

    pub fn elf(&self) -> Option<&ElfDetails> {
        match &self.details {
            FormatDetails::Elf(d) => Some(d),
            _ => None,
        }
    }

    pub fn pe(&self) -> Option<&PeDetails> {
        match &self.details {
            FormatDetails::Pe(d) => Some(d),
            _ => None,
        }
    }

    pub fn macho(&self) -> Option<&MachODetails> {
        match &self.details {
            FormatDetails::MachO(d) => Some(d),
            _ => None,
        }
    }

    /// Bytes backing a section in the file.
    pub fn section_data(&self, section: &Section) -> &'data [u8] {
        let start = section.offset as usize;
        let end = start + section.file_size as usize;
        // Bounds were validated in `assemble`.
        self.data.get(start..end).unwrap_or(&[])
    }

    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> + '_ {
        self.sections
            .iter()
            .filter(|s| s.is_executable() && s.file_size > 0)
    }

    /// Symbol name as the C compiler spelled it; Mach-O prefixes an underscore.
    pub fn c_name<'s>(&self, symbol: &'s SymbolRef) -> &'s str {
        match self.header.format {
            Format::MachO => symbol.name.strip_prefix('_').unwrap_or(&symbol.name),
            _ => &symbol.name,
        }
    }

    /// Look up a symbol by its C-level name.
    pub fn find_symbol(&self, c_name: &str) -> Option<&SymbolRef> {
        self.symbols.iter().find(|s| self.c_name(s) == c_name)
    }

    /// Loaded section covering `addr`.
    pub fn section_containing(&self, addr: u64) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains_addr(addr))
    }

    /// Defined function whose address range covers `addr`. Symbols without a
    /// size fall back to the closest preceding function in the same section.
    pub fn function_containing(&self, addr: u64) -> Option<&SymbolRef> {
        let section = self.section_containing(addr);
        let candidates = self
            .symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Defined && s.is_function && s.address <= addr);
        let mut best: Option<&SymbolRef> = None;
        for sym in candidates {
            let covers = if sym.size > 0 {
                sym.address.checked_add(sym.size).is_some_and(|end| addr < end)
            } else {
                section.is_some_and(|s| s.contains_addr(sym.address))
            };
            if covers && best.map_or(true, |b| sym.address > b.address) {
                best = Some(sym);
            }
        }
        best
    }

    /// Shared libraries the image links against.
    pub fn libraries(&self) -> Vec<String> {
        match &self.details {
            FormatDetails::Elf(d) => d.dynamic.as_ref().map(|dy| dy.needed.clone()).unwrap_or_default(),
            FormatDetails::MachO(d) => d.dylibs.clone(),
            FormatDetails::Pe(d) => d.imported_libraries.clone(),
        }
    }

    pub fn rpaths(&self) -> Vec<String> {
        match &self.details {
            FormatDetails::Elf(d) => d.dynamic.as_ref().map(|dy| dy.rpath.clone()).unwrap_or_default(),
            FormatDetails::MachO(d) => d.rpaths.clone(),
            FormatDetails::Pe(_) => Vec::new(),
        }
    }

    pub fn runpaths(&self) -> Vec<String> {
        match &self.details {
            FormatDetails::Elf(d) => d.dynamic.as_ref().map(|dy| dy.runpath.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(format: Format) -> ImageHeader {
        ImageHeader {
            format,
            arch: Arch::X86_64,
            endianness: Endianness::Little,
            bits: 64,
            kind: ImageKind::Executable,
            entry: 0,
        }
    }

    fn section(name: &str, offset: u64, size: u64) -> Section {
        Section {
            name: name.to_string(),
            offset,
            file_size: size,
            addr: 0x1000 + offset,
            mem_size: size,
            flags: SectionFlags::READ | SectionFlags::EXEC | SectionFlags::ALLOC,
        }
    }

    fn details() -> FormatDetails {
        FormatDetails::Elf(ElfDetails {
            e_type: 2,
            program_header_count: 0,
            gnu_stack_flags: None,
            has_gnu_relro: false,
            interpreter: None,
            dynamic: None,
        })
    }

    #[test]
    fn test_assemble_rejects_out_of_bounds_section() {
        let data = vec![0u8; 64];
        let parts = ImageParts {
            sections: vec![section(".text", 32, 64)],
            ..Default::default()
        };
        let err = BinaryImage::assemble(&data, header(Format::ELF), parts, details()).unwrap_err();
        assert!(matches!(err, DetectorError::MalformedBinary { offset: 32, .. }));
    }

    #[test]
    fn test_assemble_rejects_overflowing_range() {
        let data = vec![0u8; 64];
        let parts = ImageParts {
            segments: vec![Segment {
                name: "PT_LOAD".into(),
                kind: 1,
                offset: u64::MAX,
                file_size: 2,
                vaddr: 0,
                mem_size: 0,
                flags: SectionFlags::READ,
            }],
            ..Default::default()
        };
        assert!(BinaryImage::assemble(&data, header(Format::ELF), parts, details()).is_err());
    }

    #[test]
    fn test_section_data_and_addr_mapping() {
        let mut data = vec![0u8; 64];
        data[16..20].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        let parts = ImageParts {
            sections: vec![section(".text", 16, 4)],
            ..Default::default()
        };
        let image = BinaryImage::assemble(&data, header(Format::ELF), parts, details()).unwrap();
        let text = &image.sections()[0];
        assert_eq!(image.section_data(text), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(text.addr_of_offset(18), Some(0x1012));
        assert_eq!(text.addr_of_offset(20), None);
        assert_eq!(image.executable_sections().count(), 1);
    }

    #[test]
    fn test_macho_symbols_are_underscore_normalized() {
        let data = vec![0u8; 16];
        let parts = ImageParts {
            symbols: vec![SymbolRef {
                name: "___stack_chk_fail".into(),
                address: 0,
                size: 0,
                kind: SymbolKind::Import,
                is_function: true,
            }],
            ..Default::default()
        };
        let details = FormatDetails::MachO(MachODetails {
            filetype: 2,
            flags: 0,
            code_signature_size: None,
            crypt_id: None,
            rpaths: vec![],
            dylibs: vec![],
        });
        let image = BinaryImage::assemble(&data, header(Format::MachO), parts, details).unwrap();
        assert!(image.find_symbol("__stack_chk_fail").is_some());
        assert!(image.find_symbol("___stack_chk_fail").is_none());
    }

    fn sym(name: &str, address: u64, size: u64) -> SymbolRef {
        SymbolRef {
            name: name.into(),
            address,
            size,
            kind: SymbolKind::Defined,
            is_function: true,
        }
    }

    #[test]
    fn test_addr_of_offset_near_address_space_end() {
        let mut text = section(".text", 0, 0x40);
        text.addr = u64::MAX - 0x20;
        assert_eq!(text.addr_of_offset(0x10), Some(u64::MAX - 0x10));
        assert_eq!(text.addr_of_offset(0x30), None);
        assert_eq!(text.addr_of_offset(0x40), None);
    }

    #[test]
    fn test_symbol_range_past_address_space_is_skipped() {
        let data = vec![0u8; 16];
        let parts = ImageParts {
            symbols: vec![sym("wraps", u64::MAX - 0x10, 0x100), sym("low", 0x1000, 0x10)],
            ..Default::default()
        };
        let image = BinaryImage::assemble(&data, header(Format::ELF), parts, details()).unwrap();
        assert!(image.function_containing(u64::MAX - 0x8).is_none());
        assert!(image.function_containing(u64::MAX).is_none());
        assert_eq!(image.function_containing(0x1008).unwrap().name, "low");
    }

    #[test]
    fn test_sizeless_fallback_stays_in_section() {
        let data = vec![0u8; 0x40];
        let parts = ImageParts {
            // .text at 0x1000..0x1020, .plt at 0x1020..0x1040
            sections: vec![section(".text", 0, 0x20), section(".plt", 0x20, 0x20)],
            symbols: vec![sym("main", 0x1000, 0)],
            ..Default::default()
        };
        let image = BinaryImage::assemble(&data, header(Format::ELF), parts, details()).unwrap();
        assert_eq!(image.function_containing(0x1018).unwrap().name, "main");
        assert!(image.function_containing(0x1028).is_none());
        assert!(image.function_containing(0x2000).is_none());
    }

    #[test]
    fn test_function_containing() {
        let data = vec![0u8; 16];
        let func = |name: &str, address, size| SymbolRef {
            name: name.into(),
            address,
            size,
            kind: SymbolKind::Defined,
            is_function: true,
        };
        let parts = ImageParts {
            symbols: vec![func("main", 0x1100, 0x40), func("helper", 0x1000, 0x80)],
            ..Default::default()
        };
        let image = BinaryImage::assemble(&data, header(Format::ELF), parts, details()).unwrap();
        assert_eq!(image.function_containing(0x1010).unwrap().name, "helper");
        assert_eq!(image.function_containing(0x1120).unwrap().name, "main");
        assert!(image.function_containing(0x10a0).is_none());
        assert!(image.function_containing(0x0fff).is_none());
    }
}
