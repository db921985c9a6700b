//! ELF (Executable and Linkable Format) parser
//!
//! Zero-copy over the input buffer: raw headers are decoded in place and only
//! the metadata the detector needs is copied into the `BinaryImage`.

pub mod dynamic;
pub mod headers;
pub mod tables;
pub mod types;

use crate::error::Result;
use crate::image::{
    Arch, BinaryImage, ElfDetails, Format, FormatDetails, ImageHeader, ImageKind, ImageParts,
    Section, SectionFlags, Segment,
};
use headers::parse_header;
pub use types::*;

/// ELF parser over a borrowed buffer.
pub struct ElfParser<'data> {
    data: &'data [u8],
    header: ElfHeader,
}

impl<'data> ElfParser<'data> {
    /// Parse and validate the file header.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let header = parse_header(data)?;
        Ok(Self { data, header })
    }

    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Decode the remaining tables and build the format-independent view.
    pub fn into_image(self) -> Result<BinaryImage<'data>> {
        let data = self.data;
        let header = &self.header;

        let section_headers = tables::parse_section_headers(data, header)?;
        let names = tables::section_names(data, header, &section_headers);
        let program_headers = tables::parse_program_headers(data, header)?;

        let sections = section_headers
            .iter()
            .zip(names)
            .skip(1) // SHN_UNDEF placeholder
            .map(|(sh, name)| Section {
                name,
                offset: sh.sh_offset,
                file_size: sh.file_size(),
                addr: sh.sh_addr,
                mem_size: sh.sh_size,
                flags: section_flags(sh.sh_flags),
            })
            .collect();

        let segments = program_headers
            .iter()
            .map(|ph| Segment {
                name: segment_type_name(ph.p_type),
                kind: ph.p_type,
                offset: ph.p_offset,
                file_size: ph.p_filesz,
                vaddr: ph.p_vaddr,
                mem_size: ph.p_memsz,
                flags: segment_flags(ph.p_type, ph.p_flags),
            })
            .collect();

        let symbols = dynamic::parse_symbols(data, header, &section_headers)?;
        let dynamic = dynamic::parse_dynamic(data, header, &section_headers, &program_headers)?;

        let details = ElfDetails {
            e_type: header.e_type,
            program_header_count: program_headers.len(),
            gnu_stack_flags: program_headers
                .iter()
                .find(|ph| ph.p_type == PT_GNU_STACK)
                .map(|ph| ph.p_flags),
            has_gnu_relro: program_headers.iter().any(|ph| ph.p_type == PT_GNU_RELRO),
            interpreter: tables::interpreter(data, &program_headers),
            dynamic,
        };

        tracing::debug!(
            sections = section_headers.len(),
            segments = program_headers.len(),
            symbols = symbols.len(),
            "parsed ELF image"
        );

        let image_header = ImageHeader {
            format: Format::ELF,
            arch: arch_from_machine(header.e_machine, header.ident.is_64),
            endianness: header.ident.endian,
            bits: if header.ident.is_64 { 64 } else { 32 },
            kind: match header.e_type {
                ET_EXEC => ImageKind::Executable,
                ET_DYN => ImageKind::SharedObject,
                ET_REL => ImageKind::Relocatable,
                _ => ImageKind::Other,
            },
            entry: header.e_entry,
        };
        let parts = ImageParts {
            sections,
            segments,
            load_commands: Vec::new(),
            symbols,
        };
        BinaryImage::assemble(data, image_header, parts, FormatDetails::Elf(details))
    }
}

/// Parse an ELF buffer into a `BinaryImage`.
pub fn parse(data: &[u8]) -> Result<BinaryImage<'_>> {
    ElfParser::parse(data)?.into_image()
}

fn arch_from_machine(e_machine: u16, is_64: bool) -> Arch {
    match e_machine {
        3 => Arch::X86,
        62 => Arch::X86_64,
        40 => Arch::ARM,
        183 => Arch::AArch64,
        8 if is_64 => Arch::MIPS64,
        8 => Arch::MIPS,
        20 => Arch::PPC,
        21 => Arch::PPC64,
        243 if is_64 => Arch::RISCV64,
        243 => Arch::RISCV,
        _ => Arch::Unknown,
    }
}

fn section_flags(sh_flags: u64) -> SectionFlags {
    let mut flags = SectionFlags::empty();
    if sh_flags & SHF_ALLOC != 0 {
        flags |= SectionFlags::ALLOC | SectionFlags::READ;
    }
    if sh_flags & SHF_WRITE != 0 {
        flags |= SectionFlags::WRITE;
    }
    if sh_flags & SHF_EXECINSTR != 0 {
        flags |= SectionFlags::EXEC;
    }
    flags
}

fn segment_flags(p_type: u32, p_flags: u32) -> SectionFlags {
    let mut flags = SectionFlags::empty();
    if p_type == PT_LOAD {
        flags |= SectionFlags::ALLOC;
    }
    if p_flags & PF_R != 0 {
        flags |= SectionFlags::READ;
    }
    if p_flags & PF_W != 0 {
        flags |= SectionFlags::WRITE;
    }
    if p_flags & PF_X != 0 {
        flags |= SectionFlags::EXEC;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectorError;

    /// ELF64 with `.text` and `.shstrtab`, plus PT_GNU_STACK; section table last.
    fn small_elf(e_type: u16) -> Vec<u8> {
        let mut data = vec![0u8; 0x200];
        data[0..4].copy_from_slice(ELF_MAGIC);
        data[4] = ELFCLASS64;
        data[5] = ELFDATA2LSB;
        data[6] = 1;
        data[16..18].copy_from_slice(&e_type.to_le_bytes());
        data[18] = 62;
        data[24..32].copy_from_slice(&0x1010u64.to_le_bytes());
        data[32] = 0x40; // e_phoff
        data[40..48].copy_from_slice(&0x200u64.to_le_bytes()); // e_shoff
        data[54] = 56;
        data[56] = 1;
        data[58] = 64;
        data[60] = 3;
        data[62] = 2;

        let ph = 0x40;
        data[ph..ph + 4].copy_from_slice(&PT_GNU_STACK.to_le_bytes());
        data[ph + 4] = (PF_R | PF_W) as u8;

        data[0x100..0x104].copy_from_slice(&[0x55, 0x48, 0x89, 0xe5]);
        data[0x180..0x197].copy_from_slice(b"\0.text\0.shstrtab\0\0\0\0\0\0\0");

        let mut shdrs = vec![0u8; 64 * 3];
        let text = 64;
        shdrs[text] = 1;
        shdrs[text + 4] = 1;
        shdrs[text + 8] = (SHF_ALLOC | SHF_EXECINSTR) as u8;
        shdrs[text + 16..text + 24].copy_from_slice(&0x1000u64.to_le_bytes());
        shdrs[text + 24..text + 32].copy_from_slice(&0x100u64.to_le_bytes());
        shdrs[text + 32] = 0x10;
        let strtab = 128;
        shdrs[strtab] = 7;
        shdrs[strtab + 4] = 3;
        shdrs[strtab + 24..strtab + 32].copy_from_slice(&0x180u64.to_le_bytes());
        shdrs[strtab + 32] = 0x17;
        data.extend(shdrs);
        data
    }

    #[test]
    fn test_parse_into_image() {
        let data = small_elf(ET_EXEC);
        let image = parse(&data).unwrap();
        assert_eq!(image.format(), Format::ELF);
        assert_eq!(image.arch(), Arch::X86_64);
        assert_eq!(image.header().bits, 64);
        assert_eq!(image.header().kind, ImageKind::Executable);
        assert_eq!(image.header().entry, 0x1010);

        let names: Vec<_> = image.sections().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec![".text", ".shstrtab"]);
        assert_eq!(image.executable_sections().count(), 1);

        let elf = image.elf().unwrap();
        assert_eq!(elf.program_header_count, 1);
        assert_eq!(elf.gnu_stack_flags, Some(PF_R | PF_W));
        assert!(!elf.has_gnu_relro);
        assert!(elf.dynamic.is_none());
    }

    #[test]
    fn test_kind_mapping() {
        let image_kind = |t| parse(&small_elf(t)).unwrap().header().kind;
        assert_eq!(image_kind(ET_DYN), ImageKind::SharedObject);
        assert_eq!(image_kind(ET_REL), ImageKind::Relocatable);
        assert_eq!(image_kind(4), ImageKind::Other);
    }

    #[test]
    fn test_every_truncation_is_malformed() {
        let data = small_elf(ET_EXEC);
        for len in 0..data.len() {
            match parse(&data[..len]) {
                Err(DetectorError::MalformedBinary { .. }) => {}
                other => panic!("prefix of {} bytes gave {:?}", len, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_section_escaping_buffer_is_malformed() {
        let mut data = small_elf(ET_EXEC);
        // .text size far past the end
        let text = 0x200 + 64 + 32;
        data[text..text + 8].copy_from_slice(&0x10_0000u64.to_le_bytes());
        assert!(matches!(
            parse(&data),
            Err(DetectorError::MalformedBinary { .. })
        ));
    }

    #[test]
    fn test_arch_mapping() {
        assert_eq!(arch_from_machine(3, false), Arch::X86);
        assert_eq!(arch_from_machine(8, true), Arch::MIPS64);
        assert_eq!(arch_from_machine(243, false), Arch::RISCV);
        assert_eq!(arch_from_machine(0xffff, true), Arch::Unknown);
    }
}
