//! PE/COFF parser

pub mod headers;
pub mod imports;
pub mod load_config;
pub mod types;

use crate::error::{DetectorError, Result};
use crate::formats::reader::EndianRead;
use crate::image::{
    Arch, BinaryImage, Endianness, Format, FormatDetails, ImageHeader, ImageKind, ImageParts,
    PeDetails, Section, SectionFlags,
};
use headers::*;
pub use types::*;

/// PE parser holding the decoded headers.
pub struct PeParser<'data> {
    data: &'data [u8],
    coff: CoffHeader,
    optional: OptionalHeader,
    sections: Vec<SectionHeader>,
}

impl<'data> PeParser<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let dos = parse_dos_header(data)?;
        let nt = dos.e_lfanew as usize;
        check_pe_signature(data, nt)?;
        let coff = parse_coff_header(data, nt + 4)?;

        let opt_offset = nt + 24;
        if data.read_u16_at(opt_offset, Endianness::Little)? == ROM_MAGIC {
            return Err(DetectorError::UnsupportedFormat(
                "PE ROM image".to_string(),
            ));
        }
        let optional = parse_optional_header(data, opt_offset, coff.size_of_optional_header)?;
        let sections = parse_section_headers(
            data,
            opt_offset + coff.size_of_optional_header as usize,
            coff.number_of_sections,
        )?;

        Ok(Self {
            data,
            coff,
            optional,
            sections,
        })
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional
    }

    /// `ImageBase + rva`. A sum past the top of the address space is malformed.
    fn va(&self, rva: u32, what: &str) -> Result<u64> {
        self.optional
            .image_base
            .checked_add(rva as u64)
            .ok_or_else(|| {
                DetectorError::malformed(
                    0,
                    format!(
                        "{} {:#x} overflows ImageBase {:#x}",
                        what, rva, self.optional.image_base
                    ),
                )
            })
    }

    pub fn into_image(self) -> Result<BinaryImage<'data>> {
        let load_config = load_config::parse_load_config(self.data, &self.optional, &self.sections)?;
        let imports = imports::parse_imports(self.data, &self.optional, &self.sections)?;
        let directory_size = |index| {
            self.optional
                .data_directory(index)
                .map(|d| d.size)
                .unwrap_or(0)
        };
        let certificate_size = directory_size(IMAGE_DIRECTORY_ENTRY_SECURITY);
        let clr_header_size = directory_size(IMAGE_DIRECTORY_ENTRY_COM_DESCRIPTOR);

        let is_64 = self.optional.is_64();
        let details = PeDetails {
            is_64,
            characteristics: self.coff.characteristics,
            dll_characteristics: self.optional.dll_characteristics,
            load_config,
            certificate_size,
            clr_header_size,
            imported_libraries: imports.dlls,
        };

        let sections = self
            .sections
            .iter()
            .map(|sh| {
                Ok(Section {
                    name: sh.name.clone(),
                    offset: sh.pointer_to_raw_data as u64,
                    file_size: sh.file_size() as u64,
                    addr: self.va(sh.virtual_address, "section address")?,
                    mem_size: sh.virtual_size as u64,
                    flags: section_flags(sh.characteristics),
                })
            })
            .collect::<Result<Vec<Section>>>()?;

        tracing::debug!(
            sections = sections.len(),
            pe32_plus = is_64,
            has_load_config = details.load_config.is_some(),
            imports = imports.functions.len(),
            "parsed PE image"
        );

        let characteristics = self.coff.characteristics;
        let header = ImageHeader {
            format: Format::PE,
            arch: arch_from_machine(self.coff.machine),
            endianness: Endianness::Little,
            bits: if is_64 { 64 } else { 32 },
            kind: if characteristics & IMAGE_FILE_DLL != 0 {
                ImageKind::SharedObject
            } else if characteristics & IMAGE_FILE_EXECUTABLE_IMAGE != 0 {
                ImageKind::Executable
            } else {
                ImageKind::Other
            },
            entry: self.va(self.optional.address_of_entry_point, "entry point")?,
        };
        let parts = ImageParts {
            sections,
            symbols: imports.functions,
            ..Default::default()
        };
        BinaryImage::assemble(self.data, header, parts, FormatDetails::Pe(details))
    }
}

/// Parse a PE buffer into a `BinaryImage`.
pub fn parse(data: &[u8]) -> Result<BinaryImage<'_>> {
    PeParser::parse(data)?.into_image()
}

fn arch_from_machine(machine: u16) -> Arch {
    match machine {
        0x014c => Arch::X86,
        0x8664 => Arch::X86_64,
        0x01c0 | 0x01c4 => Arch::ARM,
        0xaa64 => Arch::AArch64,
        _ => Arch::Unknown,
    }
}

fn section_flags(characteristics: u32) -> SectionFlags {
    let mut flags = SectionFlags::ALLOC;
    if characteristics & IMAGE_SCN_MEM_READ != 0 {
        flags |= SectionFlags::READ;
    }
    if characteristics & IMAGE_SCN_MEM_WRITE != 0 {
        flags |= SectionFlags::WRITE;
    }
    if characteristics & (IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_CNT_CODE) != 0 {
        flags |= SectionFlags::EXEC;
    }
    flags
}
