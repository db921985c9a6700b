//! Image builders for rule unit tests.

use crate::image::*;

fn header(format: Format, arch: Arch, bits: u8, kind: ImageKind) -> ImageHeader {
    ImageHeader {
        format,
        arch,
        endianness: Endianness::Little,
        bits,
        kind,
        entry: 0,
    }
}

pub fn elf_details() -> ElfDetails {
    ElfDetails {
        e_type: 2,
        program_header_count: 4,
        gnu_stack_flags: None,
        has_gnu_relro: false,
        interpreter: None,
        dynamic: None,
    }
}

pub fn pe_details(is_64: bool) -> PeDetails {
    PeDetails {
        is_64,
        characteristics: 0x0002,
        dll_characteristics: 0,
        load_config: None,
        certificate_size: 0,
        clr_header_size: 0,
        imported_libraries: vec![],
    }
}

pub fn macho_details() -> MachODetails {
    MachODetails {
        filetype: 2,
        flags: 0,
        code_signature_size: None,
        crypt_id: None,
        rpaths: vec![],
        dylibs: vec![],
    }
}

pub fn import(name: &str) -> SymbolRef {
    SymbolRef {
        name: name.into(),
        address: 0,
        size: 0,
        kind: SymbolKind::Import,
        is_function: true,
    }
}

pub fn defined(name: &str, address: u64) -> SymbolRef {
    SymbolRef {
        name: name.into(),
        address,
        size: 0x10,
        kind: SymbolKind::Defined,
        is_function: true,
    }
}

pub fn elf(details: ElfDetails, symbols: Vec<SymbolRef>) -> BinaryImage<'static> {
    let kind = match details.e_type {
        3 => ImageKind::SharedObject,
        1 => ImageKind::Relocatable,
        _ => ImageKind::Executable,
    };
    let parts = ImageParts {
        symbols,
        ..Default::default()
    };
    BinaryImage::assemble(
        &[],
        header(Format::ELF, Arch::X86_64, 64, kind),
        parts,
        FormatDetails::Elf(details),
    )
    .unwrap()
}

pub fn defined_fn(name: &str, address: u64, size: u64) -> SymbolRef {
    SymbolRef {
        size,
        ..defined(name, address)
    }
}

/// x86-64 executable whose only section is `.text` at 0x1000 holding `code`.
pub fn elf_with_text(code: &[u8], symbols: Vec<SymbolRef>) -> BinaryImage<'_> {
    let parts = ImageParts {
        sections: vec![Section {
            name: ".text".into(),
            offset: 0,
            file_size: code.len() as u64,
            addr: 0x1000,
            mem_size: code.len() as u64,
            flags: SectionFlags::READ | SectionFlags::EXEC | SectionFlags::ALLOC,
        }],
        symbols,
        ..Default::default()
    };
    BinaryImage::assemble(
        code,
        header(Format::ELF, Arch::X86_64, 64, ImageKind::Executable),
        parts,
        FormatDetails::Elf(elf_details()),
    )
    .unwrap()
}

pub fn pe(details: PeDetails) -> BinaryImage<'static> {
    let (arch, bits) = if details.is_64 {
        (Arch::X86_64, 64)
    } else {
        (Arch::X86, 32)
    };
    BinaryImage::assemble(
        &[],
        header(Format::PE, arch, bits, ImageKind::Executable),
        ImageParts::default(),
        FormatDetails::Pe(details),
    )
    .unwrap()
}

pub fn macho(
    details: MachODetails,
    segments: &[&str],
    symbols: Vec<SymbolRef>,
) -> BinaryImage<'static> {
    let parts = ImageParts {
        segments: segments
            .iter()
            .map(|name| Segment {
                name: name.to_string(),
                kind: 0x19,
                offset: 0,
                file_size: 0,
                vaddr: 0,
                mem_size: 0x1000,
                flags: SectionFlags::READ,
            })
            .collect(),
        symbols,
        ..Default::default()
    };
    BinaryImage::assemble(
        &[],
        header(Format::MachO, Arch::AArch64, 64, ImageKind::Executable),
        parts,
        FormatDetails::MachO(details),
    )
    .unwrap()
}
