//! Memory-layout hardening: non-executable stack, PIE, RELRO.

use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::formats::elf::{DF_1_NOW, DF_1_PIE, DF_BIND_NOW, ET_DYN, ET_REL, PF_X};
use crate::formats::macho::{MH_ALLOW_STACK_EXECUTION, MH_BUNDLE, MH_DYLIB, MH_PIE};
use crate::formats::pe::{
    IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE, IMAGE_DLLCHARACTERISTICS_NX_COMPAT,
    IMAGE_FILE_RELOCS_STRIPPED,
};
use crate::image::{BinaryImage, FormatDetails};

pub struct NxRule;

impl FeatureRule for NxRule {
    fn feature(&self) -> Feature {
        Feature::Nx
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Nx;
        match image.details() {
            FormatDetails::Elf(elf) => {
                if elf.program_header_count == 0 {
                    return FeatureVerdict::absent(f, "no program headers, stack policy is set at link time");
                }
                match elf.gnu_stack_flags {
                    Some(flags) if flags & PF_X == 0 => {
                        FeatureVerdict::present(f, "PT_GNU_STACK is not executable")
                    }
                    Some(_) => FeatureVerdict::absent(f, "PT_GNU_STACK is executable"),
                    None => FeatureVerdict::absent(
                        f,
                        "no PT_GNU_STACK segment, the loader maps an executable stack",
                    ),
                }
            }
            FormatDetails::Pe(pe) => {
                if pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_NX_COMPAT != 0 {
                    FeatureVerdict::present(f, "DllCharacteristics has NX_COMPAT")
                } else {
                    FeatureVerdict::absent(f, "DllCharacteristics lacks NX_COMPAT")
                }
            }
            FormatDetails::MachO(macho) => {
                if macho.flags & MH_ALLOW_STACK_EXECUTION == 0 {
                    FeatureVerdict::present(f, "MH_ALLOW_STACK_EXECUTION not set")
                } else {
                    FeatureVerdict::absent(f, "MH_ALLOW_STACK_EXECUTION set")
                }
            }
        }
    }
}

pub struct PieRule;

impl FeatureRule for PieRule {
    fn feature(&self) -> Feature {
        Feature::Pie
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Pie;
        match image.details() {
            FormatDetails::Elf(elf) => match elf.e_type {
                ET_DYN => {
                    let pie_flag = elf
                        .dynamic
                        .as_ref()
                        .is_some_and(|d| d.flags_1 & DF_1_PIE != 0);
                    if pie_flag {
                        FeatureVerdict::present(f, "ET_DYN with DF_1_PIE")
                    } else if let Some(interp) = &elf.interpreter {
                        FeatureVerdict::present(f, format!("ET_DYN with interpreter {}", interp))
                    } else {
                        FeatureVerdict::present(f, "ET_DYN shared object (DSO)")
                    }
                }
                ET_REL => FeatureVerdict::absent(f, "relocatable object (ET_REL)"),
                other => FeatureVerdict::absent(
                    f,
                    format!("e_type {} loads at a fixed address", other),
                ),
            },
            FormatDetails::Pe(pe) => {
                let dynamic_base = pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE != 0;
                let stripped = pe.characteristics & IMAGE_FILE_RELOCS_STRIPPED != 0;
                match (dynamic_base, stripped) {
                    (true, false) => FeatureVerdict::present(f, "DllCharacteristics has DYNAMIC_BASE"),
                    (true, true) => FeatureVerdict::absent(
                        f,
                        "DYNAMIC_BASE set but relocations are stripped",
                    ),
                    (false, _) => FeatureVerdict::absent(f, "DllCharacteristics lacks DYNAMIC_BASE"),
                }
            }
            FormatDetails::MachO(macho) => {
                if macho.flags & MH_PIE != 0 {
                    FeatureVerdict::present(f, "MH_PIE set")
                } else if macho.filetype == MH_DYLIB || macho.filetype == MH_BUNDLE {
                    FeatureVerdict::present(f, "dylib/bundle images are always relocatable")
                } else {
                    FeatureVerdict::absent(f, "MH_PIE not set")
                }
            }
        }
    }
}

pub struct RelroRule;

impl FeatureRule for RelroRule {
    fn feature(&self) -> Feature {
        Feature::Relro
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Relro;
        let Some(elf) = image.elf() else {
            return FeatureVerdict::not_applicable(f, image.format());
        };
        if !elf.has_gnu_relro {
            return FeatureVerdict::absent(f, "no PT_GNU_RELRO segment");
        }
        let bind_now = elf.dynamic.as_ref().is_some_and(|d| {
            d.bind_now_tag || d.flags & DF_BIND_NOW != 0 || d.flags_1 & DF_1_NOW != 0
        });
        if bind_now {
            FeatureVerdict::present(f, "full: PT_GNU_RELRO with BIND_NOW")
        } else {
            FeatureVerdict::present(f, "partial: PT_GNU_RELRO without BIND_NOW")
        }
    }
}
