//! Mach-O specific mitigations, plus code signing which PE shares.

use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::formats::macho::MH_NO_HEAP_EXECUTION;
use crate::image::{BinaryImage, FormatDetails, MachODetails};

fn macho_only<'i>(
    image: &'i BinaryImage<'_>,
    feature: Feature,
) -> Result<&'i MachODetails, FeatureVerdict> {
    image
        .macho()
        .ok_or_else(|| FeatureVerdict::not_applicable(feature, image.format()))
}

pub struct NxHeapRule;

impl FeatureRule for NxHeapRule {
    fn feature(&self) -> Feature {
        Feature::NxHeap
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::NxHeap;
        let macho = match macho_only(image, f) {
            Ok(m) => m,
            Err(verdict) => return verdict,
        };
        if macho.flags & MH_NO_HEAP_EXECUTION != 0 {
            FeatureVerdict::present(f, "MH_NO_HEAP_EXECUTION set")
        } else {
            FeatureVerdict::absent(f, "MH_NO_HEAP_EXECUTION not set")
        }
    }
}

pub struct CodeSignatureRule;

impl FeatureRule for CodeSignatureRule {
    fn feature(&self) -> Feature {
        Feature::CodeSignature
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::CodeSignature;
        match image.details() {
            FormatDetails::MachO(macho) => match macho.code_signature_size {
                Some(size) if size > 0 => {
                    FeatureVerdict::present(f, format!("LC_CODE_SIGNATURE with {} bytes", size))
                }
                Some(_) => FeatureVerdict::absent(f, "LC_CODE_SIGNATURE is empty"),
                None => FeatureVerdict::absent(f, "no LC_CODE_SIGNATURE"),
            },
            FormatDetails::Pe(pe) if pe.certificate_size > 0 => FeatureVerdict::present(
                f,
                format!("Authenticode certificate table of {} bytes", pe.certificate_size),
            ),
            FormatDetails::Pe(_) => FeatureVerdict::absent(f, "no certificate table"),
            FormatDetails::Elf(_) => FeatureVerdict::not_applicable(f, image.format()),
        }
    }
}

pub struct EncryptedRule;

impl FeatureRule for EncryptedRule {
    fn feature(&self) -> Feature {
        Feature::Encrypted
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Encrypted;
        let macho = match macho_only(image, f) {
            Ok(m) => m,
            Err(verdict) => return verdict,
        };
        match macho.crypt_id {
            Some(id) if id != 0 => FeatureVerdict::present(f, format!("cryptid {}", id)),
            Some(_) => FeatureVerdict::absent(f, "encryption info present with cryptid 0"),
            None => FeatureVerdict::absent(f, "no LC_ENCRYPTION_INFO"),
        }
    }
}

pub struct RestrictRule;

impl FeatureRule for RestrictRule {
    fn feature(&self) -> Feature {
        Feature::Restrict
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Restrict;
        if let Err(verdict) = macho_only(image, f) {
            return verdict;
        }
        let segment = image
            .segments()
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case("__RESTRICT"));
        match segment {
            Some(s) => FeatureVerdict::present(f, format!("segment {}", s.name)),
            None => FeatureVerdict::absent(f, "no __RESTRICT segment"),
        }
    }
}

pub struct ArcRule;

impl FeatureRule for ArcRule {
    fn feature(&self) -> Feature {
        Feature::Arc
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Arc;
        if let Err(verdict) = macho_only(image, f) {
            return verdict;
        }
        match image.find_symbol("objc_release") {
            Some(s) if s.is_import() => FeatureVerdict::present(f, "imports _objc_release"),
            _ => FeatureVerdict::absent(f, "no _objc_release import"),
        }
    }
}
