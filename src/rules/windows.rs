//! PE-only mitigations.

use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::formats::pe::{
    IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE, IMAGE_DLLCHARACTERISTICS_FORCE_INTEGRITY,
    IMAGE_DLLCHARACTERISTICS_GUARD_CF, IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA,
    IMAGE_DLLCHARACTERISTICS_NO_ISOLATION, IMAGE_DLLCHARACTERISTICS_NO_SEH,
    IMAGE_GUARD_CFW_INSTRUMENTED, IMAGE_GUARD_CF_FUNCTION_TABLE_PRESENT,
    IMAGE_GUARD_CF_INSTRUMENTED, IMAGE_GUARD_CF_LONGJUMP_TABLE_PRESENT,
    IMAGE_GUARD_RF_ENABLE, IMAGE_GUARD_RF_INSTRUMENTED, IMAGE_GUARD_RF_STRICT,
};
use crate::image::{BinaryImage, PeDetails};

fn pe_only<'i>(image: &'i BinaryImage<'_>, feature: Feature) -> Result<&'i PeDetails, FeatureVerdict> {
    image
        .pe()
        .ok_or_else(|| FeatureVerdict::not_applicable(feature, image.format()))
}

pub struct HighEntropyVaRule;

impl FeatureRule for HighEntropyVaRule {
    fn feature(&self) -> Feature {
        Feature::HighEntropyVa
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::HighEntropyVa;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        let dll = pe.dll_characteristics;
        let high_entropy = dll & IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA != 0;
        let dynamic_base = dll & IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE != 0;
        match (high_entropy, dynamic_base) {
            (true, true) => FeatureVerdict::present(f, "HIGH_ENTROPY_VA with DYNAMIC_BASE"),
            (true, false) => FeatureVerdict::absent(
                f,
                "HIGH_ENTROPY_VA set but DYNAMIC_BASE is not, image is not relocated",
            ),
            (false, _) => FeatureVerdict::absent(f, "DllCharacteristics lacks HIGH_ENTROPY_VA"),
        }
    }
}

pub struct ControlFlowGuardRule;

fn guard_flag_names(flags: u32) -> Vec<&'static str> {
    [
        (IMAGE_GUARD_CF_INSTRUMENTED, "CF_INSTRUMENTED"),
        (IMAGE_GUARD_CFW_INSTRUMENTED, "CFW_INSTRUMENTED"),
        (IMAGE_GUARD_CF_FUNCTION_TABLE_PRESENT, "CF_FUNCTION_TABLE_PRESENT"),
        (IMAGE_GUARD_CF_LONGJUMP_TABLE_PRESENT, "CF_LONGJUMP_TABLE_PRESENT"),
    ]
    .into_iter()
    .filter(|(bit, _)| flags & bit != 0)
    .map(|(_, name)| name)
    .collect()
}

impl FeatureRule for ControlFlowGuardRule {
    fn feature(&self) -> Feature {
        Feature::ControlFlowGuard
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::ControlFlowGuard;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_GUARD_CF == 0 {
            return FeatureVerdict::absent(f, "DllCharacteristics lacks GUARD_CF");
        }
        let mut evidence = vec!["DllCharacteristics has GUARD_CF".to_string()];
        if let Some(lc) = pe.load_config {
            let names = guard_flag_names(lc.guard_flags);
            if !names.is_empty() {
                evidence.push(format!("GuardFlags {:#x}: {}", lc.guard_flags, names.join(", ")));
            }
        }
        FeatureVerdict::new(f, true, evidence)
    }
}

pub struct SafeSehRule;

impl FeatureRule for SafeSehRule {
    fn feature(&self) -> Feature {
        Feature::SafeSeh
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::SafeSeh;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.is_64 {
            return FeatureVerdict::absent(f, "PE32+ uses table-based exception handling");
        }
        let no_seh = pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_NO_SEH != 0;
        let mut verdict = match pe.load_config {
            Some(lc) if lc.se_handler_count > 0 => FeatureVerdict::present(
                f,
                format!(
                    "{} registered handlers in SEHandlerTable at {:#x}",
                    lc.se_handler_count, lc.se_handler_table
                ),
            ),
            Some(_) => FeatureVerdict::absent(f, "load config has no SEHandlerTable"),
            None => FeatureVerdict::absent(f, "no load config directory"),
        };
        if no_seh {
            verdict
                .evidence
                .push("NO_SEH set, image installs no SEH handlers".to_string());
        }
        verdict
    }
}

pub struct ReturnFlowGuardRule;

impl FeatureRule for ReturnFlowGuardRule {
    fn feature(&self) -> Feature {
        Feature::ReturnFlowGuard
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::ReturnFlowGuard;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        let Some(lc) = pe.load_config else {
            return FeatureVerdict::absent(f, "no load config directory");
        };
        let flags = lc.guard_flags;
        let instrumented = flags & IMAGE_GUARD_RF_INSTRUMENTED != 0;
        let enabled = flags & IMAGE_GUARD_RF_ENABLE != 0;
        if flags & IMAGE_GUARD_RF_STRICT != 0 {
            FeatureVerdict::present(f, format!("GuardFlags {:#x} has RF_STRICT", flags))
        } else if instrumented && enabled {
            FeatureVerdict::present(
                f,
                format!("GuardFlags {:#x} has RF_INSTRUMENTED and RF_ENABLE", flags),
            )
        } else if instrumented {
            FeatureVerdict::absent(f, "RF_INSTRUMENTED without RF_ENABLE")
        } else {
            FeatureVerdict::absent(f, "GuardFlags has no return flow guard bits")
        }
    }
}

pub struct SehRule;

impl FeatureRule for SehRule {
    fn feature(&self) -> Feature {
        Feature::Seh
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Seh;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_NO_SEH == 0 {
            FeatureVerdict::present(f, "NO_SEH not set, structured exception handling enabled")
        } else {
            FeatureVerdict::absent(f, "DllCharacteristics has NO_SEH")
        }
    }
}

pub struct ForceIntegrityRule;

impl FeatureRule for ForceIntegrityRule {
    fn feature(&self) -> Feature {
        Feature::ForceIntegrity
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::ForceIntegrity;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_FORCE_INTEGRITY != 0 {
            FeatureVerdict::present(f, "DllCharacteristics has FORCE_INTEGRITY")
        } else {
            FeatureVerdict::absent(f, "DllCharacteristics lacks FORCE_INTEGRITY")
        }
    }
}

pub struct IsolationRule;

impl FeatureRule for IsolationRule {
    fn feature(&self) -> Feature {
        Feature::Isolation
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Isolation;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.dll_characteristics & IMAGE_DLLCHARACTERISTICS_NO_ISOLATION == 0 {
            FeatureVerdict::present(f, "NO_ISOLATION not set, manifest isolation applies")
        } else {
            FeatureVerdict::absent(f, "DllCharacteristics has NO_ISOLATION")
        }
    }
}

/// Managed (.NET) image, identified by its CLR runtime header.
pub struct ClrRule;

impl FeatureRule for ClrRule {
    fn feature(&self) -> Feature {
        Feature::Clr
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Clr;
        let pe = match pe_only(image, f) {
            Ok(pe) => pe,
            Err(verdict) => return verdict,
        };
        if pe.clr_header_size > 0 {
            FeatureVerdict::present(
                f,
                format!("CLR runtime header directory of {} bytes", pe.clr_header_size),
            )
        } else {
            FeatureVerdict::absent(f, "no CLR runtime header directory")
        }
    }
}
