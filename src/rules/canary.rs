//! Stack canary detection.

use super::patterns::guard_checks;
use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::image::{BinaryImage, Format};

/// Symbols the stack protector runtime exports.
pub const CANARY_SYMBOLS: [&str; 3] = [
    "__stack_chk_fail",
    "__stack_chk_guard",
    "__intel_security_cookie",
];

const RET: u8 = 0xc3;

/// A guard check followed by a return inside the epilogue window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardSite {
    pub address: u64,
    pub pattern: String,
    pub function: Option<String>,
    /// Bytes from the end of the check to the `ret`
    pub ret_distance: usize,
}

/// Result of scanning executable sections for guard checks.
#[derive(Debug, Clone, Default)]
pub struct GuardScan {
    pub sites: Vec<GuardSite>,
    pub bytes_scanned: usize,
    pub truncated: bool,
}

/// Scan executable sections for TLS guard checks that precede a `ret`.
pub fn scan_guard_checks(image: &BinaryImage<'_>, scan: &ScanConfig) -> Option<GuardScan> {
    let patterns = guard_checks(image.arch())?;
    let mut out = GuardScan::default();

    for section in image.executable_sections() {
        let remaining = scan.max_code_bytes.saturating_sub(out.bytes_scanned);
        if remaining == 0 {
            out.truncated = true;
            break;
        }
        let code = image.section_data(section);
        if code.len() > remaining {
            out.truncated = true;
        }
        let code = &code[..code.len().min(remaining)];
        out.bytes_scanned += code.len();

        for m in patterns.find_iter(code) {
            let window_end = (m.end + scan.epilogue_window).min(code.len());
            let Some(ret_distance) = memchr::memchr(RET, &code[m.end..window_end]) else {
                continue;
            };
            let Some(address) = section.addr_of_offset(section.offset + m.start as u64) else {
                continue;
            };
            out.sites.push(GuardSite {
                address,
                pattern: m.name.to_string(),
                function: image.function_containing(address).map(|s| s.name.clone()),
                ret_distance,
            });
        }
    }
    tracing::trace!(
        sites = out.sites.len(),
        bytes = out.bytes_scanned,
        "guard check scan finished"
    );
    Some(out)
}

fn describe_site(site: &GuardSite) -> String {
    let location = match &site.function {
        Some(name) => format!("in {}", name),
        None => "outside any known function".to_string(),
    };
    format!(
        "guard check `{}` at {:#x} {}, ret {} bytes later",
        site.pattern, site.address, location, site.ret_distance
    )
}

pub struct CanaryRule;

impl CanaryRule {
    fn evaluate_pe(&self, image: &BinaryImage<'_>) -> FeatureVerdict {
        let config = image.pe().and_then(|pe| pe.load_config);
        match config {
            Some(lc) if lc.security_cookie != 0 => FeatureVerdict::present(
                Feature::Canary,
                format!("load config SecurityCookie at {:#x} (/GS)", lc.security_cookie),
            ),
            Some(_) => FeatureVerdict::absent(Feature::Canary, "load config has no SecurityCookie"),
            None => FeatureVerdict::absent(Feature::Canary, "no load config directory"),
        }
    }

    fn evaluate_symbols_and_code(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict {
        let mut evidence = Vec::new();

        let mut referenced: Vec<&str> = image
            .symbols()
            .iter()
            .filter(|s| CANARY_SYMBOLS.iter().any(|kw| s.name.contains(kw)))
            .map(|s| s.name.as_str())
            .collect();
        referenced.sort_unstable();
        referenced.dedup();
        for name in &referenced {
            evidence.push(format!("references {}", name));
        }

        let mut sites = 0;
        match scan_guard_checks(image, scan) {
            Some(result) => {
                sites = result.sites.len();
                evidence.extend(
                    result
                        .sites
                        .iter()
                        .take(scan.max_evidence_sites)
                        .map(describe_site),
                );
                if sites > scan.max_evidence_sites {
                    evidence.push(format!(
                        "{} further guard check sites",
                        sites - scan.max_evidence_sites
                    ));
                }
                if sites == 0 {
                    evidence.push(format!(
                        "no guard check before a return in {} bytes of code",
                        result.bytes_scanned
                    ));
                }
                if result.truncated {
                    evidence.push(format!(
                        "code scan stopped at {} bytes",
                        scan.max_code_bytes
                    ));
                }
            }
            None => evidence.push(format!("no guard check patterns for {}", image.arch())),
        }

        if referenced.is_empty() {
            evidence.insert(0, "no stack protector symbols referenced".to_string());
        }
        FeatureVerdict::new(Feature::Canary, !referenced.is_empty() || sites > 0, evidence)
    }
}

impl FeatureRule for CanaryRule {
    fn feature(&self) -> Feature {
        Feature::Canary
    }

    fn evaluate(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict {
        match image.format() {
            Format::PE => self.evaluate_pe(image),
            Format::ELF | Format::MachO => self.evaluate_symbols_and_code(image, scan),
        }
    }
}
