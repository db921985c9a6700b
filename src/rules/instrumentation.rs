//! Compiler instrumentation: stack-clash protection, control-flow integrity
//! and SafeStack.

use super::patterns::page_touches;
use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::image::{BinaryImage, Format};

/// C-level names of symbols matching `pred`, deduplicated and in symbol-table order.
fn matching_symbols<'i>(
    image: &'i BinaryImage<'_>,
    pred: impl Fn(&str) -> bool,
) -> Vec<&'i str> {
    let mut names: Vec<&str> = Vec::new();
    for symbol in image.symbols() {
        let name = image.c_name(symbol);
        if pred(name) && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Stack-growth helper the Rust toolchain links into every binary built with
/// stack-clash protection.
const RUST_STACK_HELPER: &str = "__rust_probestack";

/// A page-at-a-time stack growth loop found in code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTouchSite {
    pub address: u64,
    pub pattern: String,
    pub function: Option<String>,
}

/// Scan executable sections for stack-clash loops, stopping at `max_code_bytes`.
/// Returns the sites and whether the budget cut the scan short.
pub fn scan_page_touches(
    image: &BinaryImage<'_>,
    scan: &ScanConfig,
) -> Option<(Vec<PageTouchSite>, bool)> {
    let patterns = page_touches(image.arch())?;
    let mut sites = Vec::new();
    let mut scanned = 0usize;
    let mut truncated = false;

    for section in image.executable_sections() {
        let remaining = scan.max_code_bytes.saturating_sub(scanned);
        let code = image.section_data(section);
        if code.len() > remaining {
            truncated = true;
        }
        let code = &code[..code.len().min(remaining)];
        scanned += code.len();
        for m in patterns.find_iter(code) {
            let Some(address) = section.addr_of_offset(section.offset + m.start as u64) else {
                continue;
            };
            sites.push(PageTouchSite {
                address,
                pattern: m.name.to_string(),
                function: image.function_containing(address).map(|s| s.name.clone()),
            });
        }
        if truncated {
            break;
        }
    }
    tracing::trace!(sites = sites.len(), bytes = scanned, "stack-clash scan finished");
    Some((sites, truncated))
}

pub struct StackClashRule;

impl FeatureRule for StackClashRule {
    fn feature(&self) -> Feature {
        Feature::StackClash
    }

    fn evaluate(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::StackClash;
        if image.format() == Format::PE {
            return FeatureVerdict::not_applicable(f, image.format());
        }
        if let Some(symbol) = image.find_symbol(RUST_STACK_HELPER) {
            let evidence = if symbol.is_import() {
                format!("imports {}", RUST_STACK_HELPER)
            } else {
                format!("defines {} at {:#x}", RUST_STACK_HELPER, symbol.address)
            };
            return FeatureVerdict::present(f, evidence);
        }

        let Some((sites, truncated)) = scan_page_touches(image, scan) else {
            return FeatureVerdict::absent(
                f,
                format!(
                    "no {} symbol and no stack-clash patterns for {}",
                    RUST_STACK_HELPER,
                    image.arch()
                ),
            );
        };
        let mut evidence: Vec<String> = sites
            .iter()
            .take(scan.max_evidence_sites)
            .map(|site| match &site.function {
                Some(name) => format!(
                    "stack-clash loop `{}` at {:#x} in {}",
                    site.pattern, site.address, name
                ),
                None => format!("stack-clash loop `{}` at {:#x}", site.pattern, site.address),
            })
            .collect();
        if sites.len() > scan.max_evidence_sites {
            evidence.push(format!(
                "{} further stack-clash loops",
                sites.len() - scan.max_evidence_sites
            ));
        }
        if sites.is_empty() {
            evidence.push(format!(
                "no {} symbol and no stack-clash loop in code",
                RUST_STACK_HELPER
            ));
        }
        if truncated {
            evidence.push(format!("code scan stopped at {} bytes", scan.max_code_bytes));
        }
        FeatureVerdict::new(f, !sites.is_empty(), evidence)
    }
}

pub struct ClangCfiRule;

impl FeatureRule for ClangCfiRule {
    fn feature(&self) -> Feature {
        Feature::ClangCfi
    }

    fn evaluate(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::ClangCfi;
        if image.format() == Format::PE {
            return FeatureVerdict::not_applicable(f, image.format());
        }
        let hits = matching_symbols(image, |name| {
            name.ends_with(".cfi") || name == "__cfi_init" || name == "__cfi_check"
        });
        if hits.is_empty() {
            return FeatureVerdict::absent(f, "no CFI jump-table or runtime symbols");
        }
        let mut evidence = vec![format!("{} CFI symbols", hits.len())];
        evidence.extend(
            hits.iter()
                .take(scan.max_evidence_sites)
                .map(|name| format!("symbol {}", name)),
        );
        FeatureVerdict::new(f, true, evidence)
    }
}

pub struct SafeStackRule;

impl FeatureRule for SafeStackRule {
    fn feature(&self) -> Feature {
        Feature::SafeStack
    }

    fn evaluate(&self, image: &BinaryImage<'_>, _scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::SafeStack;
        if image.format() == Format::PE {
            return FeatureVerdict::not_applicable(f, image.format());
        }
        match image.find_symbol("__safestack_init") {
            Some(symbol) if symbol.is_import() => {
                FeatureVerdict::present(f, "imports __safestack_init")
            }
            Some(symbol) => FeatureVerdict::present(
                f,
                format!("defines __safestack_init at {:#x}", symbol.address),
            ),
            None => FeatureVerdict::absent(f, "no __safestack_init symbol"),
        }
    }
}
