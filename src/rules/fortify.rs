//! `_FORTIFY_SOURCE` detection.

use super::{Feature, FeatureRule, FeatureVerdict};
use crate::config::ScanConfig;
use crate::image::{BinaryImage, Format};

/// glibc functions that have a `__*_chk` variant. Sorted for binary search.
pub const FORTIFIABLE_FUNCTIONS: [&str; 83] = [
    "asprintf",
    "confstr",
    "dprintf",
    "explicit_bzero",
    "fdelt",
    "fgets",
    "fgets_unlocked",
    "fgetws",
    "fgetws_unlocked",
    "fprintf",
    "fread",
    "fread_unlocked",
    "fwprintf",
    "getcwd",
    "getdomainname",
    "getgroups",
    "gethostname",
    "getlogin_r",
    "gets",
    "getwd",
    "longjmp",
    "mbsnrtowcs",
    "mbsrtowcs",
    "mbstowcs",
    "memcpy",
    "memmove",
    "mempcpy",
    "memset",
    "obstack_printf",
    "obstack_vprintf",
    "poll",
    "ppoll",
    "pread",
    "pread64",
    "printf",
    "ptsname_r",
    "read",
    "readlink",
    "readlinkat",
    "realpath",
    "recv",
    "recvfrom",
    "snprintf",
    "sprintf",
    "stpcpy",
    "stpncpy",
    "strcat",
    "strcpy",
    "strlcat",
    "strlcpy",
    "strncat",
    "strncpy",
    "swprintf",
    "syslog",
    "ttyname_r",
    "vasprintf",
    "vdprintf",
    "vfprintf",
    "vfwprintf",
    "vprintf",
    "vsnprintf",
    "vsprintf",
    "vswprintf",
    "vsyslog",
    "vwprintf",
    "wcpcpy",
    "wcpncpy",
    "wcrtomb",
    "wcscat",
    "wcscpy",
    "wcslcat",
    "wcslcpy",
    "wcsncat",
    "wcsncpy",
    "wcsnrtombs",
    "wcsrtombs",
    "wcstombs",
    "wctomb",
    "wmemcpy",
    "wmemmove",
    "wmempcpy",
    "wmemset",
    "wprintf",
];

/// Imported function counts that decide the fortify verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FortifyCounts {
    /// `__*_chk` imports
    pub fortified: Vec<String>,
    /// Plain imports that have a checked variant
    pub unfortified: Vec<String>,
}

pub fn count_fortified(image: &BinaryImage<'_>) -> FortifyCounts {
    let mut counts = FortifyCounts::default();
    for symbol in image.symbols().iter().filter(|s| s.is_import()) {
        let name = image.c_name(symbol);
        if is_fortified_name(image.format(), name) {
            counts.fortified.push(name.to_string());
        } else if FORTIFIABLE_FUNCTIONS.binary_search(&name).is_ok() {
            counts.unfortified.push(name.to_string());
        }
    }
    counts.fortified.sort();
    counts.fortified.dedup();
    counts.unfortified.sort();
    counts.unfortified.dedup();
    counts
}

fn is_fortified_name(format: Format, name: &str) -> bool {
    match format {
        // Darwin libc exports `__memcpy_chk` and friends with the same spelling.
        Format::ELF | Format::MachO => name.starts_with("__") && name.ends_with("_chk"),
        Format::PE => false,
    }
}

pub struct FortifyRule;

impl FeatureRule for FortifyRule {
    fn feature(&self) -> Feature {
        Feature::Fortify
    }

    fn evaluate(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict {
        let f = Feature::Fortify;
        if image.format() == Format::PE {
            return FeatureVerdict::not_applicable(f, image.format());
        }
        let counts = count_fortified(image);
        let fortified = counts.fortified.len();
        let fortifiable = fortified + counts.unfortified.len();

        let mut evidence = vec![format!(
            "{} of {} fortifiable imports use checked variants",
            fortified, fortifiable
        )];
        evidence.extend(
            counts
                .fortified
                .iter()
                .take(scan.max_evidence_sites)
                .map(|name| format!("imports {}", name)),
        );
        if fortified == 0 && !counts.unfortified.is_empty() {
            evidence.extend(
                counts
                    .unfortified
                    .iter()
                    .take(scan.max_evidence_sites)
                    .map(|name| format!("unchecked {}", name)),
            );
        }
        FeatureVerdict::new(f, fortified > 0, evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::*;

    #[test]
    fn test_fortifiable_list_is_sorted() {
        assert!(FORTIFIABLE_FUNCTIONS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_counts_fortified_and_plain_imports() {
        let image = elf(
            elf_details(),
            vec![
                import("__memcpy_chk"),
                import("__printf_chk"),
                import("strcpy"),
                import("puts"),
                defined("__local_chk", 0x1000),
            ],
        );
        let counts = count_fortified(&image);
        assert_eq!(counts.fortified, vec!["__memcpy_chk", "__printf_chk"]);
        assert_eq!(counts.unfortified, vec!["strcpy"]);

        let v = FortifyRule.evaluate(&image, &ScanConfig::default());
        assert!(v.present);
        assert_eq!(v.evidence[0], "2 of 3 fortifiable imports use checked variants");
    }

    #[test]
    fn test_no_checked_imports() {
        let image = elf(elf_details(), vec![import("strcpy"), import("memcpy")]);
        let v = FortifyRule.evaluate(&image, &ScanConfig::default());
        assert!(!v.present);
        assert!(v.evidence.contains(&"unchecked memcpy".to_string()));
    }

    #[test]
    fn test_macho_names_are_normalized() {
        let image = macho(macho_details(), &[], vec![import("___strcpy_chk")]);
        assert!(FortifyRule.evaluate(&image, &ScanConfig::default()).present);
    }

    #[test]
    fn test_pe_not_applicable() {
        let v = FortifyRule.evaluate(&pe(pe_details(true)), &ScanConfig::default());
        assert_eq!(v.evidence, vec!["not applicable to PE images"]);
    }
}
