//! Container parsing.
//!
//! `parse` sniffs the magic bytes and hands the buffer to the matching
//! format parser. Every parser is zero-copy over the input and validates
//! declared offsets and sizes before the image is handed out.

pub mod elf;
pub mod macho;
pub mod pe;
pub mod reader;

use crate::error::{DetectorError, Result};
use crate::image::{BinaryImage, Format};

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Identify the container format from its leading bytes.
///
/// Returns `Ok(None)` for data that matches no known container.
pub fn detect_format(data: &[u8]) -> Result<Option<Format>> {
    let Some(head) = data.get(..4) else {
        return Ok(None);
    };
    let magic_be = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);

    if head == elf::ELF_MAGIC {
        return Ok(Some(Format::ELF));
    }
    if head[..2] == *b"MZ" {
        return Ok(Some(Format::PE));
    }
    match magic_be {
        macho::MH_MAGIC | macho::MH_MAGIC_64 | macho::MH_CIGAM | macho::MH_CIGAM_64 => {
            return Ok(Some(Format::MachO))
        }
        macho::FAT_MAGIC => return Err(macho::classify_fat(data)),
        _ => {}
    }
    if head == WASM_MAGIC {
        return Err(DetectorError::UnsupportedFormat(
            "WebAssembly module".to_string(),
        ));
    }
    Ok(None)
}

/// Parse a raw buffer into a `BinaryImage`. The buffer is never modified.
pub fn parse(data: &[u8]) -> Result<BinaryImage<'_>> {
    let result = match detect_format(data) {
        Ok(Some(Format::ELF)) => elf::parse(data),
        Ok(Some(Format::PE)) => pe::parse(data),
        Ok(Some(Format::MachO)) => macho::parse(data),
        Ok(None) => Err(DetectorError::malformed(0, "unrecognized magic bytes")),
        Err(e) => Err(e),
    };

    match &result {
        Ok(image) => tracing::debug!(
            format = %image.format(),
            arch = %image.arch(),
            size = data.len(),
            "container parsed"
        ),
        Err(e) => tracing::warn!(error = %e, size = data.len(), "rejected input"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(b"\x7fELF\x02\x01\x01").unwrap(),
            Some(Format::ELF)
        );
        assert_eq!(detect_format(b"MZ\x90\x00").unwrap(), Some(Format::PE));
        assert_eq!(
            detect_format(&[0xcf, 0xfa, 0xed, 0xfe]).unwrap(),
            Some(Format::MachO)
        );
        assert_eq!(
            detect_format(&[0xfe, 0xed, 0xfa, 0xce]).unwrap(),
            Some(Format::MachO)
        );
        assert_eq!(detect_format(b"#!/bin/sh").unwrap(), None);
        assert_eq!(detect_format(b"MZ").unwrap(), None);
    }

    #[test]
    fn test_unsupported_containers() {
        assert!(matches!(
            detect_format(b"\0asm\x01\0\0\0"),
            Err(DetectorError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            parse(&[0xca, 0xfe, 0xba, 0xbe, 0, 0, 0, 3]),
            Err(DetectorError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unrecognized_and_empty_input() {
        assert!(matches!(
            parse(b"not a binary at all"),
            Err(DetectorError::MalformedBinary { offset: 0, .. })
        ));
        assert!(matches!(
            parse(&[]),
            Err(DetectorError::MalformedBinary { .. })
        ));
    }

    #[test]
    fn test_parse_does_not_mutate_input() {
        let data = b"\x7fELF\x02\x01\x01\x00garbage-after-ident".to_vec();
        let copy = data.clone();
        let _ = parse(&data);
        assert_eq!(data, copy);
    }
}
