//! Configuration for the detector.
//!
//! All settings have defaults, and partial JSON documents fill in the rest,
//! so collaborators only spell out what they want to change.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Master configuration for a `Detector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Evaluate rules on the rayon thread pool (default: true).
    pub parallel: bool,
    /// Byte-pattern scanning limits.
    pub scan: ScanConfig,
    /// File loading limits.
    pub io: IoLimits,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            scan: ScanConfig::default(),
            io: IoLimits::default(),
        }
    }
}

impl DetectorConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}

/// Limits for byte-pattern scanning of executable sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum bytes of executable sections scanned (default: 16777216 = 16MB).
    pub max_code_bytes: usize,
    /// Bytes after a guard check within which a `ret` must appear (default: 64).
    pub epilogue_window: usize,
    /// Maximum check sites cited in evidence (default: 8).
    pub max_evidence_sites: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: 16 * 1024 * 1024, // 16MB
            epilogue_window: 64,
            max_evidence_sites: 8,
        }
    }
}

/// Limits applied when loading a binary from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoLimits {
    /// Maximum file size to process (default: 268435456 = 256MB).
    pub max_file_size: u64,
    /// Memory-map files instead of reading them into memory (default: true).
    pub use_mmap: bool,
}

impl Default for IoLimits {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024 * 1024, // 256MB
            use_mmap: true,
        }
    }
}
