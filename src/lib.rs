//! hardscan: detect hardening features in compiled binaries.
//!
//! Pipeline: `formats` parses an ELF, PE or Mach-O buffer into a
//! `BinaryImage`, `engine` evaluates one `FeatureRule` per `Feature`
//! against it, and `report` collects the verdicts into a `Report`.
//!
//! ```no_run
//! let bytes = std::fs::read("/bin/ls").unwrap();
//! let report = hardscan::analyze(&bytes).unwrap();
//! println!("{}", report.to_json_pretty().unwrap());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod formats;
pub mod image;
pub mod io;
pub mod logging;
pub mod report;
pub mod rules;
pub mod timeout;

pub use config::{DetectorConfig, IoLimits, ScanConfig};
pub use error::{DetectorError, Result};
pub use image::{Arch, BinaryImage, Format};
pub use report::{ImageSummary, Report, ReportBuilder};
pub use rules::{Feature, FeatureRule, FeatureVerdict, RuleRegistry};

use std::path::Path;

/// Configured rule set ready to analyze binaries.
///
/// A `Detector` holds no per-run state; one instance can serve any number
/// of analyses, including concurrent ones.
#[derive(Debug)]
pub struct Detector {
    config: DetectorConfig,
    registry: RuleRegistry,
}

impl Default for Detector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl Detector {
    /// Detector with the built-in rule for every feature.
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_registry(config, RuleRegistry::with_defaults())
    }

    pub fn with_registry(config: DetectorConfig, registry: RuleRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// Parse without evaluating any rules.
    pub fn parse<'a>(&self, data: &'a [u8]) -> Result<BinaryImage<'a>> {
        formats::parse(data)
    }

    pub fn analyze(&self, data: &[u8]) -> Result<Report> {
        let image = self.parse(data)?;
        engine::run(&self.registry, &image, &self.config)
    }

    /// Load a file within the configured I/O limits and analyze it.
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<Report> {
        let path = path.as_ref();
        let span = tracing::info_span!("analyze_file", path = %path.display());
        let _enter = span.enter();
        let loaded = io::load_binary(path, &self.config.io)?;
        self.analyze(&loaded)
    }
}

/// Analyze a buffer with the default configuration.
pub fn analyze(data: &[u8]) -> Result<Report> {
    Detector::default().analyze(data)
}
