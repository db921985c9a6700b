//! Report assembly and serialization.
//!
//! A `Report` holds exactly one verdict per registered feature, keyed by
//! `Feature` in a `BTreeMap` so that serialization order never depends on
//! the order in which rules finished.

use crate::error::{DetectorError, Result};
use crate::image::{Arch, BinaryImage, Endianness, Format, ImageKind};
use crate::rules::{Feature, FeatureVerdict};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identity and linkage facts about the analyzed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub format: Format,
    pub arch: Arch,
    pub bits: u8,
    pub endianness: Endianness,
    pub kind: ImageKind,
    pub file_size: u64,
    pub sha256: String,
    pub symbol_count: usize,
    pub libraries: Vec<String>,
    pub rpaths: Vec<String>,
    pub runpaths: Vec<String>,
}

impl ImageSummary {
    pub fn from_image(image: &BinaryImage<'_>) -> Self {
        let header = image.header();
        Self {
            format: header.format,
            arch: header.arch,
            bits: header.bits,
            endianness: header.endianness,
            kind: header.kind,
            file_size: image.data().len() as u64,
            sha256: sha256_hex(image.data()),
            symbol_count: image.symbols().len(),
            libraries: image.libraries(),
            rpaths: image.rpaths(),
            runpaths: image.runpaths(),
        }
    }
}

/// SHA-256 of the data as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Final result of analyzing one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub summary: ImageSummary,
    pub features: BTreeMap<Feature, FeatureVerdict>,
}

impl Report {
    pub fn verdict(&self, feature: Feature) -> Option<&FeatureVerdict> {
        self.features.get(&feature)
    }

    /// Whether the feature was detected; unregistered features read as absent.
    pub fn is_present(&self, feature: Feature) -> bool {
        self.verdict(feature).is_some_and(|v| v.present)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(
            f,
            "{} {} {}-bit {:?}, {} bytes, sha256 {}",
            s.format, s.arch, s.bits, s.kind, s.file_size, s.sha256
        )?;
        for (feature, verdict) in &self.features {
            let mark = if verdict.present { "yes" } else { "no" };
            write!(f, "  {:<20} {:<4}", feature.name(), mark)?;
            if let Some(first) = verdict.evidence.first() {
                write!(f, " {}", first)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Collects verdicts for a fixed set of features and produces a `Report`.
#[derive(Debug)]
pub struct ReportBuilder {
    features: Vec<Feature>,
    summary: Option<ImageSummary>,
    verdicts: BTreeMap<Feature, FeatureVerdict>,
}

impl ReportBuilder {
    /// `features` is the registry's feature list; the report has one entry for each.
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            features,
            summary: None,
            verdicts: BTreeMap::new(),
        }
    }

    pub fn image(mut self, image: &BinaryImage<'_>) -> Self {
        self.summary = Some(ImageSummary::from_image(image));
        self
    }

    /// Record a verdict. Verdicts for unregistered features are dropped, and
    /// the first verdict for a feature wins.
    pub fn verdict(mut self, verdict: FeatureVerdict) -> Self {
        let feature = verdict.feature;
        if !self.features.contains(&feature) {
            tracing::warn!(%feature, "dropping verdict for unregistered feature");
            return self;
        }
        if self.verdicts.contains_key(&feature) {
            tracing::warn!(%feature, "ignoring repeated verdict");
            return self;
        }
        self.verdicts.insert(feature, verdict);
        self
    }

    pub fn verdicts(self, verdicts: impl IntoIterator<Item = FeatureVerdict>) -> Self {
        verdicts.into_iter().fold(self, Self::verdict)
    }

    /// Fails with `IncompleteAnalysis` when no parsed image was supplied.
    pub fn build(self) -> Result<Report> {
        let summary = self.summary.ok_or_else(|| {
            DetectorError::IncompleteAnalysis("no parsed image supplied to the report".to_string())
        })?;
        let mut verdicts = self.verdicts;
        for feature in self.features {
            verdicts
                .entry(feature)
                .or_insert_with(|| FeatureVerdict::insufficient_signal(feature));
        }
        Ok(Report {
            summary,
            features: verdicts,
        })
    }
}
