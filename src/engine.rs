//! Rule evaluation.
//!
//! Rules share nothing but the immutable image and scan limits, so the
//! engine runs them on the rayon pool when parallelism is enabled. Results
//! are keyed by feature in the report, which makes the outcome independent
//! of completion order.

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::image::BinaryImage;
use crate::report::{Report, ReportBuilder};
use crate::rules::{FeatureRule, FeatureVerdict, RuleRegistry};
use rayon::prelude::*;
use std::time::Instant;

fn run_rule(
    rule: &dyn FeatureRule,
    image: &BinaryImage<'_>,
    config: &DetectorConfig,
) -> FeatureVerdict {
    let feature = rule.feature();
    let verdict = rule.evaluate(image, &config.scan);
    if verdict.feature != feature {
        tracing::warn!(
            rule = %feature,
            produced = %verdict.feature,
            "rule produced a verdict for another feature, discarding it"
        );
        return FeatureVerdict::insufficient_signal(feature);
    }
    tracing::trace!(%feature, present = verdict.present, "rule evaluated");
    verdict
}

/// Evaluate every registered rule, returning verdicts in registry order.
pub fn evaluate(
    registry: &RuleRegistry,
    image: &BinaryImage<'_>,
    config: &DetectorConfig,
) -> Vec<FeatureVerdict> {
    let rules = registry.rules();
    if config.parallel {
        rules
            .par_iter()
            .map(|rule| run_rule(rule.as_ref(), image, config))
            .collect()
    } else {
        rules
            .iter()
            .map(|rule| run_rule(rule.as_ref(), image, config))
            .collect()
    }
}

/// Evaluate the registry against a parsed image and assemble the report.
pub fn run(
    registry: &RuleRegistry,
    image: &BinaryImage<'_>,
    config: &DetectorConfig,
) -> Result<Report> {
    let span = tracing::debug_span!("evaluate", format = %image.format(), rules = registry.len());
    let _enter = span.enter();

    let start = Instant::now();
    let verdicts = evaluate(registry, image, config);
    let report = ReportBuilder::new(registry.features())
        .image(image)
        .verdicts(verdicts)
        .build()?;

    let present = report.features.values().filter(|v| v.present).count();
    tracing::info!(
        format = %image.format(),
        arch = %image.arch(),
        features = report.features.len(),
        present,
        elapsed_us = start.elapsed().as_micros() as u64,
        "analysis complete"
    );
    Ok(report)
}
