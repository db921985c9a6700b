//! Feature heuristics.
//!
//! Each hardening feature has exactly one `FeatureRule`. Rules are pure
//! functions of a parsed image and the scan limits: they hold no mutable
//! state, so the engine may evaluate them in any order or in parallel.

pub mod apple;
pub mod canary;
pub mod fortify;
pub mod instrumentation;
pub mod memory;
pub mod patterns;
pub mod windows;

#[cfg(test)]
pub(crate) mod testing;

use crate::config::ScanConfig;
use crate::error::{DetectorError, Result};
use crate::image::{BinaryImage, Format};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Security features the detector reports on.
///
/// Ordering follows declaration order, which is also the default registry
/// order and therefore the order features appear in a report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Canary,
    StackClash,
    Nx,
    NxHeap,
    Pie,
    HighEntropyVa,
    Relro,
    Fortify,
    ClangCfi,
    SafeStack,
    ControlFlowGuard,
    ReturnFlowGuard,
    SafeSeh,
    Seh,
    ForceIntegrity,
    Isolation,
    Clr,
    CodeSignature,
    Encrypted,
    Restrict,
    Arc,
}

impl Feature {
    pub const ALL: [Feature; 21] = [
        Feature::Canary,
        Feature::StackClash,
        Feature::Nx,
        Feature::NxHeap,
        Feature::Pie,
        Feature::HighEntropyVa,
        Feature::Relro,
        Feature::Fortify,
        Feature::ClangCfi,
        Feature::SafeStack,
        Feature::ControlFlowGuard,
        Feature::ReturnFlowGuard,
        Feature::SafeSeh,
        Feature::Seh,
        Feature::ForceIntegrity,
        Feature::Isolation,
        Feature::Clr,
        Feature::CodeSignature,
        Feature::Encrypted,
        Feature::Restrict,
        Feature::Arc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Canary => "canary",
            Feature::StackClash => "stack_clash",
            Feature::Nx => "nx",
            Feature::NxHeap => "nx_heap",
            Feature::Pie => "pie",
            Feature::HighEntropyVa => "high_entropy_va",
            Feature::Relro => "relro",
            Feature::Fortify => "fortify",
            Feature::ClangCfi => "clang_cfi",
            Feature::SafeStack => "safe_stack",
            Feature::ControlFlowGuard => "control_flow_guard",
            Feature::ReturnFlowGuard => "return_flow_guard",
            Feature::SafeSeh => "safe_seh",
            Feature::Seh => "seh",
            Feature::ForceIntegrity => "force_integrity",
            Feature::Isolation => "isolation",
            Feature::Clr => "clr",
            Feature::CodeSignature => "code_signature",
            Feature::Encrypted => "encrypted",
            Feature::Restrict => "restrict",
            Feature::Arc => "arc",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of evaluating one rule against one image.
///
/// Serialized without the feature name, which is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureVerdict {
    #[serde(skip)]
    pub feature: Feature,
    pub present: bool,
    pub evidence: Vec<String>,
}

impl FeatureVerdict {
    pub fn new(feature: Feature, present: bool, evidence: Vec<String>) -> Self {
        Self {
            feature,
            present,
            evidence,
        }
    }

    pub fn present(feature: Feature, evidence: impl Into<String>) -> Self {
        Self::new(feature, true, vec![evidence.into()])
    }

    pub fn absent(feature: Feature, evidence: impl Into<String>) -> Self {
        Self::new(feature, false, vec![evidence.into()])
    }

    /// Verdict for a feature that has no meaning in the image's format.
    pub fn not_applicable(feature: Feature, format: Format) -> Self {
        Self::absent(feature, format!("not applicable to {} images", format))
    }

    /// Verdict substituted when no rule produced a result.
    pub fn insufficient_signal(feature: Feature) -> Self {
        Self::absent(feature, "insufficient signal: no rule produced a verdict")
    }
}

/// A detection rule for a single feature.
pub trait FeatureRule: Send + Sync {
    fn feature(&self) -> Feature;

    fn evaluate(&self, image: &BinaryImage<'_>, scan: &ScanConfig) -> FeatureVerdict;
}

/// Ordered set of rules with at most one rule per feature.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn FeatureRule>>,
    seen: HashSet<Feature>,
}

impl RuleRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in rule for every `Feature`, in `Feature` order.
    pub fn with_defaults() -> Self {
        let rules: Vec<Box<dyn FeatureRule>> = vec![
            Box::new(canary::CanaryRule),
            Box::new(instrumentation::StackClashRule),
            Box::new(memory::NxRule),
            Box::new(apple::NxHeapRule),
            Box::new(memory::PieRule),
            Box::new(windows::HighEntropyVaRule),
            Box::new(memory::RelroRule),
            Box::new(fortify::FortifyRule),
            Box::new(instrumentation::ClangCfiRule),
            Box::new(instrumentation::SafeStackRule),
            Box::new(windows::ControlFlowGuardRule),
            Box::new(windows::ReturnFlowGuardRule),
            Box::new(windows::SafeSehRule),
            Box::new(windows::SehRule),
            Box::new(windows::ForceIntegrityRule),
            Box::new(windows::IsolationRule),
            Box::new(windows::ClrRule),
            Box::new(apple::CodeSignatureRule),
            Box::new(apple::EncryptedRule),
            Box::new(apple::RestrictRule),
            Box::new(apple::ArcRule),
        ];
        let mut registry = Self::new();
        for rule in rules {
            // Built-ins cover each feature once.
            if let Err(e) = registry.register_boxed(rule) {
                tracing::error!(error = %e, "built-in rule table is inconsistent");
            }
        }
        registry
    }

    pub fn register<R: FeatureRule + 'static>(&mut self, rule: R) -> Result<()> {
        self.register_boxed(Box::new(rule))
    }

    pub fn register_boxed(&mut self, rule: Box<dyn FeatureRule>) -> Result<()> {
        let feature = rule.feature();
        if !self.seen.insert(feature) {
            return Err(DetectorError::DuplicateRule(feature));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[Box<dyn FeatureRule>] {
        &self.rules
    }

    /// Registered features in registration order.
    pub fn features(&self) -> Vec<Feature> {
        self.rules.iter().map(|r| r.feature()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("features", &self.features())
            .finish()
    }
}
