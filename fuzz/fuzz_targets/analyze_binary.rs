#![no_main]
use hardscan::{Detector, DetectorConfig};
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static DETECTOR: Lazy<Detector> = Lazy::new(|| Detector::new(DetectorConfig::sequential()));

fuzz_target!(|data: &[u8]| {
    if let Ok(report) = DETECTOR.analyze(data) {
        assert_eq!(report.features.len(), DETECTOR.registry().len());
    }
});
