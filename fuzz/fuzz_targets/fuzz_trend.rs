//! Fuzz target: glucose trend calculator
//!
//! Builds an irregular CGM stream from the input (values and gaps taken
//! two bytes at a time) and verifies:
//! - No panics, including the extended plateau/parabola fit
//! - The reported glucose is always a valid reading
//! - Every status figure is finite
//!
//! cargo fuzz run fuzz_trend

#![no_main]

use apscore::glucose::{GlucoseSample, calculate, calculate_extended};
use libfuzzer_sys::fuzz_target;

const T0: i64 = 1_700_000_000_000;

fuzz_target!(|data: &[u8]| {
    let mut ts = T0;
    let samples: Vec<GlucoseSample> = data
        .chunks_exact(2)
        .map(|pair| {
            let sample = GlucoseSample::new(f64::from(pair[0]) * 2.0, ts);
            // 0..=15 minute gaps, duplicates allowed.
            ts -= i64::from(pair[1] % 16) * 60_000;
            sample
        })
        .collect();

    let Some(status) = calculate(&samples) else {
        assert!(samples.iter().all(|s| !s.is_valid()));
        return;
    };
    assert!(status.glucose >= 39.0);

    let extended = calculate_extended(&samples).expect("same input, same validity");
    assert_eq!(extended.base, status);
    for v in [
        extended.dura_isf_minutes,
        extended.dura_isf_average,
        extended.bg_acceleration,
        extended.delta_next,
        extended.correlation,
    ] {
        assert!(v.is_finite(), "non-finite figure in {extended:?}");
    }
});
