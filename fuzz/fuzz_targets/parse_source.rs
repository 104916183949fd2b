//! Fuzz harness for whole-source parsing and aggregation.

#![no_main]
use libfuzzer_sys::fuzz_target;
use tally_core::aggregate::HOURS_PER_DAY;
use tally_core::record::parse_source;
use tally_core::{FilterState, aggregate};

fuzz_target!(|data: &[u8]| {
    let content = String::from_utf8_lossy(data);
    let Ok(records) = parse_source("fuzz.csv", &content) else {
        return;
    };

    for filter in [FilterState::default(), FilterState::trailing(3)] {
        let result = aggregate(records.iter().copied(), &filter);
        assert_eq!(result.hourly_profile.len(), HOURS_PER_DAY);
        assert!(result.total_count() <= records.len() as u64);
        assert_eq!(result.hourly_profile.iter().sum::<u64>(), result.total_count());
    }
});
