//! Fuzz harness for `record::parse_row`.
//!
//! Any line either fails with a `RowError` or yields a record whose canonical
//! row parses back to the same record.

#![no_main]
use libfuzzer_sys::fuzz_target;
use tally_core::record::{ParsedRow, parse_row};

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(ParsedRow::Record(record)) = parse_row(line) {
        assert!(record.duration_seconds() > 0);
        assert!(record.value().is_finite() && record.value() >= 0.0);
        assert!(record.hour() < 24);

        let row = record.to_row();
        match parse_row(&row) {
            Ok(ParsedRow::Record(again)) => assert_eq!(again.key(), record.key()),
            other => panic!("canonical row {row:?} did not parse back: {other:?}"),
        }
    }
});
