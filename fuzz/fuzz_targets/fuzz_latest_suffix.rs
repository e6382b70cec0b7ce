#![no_main]

use arbitrary::Arbitrary;
use batchtrace_api::sequence::{LatestSuffix, Suffix};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct StoredSequences {
    prefix: String,
    sequence_numbers: Vec<String>,
}

fuzz_target!(|input: StoredSequences| {
    let latest = LatestSuffix::resolve(&input.prefix, &input.sequence_numbers);
    let start = latest.next_start();

    match &latest {
        LatestSuffix::Issued(found) => {
            let rendered = format!("{}{}", input.prefix, found);
            assert!(input.sequence_numbers.contains(&rendered));
            assert!(start > *found);
        }
        LatestSuffix::Unissued | LatestSuffix::Malformed(_) => {
            assert_eq!(start, Suffix::first());
        }
    }
});
