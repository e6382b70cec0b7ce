//! Property-based tests for the barcode sequence allocator.
//!
//! These check the ordering and carry invariants across arbitrary suffixes
//! rather than the handful of hand-picked boundaries in the unit tests.

use batchtrace_api::sequence::{allocate, next_suffix, LatestSuffix, Suffix};
use proptest::prelude::*;

fn suffix_strategy() -> impl Strategy<Value = Suffix> {
    ("[A-Z]{1,4}", 1u16..=999).prop_map(|(letters, counter)| {
        Suffix::new(letters, counter).expect("strategy only yields valid parts")
    })
}

fn prefix_strategy() -> impl Strategy<Value = String> {
    "[A-Z0-9]{1,10}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn next_is_strictly_greater(s in suffix_strategy()) {
        let next = s.next();
        prop_assert!(next > s, "{} did not advance past {}", next, s);
    }

    #[test]
    fn display_parses_back(s in suffix_strategy()) {
        let text = s.to_string();
        prop_assert_eq!(text.parse::<Suffix>().ok(), Some(s));
    }

    #[test]
    fn counter_rollover_resets_to_001(letters in "[A-Z]{1,4}") {
        let next = Suffix::new(letters.clone(), 999).unwrap().next();
        prop_assert_eq!(next.counter(), 1);
        prop_assert!(next.letters().len() >= letters.len());
    }

    #[test]
    fn all_z_blocks_grow_by_one_letter(width in 1usize..6) {
        let letters = "Z".repeat(width);
        let next = next_suffix(&format!("{}999", letters)).unwrap();
        prop_assert_eq!(next, format!("{}001", "A".repeat(width + 1)));
    }

    #[test]
    fn non_rollover_keeps_letters(s in suffix_strategy()) {
        prop_assume!(s.counter() < 999);
        let next = s.next();
        prop_assert_eq!(next.letters(), s.letters());
        prop_assert_eq!(next.counter(), s.counter() + 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn allocation_is_contiguous_and_unique(start in suffix_strategy(), quantity in 0usize..2500) {
        let run = allocate(start.clone(), quantity);
        prop_assert_eq!(run.len(), quantity);
        if let Some(first) = run.first() {
            prop_assert_eq!(first, &start);
        }
        for pair in run.windows(2) {
            prop_assert_eq!(&pair[0].next(), &pair[1]);
            prop_assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn resume_after_any_history_never_reissues(
        prefix in prefix_strategy(),
        start in suffix_strategy(),
        quantity in 1usize..200,
    ) {
        let issued: Vec<String> = allocate(start, quantity)
            .iter()
            .map(|s| format!("{}{}", prefix, s))
            .collect();

        let resume = LatestSuffix::resolve(&prefix, &issued).next_start();
        let resumed = format!("{}{}", prefix, resume);
        prop_assert!(!issued.contains(&resumed), "{} was already issued", resumed);
    }

    #[test]
    fn second_allocation_follows_first(prefix in prefix_strategy(), a in 1usize..300, b in 1usize..300) {
        let first: Vec<String> = allocate(Suffix::first(), a)
            .iter()
            .map(|s| format!("{}{}", prefix, s))
            .collect();
        let start = LatestSuffix::resolve(&prefix, &first).next_start();
        let second = allocate(start, b);

        let expected = allocate(Suffix::first(), a + b);
        let combined: Vec<String> = first
            .iter()
            .cloned()
            .chain(second.iter().map(|s| format!("{}{}", prefix, s)))
            .collect();
        let expected: Vec<String> = expected.iter().map(|s| format!("{}{}", prefix, s)).collect();
        prop_assert_eq!(combined, expected);
    }
}
