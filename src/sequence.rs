//! Barcode sequence allocation.
//!
//! Every barcode carries a sequence number of the form `<prefix><suffix>`,
//! where the prefix is the SKU code and the suffix is an uppercase letter
//! block followed by a zero-padded three digit counter (`A001`, `ZZ999`).
//!
//! Suffixes advance by bumping the counter, and on `999` rolling the letter
//! block over as a base-26 counter (`A999 -> B001`, `Z999 -> AA001`).
//! Everything in this module is pure; persistence lives in
//! [`crate::services::batches`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Width of the numeric block of a suffix.
pub const DIGIT_WIDTH: usize = 3;

/// Stored remainders shorter than this cannot hold a letter plus a full
/// digit block and are treated as foreign records.
pub const MIN_STORED_SUFFIX_LEN: usize = DIGIT_WIDTH + 1;

const MAX_COUNTER: u16 = 999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuffixError {
    #[error("suffix '{0}' is shorter than {DIGIT_WIDTH} characters")]
    TooShort(String),
    #[error("suffix '{0}' must end in exactly {DIGIT_WIDTH} digits")]
    InvalidDigits(String),
    #[error("suffix '{0}' may only contain uppercase letters before the digits")]
    InvalidLetters(String),
}

/// The variable trailing portion of a sequence number.
///
/// Ordering follows issue order: a longer letter block always sorts after a
/// shorter one, then letters compare alphabetically, then the counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Suffix {
    letters: String,
    counter: u16,
}

impl Suffix {
    /// `A001`, the first suffix ever issued under a fresh prefix.
    pub fn first() -> Self {
        Self {
            letters: "A".to_string(),
            counter: 1,
        }
    }

    pub fn new(letters: impl Into<String>, counter: u16) -> Result<Self, SuffixError> {
        let letters = letters.into();
        if counter > MAX_COUNTER {
            return Err(SuffixError::InvalidDigits(format!("{}{}", letters, counter)));
        }
        if !letters.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(SuffixError::InvalidLetters(format!(
                "{}{:03}",
                letters, counter
            )));
        }
        Ok(Self { letters, counter })
    }

    pub fn letters(&self) -> &str {
        &self.letters
    }

    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// The suffix issued immediately after this one.
    pub fn next(&self) -> Self {
        if self.counter < MAX_COUNTER {
            return Self {
                letters: self.letters.clone(),
                counter: self.counter + 1,
            };
        }

        let mut letters = self.letters.clone().into_bytes();
        let mut carry = true;
        for letter in letters.iter_mut().rev() {
            if *letter == b'Z' {
                *letter = b'A';
            } else {
                *letter += 1;
                carry = false;
                break;
            }
        }
        if carry {
            letters.insert(0, b'A');
        }

        Self {
            // Only ASCII uppercase bytes are ever written above
            letters: letters.into_iter().map(char::from).collect(),
            counter: 1,
        }
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.letters, self.counter)
    }
}

impl FromStr for Suffix {
    type Err = SuffixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < DIGIT_WIDTH || !s.is_char_boundary(s.len() - DIGIT_WIDTH) {
            return Err(SuffixError::TooShort(s.to_string()));
        }
        let (letters, digits) = s.split_at(s.len() - DIGIT_WIDTH);
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SuffixError::InvalidDigits(s.to_string()));
        }
        if !letters.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(SuffixError::InvalidLetters(s.to_string()));
        }
        let counter = digits
            .parse::<u16>()
            .map_err(|_| SuffixError::InvalidDigits(s.to_string()))?;

        Ok(Self {
            letters: letters.to_string(),
            counter,
        })
    }
}

impl Ord for Suffix {
    fn cmp(&self, other: &Self) -> Ordering {
        self.letters
            .len()
            .cmp(&other.letters.len())
            .then_with(|| self.letters.cmp(&other.letters))
            .then_with(|| self.counter.cmp(&other.counter))
    }
}

impl PartialOrd for Suffix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// String form of [`Suffix::next`].
pub fn next_suffix(current: &str) -> Result<String, SuffixError> {
    Ok(current.parse::<Suffix>()?.next().to_string())
}

/// `quantity` consecutive suffixes, the first of which is `start` itself.
pub fn allocate(start: Suffix, quantity: usize) -> Vec<Suffix> {
    std::iter::successors(Some(start), |s| Some(s.next()))
        .take(quantity)
        .collect()
}

pub fn sequence_number(prefix: &str, suffix: &Suffix) -> String {
    format!("{}{}", prefix, suffix)
}

/// What the store says about the last suffix issued under a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatestSuffix {
    /// Nothing has been issued under the prefix yet.
    Unissued,
    /// The newest stored record does not hold a usable suffix. Carries the
    /// offending remainder so callers can report it.
    Malformed(String),
    Issued(Suffix),
}

impl LatestSuffix {
    /// Work out the resume point for `prefix` from the stored sequence
    /// numbers. Entries that do not start with `prefix` are ignored.
    ///
    /// The lexicographically greatest remainder is checked first: when it
    /// is too short to hold a suffix the prefix restarts at `A001`. Otherwise
    /// the greatest suffix in issue order wins, so `AA001` correctly beats
    /// `Z999`.
    pub fn resolve<S: AsRef<str>>(prefix: &str, sequence_numbers: &[S]) -> Self {
        let remainders: Vec<&str> = sequence_numbers
            .iter()
            .filter_map(|s| s.as_ref().strip_prefix(prefix))
            .collect();

        let Some(lexical_max) = remainders.iter().copied().max() else {
            return Self::Unissued;
        };
        if lexical_max.chars().count() < MIN_STORED_SUFFIX_LEN {
            return Self::Malformed(lexical_max.to_string());
        }

        remainders
            .iter()
            .filter(|r| r.len() >= MIN_STORED_SUFFIX_LEN)
            .filter_map(|r| r.parse::<Suffix>().ok())
            .max()
            .map(Self::Issued)
            .unwrap_or_else(|| Self::Malformed(lexical_max.to_string()))
    }

    /// First suffix of the next allocation under this prefix.
    pub fn next_start(&self) -> Suffix {
        match self {
            Self::Issued(last) => last.next(),
            Self::Unissued | Self::Malformed(_) => Suffix::first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn suffix(s: &str) -> Suffix {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("A001", "A002")]
    #[case("A998", "A999")]
    #[case("A999", "B001")]
    #[case("Z999", "AA001")]
    #[case("AZ999", "BA001")]
    #[case("ZZ999", "AAA001")]
    #[case("999", "A001")]
    #[case("042", "043")]
    fn next_suffix_follows_carry_rules(#[case] current: &str, #[case] expected: &str) {
        assert_eq!(next_suffix(current).unwrap(), expected);
    }

    #[test]
    fn first_is_a001() {
        assert_eq!(Suffix::first().to_string(), "A001");
    }

    #[test]
    fn parse_rejects_malformed_input() {
        assert_eq!(
            "12".parse::<Suffix>(),
            Err(SuffixError::TooShort("12".into()))
        );
        assert_eq!(
            "A12B".parse::<Suffix>(),
            Err(SuffixError::InvalidDigits("A12B".into()))
        );
        assert_eq!(
            "a001".parse::<Suffix>(),
            Err(SuffixError::InvalidLetters("a001".into()))
        );
        assert_eq!(
            "A-001".parse::<Suffix>(),
            Err(SuffixError::InvalidLetters("A-001".into()))
        );
        assert!("é01".parse::<Suffix>().is_err());
    }

    #[test]
    fn new_validates_parts() {
        assert!(Suffix::new("AB", 12).is_ok());
        assert!(Suffix::new("AB", 1000).is_err());
        assert!(Suffix::new("Ab", 1).is_err());
    }

    #[test]
    fn ordering_follows_issue_order_not_string_order() {
        // "Z999" > "AA001" as plain strings
        assert!("Z999" > "AA001");
        assert!(suffix("Z999") < suffix("AA001"));
        assert!(suffix("A999") < suffix("B001"));
        assert!(suffix("B001") < suffix("B002"));
        assert!(suffix("ZZ999") < suffix("AAA001"));
    }

    #[test]
    fn allocate_starts_with_given_suffix() {
        let run: Vec<String> = allocate(suffix("A998"), 4)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(run, vec!["A998", "A999", "B001", "B002"]);
        assert!(allocate(Suffix::first(), 0).is_empty());
    }

    #[test]
    fn resolve_without_history_is_unissued() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(LatestSuffix::resolve("X", &empty), LatestSuffix::Unissued);
        assert_eq!(
            LatestSuffix::resolve("X", &["YA001"]),
            LatestSuffix::Unissued
        );
        assert_eq!(LatestSuffix::Unissued.next_start(), Suffix::first());
    }

    #[test]
    fn resolve_continues_after_latest() {
        let latest = LatestSuffix::resolve("X", &["XA001", "XA003", "XA002"]);
        assert_eq!(latest, LatestSuffix::Issued(suffix("A003")));
        assert_eq!(latest.next_start().to_string(), "A004");
    }

    #[test]
    fn resolve_prefers_longer_letter_blocks() {
        let latest = LatestSuffix::resolve("SKU", &["SKUZ999", "SKUAA001"]);
        assert_eq!(latest.next_start().to_string(), "AA002");
    }

    #[test]
    fn short_lexical_max_restarts_at_first() {
        let latest = LatestSuffix::resolve("X", &["X12"]);
        assert_eq!(latest, LatestSuffix::Malformed("12".into()));
        assert_eq!(latest.next_start(), Suffix::first());

        // "Xz1" sorts after "XA001", so the guard fires even with valid history
        let latest = LatestSuffix::resolve("X", &["XA001", "Xz1"]);
        assert_eq!(latest, LatestSuffix::Malformed("z1".into()));
    }

    #[test]
    fn unparseable_long_remainders_are_skipped() {
        let latest = LatestSuffix::resolve("X", &["XA005", "X-LEGACY"]);
        // "-LEGACY" sorts before "A005" and is long enough to pass the guard
        assert_eq!(latest, LatestSuffix::Issued(suffix("A005")));

        let latest = LatestSuffix::resolve("X", &["Xlegacy"]);
        assert_eq!(latest, LatestSuffix::Malformed("legacy".into()));
    }
}
