#![no_main]

use batchtrace_api::sequence::Suffix;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(suffix) = s.parse::<Suffix>() {
        // Anything accepted must print back to the same text
        assert_eq!(suffix.to_string(), s);

        let next = suffix.next();
        assert!(next > suffix);
        assert_eq!(next.to_string().parse::<Suffix>().ok(), Some(next));
    }
});
