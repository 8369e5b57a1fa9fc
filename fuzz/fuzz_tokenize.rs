//! Fuzz target for the tokenizer and parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_tokenize
//!
//! Any input must either tokenize or yield a `SyntaxError` whose position
//! lies within the input, and the same holds for a full parse.

#![no_main]

use condwatch_core::parser::Expression;
use condwatch_core::token;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };

    match token::tokenize(source) {
        Ok(tokens) => {
            for t in &tokens {
                assert!(t.span.end <= source.len());
            }
        }
        Err(err) => assert!(err.position <= source.len()),
    }

    if let Err(err) = Expression::parse(source) {
        assert!(err.position <= source.len());
    }
});
