//! Fuzz target for `-e key=value` overrides.
//!
//! Overrides are applied to the default stack; malformed keys and values
//! must surface as errors, never panics.

#![no_main]

use arbitrary::Arbitrary;
use eksform::stack::StackConfig;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzOverrides {
    overrides: Vec<String>,
}

fuzz_target!(|input: FuzzOverrides| {
    // `@path` reads from disk
    let overrides: Vec<String> = input
        .overrides
        .into_iter()
        .filter(|o| !o.starts_with('@'))
        .take(16)
        .collect();

    let _ = StackConfig::default().apply_overrides(&overrides);
});
