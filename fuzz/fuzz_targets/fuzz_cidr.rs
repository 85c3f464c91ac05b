//! Fuzz target for IPv4 CIDR parsing and subdivision.
//!
//! Any string that parses must print back to a block that parses to the same
//! value, and every child block must lie inside its parent.

#![no_main]

use arbitrary::Arbitrary;
use eksform::network::Ipv4Cidr;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FuzzCidr {
    text: String,
    new_bits: u8,
    index: u32,
}

fuzz_target!(|input: FuzzCidr| {
    let Ok(cidr) = input.text.parse::<Ipv4Cidr>() else {
        return;
    };

    let reparsed: Ipv4Cidr = cidr.to_string().parse().expect("display output must parse");
    assert_eq!(reparsed, cidr);

    // Keep the child count small enough to enumerate
    let new_bits = input.new_bits % 9;
    if let Ok(children) = cidr.subdivide(new_bits) {
        assert_eq!(children.len(), 1usize << new_bits);
        for child in &children {
            assert!(cidr.contains_cidr(child));
        }
    }

    if let Ok(child) = cidr.nth_subnet(input.new_bits % 33, input.index) {
        assert!(cidr.contains_cidr(&child));
    }
});
