//! Fuzz target for stack file loading and planning.
//!
//! Arbitrary YAML must either be rejected with an error or produce a
//! blueprint whose graph orders every unit exactly once.

#![no_main]

use eksform::planner::Planner;
use eksform::stack::StackConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(content) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(stack) = StackConfig::from_yaml_str(content) else {
        return;
    };
    let Ok(blueprint) = Planner::build(&stack) else {
        return;
    };

    let order = blueprint.graph.creation_order().expect("validated graph must order");
    assert_eq!(order.len(), blueprint.units.len());
});
