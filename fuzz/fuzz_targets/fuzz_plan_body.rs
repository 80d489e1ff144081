//! Fuzz target: migration plan parsing and validation.
//!
//! Arbitrary JSON must never panic the deserializer or `validate`, including
//! hook specs carrying arbitrary base64 playbooks.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmigrate_core::MigrationPlan;

fuzz_target!(|data: &[u8]| {
    if let Ok(plan) = serde_json::from_slice::<MigrationPlan>(data) {
        if plan.validate().is_ok() {
            assert!(!plan.virtual_machines.is_empty(), "valid plan must list VMs");
            assert!(plan.timeout_secs > 0, "valid plan must have a timeout");
        }
    }
});
