//! Fuzz target: remote phase extraction from Migration objects.
//!
//! Arbitrary status JSON must always map to some phase without panicking.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmigrate_core::RemotePhase;
use vmigrate_executor::migration::remote_phase;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = serde_json::from_slice::<serde_json::Value>(data) {
        let _ = remote_phase(&object);
    }
    if let Ok(raw) = std::str::from_utf8(data) {
        let phase = raw.parse::<RemotePhase>().unwrap_or_else(|never| match never {});
        let _ = phase.is_terminal();
    }
});
