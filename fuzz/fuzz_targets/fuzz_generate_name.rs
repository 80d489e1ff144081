//! Fuzz target: name generation.
//!
//! Whatever the base name, generated names must be valid DNS labels within
//! the length ceiling, and fresh names must never repeat.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmigrate_core::naming::validate_name;
use vmigrate_core::{NameGenerator, SessionId, MAX_NAME_LEN};

fuzz_target!(|data: &[u8]| {
    let base = String::from_utf8_lossy(data);
    let Ok(session) = SessionId::new("f00d") else {
        return;
    };
    let mut names = NameGenerator::new(session);

    let scoped = names.scoped(&base);
    assert!(scoped.len() <= MAX_NAME_LEN, "scoped name too long: {scoped}");
    assert!(validate_name(&scoped).is_ok(), "invalid scoped name: {scoped}");

    let first = names.fresh(&base);
    let second = names.fresh(&base);
    assert_ne!(first, second, "fresh names repeated");
    assert!(validate_name(&first).is_ok(), "invalid fresh name: {first}");
    assert!(second.len() <= MAX_NAME_LEN, "fresh name too long: {second}");
});
