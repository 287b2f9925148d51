//! Fuzz target for `Frame::decode`.
//!
//! Arbitrary byte sequences must never panic the frame parser: truncated
//! headers, bad magic, oversized payload claims, and length mismatches all
//! return errors.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::decode(data);
});
