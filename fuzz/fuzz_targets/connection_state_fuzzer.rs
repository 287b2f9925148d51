//! Fuzz target for the connection lifecycle state machine.
//!
//! Drives arbitrary event interleavings (establish, frames, decode
//! failures, time jumps) through `Connection`. The machine must never
//! panic, and a connection that reports `Closed` must stay closed.

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{Connection, ConnectionConfig, ConnectionState};
use parley_proto::{Frame, FrameHeader, Opcode};

#[derive(Debug, Arbitrary)]
enum Event {
    Establish { session_id: u64 },
    FrameOk { advance_ms: u16 },
    DecodeFailure { advance_ms: u16 },
    SessionFrame { opcode_index: u8, advance_ms: u16 },
    Tick { advance_ms: u32 },
    Close,
}

fuzz_target!(|events: Vec<Event>| {
    let start = Instant::now();
    let mut now = start;
    let mut conn = Connection::new(now, ConnectionConfig::default());

    for event in events {
        match event {
            Event::Establish { session_id } => {
                let _ = conn.establish(session_id, now);
            }
            Event::FrameOk { advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                conn.mark_frame_ok(now);
            }
            Event::DecodeFailure { advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                let _ = conn.record_decode_failure(now);
            }
            Event::SessionFrame { opcode_index, advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                let opcode = match opcode_index % 3 {
                    0 => Opcode::Ping,
                    1 => Opcode::Pong,
                    _ => Opcode::Goodbye,
                };
                let frame = Frame::new(FrameHeader::new(opcode), Vec::new());
                let _ = conn.handle_session_frame(&frame, now);
            }
            Event::Tick { advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                let _ = conn.tick(now);
            }
            Event::Close => {
                conn.close();
            }
        }

        if conn.state() == ConnectionState::Closed {
            // Closed is terminal: further ticks must produce no actions
            assert!(conn.tick(now).is_empty());
            break;
        }
    }
});
