//! Fuzz target for `Payload::from_frame`.
//!
//! Pairs arbitrary payload bytes with every opcode to exercise CBOR
//! deserialization, including type confusion (bytes valid for a different
//! opcode's payload). Malformed input must return an error, never panic or
//! over-allocate from claimed lengths.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_proto::{Frame, FrameHeader, Opcode, Payload};

fuzz_target!(|data: &[u8]| {
    let opcodes = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Goodbye,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::Send,
        Opcode::ReadReceipt,
        Opcode::Typing,
        Opcode::StatusQuery,
        Opcode::History,
        Opcode::MessageReceived,
        Opcode::SendAck,
        Opcode::UnreadCount,
        Opcode::Presence,
        Opcode::StatusSnapshot,
        Opcode::MessagesRead,
        Opcode::HistoryReply,
        Opcode::Reject,
    ];

    for opcode in opcodes {
        let frame = Frame::new(FrameHeader::new(opcode), Bytes::copy_from_slice(data));
        let _ = Payload::from_frame(frame);
    }
});
