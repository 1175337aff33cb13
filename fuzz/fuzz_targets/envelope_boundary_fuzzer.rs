//! Fuzz target for envelope header boundary conditions.
//!
//! # Strategy
//!
//! - Magic bytes: valid, off-by-one, all-zeros, all-ones, random
//! - Payload size: zero, small, at-max, just-over-max, way-over-max, u32::MAX
//! - Version: valid (0x01), zero, max, random
//! - Stream id length: boundary values (0, 1, MAX)
//!
//! # Invariants
//!
//! - `payload_len > MAX_PAYLOAD_SIZE` (8MB) MUST fail decode
//! - Invalid magic bytes MUST fail decode
//! - All decode errors MUST be structured (never panic)
//! - A header built via `EnvelopeHeader::new` round-trips through `from_bytes`

#![no_main]

use arbitrary::Arbitrary;
use edgeinfer_proto::header::{EnvelopeHeader, MessageTag};
use libfuzzer_sys::fuzz_target;
use zerocopy::IntoBytes;

const MAGIC: [u8; 2] = [0xE1, 0xF0];
const MAX_PAYLOAD_SIZE: u32 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryHeader {
    magic: MagicBytes,
    version: VersionBytes,
    tag: u8,
    stream_id_len: u16,
    payload_len: PayloadLen,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 2]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionBytes {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadLen {
    Zero,
    Small(u8),
    AtMaxBoundary,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

fuzz_target!(|boundary: BoundaryHeader| {
    let payload_len_value = match boundary.payload_len {
        PayloadLen::Zero => 0,
        PayloadLen::Small(s) => u32::from(s),
        PayloadLen::AtMaxBoundary => MAX_PAYLOAD_SIZE,
        PayloadLen::JustOverMax => MAX_PAYLOAD_SIZE.saturating_add(1),
        PayloadLen::WayOverMax => MAX_PAYLOAD_SIZE.saturating_add(1_000_000),
        PayloadLen::MaxU32 => u32::MAX,
        PayloadLen::Random(r) => r,
    };

    let mut buffer = vec![0u8; EnvelopeHeader::SIZE];
    match boundary.magic {
        MagicBytes::Valid => buffer[0..2].copy_from_slice(&MAGIC),
        MagicBytes::OffByOne(offset) => {
            buffer[0..2].copy_from_slice(&MAGIC);
            let idx = (offset % 2) as usize;
            buffer[idx] = buffer[idx].wrapping_add(1);
        }
        MagicBytes::AllZeros => buffer[0..2].fill(0),
        MagicBytes::AllOnes => buffer[0..2].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..2].copy_from_slice(&bytes),
    }

    buffer[2] = match boundary.version {
        VersionBytes::Valid => 1,
        VersionBytes::Zero => 0,
        VersionBytes::Max => u8::MAX,
        VersionBytes::Random(v) => v,
    };
    buffer[3] = boundary.tag;
    buffer[4..6].copy_from_slice(&boundary.stream_id_len.to_le_bytes());
    buffer[6..10].copy_from_slice(&payload_len_value.to_le_bytes());

    match EnvelopeHeader::from_bytes(&buffer) {
        Ok(header) => {
            assert_eq!(buffer[0..2], MAGIC);
            assert!(payload_len_value <= MAX_PAYLOAD_SIZE);
            assert_eq!(header.payload_len(), payload_len_value);
            assert_eq!(header.stream_id_len(), boundary.stream_id_len);
            let _ = header.tag();
        }
        Err(_) => {}
    }

    let tag = MessageTag::from_u8(boundary.tag);
    let header = EnvelopeHeader::new(tag, boundary.stream_id_len, payload_len_value.min(1024));
    let bytes = header.as_bytes();
    assert_eq!(bytes.len(), EnvelopeHeader::SIZE);
    if let Ok(decoded) = EnvelopeHeader::from_bytes(bytes) {
        assert_eq!(decoded.tag(), tag);
        assert_eq!(decoded.stream_id_len(), boundary.stream_id_len);
    }
});
