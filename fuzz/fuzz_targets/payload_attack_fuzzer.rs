//! Fuzz target for CBOR payload decode attacks against `EnvelopeBody`.
//!
//! # Strategy
//!
//! - Deeply nested: arrays/maps nested to arbitrary depth (stack overflow)
//! - Huge lengths: CBOR claiming massive byte/string/array lengths (memory)
//! - Random bytes: completely arbitrary CBOR data against every tag
//! - Type confusion: bytes encoded for one variant, decoded against another tag
//! - Duplicate keys: CBOR maps with repeated key names
//!
//! # Invariants
//!
//! - Decoding never panics, regardless of tag or bytes
//! - A tag/bytes pair that doesn't match returns `CodecError::PayloadDecode`,
//!   never a misinterpreted value of the wrong variant
//! - `MessageTag::Unknown` always fails with `CodecError::BadMessage`

#![no_main]

use arbitrary::Arbitrary;
use edgeinfer_proto::header::MessageTag;
use edgeinfer_proto::payload::EnvelopeBody;
use libfuzzer_sys::fuzz_target;

const ALL_TAGS: [MessageTag; 9] = [
    MessageTag::Unknown,
    MessageTag::Init,
    MessageTag::InitOk,
    MessageTag::WindowUpdate,
    MessageTag::Frame,
    MessageTag::Result,
    MessageTag::Heartbeat,
    MessageTag::Error,
    MessageTag::End,
];

#[derive(Debug, Clone, Arbitrary)]
enum PayloadAttack {
    DeeplyNested { depth: u8, shape: NestedShape },
    HugeLength { claimed_len_exponent: u8 },
    RandomBytes { bytes: Vec<u8> },
    TypeConfusion { source_tag_index: u8, target_tag_index: u8 },
    DuplicateKeys { count: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
enum NestedShape {
    Array,
    Map,
    Bytes,
    String,
}

fuzz_target!(|attack: PayloadAttack| {
    match attack {
        PayloadAttack::DeeplyNested { depth, shape } => {
            let bytes = nested_cbor((depth % 50) as usize, &shape);
            for tag in ALL_TAGS {
                let _ = EnvelopeBody::decode(tag, &bytes);
            }
        }

        PayloadAttack::HugeLength { claimed_len_exponent } => {
            let exponent = (claimed_len_exponent % 21) as u32;
            let claimed = if exponent < 20 { 1u32 << exponent } else { u32::MAX };
            for bytes in [huge_byte_string(claimed), huge_text_string(claimed), huge_array(claimed)] {
                for tag in ALL_TAGS {
                    let _ = EnvelopeBody::decode(tag, &bytes);
                }
            }
        }

        PayloadAttack::RandomBytes { bytes } => {
            for tag in ALL_TAGS {
                let _ = EnvelopeBody::decode(tag, &bytes);
            }
        }

        PayloadAttack::TypeConfusion { source_tag_index, target_tag_index } => {
            let source_tag = ALL_TAGS[source_tag_index as usize % ALL_TAGS.len()];
            let target_tag = ALL_TAGS[target_tag_index as usize % ALL_TAGS.len()];
            let mut encoded = Vec::new();
            if let Ok(body) = EnvelopeBody::decode(source_tag, &sample_bytes_for(source_tag)) {
                let _ = body.encode(&mut encoded);
            }
            match EnvelopeBody::decode(target_tag, &encoded) {
                Ok(decoded) => assert_eq!(decoded.tag(), target_tag),
                Err(_) => {}
            }
        }

        PayloadAttack::DuplicateKeys { count } => {
            let actual_count = (count % 10).max(2);
            let mut bytes = vec![0xA0 | actual_count];
            for _ in 0..actual_count {
                bytes.push(0x67);
                bytes.extend_from_slice(b"version");
                bytes.push(0x01);
            }
            for tag in ALL_TAGS {
                let _ = EnvelopeBody::decode(tag, &bytes);
            }
        }
    }
});

fn sample_bytes_for(tag: MessageTag) -> Vec<u8> {
    match tag {
        MessageTag::Heartbeat | MessageTag::Unknown => {
            let body = EnvelopeBody::Heartbeat(edgeinfer_proto::payload::HeartbeatPayload {
                mono_ns: 0,
                last_frame_id: 0,
                tx_bytes: 0,
                rx_bytes: 0,
            });
            let mut out = Vec::new();
            let _ = body.encode(&mut out);
            out
        }
        _ => Vec::new(),
    }
}

fn nested_cbor(depth: usize, shape: &NestedShape) -> Vec<u8> {
    let mut bytes = Vec::new();
    match shape {
        NestedShape::Array => {
            for _ in 0..depth {
                bytes.push(0x81);
            }
            bytes.push(0x01);
        }
        NestedShape::Map => {
            for _ in 0..depth {
                bytes.push(0xA1);
                bytes.push(0x61);
                bytes.push(b'a');
            }
            bytes.push(0x01);
        }
        NestedShape::Bytes => {
            for _ in 0..depth {
                bytes.push(0x81);
            }
            bytes.push(0x41);
            bytes.push(0x00);
        }
        NestedShape::String => {
            for _ in 0..depth {
                bytes.push(0x81);
            }
            bytes.push(0x61);
            bytes.push(b'x');
        }
    }
    bytes
}

fn huge_byte_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x5A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![0xAA; (claimed_length as usize).min(10)]);
    bytes
}

fn huge_text_string(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x7A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    bytes.extend(vec![b'x'; (claimed_length as usize).min(10)]);
    bytes
}

fn huge_array(claimed_length: u32) -> Vec<u8> {
    let mut bytes = vec![0x9A];
    bytes.extend_from_slice(&claimed_length.to_be_bytes());
    for _ in 0..(claimed_length as usize).min(5) {
        bytes.push(0x01);
    }
    bytes
}
