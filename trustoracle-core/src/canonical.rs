//! Canonical serialization of device step payloads.
//!
//! The device signs a compact JSON object with keys in ascending byte
//! order. The canonical form must be byte-identical between the device
//! and this verifier for every payload that was ever signed; anything
//! the writer here cannot reproduce exactly must fail verification
//! rather than succeed fuzzily.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

/// The signed attribute set of a step submission. The signature field
/// itself is never part of the signed object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    pub device_id: String,
    pub step_count: u32,
    /// Device-supplied wall clock, milliseconds.
    pub timestamp: u64,
    pub firmware_version: u32,
    pub battery_percent: u8,
    /// Accelerometer samples, up to 30 triples.
    pub raw_acc_samples: Vec<[f32; 3]>,
}

/// Serialize a payload into the canonical signing form.
///
/// Keys are emitted in ascending byte order (`batteryPercent`,
/// `deviceId`, `firmwareVersion`, `rawAccSamples`, `stepCount`,
/// `timestamp`) with no insignificant whitespace. Floats use the
/// shortest decimal form that round-trips, and integral floats are
/// written without a decimal point, matching the device serializer.
pub fn canonical_json(payload: &StepPayload) -> String {
    let mut out = String::with_capacity(192 + payload.raw_acc_samples.len() * 24);
    out.push('{');

    out.push_str("\"batteryPercent\":");
    let _ = write!(out, "{}", payload.battery_percent);

    out.push_str(",\"deviceId\":");
    write_json_string(&mut out, &payload.device_id);

    out.push_str(",\"firmwareVersion\":");
    let _ = write!(out, "{}", payload.firmware_version);

    out.push_str(",\"rawAccSamples\":[");
    for (i, sample) in payload.raw_acc_samples.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('[');
        for (j, value) in sample.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            write_f32(&mut out, *value);
        }
        out.push(']');
    }
    out.push(']');

    out.push_str(",\"stepCount\":");
    let _ = write!(out, "{}", payload.step_count);

    out.push_str(",\"timestamp\":");
    let _ = write!(out, "{}", payload.timestamp);

    out.push('}');
    out
}

/// Shortest round-trip decimal form. `1.0` prints as `1`, `1.5` as
/// `1.5`. Non-finite values have no JSON form; `null` here guarantees
/// a verification mismatch instead of a panic.
fn write_f32(out: &mut String, value: f32) {
    if value.is_finite() {
        let _ = write!(out, "{}", value);
    } else {
        out.push_str("null");
    }
}

fn write_json_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
