// protocols/ikea.rs
//! Ikea Koppla dimmers.
//!
//! One frame addresses any subset of the ten units in a system and carries
//! a ten step level. Turn on and off are dims to full and zero.

use super::{EncodeRequest, Parameters, Protocol, Signal, int_parameter, string_parameter};
use crate::{
    error::EncodeError,
    methods::{Method, Methods},
};

pub struct Ikea;

const ONE: &[u8] = b"TT";
const ZERO: &[u8] = b"\xaa";
const START: &[u8] = b"STTTTTT\xaa";

impl Protocol for Ikea {
    fn name(&self) -> &'static str {
        "ikea"
    }

    fn methods(&self, _model: &str) -> Methods {
        Methods::TURNON | Methods::TURNOFF | Methods::TOGGLE | Methods::DIM
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["system", "units", "fade"]
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError> {
        let level = match request.method {
            Method::TurnOn => 255,
            Method::TurnOff => 0,
            Method::Dim => request.level,
            method => {
                return Err(EncodeError::Unencodable {
                    protocol: self.name(),
                    method,
                });
            }
        };
        let system = int_parameter(request.parameters, "system", 1, 16) as u32 - 1;
        let units = unit_mask(request.parameters)?;
        let smooth = string_parameter(request.parameters, "fade", "true").eq_ignore_ascii_case("true");

        let mut frame = START.to_vec();

        let address = (system << 10) | units;
        let (mut odd, mut even) = (0, 0);
        for i in (0..14).rev() {
            if (address >> i) & 1 == 1 {
                frame.extend_from_slice(ONE);
                if i % 2 == 0 {
                    even += 1;
                } else {
                    odd += 1;
                }
            } else {
                frame.extend_from_slice(ZERO);
            }
        }
        frame.extend_from_slice(parity(odd));
        frame.extend_from_slice(parity(even));

        let fade: u32 = if smooth { 11 << 4 } else { 1 << 4 };
        let command = fade | u32::from(level_step(level));
        let (mut even, mut odd) = (0, 0);
        for i in 0..6 {
            if (command >> i) & 1 == 1 {
                frame.extend_from_slice(ONE);
                if i % 2 == 0 {
                    even += 1;
                } else {
                    odd += 1;
                }
            } else {
                frame.extend_from_slice(ZERO);
            }
        }
        frame.extend_from_slice(parity(even));
        frame.extend_from_slice(parity(odd));
        frame.push(b'+');
        Ok(Signal::new(frame))
    }
}

fn parity(count: u32) -> &'static [u8] {
    if count % 2 == 0 { ONE } else { ZERO }
}

/// Comma separated unit numbers 1..=10 as a bit mask, unit 1 in bit 8 and
/// unit 10 in bit 9.
fn unit_mask(parameters: &Parameters) -> Result<u32, EncodeError> {
    let units = string_parameter(parameters, "units", "");
    if units.is_empty() {
        return Err(EncodeError::Parameter {
            key: "units",
            reason: "no units configured".into(),
        });
    }
    let mut mask = 0;
    for unit in units.split(',') {
        let unit: u32 = unit.trim().parse().map_err(|_| EncodeError::Parameter {
            key: "units",
            reason: format!("{unit:?} is not a unit number"),
        })?;
        let unit = match unit {
            10 => 0,
            1..=9 => unit,
            _ => {
                return Err(EncodeError::Parameter {
                    key: "units",
                    reason: format!("unit {unit} outside 1..=10"),
                });
            }
        };
        mask |= 1 << (9 - unit);
    }
    Ok(mask)
}

/// Quantises a 0..=255 level to the receiver's steps. Step 10 is off, 0 is full.
fn level_step(level: u8) -> u8 {
    match level {
        0..=12 => 10,
        13..=37 => 1,
        38..=62 => 2,
        63..=87 => 3,
        88..=112 => 4,
        113..=137 => 5,
        138..=162 => 6,
        163..=187 => 7,
        188..=212 => 8,
        213..=237 => 9,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::params;

    fn request<'a>(method: Method, level: u8, p: &'a Parameters) -> EncodeRequest<'a> {
        EncodeRequest {
            method,
            level,
            model: "selflearning",
            parameters: p,
        }
    }

    #[test]
    fn frame_shape() {
        let p = params(&[("system", "1"), ("units", "1,2")]);
        let signal = Ikea.encode(&request(Method::TurnOn, 0, &p)).unwrap();
        let bytes = signal.as_bytes();
        assert!(bytes.starts_with(START));
        assert_eq!(*bytes.last().unwrap(), b'+');
        let body = &bytes[START.len()..bytes.len() - 1];
        let zeros = body.iter().filter(|b| **b == 0xaa).count();
        let ones = body.iter().filter(|b| **b == b'T').count();
        assert_eq!(zeros + ones, body.len());
        assert_eq!(ones % 2, 0);
        let symbols = zeros + ones / 2;
        // 14 address bits + 2 checksums + 6 level bits + 2 checksums
        assert_eq!(symbols, 24);
    }

    #[test]
    fn unit_one_full_level_frame() {
        let p = params(&[("system", "1"), ("units", "1"), ("fade", "false")]);
        let signal = Ikea.encode(&request(Method::TurnOn, 0, &p)).unwrap();

        let mut expected = START.to_vec();
        // Address 0b00000100000000, unit 1 in bit 8.
        expected.extend_from_slice(b"\xaa\xaa\xaa\xaa\xaaTT\xaa\xaa\xaa\xaa\xaa\xaa\xaa\xaa");
        expected.extend_from_slice(b"TT\xaa");
        // Level step 0 with instant fade, least significant bit first.
        expected.extend_from_slice(b"\xaa\xaa\xaa\xaaTT\xaa");
        expected.extend_from_slice(b"\xaaTT");
        expected.push(b'+');
        assert_eq!(signal.as_bytes(), expected.as_slice());
    }

    #[test]
    fn turn_on_and_off_are_extreme_dims() {
        let p = params(&[("system", "3"), ("units", "10"), ("fade", "false")]);
        let on = Ikea.encode(&request(Method::TurnOn, 0, &p)).unwrap();
        let full = Ikea.encode(&request(Method::Dim, 255, &p)).unwrap();
        let off = Ikea.encode(&request(Method::TurnOff, 0, &p)).unwrap();
        let zero = Ikea.encode(&request(Method::Dim, 5, &p)).unwrap();
        assert_eq!(on, full);
        assert_eq!(off, zero);
        assert_ne!(on, off);
    }

    #[test]
    fn levels_clamp_to_ten_steps() {
        assert_eq!(level_step(0), 10);
        assert_eq!(level_step(128), 5);
        assert_eq!(level_step(237), 9);
        assert_eq!(level_step(238), 0);
        assert_eq!(level_step(255), 0);
    }

    #[test]
    fn unit_list_is_required_and_checked() {
        let missing = params(&[("system", "1")]);
        assert!(matches!(
            Ikea.encode(&request(Method::TurnOn, 0, &missing)),
            Err(EncodeError::Parameter { key: "units", .. })
        ));
        let bad = params(&[("units", "11")]);
        assert!(Ikea.encode(&request(Method::TurnOn, 0, &bad)).is_err());
        assert_eq!(unit_mask(&params(&[("units", "1, 10")])).unwrap(), 0b11_0000_0000);
    }

    #[test]
    fn bell_is_not_encodable() {
        let p = params(&[("units", "1")]);
        assert!(Ikea.encode(&request(Method::Bell, 0, &p)).is_err());
    }
}
