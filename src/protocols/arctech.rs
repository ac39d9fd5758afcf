// protocols/arctech.rs
//! Arctech receivers (sold as Nexa, Proove, Intertechno and others).
//!
//! Two physically different schemes share the name: dial-set code switches
//! (house letter + unit number baked into the frame) and self-learning
//! receivers that pair with a 26 bit remote id.

use super::{EncodeRequest, Parameters, Protocol, Signal, int_parameter, string_parameter};
use crate::{
    error::EncodeError,
    methods::{Method, Methods},
};

const NEXA_ON: &str = "$k$k$kk$$kk$$kk$$k+";
const NEXA_OFF: &str = "$k$k$kk$$kk$$k$k$k+";
const WAVEMAN_OFF: &str = "$k$k$k$k$k$k$k$k$k+";
const BELL_UNIT: &str = "$kk$$kk$$kk$$k$k";
const BELL_CODE: &str = "$kk$$kk$$kk$$kk$$k+";

const SELFLEARNING_PREAMBLE: [u8; 5] = [b'T', 127, 255, 24, 1];
const SELFLEARNING_MAX_HOUSE: i64 = (1 << 26) - 1;

pub struct Arctech;

pub struct Waveman;

fn switch_methods() -> Methods {
    Methods::TURNON | Methods::TURNOFF | Methods::TOGGLE
}

impl Protocol for Arctech {
    fn name(&self) -> &'static str {
        "arctech"
    }

    fn methods(&self, model: &str) -> Methods {
        match model {
            "codeswitch" => switch_methods(),
            "bell" => Methods::BELL,
            "selflearning-switch" => switch_methods() | Methods::LEARN,
            "selflearning-dimmer" => switch_methods() | Methods::DIM | Methods::LEARN,
            _ => Methods::empty(),
        }
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["house", "unit"]
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError> {
        if !self.methods(request.model).contains(request.method.bit()) {
            return Err(EncodeError::Unencodable {
                protocol: self.name(),
                method: request.method,
            });
        }
        match request.model {
            "bell" => Ok(bell(request.parameters)),
            "codeswitch" => codeswitch(request.method, request.parameters, NEXA_OFF)
                .ok_or(EncodeError::Unencodable {
                    protocol: self.name(),
                    method: request.method,
                }),
            _ => selflearning(request.method, request.level, request.parameters).ok_or(
                EncodeError::Unencodable {
                    protocol: self.name(),
                    method: request.method,
                },
            ),
        }
    }
}

impl Protocol for Waveman {
    fn name(&self) -> &'static str {
        "waveman"
    }

    fn methods(&self, _model: &str) -> Methods {
        switch_methods()
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["house", "unit"]
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError> {
        codeswitch(request.method, request.parameters, WAVEMAN_OFF).ok_or(
            EncodeError::Unencodable {
                protocol: self.name(),
                method: request.method,
            },
        )
    }
}

/// House letter `A`..`P` as a 0 based index.
fn house_letter(parameters: &Parameters) -> u8 {
    let house = string_parameter(parameters, "house", "A");
    let letter = house.bytes().next().unwrap_or(b'A').to_ascii_uppercase();
    letter.saturating_sub(b'A').min(15)
}

/// Four bits, least significant first.
fn code_switch_tuple(code: u8, out: &mut Vec<u8>) {
    let mut code = code;
    for _ in 0..4 {
        out.extend_from_slice(if code & 1 == 1 { b"$kk$" } else { b"$k$k" });
        code >>= 1;
    }
}

fn codeswitch(method: Method, parameters: &Parameters, off_code: &str) -> Option<Signal> {
    let trailer = match method {
        Method::TurnOn => NEXA_ON,
        Method::TurnOff => off_code,
        _ => return None,
    };
    let unit = int_parameter(parameters, "unit", 1, 16) as u8 - 1;
    let mut frame = vec![b'S'];
    code_switch_tuple(house_letter(parameters), &mut frame);
    code_switch_tuple(unit, &mut frame);
    frame.extend_from_slice(trailer.as_bytes());
    Some(Signal::new(frame))
}

fn bell(parameters: &Parameters) -> Signal {
    let mut frame = vec![b'S'];
    code_switch_tuple(house_letter(parameters), &mut frame);
    frame.extend_from_slice(BELL_UNIT.as_bytes());
    frame.extend_from_slice(BELL_CODE.as_bytes());
    Signal::new(frame)
}

fn push_bits(value: i64, bits: u32, out: &mut String) {
    for i in (0..bits).rev() {
        out.push_str(if value & (1 << i) != 0 { "10" } else { "01" });
    }
}

fn selflearning(method: Method, level: u8, parameters: &Parameters) -> Option<Signal> {
    let method = match method {
        Method::Learn => Method::TurnOn,
        Method::Dim if level == 0 => Method::TurnOff,
        other => other,
    };
    let house = int_parameter(parameters, "house", 1, SELFLEARNING_MAX_HOUSE);
    let unit = int_parameter(parameters, "unit", 1, 16) - 1;

    let mut bits = String::with_capacity(80);
    push_bits(house, 26, &mut bits);
    bits.push_str("01");
    bits.push_str(match method {
        Method::Dim => "00",
        Method::TurnOff => "01",
        Method::TurnOn => "10",
        _ => return None,
    });
    push_bits(unit, 4, &mut bits);
    if method == Method::Dim {
        push_bits(i64::from(level / 16), 4, &mut bits);
    }
    bits.push('0');

    let mut frame = SELFLEARNING_PREAMBLE.to_vec();
    frame.push(if method == Method::Dim { 147 } else { 132 });
    // Two bits per nibble, starting after the b1001 start code.
    let mut code: u8 = 9;
    for (i, bit) in bits.bytes().enumerate() {
        code <<= 4;
        code |= if bit == b'1' { 8 } else { 10 };
        if i % 2 == 0 {
            frame.push(code);
            code = 0;
        }
    }
    frame.push(b'+');
    Some(Signal::new(frame))
}
