// protocols/risingsun.rs
use super::{EncodeRequest, Protocol, Signal, int_parameter};
use crate::{
    error::EncodeError,
    methods::{Method, Methods},
};

/// Rising Sun code switches: four houses of four units, one-hot encoded.
pub struct RisingSun;

fn one_hot(index: i64, out: &mut Vec<u8>) {
    for i in 0..4 {
        out.extend_from_slice(if i == index { b".e.e" } else { b"e..e" });
    }
}

impl Protocol for RisingSun {
    fn name(&self) -> &'static str {
        "risingsun"
    }

    fn methods(&self, _model: &str) -> Methods {
        Methods::TURNON | Methods::TURNOFF | Methods::TOGGLE
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["house", "unit"]
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError> {
        let trailer: &[u8] = match request.method {
            Method::TurnOn => b"e..ee..ee..ee..e+",
            Method::TurnOff => b"e..ee..ee..e.e.e+",
            method => {
                return Err(EncodeError::Unencodable {
                    protocol: self.name(),
                    method,
                });
            }
        };
        let mut frame = b"S.e".to_vec();
        one_hot(int_parameter(request.parameters, "house", 1, 4) - 1, &mut frame);
        one_hot(int_parameter(request.parameters, "unit", 1, 4) - 1, &mut frame);
        frame.extend_from_slice(trailer);
        Ok(Signal::new(frame))
    }
}
