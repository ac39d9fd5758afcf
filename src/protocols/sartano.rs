// protocols/sartano.rs
use super::{EncodeRequest, Protocol, Signal, string_parameter};
use crate::{
    error::EncodeError,
    methods::{Method, Methods},
};

/// Fixed-code switches addressed by a ten position dip switch.
pub struct Sartano;

const CODE_LEN: usize = 10;

impl Protocol for Sartano {
    fn name(&self) -> &'static str {
        "sartano"
    }

    fn methods(&self, _model: &str) -> Methods {
        Methods::TURNON | Methods::TURNOFF | Methods::TOGGLE
    }

    fn parameters(&self) -> &'static [&'static str] {
        &["code"]
    }

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError> {
        let trailer: &[u8] = match request.method {
            Method::TurnOn => b"$k$k$kk$$k+",
            Method::TurnOff => b"$kk$$k$k$k+",
            method => {
                return Err(EncodeError::Unencodable {
                    protocol: self.name(),
                    method,
                });
            }
        };
        let code = string_parameter(request.parameters, "code", "0000000000");
        if code.len() != CODE_LEN || !code.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(EncodeError::Parameter {
                key: "code",
                reason: format!("expected {CODE_LEN} binary digits, got {code:?}"),
            });
        }

        let mut frame = vec![b'S'];
        for bit in code.bytes() {
            frame.extend_from_slice(if bit == b'1' { b"$k$k" } else { b"$kk$" });
        }
        frame.extend_from_slice(trailer);
        Ok(Signal::new(frame))
    }
}
