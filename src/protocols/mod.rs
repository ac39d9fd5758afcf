// protocols/mod.rs
//! RF encoding schemes.
//!
//! Every protocol is a stateless `'static` singleton submitted to the
//! registry with `inventory::submit!` below and looked up by the name stored in a
//! device record. Historical numeric model ids are accepted as aliases.

mod arctech;
mod ikea;
mod risingsun;
mod sartano;

pub use arctech::{Arctech, Waveman};
pub use ikea::Ikea;
pub use risingsun::RisingSun;
pub use sartano::Sartano;

use std::collections::BTreeMap;
use std::fmt;

use crate::{
    error::EncodeError,
    methods::{Method, Methods},
};

pub type Parameters = BTreeMap<String, String>;

/// Frame handed to a controller. The first byte selects the transceiver's
/// frame kind (`S` pulse string, `T` compressed timing), the last is `+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signal(Vec<u8>);

impl Signal {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn kind(&self) -> Option<char> {
        self.0.first().map(|b| *b as char)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

/// Input of a single encode call. Identical requests yield identical signals.
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    pub method: Method,
    pub level: u8,
    pub model: &'a str,
    pub parameters: &'a Parameters,
}

pub trait Protocol: Send + Sync {
    fn name(&self) -> &'static str;

    /// Methods the scheme can physically produce for `model`.
    fn methods(&self, model: &str) -> Methods;

    /// Parameter keys this protocol reads, in presentation order.
    fn parameters(&self) -> &'static [&'static str];

    fn encode(&self, request: &EncodeRequest<'_>) -> Result<Signal, EncodeError>;

    /// Maps the requested method onto the one actually transmitted.
    ///
    /// Receivers in this family have no toggle frame, so TOGGLE becomes the
    /// complement of the last command. With nothing recorded it turns on.
    fn resolve_method(&self, method: Method, last_command: Option<Method>) -> Method {
        match (method, last_command) {
            (Method::Toggle, Some(Method::TurnOn | Method::Dim)) => Method::TurnOff,
            (Method::Toggle, _) => Method::TurnOn,
            (other, _) => other,
        }
    }
}

pub struct ProtocolEntry {
    pub protocol: &'static dyn Protocol,
}

inventory::collect!(ProtocolEntry);

// Kept beside the lookups; the linker may discard submissions made from
// otherwise unreferenced modules.
inventory::submit! { ProtocolEntry { protocol: &arctech::Arctech } }
inventory::submit! { ProtocolEntry { protocol: &arctech::Waveman } }
inventory::submit! { ProtocolEntry { protocol: &ikea::Ikea } }
inventory::submit! { ProtocolEntry { protocol: &risingsun::RisingSun } }
inventory::submit! { ProtocolEntry { protocol: &sartano::Sartano } }

/// Historical numeric model ids: (id, protocol, model).
const LEGACY_MODELS: [(&str, &str, &str); 26] = [
    ("1", "arctech", "codeswitch"),
    ("2", "arctech", "codeswitch"),
    ("3", "arctech", "codeswitch"),
    ("4", "arctech", "codeswitch"),
    ("5", "arctech", "codeswitch"),
    ("6", "arctech", "codeswitch"),
    ("8", "arctech", "codeswitch"),
    ("9", "arctech", "codeswitch"),
    ("10", "arctech", "codeswitch"),
    ("12", "arctech", "codeswitch"),
    ("13", "arctech", "codeswitch"),
    ("14", "arctech", "codeswitch"),
    ("15", "arctech", "codeswitch"),
    ("16", "arctech", "codeswitch"),
    ("17", "arctech", "codeswitch"),
    ("18", "arctech", "codeswitch"),
    ("19", "ikea", "selflearning"),
    ("20", "arctech", "codeswitch"),
    ("21", "arctech", "codeswitch"),
    ("22", "arctech", "codeswitch"),
    ("23", "arctech", "codeswitch"),
    ("24", "arctech", "codeswitch"),
    ("25", "arctech", "codeswitch"),
    ("26", "arctech", "codeswitch"),
    ("27", "arctech", "codeswitch"),
    ("28", "arctech", "codeswitch"),
];

fn legacy_model(id: &str) -> Option<(&'static str, &'static str)> {
    LEGACY_MODELS
        .iter()
        .find(|(legacy, _, _)| *legacy == id)
        .map(|(_, protocol, model)| (*protocol, *model))
}

/// Looks up a protocol by its registered name.
pub fn find(name: &str) -> Option<&'static dyn Protocol> {
    inventory::iter::<ProtocolEntry>
        .into_iter()
        .find(|entry| entry.protocol.name().eq_ignore_ascii_case(name))
        .map(|entry| entry.protocol)
}

/// A protocol together with the model it should encode for.
#[derive(Clone, Copy)]
pub struct Resolved<'a> {
    pub protocol: &'static dyn Protocol,
    pub model: &'a str,
}

/// Resolves a stored protocol name, accepting legacy numeric ids in which
/// case the model comes from the legacy table.
pub fn resolve<'a>(name: &str, model: &'a str) -> Option<Resolved<'a>> {
    if let Some((protocol, legacy)) = legacy_model(name) {
        return find(protocol).map(|protocol| Resolved {
            protocol,
            model: legacy,
        });
    }
    find(name).map(|protocol| Resolved { protocol, model })
}

pub fn registered() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<ProtocolEntry>
        .into_iter()
        .map(|entry| entry.protocol.name())
        .collect();
    names.sort_unstable();
    names
}

/// Reads an integer parameter clamped to `min..=max`. Missing or unparsable
/// values yield `min`.
pub(crate) fn int_parameter(parameters: &Parameters, key: &str, min: i64, max: i64) -> i64 {
    parameters
        .get(key)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(min)
}

pub(crate) fn string_parameter<'a>(parameters: &'a Parameters, key: &str, default: &'a str) -> &'a str {
    parameters
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn params(pairs: &[(&str, &str)]) -> Parameters {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
