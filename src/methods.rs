// methods.rs
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

bitflags! {
    /// Set of actions a device, protocol or controller can carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Methods: u32 {
        const TURNON = 1;
        const TURNOFF = 2;
        const BELL = 4;
        const TOGGLE = 8;
        const DIM = 16;
        const LEARN = 32;
    }
}

/// A single action. Always exactly one bit of [`Methods`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    TurnOn,
    TurnOff,
    Bell,
    Toggle,
    Dim,
    Learn,
}

const METHOD_NAMES: [(&str, Method); 6] = [
    ("turnon", Method::TurnOn),
    ("turnoff", Method::TurnOff),
    ("bell", Method::Bell),
    ("toggle", Method::Toggle),
    ("dim", Method::Dim),
    ("learn", Method::Learn),
];

impl Method {
    pub const ALL: [Method; 6] = [
        Method::TurnOn,
        Method::TurnOff,
        Method::Bell,
        Method::Toggle,
        Method::Dim,
        Method::Learn,
    ];

    pub fn bit(self) -> Methods {
        match self {
            Method::TurnOn => Methods::TURNON,
            Method::TurnOff => Methods::TURNOFF,
            Method::Bell => Methods::BELL,
            Method::Toggle => Methods::TOGGLE,
            Method::Dim => Methods::DIM,
            Method::Learn => Methods::LEARN,
        }
    }

    /// Accepts a raw action value only when it is exactly one known bit.
    pub fn from_bits(bits: u32) -> Option<Method> {
        Method::ALL.into_iter().find(|m| m.bit().bits() == bits)
    }

    pub fn from_name(name: &str) -> Option<Method> {
        Method::from_bits(method_id(name).bits())
    }

    pub fn name(self) -> &'static str {
        METHOD_NAMES
            .iter()
            .find(|(_, m)| *m == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Whether a committed send of this method moves the device's logical state.
    pub fn changes_state(self) -> bool {
        matches!(self, Method::TurnOn | Method::TurnOff | Method::Dim)
    }
}

impl From<Method> for Methods {
    fn from(method: Method) -> Self {
        method.bit()
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Restricts `methods` to what `supported` can carry.
pub fn mask_unsupported_methods(methods: Methods, supported: Methods) -> Methods {
    methods & supported
}

/// Maps a canonical method name to its bit. Unknown names map to the empty set.
pub fn method_id(name: &str) -> Methods {
    METHOD_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(_, m)| m.bit())
        .unwrap_or_else(Methods::empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_is_bitwise_and() {
        let device = Methods::TURNON | Methods::TURNOFF | Methods::DIM;
        let controller = Methods::TURNON | Methods::BELL | Methods::DIM;

        let masked = mask_unsupported_methods(device, controller);
        assert_eq!(masked, Methods::TURNON | Methods::DIM);
        assert_eq!(masked, mask_unsupported_methods(controller, device));
        assert_eq!(masked, mask_unsupported_methods(masked, controller));
        assert_eq!(masked.bits(), device.bits() & controller.bits());
    }

    #[test]
    fn method_id_matches_name_table() {
        for method in Method::ALL {
            assert_eq!(method_id(method.name()), method.bit());
        }
        assert_eq!(method_id("TurnOn"), Methods::TURNON);
        assert_eq!(method_id("explode"), Methods::empty());
        assert_eq!(method_id("").bits(), 0);
    }

    #[test]
    fn from_bits_rejects_combined_masks() {
        assert_eq!(Method::from_bits(16), Some(Method::Dim));
        assert_eq!(Method::from_bits(3), None);
        assert_eq!(Method::from_bits(0), None);
        assert_eq!(Method::from_bits(64), None);
        assert_eq!(Method::from_name("DIM"), Some(Method::Dim));
        assert_eq!(Method::from_name("dimm"), None);
    }

    #[test]
    fn only_switching_methods_change_state() {
        assert!(Method::TurnOn.changes_state());
        assert!(Method::Dim.changes_state());
        assert!(!Method::Bell.changes_state());
        assert!(!Method::Learn.changes_state());
        assert!(!Method::Toggle.changes_state());
    }
}
