// src/codec/decode.rs
// Recover the simplest displayable operation from a (value, mask) pair

use super::masked::{FULL_MASK, MaskedValue};
use super::operation::Operation;
use log::trace;
use serde::Serialize;

/// Display name of a decoded pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationName {
    And,
    Or,
    Xor,
    Set,
    SetMasked,
}

impl OperationName {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationName::And => "and",
            OperationName::Or => "or",
            OperationName::Xor => "xor",
            OperationName::Set => "set",
            OperationName::SetMasked => "set-masked",
        }
    }
}

/// A pair seen through the decision list, with its display operands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decoded {
    And(u32),
    Or(u32),
    Xor(u32),
    Set(u32),
    SetMasked { value: u32, mask: u32 },
}

impl Decoded {
    pub fn name(&self) -> OperationName {
        match self {
            Decoded::And(_) => OperationName::And,
            Decoded::Or(_) => OperationName::Or,
            Decoded::Xor(_) => OperationName::Xor,
            Decoded::Set(_) => OperationName::Set,
            Decoded::SetMasked { .. } => OperationName::SetMasked,
        }
    }

    /// The operand printed right after the option name
    pub fn operand(&self) -> u32 {
        match *self {
            Decoded::And(v) | Decoded::Or(v) | Decoded::Xor(v) | Decoded::Set(v) => v,
            Decoded::SetMasked { value, .. } => value,
        }
    }

    /// Operation that re-encodes to exactly the decoded pair.
    ///
    /// The masked form maps to the verbatim variant, matching the
    /// `--set-x*` option it is displayed as.
    pub fn to_operation(&self) -> Operation {
        match *self {
            Decoded::And(bits) => Operation::And(bits),
            Decoded::Or(bits) => Operation::Or(bits),
            Decoded::Xor(bits) => Operation::Xor(bits),
            Decoded::Set(v) => Operation::Set(v),
            Decoded::SetMasked { value, mask } => Operation::SetXor { value, mask },
        }
    }
}

/// Ordered decision list; the first matching rule names the pair.
pub fn decode(mv: MaskedValue) -> Decoded {
    let decoded = if mv.value == 0 {
        Decoded::And(!mv.mask)
    } else if mv.value == mv.mask {
        Decoded::Or(mv.value)
    } else if mv.mask == 0 {
        Decoded::Xor(mv.value)
    } else if mv.mask == FULL_MASK {
        Decoded::Set(mv.value)
    } else {
        Decoded::SetMasked {
            value: mv.value,
            mask: mv.mask,
        }
    };

    trace!(
        "🔍 Decoded value=0x{:x} mask=0x{:x} as {:?}",
        mv.value, mv.mask, decoded
    );
    decoded
}

/// Option names an extension uses for the five display forms
#[derive(Clone, Copy, Debug)]
pub struct MaskedOptionNames {
    pub set: &'static str,
    pub and: &'static str,
    pub or: &'static str,
    pub xor: &'static str,
    pub set_masked: &'static str,
}

impl MaskedOptionNames {
    pub fn for_name(&self, name: OperationName) -> &'static str {
        match name {
            OperationName::Set => self.set,
            OperationName::And => self.and,
            OperationName::Or => self.or,
            OperationName::Xor => self.xor,
            OperationName::SetMasked => self.set_masked,
        }
    }
}

/// Render ` <prefix><option> 0x<value>[/0x<mask>]`
pub fn show_masked(prefix: &str, mv: MaskedValue, names: &MaskedOptionNames) -> String {
    let decoded = decode(mv);
    let mut out = format!(
        " {}{} 0x{:x}",
        prefix,
        names.for_name(decoded.name()),
        decoded.operand()
    );
    if let Decoded::SetMasked { mask, .. } = decoded {
        out.push_str(&format!("/0x{:x}", mask));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::operation::encode;
    use rand::Rng;

    const MARK_NAMES: MaskedOptionNames = MaskedOptionNames {
        set: "set-mark",
        and: "and-mark",
        or: "or-mark",
        xor: "xor-mark",
        set_masked: "set-xmark",
    };

    const SAMPLES: usize = 10_000;

    fn edge_values() -> Vec<u32> {
        vec![0, 1, 0x10, 0x7fff_ffff, 0x8000_0000, 0xffff_fffe, FULL_MASK]
    }

    fn sampled_values() -> Vec<u32> {
        let mut rng = rand::thread_rng();
        let mut values = edge_values();
        values.extend((0..SAMPLES).map(|_| rng.r#gen::<u32>()));
        values
    }

    #[test]
    fn test_set_round_trips() {
        for v in sampled_values() {
            let decoded = decode(encode(Operation::Set(v)));
            // 0 and all-ones collide with AND and OR, which win by precedence
            match v {
                0 => assert_eq!(decoded, Decoded::And(0)),
                FULL_MASK => assert_eq!(decoded, Decoded::Or(FULL_MASK)),
                _ => assert_eq!(decoded, Decoded::Set(v)),
            }
        }
    }

    #[test]
    fn test_and_round_trips() {
        for bits in sampled_values() {
            assert_eq!(decode(encode(Operation::And(bits))), Decoded::And(bits));
        }
    }

    #[test]
    fn test_or_round_trips() {
        for bits in sampled_values() {
            let mv = encode(Operation::Or(bits));
            assert_eq!(mv.value, mv.mask);
            let expected = if bits == 0 {
                Decoded::And(FULL_MASK)
            } else {
                Decoded::Or(bits)
            };
            assert_eq!(decode(mv), expected);
        }
    }

    #[test]
    fn test_xor_round_trips() {
        for bits in sampled_values() {
            let mv = encode(Operation::Xor(bits));
            assert_eq!(mv.mask, 0);
            let expected = if bits == 0 {
                Decoded::And(FULL_MASK)
            } else {
                Decoded::Xor(bits)
            };
            assert_eq!(decode(mv), expected);
        }
    }

    #[test]
    fn test_every_pair_decodes_and_reencodes() {
        let mut rng = rand::thread_rng();
        let mut pairs: Vec<MaskedValue> = Vec::new();
        for v in edge_values() {
            for m in edge_values() {
                pairs.push(MaskedValue::new(v, m));
            }
        }
        pairs.extend((0..SAMPLES).map(|_| MaskedValue::new(rng.r#gen(), rng.r#gen())));

        for mv in pairs {
            let decoded = decode(mv);
            assert_eq!(decoded.to_operation().encode(), mv);
        }
    }

    #[test]
    fn test_set_masked_keeps_value_inside_mask() {
        let mut rng = rand::thread_rng();
        let values = sampled_values();
        for &value in &values {
            let mask = values[rng.gen_range(0..values.len())];
            let mv = encode(Operation::SetMasked { value, mask });
            assert!(mv.value_within_mask(), "value=0x{value:x} mask=0x{mask:x}");
            assert_eq!(mv.mask, mask | value);
        }
    }

    #[test]
    fn test_zero_pair_prefers_and() {
        assert_eq!(decode(MaskedValue::new(0, 0)), Decoded::And(FULL_MASK));
        assert_eq!(decode(MaskedValue::new(0, 0)).name(), OperationName::And);
    }

    #[test]
    fn test_widened_set_masked_falls_through() {
        let mv = encode(Operation::SetMasked {
            value: 0x10,
            mask: 0x0f,
        });
        assert_eq!(mv, MaskedValue::new(0x10, 0x1f));
        assert_eq!(
            decode(mv),
            Decoded::SetMasked {
                value: 0x10,
                mask: 0x1f
            }
        );
    }

    #[test]
    fn test_show_masked_formats() {
        assert_eq!(
            show_masked("--", MaskedValue::new(0x10, 0x1f), &MARK_NAMES),
            " --set-xmark 0x10/0x1f"
        );
        assert_eq!(
            show_masked("", MaskedValue::new(0, 0xffff_ff00), &MARK_NAMES),
            " and-mark 0xff"
        );
        assert_eq!(
            show_masked("--", MaskedValue::new(0x5, FULL_MASK), &MARK_NAMES),
            " --set-mark 0x5"
        );
        assert_eq!(
            show_masked("--", MaskedValue::new(0x3, 0), &MARK_NAMES),
            " --xor-mark 0x3"
        );
        assert_eq!(
            show_masked("--", MaskedValue::new(0x3, 0x3), &MARK_NAMES),
            " --or-mark 0x3"
        );
    }
}
