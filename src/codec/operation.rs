// src/codec/operation.rs
// User-level operations and their canonical wire pairs

use super::masked::{FULL_MASK, MaskedValue};
use log::trace;
use serde::Serialize;

/// One parsed mark operation, before encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Replace the whole field
    Set(u32),
    /// Keep only `bits`
    And(u32),
    /// Turn `bits` on
    Or(u32),
    /// Toggle `bits`
    Xor(u32),
    /// Clear `mask | value`, then turn `value` on
    SetMasked { value: u32, mask: u32 },
    /// Clear `mask`, then toggle `value`; stored verbatim
    SetXor { value: u32, mask: u32 },
}

/// Operation variant without its operands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Set,
    And,
    Or,
    Xor,
    SetMasked,
    SetXor,
}

impl Operation {
    /// Build the operation a `--set-*` option produces from `value[/mask]`.
    ///
    /// Without an explicit mask the option parser hands in `FULL_MASK`,
    /// which is a plain SET.
    pub const fn from_value_mask(value: u32, mask: u32) -> Self {
        if mask == FULL_MASK {
            Operation::Set(value)
        } else {
            Operation::SetMasked { value, mask }
        }
    }

    pub const fn kind(&self) -> OperationKind {
        match self {
            Operation::Set(_) => OperationKind::Set,
            Operation::And(_) => OperationKind::And,
            Operation::Or(_) => OperationKind::Or,
            Operation::Xor(_) => OperationKind::Xor,
            Operation::SetMasked { .. } => OperationKind::SetMasked,
            Operation::SetXor { .. } => OperationKind::SetXor,
        }
    }

    /// Canonical `(value, mask)` pair for this operation
    pub fn encode(self) -> MaskedValue {
        let mv = match self {
            Operation::Set(v) => MaskedValue::new(v, FULL_MASK),
            Operation::And(bits) => MaskedValue::new(0, !bits),
            Operation::Or(bits) => MaskedValue::new(bits, bits),
            Operation::Xor(bits) => MaskedValue::new(bits, 0),
            // Saved rules depend on the widened mask
            Operation::SetMasked { value, mask } => MaskedValue::new(value, mask | value),
            Operation::SetXor { value, mask } => MaskedValue::new(value, mask),
        };

        trace!(
            "🔧 Encoded {:?}: value=0x{:x} mask=0x{:x}",
            self, mv.value, mv.mask
        );
        mv
    }
}

/// Free-function form of [`Operation::encode`]
pub fn encode(op: Operation) -> MaskedValue {
    op.encode()
}
