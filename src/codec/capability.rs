// src/codec/capability.rs
// Which operations each record revision can carry

use super::operation::OperationKind;
use crate::exceptions::{Result, XtError};
use bitflags::bitflags;
use log::debug;

bitflags! {
    /// Set of operation kinds a revision accepts
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capabilities: u8 {
        const SET = 1 << 0;
        const AND = 1 << 1;
        const OR = 1 << 2;
        const XOR = 1 << 3;
        const SET_MASKED = 1 << 4;
        const SET_XOR = 1 << 5;

        const LOGICAL = Self::SET.bits() | Self::AND.bits() | Self::OR.bits();
        const MASKED = Self::LOGICAL.bits()
            | Self::XOR.bits()
            | Self::SET_MASKED.bits()
            | Self::SET_XOR.bits();
    }
}

impl Capabilities {
    pub const fn of(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Set => Capabilities::SET,
            OperationKind::And => Capabilities::AND,
            OperationKind::Or => Capabilities::OR,
            OperationKind::Xor => Capabilities::XOR,
            OperationKind::SetMasked => Capabilities::SET_MASKED,
            OperationKind::SetXor => Capabilities::SET_XOR,
        }
    }

    pub fn allows(&self, kind: OperationKind) -> bool {
        self.contains(Capabilities::of(kind))
    }
}

/// Capability rows of one extension, keyed by the first revision they apply to
#[derive(Debug)]
pub struct RevisionTable {
    pub extension: &'static str,
    /// `(minimum revision, capabilities)`, ascending
    pub rows: &'static [(u8, Capabilities)],
}

impl RevisionTable {
    /// Capabilities of the highest row not above `revision`
    pub fn capabilities(&self, revision: u8) -> Capabilities {
        self.rows
            .iter()
            .rev()
            .find(|(min, _)| *min <= revision)
            .map(|(_, caps)| *caps)
            .unwrap_or_else(Capabilities::empty)
    }

    /// Fail fast when `option` asks for an operation `revision` cannot store
    pub fn check_supported(&self, option: &'static str, revision: u8, kind: OperationKind) -> Result<()> {
        let caps = self.capabilities(revision);
        if caps.allows(kind) {
            return Ok(());
        }

        debug!(
            "❌ {}.{} rejects {:?} from --{} (capabilities {:?})",
            self.extension, revision, kind, option, caps
        );
        Err(XtError::UnsupportedOption {
            extension: self.extension,
            revision,
            option,
            inverted: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static MARK_LIKE: RevisionTable = RevisionTable {
        extension: "MARK",
        rows: &[
            (0, Capabilities::SET),
            (1, Capabilities::LOGICAL),
            (2, Capabilities::MASKED),
        ],
    };

    #[test]
    fn test_rows_accumulate() {
        assert_eq!(MARK_LIKE.capabilities(0), Capabilities::SET);
        assert!(MARK_LIKE.capabilities(1).allows(OperationKind::Or));
        assert!(!MARK_LIKE.capabilities(1).allows(OperationKind::Xor));
        assert!(MARK_LIKE.capabilities(2).allows(OperationKind::SetXor));
        assert_eq!(MARK_LIKE.capabilities(9), Capabilities::MASKED);
    }

    #[test]
    fn test_revision_below_first_row_allows_nothing() {
        static LATE: RevisionTable = RevisionTable {
            extension: "IPMARK",
            rows: &[(2, Capabilities::MASKED)],
        };
        assert!(LATE.capabilities(1).is_empty());
        assert!(LATE.check_supported("set-mark", 1, OperationKind::Set).is_err());
    }

    #[test]
    fn test_check_supported_names_option() {
        let err = MARK_LIKE
            .check_supported("and-mark", 0, OperationKind::And)
            .unwrap_err();
        assert_eq!(err.to_string(), "libxt_MARK.0 does not support --and-mark");
        assert!(MARK_LIKE.check_supported("and-mark", 2, OperationKind::And).is_ok());
    }
}
