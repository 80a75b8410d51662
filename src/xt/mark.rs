// src/xt/mark.rs
// MARK target, revisions 0 to 2

use super::options::{OptionCall, OptionFlags, OptionKind, OptionSpec, OptionValue, flag};
use super::wire::{check_record_size, get_u8, get_u64, put_u64, xt_align};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::codec::{
    Capabilities, Decoded, FULL_MASK, MASKED_VALUE_SIZE, MaskedOptionNames, MaskedValue,
    Operation, RevisionTable, decode, show_masked,
};
use crate::exceptions::{Result, XtError};
use log::trace;

pub const NAME: &str = "MARK";

const O_SET_MARK: u8 = 0;
const O_AND_MARK: u8 = 1;
const O_OR_MARK: u8 = 2;
const O_XOR_MARK: u8 = 3;
const O_SET_XMARK: u8 = 4;

const F_ANY_MARK: u32 =
    flag(O_SET_MARK) | flag(O_AND_MARK) | flag(O_OR_MARK) | flag(O_XOR_MARK) | flag(O_SET_XMARK);

static OPTIONS: [OptionSpec; 5] = [
    OptionSpec::new("set-mark", O_SET_MARK, OptionKind::MarkMask32).excl(F_ANY_MARK),
    OptionSpec::new("and-mark", O_AND_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("or-mark", O_OR_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("xor-mark", O_XOR_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("set-xmark", O_SET_XMARK, OptionKind::MarkMask32).excl(F_ANY_MARK),
];

/// Operations each record layout can store
pub static REVISIONS: RevisionTable = RevisionTable {
    extension: NAME,
    rows: &[
        (0, Capabilities::SET),
        (1, Capabilities::LOGICAL),
        (2, Capabilities::MASKED),
    ],
};

pub const OPTION_NAMES: MaskedOptionNames = MaskedOptionNames {
    set: "set-mark",
    and: "and-mark",
    or: "or-mark",
    xor: "xor-mark",
    set_masked: "set-xmark",
};

// Revision 1 mode byte
const MODE_SET: u8 = 0;
const MODE_AND: u8 = 1;
const MODE_OR: u8 = 2;
const MODE_NAMES: [&str; 3] = ["set", "and", "or"];

/// `unsigned long` on LP64
const LEGACY_MARK_SIZE: usize = 8;

/// Kernel record per revision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkRecord {
    V0 { mark: u64 },
    V1 { mark: u64, mode: u8 },
    V2(MaskedValue),
}

impl MarkRecord {
    pub fn revision(&self) -> u8 {
        match self {
            MarkRecord::V0 { .. } => 0,
            MarkRecord::V1 { .. } => 1,
            MarkRecord::V2(_) => 2,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            MarkRecord::V0 { .. } => xt_align(LEGACY_MARK_SIZE),
            MarkRecord::V1 { .. } => xt_align(LEGACY_MARK_SIZE + 1),
            MarkRecord::V2(_) => xt_align(MASKED_VALUE_SIZE),
        }
    }

    fn empty(revision: u8) -> Self {
        match revision {
            0 => MarkRecord::V0 { mark: 0 },
            1 => MarkRecord::V1 { mark: 0, mode: MODE_SET },
            _ => MarkRecord::V2(MaskedValue::default()),
        }
    }
}

/// MARK target state for one rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkTarget {
    record: MarkRecord,
}

impl MarkTarget {
    pub fn new(revision: u8) -> Self {
        MarkTarget {
            record: MarkRecord::empty(revision),
        }
    }

    pub fn from_record(record: MarkRecord) -> Self {
        MarkTarget { record }
    }

    pub fn record(&self) -> MarkRecord {
        self.record
    }

    /// Store an already validated operation in the active layout
    fn store(&mut self, call: &OptionCall<'_>, op: Operation) -> Result<()> {
        self.record = match (self.record, op) {
            (MarkRecord::V0 { .. }, Operation::Set(v)) => MarkRecord::V0 { mark: v as u64 },
            (MarkRecord::V1 { .. }, Operation::Set(v)) => MarkRecord::V1 {
                mark: v as u64,
                mode: MODE_SET,
            },
            (MarkRecord::V1 { .. }, Operation::And(bits)) => MarkRecord::V1 {
                mark: bits as u64,
                mode: MODE_AND,
            },
            (MarkRecord::V1 { .. }, Operation::Or(bits)) => MarkRecord::V1 {
                mark: bits as u64,
                mode: MODE_OR,
            },
            (MarkRecord::V2(_), op) => MarkRecord::V2(op.encode()),
            _ => return Err(call.unsupported()),
        };
        Ok(())
    }

    /// ` <prefix><mode>...` for the legacy layouts; unknown modes show nothing
    fn show_legacy(mark: u64, mode: u8, print: bool) -> String {
        match MODE_NAMES.get(mode as usize) {
            Some(name) if print => format!(" MARK {name} 0x{mark:x}"),
            Some(name) => format!(" --{name}-mark 0x{mark:x}"),
            None => String::new(),
        }
    }
}

pub fn new(revision: u8, _ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(MarkTarget::new(revision))
}

pub fn unpack(revision: u8, data: &[u8], _ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let size = MarkRecord::empty(revision).size();
    check_record_size(NAME, revision, data, size, size)?;

    let record = match revision {
        0 => MarkRecord::V0 {
            mark: get_u64(data, 0)?,
        },
        1 => MarkRecord::V1 {
            mark: get_u64(data, 0)?,
            mode: get_u8(data, LEGACY_MARK_SIZE)?,
        },
        _ => MarkRecord::V2(MaskedValue::unpack(data).ok_or(XtError::InvalidRecord {
            extension: NAME,
            revision,
            expected: size,
            actual: data.len(),
        })?),
    };

    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, record);
    Ok(Box::new(MarkTarget::from_record(record)))
}

impl Extension for MarkTarget {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Target
    }

    fn revision(&self) -> u8 {
        self.record.revision()
    }

    fn options(&self) -> &'static [OptionSpec] {
        &OPTIONS
    }

    fn help(&self) -> String {
        match self.record {
            MarkRecord::V0 { .. } => "MARK target options:\n\
                 \x20 --set-mark value    Set mark value\n"
                .to_string(),
            MarkRecord::V1 { .. } => "MARK target options:\n\
                 \x20 --set-mark value    Set mark value\n\
                 \x20 --and-mark bits     Binary AND the mark with bits\n\
                 \x20 --or-mark bits      Binary OR the mark with bits\n"
                .to_string(),
            MarkRecord::V2(_) => "MARK target options:\n\
                 \x20 --set-xmark value[/mask]  Clear bits in mask and XOR value into nfmark\n\
                 \x20 --set-mark value[/mask]   Clear bits in mask and OR value into nfmark\n\
                 \x20 --and-mark bits           Binary AND the nfmark with bits\n\
                 \x20 --or-mark bits            Binary OR the nfmark with bits\n\
                 \x20 --xor-mark bits           Binary XOR the nfmark with bits\n"
                .to_string(),
        }
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let op = match (call.entry.id, &call.value) {
            (O_SET_MARK, OptionValue::Mark { value, mask }) => {
                Operation::from_value_mask(*value, *mask)
            }
            (O_AND_MARK, OptionValue::U32(bits)) => Operation::And(*bits),
            (O_OR_MARK, OptionValue::U32(bits)) => Operation::Or(*bits),
            (O_XOR_MARK, OptionValue::U32(bits)) => Operation::Xor(*bits),
            (O_SET_XMARK, OptionValue::Mark { value, mask }) => Operation::SetXor {
                value: *value,
                mask: *mask,
            },
            _ => return Err(call.unsupported()),
        };

        REVISIONS.check_supported(call.entry.name, self.revision(), op.kind())?;
        self.store(call, op)
    }

    fn final_check(&self, flags: OptionFlags) -> Result<()> {
        if flags.intersects(F_ANY_MARK) {
            return Ok(());
        }

        let message = match self.record {
            MarkRecord::V0 { .. } => "MARK target: Parameter --set-mark is required",
            MarkRecord::V1 { .. } => "MARK target: Parameter --{set,and,or}-mark is required",
            MarkRecord::V2(_) => {
                "MARK: One of the --set-xmark, --{and,or,xor,set}-mark options is required"
            }
        };
        Err(XtError::MissingRequiredOperation {
            extension: NAME,
            message: message.to_string(),
        })
    }

    fn print(&self, _numeric: bool) -> String {
        match self.record {
            MarkRecord::V0 { mark } => Self::show_legacy(mark, MODE_SET, true),
            MarkRecord::V1 { mark, mode } => Self::show_legacy(mark, mode, true),
            MarkRecord::V2(mv) => format!(" MARK{}", show_masked("", mv, &OPTION_NAMES)),
        }
    }

    fn save(&self) -> String {
        match self.record {
            MarkRecord::V0 { mark } => Self::show_legacy(mark, MODE_SET, false),
            MarkRecord::V1 { mark, mode } => Self::show_legacy(mark, mode, false),
            MarkRecord::V2(mv) => show_masked("--", mv, &OPTION_NAMES),
        }
    }

    fn xlate(&self) -> Option<String> {
        match self.record {
            MarkRecord::V0 { .. } => None,
            MarkRecord::V1 { mark, mode } => {
                let expr = match mode {
                    MODE_SET => format!("0x{mark:x}"),
                    MODE_AND => format!("mark and 0x{mark:x}"),
                    MODE_OR => format!("mark or 0x{mark:x}"),
                    _ => return Some("meta mark set".to_string()),
                };
                Some(format!("meta mark set {expr}"))
            }
            MarkRecord::V2(mv) => {
                // Full mask wins over the decode order so SET(0) reads as a set
                let expr = if mv.mask == FULL_MASK {
                    format!("0x{:x}", mv.value)
                } else {
                    match decode(mv) {
                        Decoded::And(bits) => format!("mark and 0x{bits:x}"),
                        Decoded::Or(bits) => format!("mark or 0x{bits:x}"),
                        Decoded::Xor(bits) => format!("mark xor 0x{bits:x}"),
                        Decoded::Set(v) => format!("0x{v:x}"),
                        Decoded::SetMasked { value, mask } => {
                            format!("mark and 0x{:x} xor 0x{value:x}", !mask)
                        }
                    }
                };
                Some(format!("meta mark set {expr}"))
            }
        }
    }

    fn size(&self) -> usize {
        self.record.size()
    }

    fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        match self.record {
            MarkRecord::V0 { mark } => put_u64(&mut buf, 0, mark),
            MarkRecord::V1 { mark, mode } => {
                put_u64(&mut buf, 0, mark);
                buf[LEGACY_MARK_SIZE] = mode;
            }
            MarkRecord::V2(mv) => buf[..MASKED_VALUE_SIZE].copy_from_slice(&mv.pack()),
        }
        trace!("📦 Packed {}.{}: {}", NAME, self.revision(), hex::encode(&buf));
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xt::parse_args;

    fn parsed(revision: u8, args: &[&str]) -> Result<MarkTarget> {
        let mut target = MarkTarget::new(revision);
        parse_args(&mut target, args)?;
        Ok(target)
    }

    #[test]
    fn test_revision_zero_rejects_and_mark() {
        let err = parsed(0, &["--and-mark", "0xff"]).unwrap_err();
        assert!(matches!(
            err,
            XtError::UnsupportedOption {
                extension: "MARK",
                revision: 0,
                option: "and-mark",
                ..
            }
        ));
        assert_eq!(err.to_string(), "libxt_MARK.0 does not support --and-mark");
    }

    #[test]
    fn test_revision_two_encodes_and_mark() {
        let target = parsed(2, &["--and-mark", "0xff"]).unwrap();
        assert_eq!(
            target.record(),
            MarkRecord::V2(MaskedValue::new(0, 0xffff_ff00))
        );
        assert_eq!(target.print(false), " MARK and-mark 0xff");
        assert_eq!(target.save(), " --and-mark 0xff");
    }

    #[test]
    fn test_masked_set_is_rejected_before_revision_two() {
        let err = parsed(1, &["--set-mark", "0x10/0x0f"]).unwrap_err();
        assert_eq!(err.to_string(), "libxt_MARK.1 does not support --set-mark");
        assert!(parsed(0, &["--xor-mark", "1"]).is_err());
        assert!(parsed(1, &["--set-xmark", "1/1"]).is_err());
    }

    #[test]
    fn test_set_mark_widens_mask() {
        let target = parsed(2, &["--set-mark", "0x10/0x0f"]).unwrap();
        assert_eq!(target.record(), MarkRecord::V2(MaskedValue::new(0x10, 0x1f)));
        assert_eq!(target.save(), " --set-xmark 0x10/0x1f");

        let raw = parsed(2, &["--set-xmark", "0x10/0x0f"]).unwrap();
        assert_eq!(raw.record(), MarkRecord::V2(MaskedValue::new(0x10, 0x0f)));
    }

    #[test]
    fn test_legacy_layouts() {
        let v0 = parsed(0, &["--set-mark", "5"]).unwrap();
        assert_eq!(v0.print(false), " MARK set 0x5");
        assert_eq!(v0.save(), " --set-mark 0x5");
        assert_eq!(v0.pack(), 5u64.to_ne_bytes().to_vec());

        let v1 = parsed(1, &["--and-mark", "0xff"]).unwrap();
        assert_eq!(v1.record(), MarkRecord::V1 { mark: 0xff, mode: MODE_AND });
        assert_eq!(v1.print(false), " MARK and 0xff");
        assert_eq!(v1.save(), " --and-mark 0xff");
        let bytes = v1.pack();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[8], MODE_AND);
    }

    #[test]
    fn test_unknown_legacy_mode_prints_nothing() {
        let target = MarkTarget::from_record(MarkRecord::V1 { mark: 1, mode: 9 });
        assert_eq!(target.print(false), "");
        assert_eq!(target.save(), "");
    }

    #[test]
    fn test_missing_operation_messages() {
        let err = parsed(0, &[]).unwrap_err();
        assert_eq!(err.to_string(), "MARK target: Parameter --set-mark is required");
        let err = parsed(2, &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "MARK: One of the --set-xmark, --{and,or,xor,set}-mark options is required"
        );
    }

    #[test]
    fn test_nft_translation() {
        let xlate = |args: &[&str]| parsed(2, args).unwrap().xlate().unwrap();
        assert_eq!(xlate(&["--set-mark", "0"]), "meta mark set 0x0");
        assert_eq!(xlate(&["--and-mark", "0xff"]), "meta mark set mark and 0xff");
        assert_eq!(xlate(&["--or-mark", "0x30"]), "meta mark set mark or 0x30");
        assert_eq!(xlate(&["--xor-mark", "0x30"]), "meta mark set mark xor 0x30");
        assert_eq!(
            xlate(&["--set-xmark", "0x10/0xf0"]),
            "meta mark set mark and 0xffffff0f xor 0x10"
        );

        let v1 = parsed(1, &["--or-mark", "3"]).unwrap();
        assert_eq!(v1.xlate().unwrap(), "meta mark set mark or 0x3");
        assert_eq!(parsed(0, &["--set-mark", "3"]).unwrap().xlate(), None);
    }

    #[test]
    fn test_unpack_checks_size() {
        let ctx = ExtensionContext::default();
        let err = unpack(2, &[0u8; 3], &ctx).unwrap_err();
        assert_eq!(err.to_string(), "MARK.2: record is 3 bytes, expected 8");

        let bytes = MaskedValue::new(0x3, 0).pack();
        let ext = unpack(2, &bytes, &ctx).unwrap();
        assert_eq!(ext.save(), " --xor-mark 0x3");
    }
}
