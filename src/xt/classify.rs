// src/xt/classify.rs
// CLASSIFY target: skb->priority, revisions 0 and 1

use super::options::{
    OptionCall, OptionFlags, OptionKind, OptionSpec, OptionValue, flag, parse_mark_mask,
};
use super::wire::{check_record_size, get_u32, put_u32, xt_align};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::codec::{
    Capabilities, FULL_MASK, MASKED_VALUE_SIZE, MaskedOptionNames, MaskedValue, Operation,
    RevisionTable, show_masked,
};
use crate::exceptions::{Result, XtError};
use log::trace;

pub const NAME: &str = "CLASSIFY";

const O_SET_CLASS: u8 = 0;
const O_AND_CLASS: u8 = 1;
const O_OR_CLASS: u8 = 2;
const O_XOR_CLASS: u8 = 3;
const O_SET_XCLASS: u8 = 4;

const F_ANY_CLASS: u32 = flag(O_SET_CLASS)
    | flag(O_AND_CLASS)
    | flag(O_OR_CLASS)
    | flag(O_XOR_CLASS)
    | flag(O_SET_XCLASS);

static OPTIONS: [OptionSpec; 5] = [
    OptionSpec::new("set-class", O_SET_CLASS, OptionKind::String).excl(F_ANY_CLASS),
    OptionSpec::new("and-class", O_AND_CLASS, OptionKind::Uint32).excl(F_ANY_CLASS),
    OptionSpec::new("or-class", O_OR_CLASS, OptionKind::Uint32).excl(F_ANY_CLASS),
    OptionSpec::new("xor-class", O_XOR_CLASS, OptionKind::Uint32).excl(F_ANY_CLASS),
    OptionSpec::new("set-xclass", O_SET_XCLASS, OptionKind::MarkMask32).excl(F_ANY_CLASS),
];

pub static REVISIONS: RevisionTable = RevisionTable {
    extension: NAME,
    rows: &[(0, Capabilities::SET), (1, Capabilities::MASKED)],
};

pub const OPTION_NAMES: MaskedOptionNames = MaskedOptionNames {
    set: "set-class",
    and: "and-class",
    or: "or-class",
    xor: "xor-class",
    set_masked: "set-xclass",
};

/// `TC_H_ROOT`
const HANDLE_ROOT: u32 = 0xffff_ffff;
/// `TC_H_UNSPEC`
const HANDLE_UNSPEC: u32 = 0;

/// Parse a `MAJOR:MINOR` traffic-control handle, both halves hex
pub fn parse_priority(s: &str) -> Option<u32> {
    let (major, minor) = s.split_once(':')?;
    let half = |part: &str| {
        let digits = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .unwrap_or(part);
        u32::from_str_radix(digits, 16)
            .ok()
            .filter(|v| *v <= u16::MAX as u32)
    };
    Some((half(major)? << 16) | half(minor)?)
}

fn format_priority(priority: u32) -> String {
    format!("{:x}:{:x}", priority >> 16, priority & 0xffff)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassifyRecord {
    V0 { priority: u32 },
    V1(MaskedValue),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifyTarget {
    record: ClassifyRecord,
}

impl ClassifyTarget {
    pub fn new(revision: u8) -> Self {
        let record = match revision {
            0 => ClassifyRecord::V0 { priority: 0 },
            _ => ClassifyRecord::V1(MaskedValue::default()),
        };
        ClassifyTarget { record }
    }

    pub fn from_record(record: ClassifyRecord) -> Self {
        ClassifyTarget { record }
    }

    pub fn record(&self) -> ClassifyRecord {
        self.record
    }

    /// Priority when the record replaces it entirely
    fn whole_priority(&self) -> Option<u32> {
        match self.record {
            ClassifyRecord::V0 { priority } => Some(priority),
            ClassifyRecord::V1(mv) if mv.mask == FULL_MASK => Some(mv.value),
            ClassifyRecord::V1(_) => None,
        }
    }

    fn show(&self, prefix: &str) -> String {
        match (self.whole_priority(), self.record) {
            (Some(priority), _) => format!(" {prefix}set-class {}", format_priority(priority)),
            (None, ClassifyRecord::V1(mv)) => show_masked(prefix, mv, &OPTION_NAMES),
            (None, ClassifyRecord::V0 { .. }) => String::new(),
        }
    }

    fn set_class(&mut self, call: &OptionCall<'_>) -> Result<Operation> {
        let arg = call.arg();
        if let Some(priority) = parse_priority(arg) {
            return Ok(Operation::Set(priority));
        }

        if self.revision() < 1 {
            return Err(call.bad_value(format!("Bad class value \"{arg}\"")));
        }

        let (value, mask) = parse_mark_mask(arg)
            .ok_or_else(|| call.bad_value(format!("Bad class value \"{arg}\"")))?;
        Ok(Operation::from_value_mask(value, mask))
    }
}

pub fn new(revision: u8, _ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(ClassifyTarget::new(revision))
}

pub fn unpack(revision: u8, data: &[u8], _ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let target = ClassifyTarget::new(revision);
    let size = target.size();
    check_record_size(NAME, revision, data, size, size)?;

    let record = match target.record {
        ClassifyRecord::V0 { .. } => ClassifyRecord::V0 {
            priority: get_u32(data, 0)?,
        },
        ClassifyRecord::V1(_) => ClassifyRecord::V1(MaskedValue::new(
            get_u32(data, 0)?,
            get_u32(data, 4)?,
        )),
    };
    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, record);
    Ok(Box::new(ClassifyTarget::from_record(record)))
}

impl Extension for ClassifyTarget {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Target
    }

    fn revision(&self) -> u8 {
        match self.record {
            ClassifyRecord::V0 { .. } => 0,
            ClassifyRecord::V1(_) => 1,
        }
    }

    fn options(&self) -> &'static [OptionSpec] {
        &OPTIONS
    }

    fn help(&self) -> String {
        let mut help = String::from(
            "CLASSIFY target options:\n\
             \x20 --set-class MAJOR:MINOR    Set skb->priority value\n",
        );
        if self.revision() >= 1 {
            help.push_str(
                "or\n\
                 \x20 --set-xclass value[/mask]  Clear bits in mask and XOR value into CLASS\n\
                 \x20 --set-class value[/mask]   Clear bits in mask and OR value into CLASS\n\
                 \x20 --and-class bits           Binary AND the CLASS with bits\n\
                 \x20 --or-class bits            Binary OR the CLASS with bits\n\
                 \x20 --xor-class bits           Binary XOR the CLASS with bits\n",
            );
        }
        help
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let op = match (call.entry.id, &call.value) {
            (O_SET_CLASS, OptionValue::Str(_)) => self.set_class(call)?,
            (O_AND_CLASS, OptionValue::U32(bits)) => Operation::And(*bits),
            (O_OR_CLASS, OptionValue::U32(bits)) => Operation::Or(*bits),
            (O_XOR_CLASS, OptionValue::U32(bits)) => Operation::Xor(*bits),
            (O_SET_XCLASS, OptionValue::Mark { value, mask }) => Operation::SetXor {
                value: *value,
                mask: *mask,
            },
            _ => return Err(call.unsupported()),
        };

        REVISIONS.check_supported(call.entry.name, self.revision(), op.kind())?;
        self.record = match (self.record, op) {
            (ClassifyRecord::V0 { .. }, Operation::Set(priority)) => {
                ClassifyRecord::V0 { priority }
            }
            (ClassifyRecord::V1(_), op) => ClassifyRecord::V1(op.encode()),
            _ => return Err(call.unsupported()),
        };
        Ok(())
    }

    fn final_check(&self, flags: OptionFlags) -> Result<()> {
        if flags.intersects(F_ANY_CLASS) {
            return Ok(());
        }
        Err(XtError::MissingRequiredOperation {
            extension: NAME,
            message: "CLASSIFY: One of the --set-xclass, --{and,or,xor,set}-class options is required"
                .to_string(),
        })
    }

    fn print(&self, _numeric: bool) -> String {
        format!(" CLASSIFY{}", self.show(""))
    }

    fn save(&self) -> String {
        self.show("--")
    }

    fn xlate(&self) -> Option<String> {
        let handle = match self.whole_priority()? {
            HANDLE_ROOT => "root".to_string(),
            HANDLE_UNSPEC => "none".to_string(),
            priority => format_priority(priority),
        };
        Some(format!("meta priority set {handle}"))
    }

    fn size(&self) -> usize {
        match self.record {
            ClassifyRecord::V0 { .. } => xt_align(4),
            ClassifyRecord::V1(_) => xt_align(MASKED_VALUE_SIZE),
        }
    }

    fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        match self.record {
            ClassifyRecord::V0 { priority } => put_u32(&mut buf, 0, priority),
            ClassifyRecord::V1(mv) => buf[..MASKED_VALUE_SIZE].copy_from_slice(&mv.pack()),
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xt::parse_args;

    fn parsed(revision: u8, args: &[&str]) -> Result<ClassifyTarget> {
        let mut target = ClassifyTarget::new(revision);
        parse_args(&mut target, args)?;
        Ok(target)
    }

    #[test]
    fn test_priority_syntax() {
        assert_eq!(parse_priority("1:10"), Some(0x0001_0010));
        assert_eq!(parse_priority("ffff:ffff"), Some(0xffff_ffff));
        assert_eq!(parse_priority("10000:1"), None);
        assert_eq!(parse_priority("0x10"), None);
        assert_eq!(parse_priority("1:"), None);
    }

    #[test]
    fn test_revision_zero() {
        let target = parsed(0, &["--set-class", "1:10"]).unwrap();
        assert_eq!(target.record(), ClassifyRecord::V0 { priority: 0x10010 });
        assert_eq!(target.print(false), " CLASSIFY set-class 1:10");
        assert_eq!(target.save(), " --set-class 1:10");
        assert_eq!(target.pack().len(), 8);

        let err = parsed(0, &["--set-class", "0x10"]).unwrap_err();
        assert_eq!(err.to_string(), "CLASSIFY: Bad class value \"0x10\"");

        let err = parsed(0, &["--or-class", "1"]).unwrap_err();
        assert_eq!(err.to_string(), "libxt_CLASSIFY.0 does not support --or-class");
    }

    #[test]
    fn test_revision_one_operations() {
        let target = parsed(1, &["--set-class", "1:10"]).unwrap();
        assert_eq!(
            target.record(),
            ClassifyRecord::V1(MaskedValue::new(0x10010, FULL_MASK))
        );
        assert_eq!(target.save(), " --set-class 1:10");

        let target = parsed(1, &["--set-class", "0x10/0x0f"]).unwrap();
        assert_eq!(target.record(), ClassifyRecord::V1(MaskedValue::new(0x10, 0x1f)));
        assert_eq!(target.save(), " --set-xclass 0x10/0x1f");

        let target = parsed(1, &["--and-class", "0xff"]).unwrap();
        assert_eq!(target.print(false), " CLASSIFY and-class 0xff");

        let target = parsed(1, &["--xor-class", "0x3"]).unwrap();
        assert_eq!(target.save(), " --xor-class 0x3");
    }

    #[test]
    fn test_full_mask_checked_before_decode_order() {
        // (0, FULL) would decode as AND 0; a whole-priority write shows as a class
        let target = ClassifyTarget::from_record(ClassifyRecord::V1(MaskedValue::new(0, FULL_MASK)));
        assert_eq!(target.save(), " --set-class 0:0");
        assert_eq!(target.xlate().unwrap(), "meta priority set none");
    }

    #[test]
    fn test_nft_translation() {
        let root = parsed(0, &["--set-class", "ffff:ffff"]).unwrap();
        assert_eq!(root.xlate().unwrap(), "meta priority set root");
        let class = parsed(1, &["--set-class", "1:a"]).unwrap();
        assert_eq!(class.xlate().unwrap(), "meta priority set 1:a");
        let or = parsed(1, &["--or-class", "1"]).unwrap();
        assert_eq!(or.xlate(), None);
    }

    #[test]
    fn test_one_operation_required() {
        let err = parsed(1, &[]).unwrap_err();
        assert!(matches!(err, XtError::MissingRequiredOperation { .. }));
    }
}
