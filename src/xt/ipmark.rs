// src/xt/ipmark.rs
// IPMARK target: derive the mark from a packet address, revisions 1 and 2

use super::options::{OptionCall, OptionFlags, OptionKind, OptionSpec, OptionValue, flag};
use super::wire::{check_record_size, get_u8, get_u32, put_u32, xt_align};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::codec::{
    Capabilities, FULL_MASK, MaskedOptionNames, MaskedValue, Operation, RevisionTable,
    show_masked,
};
use crate::exceptions::{Result, XtError};
use log::trace;

pub const NAME: &str = "IPMARK";

const O_ADDR: u8 = 0;
const O_SRC_ADDR: u8 = 1;
const O_DST_ADDR: u8 = 2;
const O_SHIFT: u8 = 3;
const O_AND_MASK: u8 = 4;
const O_OR_MASK: u8 = 5;
const O_SET_MARK: u8 = 6;
const O_AND_MARK: u8 = 7;
const O_OR_MARK: u8 = 8;
const O_XOR_MARK: u8 = 9;
const O_SET_XMARK: u8 = 10;

const F_ANY_ADDR: u32 = flag(O_ADDR) | flag(O_SRC_ADDR) | flag(O_DST_ADDR);
const F_ANY_MARK: u32 =
    flag(O_SET_MARK) | flag(O_AND_MARK) | flag(O_OR_MARK) | flag(O_XOR_MARK) | flag(O_SET_XMARK);

static OPTIONS: [OptionSpec; 11] = [
    OptionSpec::new("addr", O_ADDR, OptionKind::String).excl(F_ANY_ADDR),
    OptionSpec::new("src-addr", O_SRC_ADDR, OptionKind::None).excl(F_ANY_ADDR),
    OptionSpec::new("dst-addr", O_DST_ADDR, OptionKind::None).excl(F_ANY_ADDR),
    OptionSpec::new("shift", O_SHIFT, OptionKind::Uint8),
    OptionSpec::new("and-mask", O_AND_MASK, OptionKind::Uint32),
    OptionSpec::new("or-mask", O_OR_MASK, OptionKind::Uint32),
    OptionSpec::new("set-mark", O_SET_MARK, OptionKind::MarkMask32).excl(F_ANY_MARK),
    OptionSpec::new("and-mark", O_AND_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("or-mark", O_OR_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("xor-mark", O_XOR_MARK, OptionKind::Uint32).excl(F_ANY_MARK),
    OptionSpec::new("set-xmark", O_SET_XMARK, OptionKind::MarkMask32).excl(F_ANY_MARK),
];

/// Only the second layout carries a masked mark
pub static REVISIONS: RevisionTable = RevisionTable {
    extension: NAME,
    rows: &[(2, Capabilities::MASKED)],
};

pub const OPTION_NAMES: MaskedOptionNames = MaskedOptionNames {
    set: "set-mark",
    and: "and-mark",
    or: "or-mark",
    xor: "xor-mark",
    set_masked: "set-xmark",
};

/// Revision 1 selector values
pub const SELECTOR_SRC: u8 = 0;
pub const SELECTOR_DST: u8 = 1;

/// Revision 2 flag bit
pub const FLAG_DST: u8 = 1 << 0;

const RECORD_SIZE: usize = 4 + 4 + 1 + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpmarkRecord {
    V1 {
        andmask: u32,
        ormask: u32,
        selector: u8,
        shift: u8,
    },
    V2 {
        mark: MaskedValue,
        flags: u8,
        shift: u8,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpmarkTarget {
    record: IpmarkRecord,
}

impl IpmarkTarget {
    pub fn new(revision: u8) -> Self {
        let record = match revision {
            0 | 1 => IpmarkRecord::V1 {
                andmask: FULL_MASK,
                ormask: 0,
                selector: SELECTOR_SRC,
                shift: 0,
            },
            _ => IpmarkRecord::V2 {
                mark: MaskedValue::default(),
                flags: 0,
                shift: 0,
            },
        };
        IpmarkTarget { record }
    }

    pub fn from_record(record: IpmarkRecord) -> Self {
        IpmarkTarget { record }
    }

    pub fn record(&self) -> IpmarkRecord {
        self.record
    }

    fn select(&mut self, dst: bool) {
        match &mut self.record {
            IpmarkRecord::V1 { selector, .. } => {
                *selector = if dst { SELECTOR_DST } else { SELECTOR_SRC };
            }
            IpmarkRecord::V2 { flags, .. } => {
                if dst {
                    *flags |= FLAG_DST;
                }
            }
        }
    }

    fn show(&self, prefix: &str) -> String {
        let mut out = String::new();
        match self.record {
            IpmarkRecord::V1 {
                andmask,
                ormask,
                selector,
                shift,
            } => {
                let addr = match selector {
                    SELECTOR_SRC => "src",
                    SELECTOR_DST => "dst",
                    _ => return out,
                };
                out.push_str(&format!(" {prefix}addr {addr}"));
                if shift != 0 {
                    out.push_str(&format!(" {prefix}shift {shift}"));
                }
                if andmask != FULL_MASK {
                    out.push_str(&format!(" {prefix}and-mask 0x{andmask:x}"));
                }
                if ormask != 0 {
                    out.push_str(&format!(" {prefix}or-mask 0x{ormask:x}"));
                }
            }
            IpmarkRecord::V2 { mark, flags, shift } => {
                let addr = if flags & FLAG_DST != 0 { "dst" } else { "src" };
                out.push_str(&format!(" {prefix}{addr}-addr"));
                if shift != 0 {
                    out.push_str(&format!(" {prefix}shift {shift}"));
                }
                out.push_str(&show_masked(prefix, mark, &OPTION_NAMES));
            }
        }
        out
    }
}

pub fn new(revision: u8, _ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(IpmarkTarget::new(revision))
}

pub fn unpack(revision: u8, data: &[u8], _ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let size = xt_align(RECORD_SIZE);
    check_record_size(NAME, revision, data, size, size)?;

    let first = get_u32(data, 0)?;
    let second = get_u32(data, 4)?;
    let byte = get_u8(data, 8)?;
    let shift = get_u8(data, 9)?;

    let record = match IpmarkTarget::new(revision).record {
        IpmarkRecord::V1 { .. } => IpmarkRecord::V1 {
            andmask: first,
            ormask: second,
            selector: byte,
            shift,
        },
        IpmarkRecord::V2 { .. } => IpmarkRecord::V2 {
            mark: MaskedValue::new(first, second),
            flags: byte,
            shift,
        },
    };
    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, record);
    Ok(Box::new(IpmarkTarget::from_record(record)))
}

impl Extension for IpmarkTarget {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Target
    }

    fn revision(&self) -> u8 {
        match self.record {
            IpmarkRecord::V1 { .. } => 1,
            IpmarkRecord::V2 { .. } => 2,
        }
    }

    fn options(&self) -> &'static [OptionSpec] {
        &OPTIONS
    }

    fn help(&self) -> String {
        match self.record {
            IpmarkRecord::V1 { .. } => "IPMARK target options:\n\
                 \x20 --addr {src|dst}    Use source or destination ip address\n\
                 \x20 --shift value       Shift MARK right by value\n\
                 \x20 --and-mask bits     Binary AND the MARK with bits\n\
                 \x20 --or-mask bits      Binary OR the MARK with bits\n"
                .to_string(),
            IpmarkRecord::V2 { .. } => "IPMARK target options:\n\
                 \x20 --src-addr                Use source address for MARK\n\
                 \x20 --dst-addr                Use destination address for MARK\n\
                 \x20 --shift value             Shift MARK right by value\n\
                 \x20 --set-xmark value[/mask]  Clear bits in mask and XOR value into MARK\n\
                 \x20 --set-mark value[/mask]   Clear bits in mask and OR value into MARK\n\
                 \x20 --and-mark bits           Binary AND the MARK with bits\n\
                 \x20 --or-mark bits            Binary OR the MARK with bits\n\
                 \x20 --xor-mark bits           Binary XOR the MARK with bits\n"
                .to_string(),
        }
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let op = match (call.entry.id, &call.value) {
            (O_ADDR, OptionValue::Str(addr)) => {
                match addr.as_str() {
                    "src" => self.select(false),
                    "dst" => self.select(true),
                    other => {
                        return Err(call.bad_value(format!(
                            "Parameter --addr requires either \"src\" or \"dst\" as its argument, but \"{other}\" is given"
                        )));
                    }
                }
                return Ok(());
            }
            (O_SRC_ADDR, _) => {
                self.select(false);
                return Ok(());
            }
            (O_DST_ADDR, _) => {
                self.select(true);
                return Ok(());
            }
            (O_SHIFT, OptionValue::U8(value)) => {
                match &mut self.record {
                    IpmarkRecord::V1 { shift, .. } | IpmarkRecord::V2 { shift, .. } => {
                        *shift = *value;
                    }
                }
                return Ok(());
            }
            (O_AND_MASK, OptionValue::U32(bits)) => {
                let IpmarkRecord::V1 { andmask, .. } = &mut self.record else {
                    return Err(call.unsupported());
                };
                *andmask = *bits;
                return Ok(());
            }
            (O_OR_MASK, OptionValue::U32(bits)) => {
                let IpmarkRecord::V1 { ormask, .. } = &mut self.record else {
                    return Err(call.unsupported());
                };
                *ormask = *bits;
                return Ok(());
            }
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
        match &mut self.record {
            IpmarkRecord::V2 { mark, .. } => {
                *mark = op.encode();
                Ok(())
            }
            IpmarkRecord::V1 { .. } => Err(call.unsupported()),
        }
    }

    fn final_check(&self, flags: OptionFlags) -> Result<()> {
        if flags.intersects(F_ANY_ADDR) {
            return Ok(());
        }

        let message = match self.record {
            IpmarkRecord::V1 { .. } => "IPMARK target: Parameter --addr {src|dst} is required",
            IpmarkRecord::V2 { .. } => "IPMARK target: Parameter --{src|dst}-addr is required",
        };
        Err(XtError::MissingRequiredOperation {
            extension: NAME,
            message: message.to_string(),
        })
    }

    fn print(&self, _numeric: bool) -> String {
        format!(" IPMARK{}", self.show(""))
    }

    fn save(&self) -> String {
        self.show("--")
    }

    fn size(&self) -> usize {
        xt_align(RECORD_SIZE)
    }

    fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        let (first, second, byte, shift) = match self.record {
            IpmarkRecord::V1 {
                andmask,
                ormask,
                selector,
                shift,
            } => (andmask, ormask, selector, shift),
            IpmarkRecord::V2 { mark, flags, shift } => (mark.value, mark.mask, flags, shift),
        };
        put_u32(&mut buf, 0, first);
        put_u32(&mut buf, 4, second);
        buf[8] = byte;
        buf[9] = shift;
        buf
    }
}
