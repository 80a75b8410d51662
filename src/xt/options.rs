// src/xt/options.rs
// Option tables and the per-rule exclusion register

use crate::codec::FULL_MASK;
use crate::exceptions::{Result, XtError};
use crate::utils::number::{parse_bounded, parse_unsigned_prefix};
use log::trace;

/// How an option's argument is converted before it reaches the extension
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    /// Flag without argument
    None,
    Uint8,
    Uint16,
    Uint32,
    /// `value[/mask]`, mask defaults to all ones
    MarkMask32,
    String,
    /// Route prefix length, 0 to 128. The address family is not known
    /// here, so an IPv4 rule may carry a length above 32.
    PrefixLen,
}

/// One row of an extension's option table
#[derive(Clone, Copy, Debug)]
pub struct OptionSpec {
    pub name: &'static str,
    /// Bit index in the rule's flag register
    pub id: u8,
    pub kind: OptionKind,
    /// Flag bits this option cannot be combined with
    pub excl: u32,
    pub invertible: bool,
}

impl OptionSpec {
    pub const fn new(name: &'static str, id: u8, kind: OptionKind) -> Self {
        OptionSpec {
            name,
            id,
            kind,
            excl: 0,
            invertible: false,
        }
    }

    pub const fn excl(mut self, excl: u32) -> Self {
        self.excl = excl;
        self
    }

    pub const fn invertible(mut self) -> Self {
        self.invertible = true;
        self
    }

    pub const fn flag(&self) -> u32 {
        1 << self.id
    }

    pub const fn takes_argument(&self) -> bool {
        !matches!(self.kind, OptionKind::None)
    }
}

/// Flag bit for option `id`, for building exclusion masks in const tables
pub const fn flag(id: u8) -> u32 {
    1 << id
}

/// Converted argument
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionValue {
    None,
    U8(u8),
    U16(u16),
    U32(u32),
    Mark { value: u32, mask: u32 },
    Str(String),
    PrefixLen(u8),
}

impl OptionValue {
    /// Convert `arg` according to `entry.kind`
    pub fn parse(extension: &'static str, entry: &OptionSpec, arg: Option<&str>) -> Result<Self> {
        let Some(arg) = arg else {
            return Ok(OptionValue::None);
        };

        let bounded = |max: u64| {
            parse_bounded(arg, 0, max).ok_or_else(|| XtError::OperandOutOfRange {
                extension,
                option: entry.name,
                value: arg.to_string(),
                min: 0,
                max,
            })
        };

        let value = match entry.kind {
            OptionKind::None => OptionValue::None,
            OptionKind::Uint8 => OptionValue::U8(bounded(u8::MAX as u64)? as u8),
            OptionKind::Uint16 => OptionValue::U16(bounded(u16::MAX as u64)? as u16),
            OptionKind::Uint32 => OptionValue::U32(bounded(u32::MAX as u64)? as u32),
            OptionKind::PrefixLen => OptionValue::PrefixLen(bounded(128)? as u8),
            OptionKind::String => OptionValue::Str(arg.to_string()),
            OptionKind::MarkMask32 => {
                let (value, mask) = parse_mark_mask(arg).ok_or_else(|| {
                    XtError::OperandOutOfRange {
                        extension,
                        option: entry.name,
                        value: arg.to_string(),
                        min: 0,
                        max: u32::MAX as u64,
                    }
                })?;
                OptionValue::Mark { value, mask }
            }
        };

        trace!("🔧 {}: --{} {:?} -> {:?}", extension, entry.name, arg, value);
        Ok(value)
    }
}

/// Split `value[/mask]`; a missing mask means every bit
pub fn parse_mark_mask(arg: &str) -> Option<(u32, u32)> {
    let (value, rest) = parse_unsigned_prefix(arg)?;
    let value = u32::try_from(value).ok()?;

    if rest.is_empty() {
        return Some((value, FULL_MASK));
    }

    let mask = rest.strip_prefix('/')?;
    let mask = parse_bounded(mask, 0, u32::MAX as u64)? as u32;
    Some((value, mask))
}

/// Everything an extension sees for one option occurrence
#[derive(Debug)]
pub struct OptionCall<'a> {
    pub extension: &'static str,
    pub revision: u8,
    pub entry: &'static OptionSpec,
    pub arg: Option<&'a str>,
    pub value: OptionValue,
    pub invert: bool,
}

impl OptionCall<'_> {
    /// Raw argument text, empty for flags
    pub fn arg(&self) -> &str {
        self.arg.unwrap_or("")
    }

    /// The active revision cannot express this option
    pub fn unsupported(&self) -> XtError {
        XtError::UnsupportedOption {
            extension: self.extension,
            revision: self.revision,
            option: self.entry.name,
            inverted: self.invert,
        }
    }

    pub fn bad_value(&self, message: impl Into<String>) -> XtError {
        XtError::BadValue {
            extension: self.extension,
            option: self.entry.name,
            message: message.into(),
        }
    }
}

/// Options seen so far in one rule, one bit per option id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionFlags(u32);

impl OptionFlags {
    pub const fn from_bits(bits: u32) -> Self {
        OptionFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, id: u8) -> bool {
        self.0 & flag(id) != 0
    }

    pub const fn intersects(&self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// Reject a repeated option or one that conflicts with an earlier one
    pub fn check(
        &self,
        extension: &'static str,
        entry: &'static OptionSpec,
        table: &'static [OptionSpec],
    ) -> Result<()> {
        if self.0 & entry.flag() != 0 {
            return Err(XtError::MutualExclusion {
                extension,
                option: entry.name,
                conflicting: entry.name,
            });
        }

        let clash = self.0 & entry.excl & !entry.flag();
        if clash != 0 {
            let conflicting = table
                .iter()
                .find(|other| clash & other.flag() != 0)
                .map(|other| other.name)
                .unwrap_or(entry.name);
            return Err(XtError::MutualExclusion {
                extension,
                option: entry.name,
                conflicting,
            });
        }

        Ok(())
    }

    pub fn set(&mut self, entry: &OptionSpec) {
        self.0 |= entry.flag();
    }
}
