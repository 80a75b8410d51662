// src/xt/rpfilter.rs
// rpfilter match: reverse path filter, revisions 0 and 1

use super::lmap::DeviceGroups;
use super::options::{OptionCall, OptionKind, OptionSpec, OptionValue};
use super::wire::{check_record_size, get_u8, get_u32, put_u32, xt_align};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::codec::FULL_MASK;
use crate::exceptions::Result;
use crate::utils::number::{parse_bounded, parse_unsigned_prefix};
use log::trace;
use std::sync::Arc;

pub const NAME: &str = "rpfilter";

pub const FLAG_LOOSE: u8 = 1 << 0;
pub const FLAG_VALID_MARK: u8 = 1 << 1;
pub const FLAG_ACCEPT_LOCAL: u8 = 1 << 2;
pub const FLAG_INVERT: u8 = 1 << 3;
pub const FLAG_PREFIXLEN: u8 = 1 << 4;
pub const FLAG_PREFIXLEN_INVERT: u8 = 1 << 5;
pub const FLAG_GROUP: u8 = 1 << 6;
pub const FLAG_GROUP_INVERT: u8 = 1 << 7;

const O_LOOSE: u8 = 0;
const O_VMARK: u8 = 1;
const O_ACCEPT_LOCAL: u8 = 2;
const O_INVERT: u8 = 3;
const O_PREFIXLEN: u8 = 4;
const O_DEVGROUP: u8 = 5;

static OPTIONS: [OptionSpec; 6] = [
    OptionSpec::new("loose", O_LOOSE, OptionKind::None),
    OptionSpec::new("validmark", O_VMARK, OptionKind::None),
    OptionSpec::new("accept-local", O_ACCEPT_LOCAL, OptionKind::None),
    OptionSpec::new("invert", O_INVERT, OptionKind::None),
    OptionSpec::new("prefixlen", O_PREFIXLEN, OptionKind::PrefixLen).invertible(),
    OptionSpec::new("devgroup", O_DEVGROUP, OptionKind::String).invertible(),
];

/// `value[/mask]`, or a name from the device group map with a full mask
pub fn parse_val_mask(arg: &str, names: Option<&DeviceGroups>) -> Option<(u32, u32)> {
    if let Some((value, rest)) = parse_unsigned_prefix(arg) {
        if let Ok(value) = u32::try_from(value) {
            if rest.is_empty() {
                return Some((value, FULL_MASK));
            }
            if let Some(mask) = rest.strip_prefix('/') {
                let mask = parse_bounded(mask, 0, u32::MAX as u64)?;
                return Some((value, mask as u32));
            }
        }
    }

    names?.id_of(arg).map(|id| (id, FULL_MASK))
}

/// Inverse of [`parse_val_mask`]; names only for full masks
pub fn show_val_mask(value: u32, mask: u32, names: Option<&DeviceGroups>) -> String {
    if mask != FULL_MASK {
        return format!(" 0x{value:x}/0x{mask:x}");
    }
    match names.and_then(|names| names.name_of(value)) {
        Some(name) => format!(" {name}"),
        None => format!(" 0x{value:x}"),
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RpfilterRecord {
    pub flags: u8,
    /// Revision 1 and later
    pub prefixlen: u8,
    pub group: u32,
    pub group_mask: u32,
}

#[derive(Clone, Debug)]
pub struct RpfilterMatch {
    revision: u8,
    record: RpfilterRecord,
    devgroups: Option<Arc<DeviceGroups>>,
}

impl RpfilterMatch {
    pub fn new(revision: u8, devgroups: Option<Arc<DeviceGroups>>) -> Self {
        RpfilterMatch {
            revision,
            record: RpfilterRecord::default(),
            devgroups,
        }
    }

    pub fn record(&self) -> RpfilterRecord {
        self.record
    }

    fn record_size(revision: u8) -> usize {
        match revision {
            0 => xt_align(1),
            _ => xt_align(12),
        }
    }

    fn show(&self, prefix: &str, numeric: bool) -> String {
        let flags = self.record.flags;
        let mut out = String::new();

        if prefix.is_empty() {
            out.push_str(" rpfilter");
        }
        for (bit, name) in [
            (FLAG_LOOSE, "loose"),
            (FLAG_VALID_MARK, "validmark"),
            (FLAG_ACCEPT_LOCAL, "accept-local"),
            (FLAG_INVERT, "invert"),
        ] {
            if flags & bit != 0 {
                out.push_str(&format!(" {prefix}{name}"));
            }
        }

        if self.revision < 1 {
            return out;
        }

        if flags & FLAG_PREFIXLEN != 0 {
            let inv = if flags & FLAG_PREFIXLEN_INVERT != 0 { "! " } else { "" };
            out.push_str(&format!(
                " {inv}{prefix}prefixlen {}",
                self.record.prefixlen
            ));
        }
        if flags & FLAG_GROUP != 0 {
            let inv = if flags & FLAG_GROUP_INVERT != 0 { "! " } else { "" };
            let names = if numeric { None } else { self.devgroups.as_deref() };
            out.push_str(&format!(" {inv}{prefix}devgroup"));
            out.push_str(&show_val_mask(
                self.record.group,
                self.record.group_mask,
                names,
            ));
        }
        out
    }
}

pub fn new(revision: u8, ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(RpfilterMatch::new(revision, ctx.devgroups.clone()))
}

pub fn unpack(revision: u8, data: &[u8], ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let size = RpfilterMatch::record_size(revision);
    check_record_size(NAME, revision, data, size, size)?;

    let mut matcher = RpfilterMatch::new(revision, ctx.devgroups.clone());
    matcher.record.flags = get_u8(data, 0)?;
    if revision >= 1 {
        matcher.record.prefixlen = get_u8(data, 1)?;
        matcher.record.group = get_u32(data, 4)?;
        matcher.record.group_mask = get_u32(data, 8)?;
    }
    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, matcher.record);
    Ok(Box::new(matcher))
}

impl Extension for RpfilterMatch {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Match
    }

    fn revision(&self) -> u8 {
        self.revision
    }

    fn options(&self) -> &'static [OptionSpec] {
        &OPTIONS
    }

    fn help(&self) -> String {
        "rpfilter match options:\n\
         \x20   --loose                  permit reverse path via any interface\n\
         \x20   --validmark              use skb nfmark when performing route lookup\n\
         \x20   --accept-local           do not reject packets with a local source address\n\
         \x20   --invert                 match packets that failed the reverse path test\n\
         [!] --prefixlen <length>     match if reverse path route prefix length is\n\
         \x20                            shorter than or equal to length\n\
         [!] --devgroup value[/mask]  match if reverse path route outgoing interface is\n\
         \x20                            in device group\n"
            .to_string()
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let id = call.entry.id;
        if matches!(id, O_PREFIXLEN | O_DEVGROUP) && self.revision < 1 {
            return Err(call.unsupported());
        }

        let flags = match (id, &call.value) {
            (O_LOOSE, _) => FLAG_LOOSE,
            (O_VMARK, _) => FLAG_VALID_MARK,
            (O_ACCEPT_LOCAL, _) => FLAG_ACCEPT_LOCAL,
            (O_INVERT, _) => FLAG_INVERT,
            (O_PREFIXLEN, OptionValue::PrefixLen(len)) => {
                self.record.prefixlen = *len;
                if call.invert {
                    FLAG_PREFIXLEN | FLAG_PREFIXLEN_INVERT
                } else {
                    FLAG_PREFIXLEN
                }
            }
            (O_DEVGROUP, OptionValue::Str(arg)) => {
                let (group, mask) = parse_val_mask(arg, self.devgroups.as_deref())
                    .ok_or_else(|| {
                        call.bad_value(format!("Bad value for \"--devgroup\" option: \"{arg}\""))
                    })?;
                self.record.group = group;
                self.record.group_mask = mask;
                if call.invert {
                    FLAG_GROUP | FLAG_GROUP_INVERT
                } else {
                    FLAG_GROUP
                }
            }
            _ => return Err(call.unsupported()),
        };

        self.record.flags |= flags;
        Ok(())
    }

    fn print(&self, numeric: bool) -> String {
        self.show("", numeric)
    }

    fn save(&self) -> String {
        self.show("--", false)
    }

    fn xlate(&self) -> Option<String> {
        let flags = self.record.flags;
        let invert = flags & FLAG_INVERT != 0;
        let mut out = String::new();

        if flags & FLAG_ACCEPT_LOCAL != 0 {
            if !invert {
                return None;
            }
            out.push_str("fib saddr type != local ");
        }

        out.push_str("fib saddr ");
        if flags & FLAG_VALID_MARK != 0 {
            out.push_str(". mark ");
        }
        if flags & FLAG_LOOSE == 0 {
            out.push_str(". iif ");
        }
        out.push_str(if invert { "oif 0" } else { "oif != 0" });
        Some(out)
    }

    fn size(&self) -> usize {
        Self::record_size(self.revision)
    }

    fn pack(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        buf[0] = self.record.flags;
        if self.revision >= 1 {
            buf[1] = self.record.prefixlen;
            put_u32(&mut buf, 4, self.record.group);
            put_u32(&mut buf, 8, self.record.group_mask);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xt::parse_args;

    fn groups() -> Arc<DeviceGroups> {
        Arc::new(DeviceGroups::parse("0 default\n5 uplink\n").unwrap())
    }

    fn parsed(revision: u8, args: &[&str]) -> Result<RpfilterMatch> {
        let mut matcher = RpfilterMatch::new(revision, Some(groups()));
        parse_args(&mut matcher, args)?;
        Ok(matcher)
    }

    #[test]
    fn test_val_mask_forms() {
        let names = groups();
        assert_eq!(parse_val_mask("5", None), Some((5, FULL_MASK)));
        assert_eq!(parse_val_mask("0x5/0xf", None), Some((5, 0xf)));
        assert_eq!(parse_val_mask("uplink", Some(&names)), Some((5, FULL_MASK)));
        assert_eq!(parse_val_mask("uplink", None), None);
        assert_eq!(parse_val_mask("5/", Some(&names)), None);

        assert_eq!(show_val_mask(5, 0xf, Some(&names)), " 0x5/0xf");
        assert_eq!(show_val_mask(5, FULL_MASK, Some(&names)), " uplink");
        assert_eq!(show_val_mask(6, FULL_MASK, Some(&names)), " 0x6");
    }

    #[test]
    fn test_revision_one_rule() {
        let matcher = parsed(
            1,
            &["--loose", "!", "--prefixlen", "24", "!", "--devgroup", "uplink"],
        )
        .unwrap();
        assert_eq!(
            matcher.save(),
            " --loose ! --prefixlen 24 ! --devgroup uplink"
        );
        assert_eq!(
            matcher.print(true),
            " rpfilter loose ! prefixlen 24 ! devgroup 0x5"
        );

        let bytes = matcher.pack();
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes[1], 24);
        assert_eq!(&bytes[4..8], &5u32.to_ne_bytes());
    }

    #[test]
    fn test_revision_zero_gating() {
        let err = parsed(0, &["!", "--devgroup", "1"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "libxt_rpfilter.0 does not support ! --devgroup"
        );
        assert_eq!(parsed(0, &["--validmark"]).unwrap().pack().len(), 8);
        assert!(parsed(1, &["--prefixlen", "129"]).is_err());
        assert!(parsed(1, &["--devgroup", "lab"]).is_err());
    }

    #[test]
    fn test_nft_translation() {
        let xlate = |args: &[&str]| parsed(0, args).unwrap().xlate();
        assert_eq!(xlate(&[]).unwrap(), "fib saddr . iif oif != 0");
        assert_eq!(
            xlate(&["--validmark", "--loose"]).unwrap(),
            "fib saddr . mark oif != 0"
        );
        assert_eq!(xlate(&["--accept-local"]), None);
        assert_eq!(
            xlate(&["--accept-local", "--invert"]).unwrap(),
            "fib saddr type != local fib saddr . iif oif 0"
        );
    }
}
