// src/xt/ct.rs
// CT target and its NOTRACK alias, revisions 0 to 2

use super::options::{OptionCall, OptionKind, OptionSpec, OptionValue, flag};
use super::wire::{
    check_record_size, get_name, get_u16, get_u32, put_name, put_u16, put_u32, xt_align,
};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::exceptions::Result;
use crate::utils::number::parse_bounded;
use log::trace;

pub const NAME: &str = "CT";
pub const ALIAS_NAME: &str = "NOTRACK";

pub const FLAG_NOTRACK: u16 = 1 << 0;
pub const FLAG_NOTRACK_ALIAS: u16 = 1 << 1;
pub const FLAG_ZONE_DIR_ORIG: u16 = 1 << 2;
pub const FLAG_ZONE_DIR_REPL: u16 = 1 << 3;
pub const FLAG_ZONE_MARK: u16 = 1 << 4;

const O_NOTRACK: u8 = 0;
const O_ZONE: u8 = 1;
const O_CTEVENTS: u8 = 2;
const O_EXPEVENTS: u8 = 3;
const O_HELPER: u8 = 4;
const O_TIMEOUT: u8 = 5;
const O_ZONE_ORIG: u8 = 6;
const O_ZONE_REPLY: u8 = 7;

const F_NOTRACK: u32 = flag(O_NOTRACK);
const F_ZONE_ALL: u32 = flag(O_ZONE) | flag(O_ZONE_ORIG) | flag(O_ZONE_REPLY);

static OPTIONS: [OptionSpec; 8] = [
    OptionSpec::new("notrack", O_NOTRACK, OptionKind::None).excl(
        F_ZONE_ALL | flag(O_CTEVENTS) | flag(O_EXPEVENTS) | flag(O_HELPER) | flag(O_TIMEOUT),
    ),
    OptionSpec::new("zone", O_ZONE, OptionKind::String).excl(F_NOTRACK | F_ZONE_ALL),
    OptionSpec::new("ctevents", O_CTEVENTS, OptionKind::String).excl(F_NOTRACK),
    OptionSpec::new("expevents", O_EXPEVENTS, OptionKind::String).excl(F_NOTRACK),
    OptionSpec::new("helper", O_HELPER, OptionKind::String).excl(F_NOTRACK),
    OptionSpec::new("timeout", O_TIMEOUT, OptionKind::String).excl(F_NOTRACK),
    OptionSpec::new("zone-orig", O_ZONE_ORIG, OptionKind::String).excl(F_NOTRACK | F_ZONE_ALL),
    OptionSpec::new("zone-reply", O_ZONE_REPLY, OptionKind::String).excl(F_NOTRACK | F_ZONE_ALL),
];

/// Conntrack event names and their bit numbers
pub static CT_EVENTS: [(&str, u32); 10] = [
    ("new", 0),
    ("related", 1),
    ("destroy", 2),
    ("reply", 3),
    ("assured", 4),
    ("protoinfo", 5),
    ("helper", 6),
    ("mark", 7),
    ("natseqinfo", 8),
    ("secmark", 9),
];

/// Expectation event names and their bit numbers
pub static EXP_EVENTS: [(&str, u32); 1] = [("new", 0)];

const HELPER_LEN: usize = 16;
const TIMEOUT_LEN: usize = 32;
const OFFSET_HELPER: usize = 12;
const OFFSET_TIMEOUT: usize = OFFSET_HELPER + HELPER_LEN;
const POINTER_SIZE: usize = 8;

/// Offset of the kernel-owned `ct` pointer, which is also the userspace size
const fn userspace_size(revision: u8) -> usize {
    let end = if revision == 0 {
        OFFSET_TIMEOUT
    } else {
        OFFSET_TIMEOUT + TIMEOUT_LEN
    };
    xt_align(end)
}

/// Translate a comma separated event list into a bit mask
pub fn parse_events(table: &[(&str, u32)], events: &str) -> std::result::Result<u32, String> {
    events.split(',').try_fold(0u32, |mask, token| {
        table
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, bit)| mask | (1 << bit))
            .ok_or_else(|| format!("Unknown event type \"{token}\""))
    })
}

fn show_events(table: &[(&str, u32)], mask: u32) -> String {
    table
        .iter()
        .filter(|(_, bit)| mask & (1 << bit) != 0)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CtRecord {
    pub flags: u16,
    pub zone: u16,
    pub ct_events: u32,
    pub exp_events: u32,
    pub helper: String,
    /// Revision 1 and later
    pub timeout: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtTarget {
    revision: u8,
    record: CtRecord,
    /// Created through the NOTRACK name
    notrack_alias: bool,
}

impl CtTarget {
    pub fn new(revision: u8) -> Self {
        CtTarget {
            revision,
            record: CtRecord::default(),
            notrack_alias: false,
        }
    }

    /// What `-j NOTRACK` expands to
    pub fn notrack(revision: u8) -> Self {
        let flags = if revision < 2 {
            FLAG_NOTRACK
        } else {
            FLAG_NOTRACK | FLAG_NOTRACK_ALIAS
        };
        CtTarget {
            revision,
            record: CtRecord {
                flags,
                ..CtRecord::default()
            },
            notrack_alias: true,
        }
    }

    pub fn record(&self) -> &CtRecord {
        &self.record
    }

    fn is_alias(&self) -> bool {
        self.notrack_alias || self.record.flags & FLAG_NOTRACK_ALIAS != 0
    }

    fn parse_zone(&mut self, call: &OptionCall<'_>, id: u8) -> Result<()> {
        let arg = call.arg();
        let record = &mut self.record;

        match id {
            O_ZONE_ORIG => record.flags |= FLAG_ZONE_DIR_ORIG,
            O_ZONE_REPLY => record.flags |= FLAG_ZONE_DIR_REPL,
            _ => {}
        }

        record.zone = 0;
        if arg.eq_ignore_ascii_case("mark") {
            record.flags |= FLAG_ZONE_MARK;
            return Ok(());
        }

        let zone = parse_bounded(arg, 0, u16::MAX as u64)
            .ok_or_else(|| call.bad_value(format!("Cannot parse {arg} as a zone ID")))?;
        record.zone = zone as u16;
        Ok(())
    }

    fn show_zone(&self, prefix: &str) -> String {
        let record = &self.record;
        let direction = match record.flags & (FLAG_ZONE_DIR_ORIG | FLAG_ZONE_DIR_REPL) {
            FLAG_ZONE_DIR_ORIG => "-orig",
            FLAG_ZONE_DIR_REPL => "-reply",
            _ => "",
        };

        if record.flags & FLAG_ZONE_MARK != 0 {
            format!(" {prefix}zone{direction} mark")
        } else {
            format!(" {prefix}zone{direction} {}", record.zone)
        }
    }

    fn show(&self, prefix: &str) -> String {
        let record = &self.record;
        let mut out = String::new();

        if record.flags & FLAG_NOTRACK != 0 {
            out.push_str(&format!(" {prefix}notrack"));
        }
        if !record.helper.is_empty() {
            out.push_str(&format!(" {prefix}helper {}", record.helper));
        }
        if record.ct_events != 0 {
            out.push_str(&format!(
                " {prefix}ctevents {}",
                show_events(&CT_EVENTS, record.ct_events)
            ));
        }
        if record.exp_events != 0 {
            out.push_str(&format!(
                " {prefix}expevents {}",
                show_events(&EXP_EVENTS, record.exp_events)
            ));
        }
        if record.flags & FLAG_ZONE_MARK != 0 || record.zone != 0 {
            out.push_str(&self.show_zone(prefix));
        }
        if self.revision >= 1 && !record.timeout.is_empty() {
            out.push_str(&format!(" {prefix}timeout {}", record.timeout));
        }
        out
    }
}

pub fn new(revision: u8, _ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(CtTarget::new(revision))
}

pub fn new_notrack(revision: u8, _ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(CtTarget::notrack(revision))
}

pub fn unpack(revision: u8, data: &[u8], _ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let userspace = userspace_size(revision);
    check_record_size(NAME, revision, data, userspace + POINTER_SIZE, userspace)?;

    let record = CtRecord {
        flags: get_u16(data, 0)?,
        zone: get_u16(data, 2)?,
        ct_events: get_u32(data, 4)?,
        exp_events: get_u32(data, 8)?,
        helper: get_name(data, OFFSET_HELPER, HELPER_LEN)?,
        timeout: if revision >= 1 {
            get_name(data, OFFSET_TIMEOUT, TIMEOUT_LEN)?
        } else {
            String::new()
        },
    };
    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, record);

    Ok(Box::new(CtTarget {
        revision,
        record,
        notrack_alias: false,
    }))
}

impl Extension for CtTarget {
    fn name(&self) -> &'static str {
        NAME
    }

    fn alias(&self) -> &'static str {
        if self.is_alias() { ALIAS_NAME } else { NAME }
    }

    fn kind(&self) -> ExtensionKind {
        ExtensionKind::Target
    }

    fn revision(&self) -> u8 {
        self.revision
    }

    fn options(&self) -> &'static [OptionSpec] {
        if self.notrack_alias { &[] } else { &OPTIONS }
    }

    fn help(&self) -> String {
        if self.notrack_alias {
            return "NOTRACK target takes no options\n".to_string();
        }

        let mut help = String::from(
            "CT target options:\n\
             \x20--notrack                     Don't track connection\n\
             \x20--zone ID                     Assign/Lookup connection in zone ID\n\
             \x20--ctevents event[,event...]   Generate specified conntrack events for connection\n\
             \x20--expevents event[,event...]  Generate specified expectation events for connection\n\
             \x20--helper name                 Use conntrack helper 'name' for connection\n\
             \x20--zone {ID|mark}              Assign/Lookup connection in zone ID/packet nfmark\n\
             \x20--zone-orig {ID|mark}         Same as 'zone' option, but only applies to ORIGINAL direction\n\
             \x20--zone-reply {ID|mark}        Same as 'zone' option, but only applies to REPLY direction\n",
        );
        if self.revision >= 1 {
            help.push_str(
                "\x20--timeout name                Use timeout policy 'name' for connection\n",
            );
        }
        help
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let id = call.entry.id;
        if matches!(id, O_ZONE_ORIG | O_ZONE_REPLY | O_TIMEOUT) && self.revision < 1 {
            return Err(call.unsupported());
        }

        match (id, &call.value) {
            (O_NOTRACK, _) => self.record.flags |= FLAG_NOTRACK,
            (O_ZONE | O_ZONE_ORIG | O_ZONE_REPLY, _) => self.parse_zone(call, id)?,
            (O_CTEVENTS, OptionValue::Str(events)) => {
                self.record.ct_events =
                    parse_events(&CT_EVENTS, events).map_err(|msg| call.bad_value(msg))?;
            }
            (O_EXPEVENTS, OptionValue::Str(events)) => {
                self.record.exp_events =
                    parse_events(&EXP_EVENTS, events).map_err(|msg| call.bad_value(msg))?;
            }
            (O_HELPER, OptionValue::Str(helper)) => {
                if helper.len() >= HELPER_LEN {
                    return Err(call.bad_value(format!(
                        "helper name \"{helper}\" is longer than {} characters",
                        HELPER_LEN - 1
                    )));
                }
                self.record.helper = helper.clone();
            }
            (O_TIMEOUT, OptionValue::Str(timeout)) => {
                if timeout.len() >= TIMEOUT_LEN {
                    return Err(call.bad_value(format!(
                        "timeout policy name \"{timeout}\" is longer than {} characters",
                        TIMEOUT_LEN - 1
                    )));
                }
                self.record.timeout = timeout.clone();
            }
            _ => return Err(call.unsupported()),
        }
        Ok(())
    }

    fn print(&self, _numeric: bool) -> String {
        if self.record.flags & FLAG_NOTRACK_ALIAS != 0 {
            return " NOTRACK".to_string();
        }
        format!(" CT{}", self.show(""))
    }

    fn save(&self) -> String {
        if self.record.flags & FLAG_NOTRACK_ALIAS != 0 {
            return String::new();
        }
        self.show("--")
    }

    fn size(&self) -> usize {
        userspace_size(self.revision) + POINTER_SIZE
    }

    fn userspace_size(&self) -> usize {
        userspace_size(self.revision)
    }

    fn pack(&self) -> Vec<u8> {
        let record = &self.record;
        let mut buf = vec![0u8; self.size()];
        put_u16(&mut buf, 0, record.flags);
        put_u16(&mut buf, 2, record.zone);
        put_u32(&mut buf, 4, record.ct_events);
        put_u32(&mut buf, 8, record.exp_events);
        put_name(&mut buf, OFFSET_HELPER, HELPER_LEN, &record.helper);
        if self.revision >= 1 {
            put_name(&mut buf, OFFSET_TIMEOUT, TIMEOUT_LEN, &record.timeout);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::XtError;
    use crate::xt::parse_args;

    fn parsed(revision: u8, args: &[&str]) -> Result<CtTarget> {
        let mut target = CtTarget::new(revision);
        parse_args(&mut target, args)?;
        Ok(target)
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(CtTarget::new(0).size(), 40);
        assert_eq!(CtTarget::new(0).userspace_size(), 32);
        assert_eq!(CtTarget::new(1).size(), 72);
        assert_eq!(CtTarget::new(2).userspace_size(), 64);
    }

    #[test]
    fn test_full_rule() {
        let target = parsed(
            1,
            &[
                "--helper", "ftp", "--ctevents", "new,mark", "--expevents", "new",
                "--zone-orig", "mark", "--timeout", "slow",
            ],
        )
        .unwrap();
        assert_eq!(
            target.save(),
            " --helper ftp --ctevents new,mark --expevents new --zone-orig mark --timeout slow"
        );
        assert_eq!(target.record().ct_events, 0b1000_0001);
        assert_eq!(
            target.record().flags,
            FLAG_ZONE_DIR_ORIG | FLAG_ZONE_MARK
        );

        let bytes = target.pack();
        assert_eq!(&bytes[OFFSET_HELPER..OFFSET_HELPER + 4], b"ftp\0");
        assert_eq!(&bytes[OFFSET_TIMEOUT..OFFSET_TIMEOUT + 5], b"slow\0");
    }

    #[test]
    fn test_zone_forms() {
        assert_eq!(parsed(0, &["--zone", "5"]).unwrap().print(false), " CT zone 5");
        assert_eq!(
            parsed(1, &["--zone-reply", "0x10"]).unwrap().save(),
            " --zone-reply 16"
        );
        let err = parsed(0, &["--zone", "70000"]).unwrap_err();
        assert_eq!(err.to_string(), "CT: Cannot parse 70000 as a zone ID");
        let err = parsed(0, &["--zone-orig", "1"]).unwrap_err();
        assert_eq!(err.to_string(), "libxt_CT.0 does not support --zone-orig");
        let err = parsed(1, &["--zone", "1", "--zone-reply", "2"]).unwrap_err();
        assert!(matches!(err, XtError::MutualExclusion { .. }));
    }

    #[test]
    fn test_notrack_excludes_everything() {
        let err = parsed(1, &["--notrack", "--helper", "ftp"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CT: option \"--helper\" cannot be used together with \"--notrack\"."
        );
        assert_eq!(parsed(1, &["--notrack"]).unwrap().save(), " --notrack");
    }

    #[test]
    fn test_events_and_names_are_validated() {
        let err = parsed(0, &["--ctevents", "new,bogus"]).unwrap_err();
        assert_eq!(err.to_string(), "CT: Unknown event type \"bogus\"");
        assert!(parsed(0, &["--helper", "a-very-long-helper"]).is_err());
        assert!(parsed(2, &["--timeout", "t".repeat(32).as_str()]).is_err());
        assert!(parsed(2, &["--timeout", "t".repeat(31).as_str()]).is_ok());
    }

    #[test]
    fn test_notrack_alias() {
        let legacy = CtTarget::notrack(1);
        assert_eq!(legacy.record().flags, FLAG_NOTRACK);
        assert_eq!(legacy.print(false), " CT notrack");

        let alias = CtTarget::notrack(2);
        assert_eq!(alias.record().flags, FLAG_NOTRACK | FLAG_NOTRACK_ALIAS);
        assert_eq!(alias.print(false), " NOTRACK");
        assert_eq!(alias.save(), "");
        assert_eq!(alias.alias(), "NOTRACK");

        let mut alias = CtTarget::notrack(2);
        let err = parse_args(&mut alias, &["--zone", "1"]).unwrap_err();
        assert!(matches!(err, XtError::UnknownOption { .. }));
    }

    #[test]
    fn test_unpack_accepts_userspace_prefix() {
        let ctx = ExtensionContext::default();
        let target = parsed(2, &["--helper", "sip"]).unwrap();
        let bytes = target.pack();
        let ext = unpack(2, &bytes[..64], &ctx).unwrap();
        assert_eq!(ext.save(), " --helper sip");
        assert!(unpack(2, &bytes[..50], &ctx).is_err());
    }

    #[test]
    fn test_help_lists_zone_directions_on_every_revision() {
        let v0 = CtTarget::new(0).help();
        assert!(v0.contains("--zone-orig {ID|mark}"));
        assert!(v0.contains("--zone-reply {ID|mark}"));
        assert!(!v0.contains("--timeout"));

        let v1 = CtTarget::new(1).help();
        assert!(v1.starts_with(&v0));
        assert!(v1.ends_with("Use timeout policy 'name' for connection\n"));
    }
}
