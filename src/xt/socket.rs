// src/xt/socket.rs
// socket match, revisions 0 to 4

use super::options::{OptionCall, OptionKind, OptionSpec, OptionValue};
use super::wire::{check_record_size, get_u8, get_u32, put_u32, xt_align};
use super::{Extension, ExtensionContext, ExtensionKind};
use crate::exceptions::Result;
use crate::utils::number::parse_unsigned_prefix;
use log::trace;
use std::fmt;
use std::sync::Arc;

pub const NAME: &str = "socket";

pub const FLAG_TRANSPARENT: u8 = 1 << 0;
pub const FLAG_NOWILDCARD: u8 = 1 << 1;
pub const FLAG_RESTORESKMARK: u8 = 1 << 2;
pub const FLAG_INVERT: u8 = 1 << 3;
pub const FLAG_STATE: u8 = 1 << 4;
pub const FLAG_USER: u8 = 1 << 5;
pub const FLAG_GROUP: u8 = 1 << 6;

const O_TRANSPARENT: u8 = 0;
const O_NOWILDCARD: u8 = 1;
const O_RESTORESKMARK: u8 = 2;
const O_INVERT: u8 = 3;
const O_STATE: u8 = 4;
const O_USER: u8 = 5;
const O_GROUP: u8 = 6;

static OPTIONS: [OptionSpec; 7] = [
    OptionSpec::new("transparent", O_TRANSPARENT, OptionKind::None).invertible(),
    OptionSpec::new("nowildcard", O_NOWILDCARD, OptionKind::None),
    OptionSpec::new("restore-skmark", O_RESTORESKMARK, OptionKind::None),
    OptionSpec::new("invert", O_INVERT, OptionKind::None),
    OptionSpec::new("state", O_STATE, OptionKind::String).invertible(),
    OptionSpec::new("user", O_USER, OptionKind::String).invertible(),
    OptionSpec::new("group", O_GROUP, OptionKind::String).invertible(),
];

// TCP socket states as bit positions
const TCP_ESTABLISHED: u32 = 1;
const TCP_SYN_SENT: u32 = 2;
const TCP_SYN_RECV: u32 = 3;
const TCP_FIN_WAIT1: u32 = 4;
const TCP_FIN_WAIT2: u32 = 5;
const TCP_TIME_WAIT: u32 = 6;
const TCP_CLOSE: u32 = 7;
const TCP_CLOSE_WAIT: u32 = 8;
const TCP_LAST_ACK: u32 = 9;
const TCP_LISTEN: u32 = 10;
const TCP_CLOSING: u32 = 11;
const TCP_MAX_STATES: u32 = 13;

const fn tcpf(state: u32) -> u32 {
    1 << state
}

/// Every real state, bit 0 excluded
pub const TCPF_ALL: u32 = ((1 << (TCP_MAX_STATES - 1)) - 1) << 1;

pub const STATE_NEW: u32 = tcpf(TCP_LISTEN) | tcpf(TCP_SYN_SENT) | tcpf(TCP_SYN_RECV);
pub const STATE_ESTABLISHED: u32 = tcpf(TCP_ESTABLISHED);
pub const STATE_CLOSING: u32 = tcpf(TCP_FIN_WAIT1)
    | tcpf(TCP_FIN_WAIT2)
    | tcpf(TCP_TIME_WAIT)
    | tcpf(TCP_CLOSE)
    | tcpf(TCP_CLOSE_WAIT)
    | tcpf(TCP_LAST_ACK)
    | tcpf(TCP_CLOSING);

/// Aggregate state names, preferred for display
pub static AGGREGATE_STATES: [(&str, u32); 4] = [
    ("ANY", TCPF_ALL),
    ("NEW", STATE_NEW),
    ("ESTABLISHED", STATE_ESTABLISHED),
    ("CLOSING", STATE_CLOSING),
];

pub static TCP_STATES: [(&str, u32); 11] = [
    ("TCP_ESTABLISHED", tcpf(TCP_ESTABLISHED)),
    ("TCP_SYN_SENT", tcpf(TCP_SYN_SENT)),
    ("TCP_SYN_RECV", tcpf(TCP_SYN_RECV)),
    ("TCP_FIN_WAIT1", tcpf(TCP_FIN_WAIT1)),
    ("TCP_FIN_WAIT2", tcpf(TCP_FIN_WAIT2)),
    ("TCP_TIME_WAIT", tcpf(TCP_TIME_WAIT)),
    ("TCP_CLOSE", tcpf(TCP_CLOSE)),
    ("TCP_CLOSE_WAIT", tcpf(TCP_CLOSE_WAIT)),
    ("TCP_LAST_ACK", tcpf(TCP_LAST_ACK)),
    ("TCP_LISTEN", tcpf(TCP_LISTEN)),
    ("TCP_CLOSING", tcpf(TCP_CLOSING)),
];

/// Highest credential id accepted; all ones is reserved
const MAX_CRED_ID: u64 = u32::MAX as u64 - 1;

/// Resolves user and group names for `--user`/`--group`
pub trait CredentialLookup: fmt::Debug + Send + Sync {
    fn uid_by_name(&self, name: &str) -> Option<u32>;
    fn gid_by_name(&self, name: &str) -> Option<u32>;
    fn user_name(&self, uid: u32) -> Option<String>;
    fn group_name(&self, gid: u32) -> Option<String>;
}

/// Resolver that knows no names, so only numeric ids are accepted
#[derive(Clone, Copy, Debug, Default)]
pub struct NumericCredentials;

impl CredentialLookup for NumericCredentials {
    fn uid_by_name(&self, _name: &str) -> Option<u32> {
        None
    }

    fn gid_by_name(&self, _name: &str) -> Option<u32> {
        None
    }

    fn user_name(&self, _uid: u32) -> Option<String> {
        None
    }

    fn group_name(&self, _gid: u32) -> Option<String> {
        None
    }
}

/// Parse a comma separated state list, aggregate names first
pub fn parse_states(list: &str) -> Option<u32> {
    list.split(',')
        .filter(|token| !token.is_empty())
        .try_fold(0u32, |states, token| {
            AGGREGATE_STATES
                .iter()
                .chain(TCP_STATES.iter())
                .find(|(name, _)| name.eq_ignore_ascii_case(token))
                .map(|(_, bits)| states | bits)
        })
}

/// Cover `states` exactly with names from `table`, greedily in table order
fn cover_states(states: u32, table: &[(&str, u32)]) -> Option<String> {
    let mut left = states & TCPF_ALL;
    if left == 0 {
        return None;
    }

    let mut names = Vec::new();
    for (name, bits) in table {
        if left & bits != *bits {
            continue;
        }
        names.push(*name);
        left &= !bits;
        if left == 0 {
            return Some(names.join(","));
        }
    }
    None
}

/// Display form of a state mask, or `None` when no exact cover exists
pub fn show_states(states: u32) -> Option<String> {
    cover_states(states, &AGGREGATE_STATES).or_else(|| cover_states(states, &TCP_STATES))
}

/// Parse `from[-to]` or `from:to`
pub fn parse_cred_range(s: &str) -> Option<(u32, u32)> {
    let (from, rest) = parse_unsigned_prefix(s)?;
    if from > MAX_CRED_ID {
        return None;
    }

    let (to, rest) = match rest.strip_prefix(['-', ':']) {
        Some(tail) => parse_unsigned_prefix(tail)?,
        None => (from, rest),
    };
    if !rest.is_empty() || to > MAX_CRED_ID || from > to {
        return None;
    }
    Some((from as u32, to as u32))
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketRecord {
    pub flags: u8,
    pub invflags: u8,
    pub state: u32,
    pub uid_min: u32,
    pub uid_max: u32,
    pub gid_min: u32,
    pub gid_max: u32,
}

#[derive(Clone, Debug)]
pub struct SocketMatch {
    revision: u8,
    record: SocketRecord,
    credentials: Arc<dyn CredentialLookup>,
}

impl SocketMatch {
    pub fn new(revision: u8, credentials: Arc<dyn CredentialLookup>) -> Self {
        SocketMatch {
            revision,
            record: SocketRecord::default(),
            credentials,
        }
    }

    pub fn record(&self) -> SocketRecord {
        self.record
    }

    fn record_size(revision: u8) -> usize {
        match revision {
            0 => xt_align(0),
            1..=3 => xt_align(1),
            _ => xt_align(24),
        }
    }

    fn bad_value(call: &OptionCall<'_>) -> crate::exceptions::XtError {
        call.bad_value(format!(
            "Bad value for \"--{}\" option: \"{}\"",
            call.entry.name,
            call.arg()
        ))
    }

    fn set_flag(&mut self, flag: u8, invert: bool) {
        self.record.flags |= flag;
        if invert {
            self.record.invflags |= flag;
        }
    }

    fn show_state(&self, prefix: &str) -> String {
        let record = &self.record;
        if record.flags & FLAG_STATE == 0 {
            return String::new();
        }
        let Some(states) = show_states(record.state) else {
            return String::new();
        };
        let inv = if record.invflags & FLAG_STATE != 0 { "! " } else { "" };
        format!(" {inv}{prefix}state {states}")
    }

    fn show_cred(&self, prefix: &str, numeric: bool, flag: u8) -> String {
        let record = &self.record;
        let (option, from, to, name) = match record.flags & flag {
            FLAG_USER => (
                "user",
                record.uid_min,
                record.uid_max,
                (record.uid_min == record.uid_max && !numeric)
                    .then(|| self.credentials.user_name(record.uid_min))
                    .flatten(),
            ),
            FLAG_GROUP => (
                "group",
                record.gid_min,
                record.gid_max,
                (record.gid_min == record.gid_max && !numeric)
                    .then(|| self.credentials.group_name(record.gid_min))
                    .flatten(),
            ),
            _ => return String::new(),
        };

        let inv = if record.invflags & flag != 0 { "! " } else { "" };
        let value = match name {
            _ if from != to => format!("{from}-{to}"),
            Some(name) => name,
            None => from.to_string(),
        };
        format!(" {inv}{prefix}{option} {value}")
    }

    fn show(&self, prefix: &str, numeric: bool) -> String {
        let record = &self.record;
        let mut out = String::new();

        if prefix.is_empty() {
            out.push_str(" socket");
        }

        if record.flags & FLAG_TRANSPARENT != 0 {
            let inv = if record.invflags & FLAG_TRANSPARENT != 0 && self.revision >= 3 {
                "! "
            } else {
                ""
            };
            out.push_str(&format!(" {inv}{prefix}transparent"));
        }

        if self.revision < 2 {
            return out;
        }
        if record.flags & FLAG_NOWILDCARD != 0 {
            out.push_str(&format!(" {prefix}nowildcard"));
        }

        if self.revision < 3 {
            return out;
        }
        if record.flags & FLAG_RESTORESKMARK != 0 {
            out.push_str(&format!(" {prefix}restore-skmark"));
        }

        if self.revision < 4 {
            return out;
        }
        if record.flags & FLAG_INVERT != 0 {
            out.push_str(&format!(" {prefix}invert"));
        }
        out.push_str(&self.show_state(prefix));
        out.push_str(&self.show_cred(prefix, numeric, FLAG_USER));
        out.push_str(&self.show_cred(prefix, numeric, FLAG_GROUP));
        out
    }
}

pub fn new(revision: u8, ctx: &ExtensionContext) -> Box<dyn Extension> {
    Box::new(SocketMatch::new(revision, Arc::clone(&ctx.credentials)))
}

pub fn unpack(revision: u8, data: &[u8], ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
    let size = SocketMatch::record_size(revision);
    check_record_size(NAME, revision, data, size, size)?;

    let mut record = SocketRecord::default();
    if revision >= 1 {
        record.flags = get_u8(data, 0)?;
        record.invflags = get_u8(data, 1)?;
    }
    if revision >= 4 {
        record.state = get_u32(data, 4)?;
        record.uid_min = get_u32(data, 8)?;
        record.uid_max = get_u32(data, 12)?;
        record.gid_min = get_u32(data, 16)?;
        record.gid_max = get_u32(data, 20)?;
    }
    trace!("📦 Unpacked {}.{}: {:?}", NAME, revision, record);

    let mut matcher = SocketMatch::new(revision, Arc::clone(&ctx.credentials));
    matcher.record = record;
    Ok(Box::new(matcher))
}

impl Extension for SocketMatch {
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
        if self.revision == 0 { &[] } else { &OPTIONS }
    }

    fn help(&self) -> String {
        if self.revision == 0 {
            return "socket match takes no options\n".to_string();
        }

        "socket match options:\n\
         [!] --transparent                Ignore non-transparent sockets\n\
         \x20   --nowildcard                 Don't ignore LISTEN sockets bound on INADDR_ANY\n\
         \x20   --restore-skmark             Set the packet mark to the socket mark if\n\
         \x20                                the socket matches and transparent / \n\
         \x20                                nowildcard conditions are satisfied\n\n\
         \x20   --invert                     Invert matching result\n\
         [!] --state <sk_state>[,...]     Match socket states, where <sk_state> could be\n\
         \x20         NEW         for sockets in state TCP_LISTEN, TCP_SYN_SENT or\n\
         \x20                     TCP_SYN_RECV\n\
         \x20         ESTABLISHED for sockets in state TCP_ESTABLISHED\n\
         \x20         CLOSING     for sockets in state TCP_FIN_WAIT1, TCP_FIN_WAIT2,\n\
         \x20                     TCP_TIME_WAIT, TCP_CLOSE, TCP_CLOSE_WAIT, TCP_LAST_ACK\n\
         \x20                     or TCP_CLOSING\n\
         \x20         ANY         for sockets in any state\n\
         \x20       Also socket state could be matched individually with any combination of\n\
         \x20       TCP_ESTABLISHED, TCP_SYN_SENT, TCP_SYN_RECV, TCP_FIN_WAIT1,\n\
         \x20       TCP_FIN_WAIT2, TCP_TIME_WAIT, TCP_CLOSE, TCP_CLOSE_WAIT, TCP_LAST_ACK,\n\
         \x20       TCP_LISTEN or TCP_CLOSING.\n\
         [!] --user  {<usrid>|from[-to]}  Match when socket owned by the user\n\
         [!] --group {<grpid>|from[-to]}  Match when socket owned by the group\n"
            .to_string()
    }

    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()> {
        let revision = self.revision;
        let invert = call.invert;

        match (call.entry.id, &call.value) {
            (O_TRANSPARENT, _) => {
                if invert && revision < 3 {
                    return Err(call.unsupported());
                }
                self.set_flag(FLAG_TRANSPARENT, invert);
            }
            (O_NOWILDCARD, _) if revision >= 2 => self.set_flag(FLAG_NOWILDCARD, false),
            (O_RESTORESKMARK, _) if revision >= 3 => self.set_flag(FLAG_RESTORESKMARK, false),
            (_, _) if revision < 4 => return Err(call.unsupported()),
            (O_INVERT, _) => self.set_flag(FLAG_INVERT, false),
            (O_STATE, OptionValue::Str(list)) => {
                self.record.state = parse_states(list).ok_or_else(|| Self::bad_value(call))?;
                self.set_flag(FLAG_STATE, invert);
            }
            (O_USER, OptionValue::Str(user)) => {
                let (from, to) = match self.credentials.uid_by_name(user) {
                    Some(uid) => (uid, uid),
                    None => parse_cred_range(user).ok_or_else(|| Self::bad_value(call))?,
                };
                self.record.uid_min = from;
                self.record.uid_max = to;
                self.set_flag(FLAG_USER, invert);
            }
            (O_GROUP, OptionValue::Str(group)) => {
                let (from, to) = match self.credentials.gid_by_name(group) {
                    Some(gid) => (gid, gid),
                    None => parse_cred_range(group).ok_or_else(|| Self::bad_value(call))?,
                };
                self.record.gid_min = from;
                self.record.gid_max = to;
                self.set_flag(FLAG_GROUP, invert);
            }
            _ => return Err(call.unsupported()),
        }
        Ok(())
    }

    fn print(&self, numeric: bool) -> String {
        self.show("", numeric)
    }

    fn save(&self) -> String {
        self.show("--", false)
    }

    fn size(&self) -> usize {
        Self::record_size(self.revision)
    }

    fn pack(&self) -> Vec<u8> {
        let record = &self.record;
        let mut buf = vec![0u8; self.size()];
        if self.revision >= 1 {
            buf[0] = record.flags;
            buf[1] = record.invflags;
        }
        if self.revision >= 4 {
            put_u32(&mut buf, 4, record.state);
            put_u32(&mut buf, 8, record.uid_min);
            put_u32(&mut buf, 12, record.uid_max);
            put_u32(&mut buf, 16, record.gid_min);
            put_u32(&mut buf, 20, record.gid_max);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exceptions::XtError;
    use crate::xt::parse_args;

    #[derive(Debug)]
    struct FixedCredentials;

    impl CredentialLookup for FixedCredentials {
        fn uid_by_name(&self, name: &str) -> Option<u32> {
            (name == "proxy").then_some(13)
        }

        fn gid_by_name(&self, name: &str) -> Option<u32> {
            (name == "wheel").then_some(10)
        }

        fn user_name(&self, uid: u32) -> Option<String> {
            (uid == 13).then(|| "proxy".to_string())
        }

        fn group_name(&self, gid: u32) -> Option<String> {
            (gid == 10).then(|| "wheel".to_string())
        }
    }

    fn parsed(revision: u8, args: &[&str]) -> Result<SocketMatch> {
        let mut matcher = SocketMatch::new(revision, Arc::new(NumericCredentials));
        parse_args(&mut matcher, args)?;
        Ok(matcher)
    }

    #[test]
    fn test_state_constants() {
        assert_eq!(TCPF_ALL, 0x1ffe);
        assert_eq!(parse_states("new,ESTABLISHED"), Some(STATE_NEW | STATE_ESTABLISHED));
        assert_eq!(parse_states("TCP_LISTEN,,tcp_close"), Some(0x480));
        assert_eq!(parse_states("OPEN"), None);
    }

    #[test]
    fn test_state_display_prefers_aggregates() {
        assert_eq!(show_states(TCPF_ALL).as_deref(), Some("ANY"));
        assert_eq!(
            show_states(0x0ffe).as_deref(),
            Some("NEW,ESTABLISHED,CLOSING")
        );
        assert_eq!(
            show_states(tcpf(TCP_LISTEN) | tcpf(TCP_CLOSE)).as_deref(),
            Some("TCP_CLOSE,TCP_LISTEN")
        );
        assert_eq!(show_states(0), None);
        // NEW_SYN_RECV alone has no name
        assert_eq!(show_states(1 << 12), None);
    }

    #[test]
    fn test_cred_ranges() {
        assert_eq!(parse_cred_range("1000"), Some((1000, 1000)));
        assert_eq!(parse_cred_range("1000-2000"), Some((1000, 2000)));
        assert_eq!(parse_cred_range("0x10:0x20"), Some((16, 32)));
        assert_eq!(parse_cred_range("2000-1000"), None);
        assert_eq!(parse_cred_range("4294967295"), None);
        assert_eq!(parse_cred_range("4294967294"), Some((u32::MAX - 1, u32::MAX - 1)));
        assert_eq!(parse_cred_range("10-"), None);
        assert_eq!(parse_cred_range("nobody"), None);
    }

    #[test]
    fn test_revision_gating() {
        let err = parsed(2, &["!", "--transparent"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "libxt_socket.2 does not support ! --transparent"
        );
        let err = parsed(1, &["--nowildcard"]).unwrap_err();
        assert_eq!(err.to_string(), "libxt_socket.1 does not support --nowildcard");
        let err = parsed(3, &["--state", "NEW"]).unwrap_err();
        assert_eq!(err.to_string(), "libxt_socket.3 does not support --state");
        let err = parsed(0, &["--transparent"]).unwrap_err();
        assert!(matches!(err, XtError::UnknownOption { .. }));
    }

    #[test]
    fn test_revision_four_rule() {
        let matcher = parsed(
            4,
            &[
                "--transparent", "--nowildcard", "--invert", "!", "--state", "CLOSING",
                "--user", "1000-2000", "!", "--group", "10",
            ],
        )
        .unwrap();
        assert_eq!(
            matcher.print(false),
            " socket transparent nowildcard invert ! state CLOSING user 1000-2000 ! group 10"
        );
        assert_eq!(
            matcher.save(),
            " --transparent --nowildcard --invert ! --state CLOSING --user 1000-2000 ! --group 10"
        );

        let bytes = matcher.pack();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[8..12], &1000u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &2000u32.to_ne_bytes());
    }

    #[test]
    fn test_bad_values() {
        let err = parsed(4, &["--state", "OPEN"]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "socket: Bad value for \"--state\" option: \"OPEN\""
        );
        assert!(parsed(4, &["--user", "nobody"]).is_err());
    }

    #[test]
    fn test_names_through_lookup() {
        let mut matcher = SocketMatch::new(4, Arc::new(FixedCredentials));
        parse_args(&mut matcher, &["--user", "proxy", "--group", "wheel"]).unwrap();
        assert_eq!(matcher.record().uid_min, 13);
        assert_eq!(matcher.save(), " --user proxy --group wheel");
        assert_eq!(matcher.print(true), " socket user 13 group 10");
    }

    #[test]
    fn test_legacy_sizes() {
        assert_eq!(parsed(0, &[]).unwrap().pack().len(), 0);
        let matcher = parsed(3, &["!", "--transparent", "--restore-skmark"]).unwrap();
        assert_eq!(matcher.pack(), vec![0x05, 0x01, 0, 0, 0, 0, 0, 0]);
        assert_eq!(matcher.save(), " ! --transparent --restore-skmark");
    }
}
