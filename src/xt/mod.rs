//! Packet-filter extensions built on the masked-value codec
//!
//! Each extension converts between rule options and the fixed-size record
//! the kernel module consumes, one implementation per record layout. The
//! static registry below maps `(name, revision)` to the constructors.

pub mod accounts;
pub mod classify;
pub mod ct;
pub mod ipmark;
pub mod lmap;
pub mod mark;
pub mod options;
pub mod parser;
pub mod rpfilter;
pub mod socket;
pub mod wire;

use crate::exceptions::{Result, XtError};
use log::debug;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub use accounts::AccountFiles;
pub use lmap::DeviceGroups;
pub use options::{OptionCall, OptionFlags, OptionKind, OptionSpec, OptionValue};
pub use parser::parse_args;
pub use socket::{CredentialLookup, NumericCredentials};

/// Where in a rule the extension sits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Target,
    Match,
}

impl ExtensionKind {
    /// iptables flag that loads an extension of this kind
    pub fn flag(&self) -> &'static str {
        match self {
            ExtensionKind::Target => "-j",
            ExtensionKind::Match => "-m",
        }
    }
}

/// Host lookups some extensions need for parsing and display
#[derive(Clone, Debug)]
pub struct ExtensionContext {
    pub devgroups: Option<Arc<DeviceGroups>>,
    pub credentials: Arc<dyn CredentialLookup>,
}

impl Default for ExtensionContext {
    fn default() -> Self {
        ExtensionContext {
            devgroups: None,
            credentials: Arc::new(NumericCredentials),
        }
    }
}

/// One revision of one extension, holding its record
pub trait Extension: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Name shown by `print`/`save` callers, differs for aliases
    fn alias(&self) -> &'static str {
        self.name()
    }

    fn kind(&self) -> ExtensionKind;
    fn revision(&self) -> u8;
    fn options(&self) -> &'static [OptionSpec];
    fn help(&self) -> String;

    /// Apply one option occurrence to the record
    fn parse(&mut self, call: &OptionCall<'_>) -> Result<()>;

    /// Validate the option set once the whole rule is read
    fn final_check(&self, _flags: OptionFlags) -> Result<()> {
        Ok(())
    }

    /// `iptables -L` form, leading space included
    fn print(&self, numeric: bool) -> String;

    /// `iptables-save` form, leading space included
    fn save(&self) -> String;

    /// nftables equivalent, when one exists
    fn xlate(&self) -> Option<String> {
        None
    }

    /// Aligned kernel record size
    fn size(&self) -> usize;

    /// Leading bytes that userspace owns and compares
    fn userspace_size(&self) -> usize {
        self.size()
    }

    /// Kernel record in host byte order, `size()` bytes
    fn pack(&self) -> Vec<u8>;
}

pub type Constructor = fn(u8, &ExtensionContext) -> Box<dyn Extension>;
pub type Unpacker = fn(u8, &[u8], &ExtensionContext) -> Result<Box<dyn Extension>>;

/// Static registration of one `(name, revision)`
#[derive(Debug)]
pub struct Registration {
    pub name: &'static str,
    /// Kernel-side name, differs for aliases
    pub real_name: &'static str,
    pub kind: ExtensionKind,
    pub revision: u8,
    pub new: Constructor,
    pub unpack: Unpacker,
}

macro_rules! register {
    ($name:expr, $kind:ident, [$($rev:expr),+], $module:ident) => {
        register!($name, $name, $kind, [$($rev),+], $module::new, $module::unpack)
    };
    ($name:expr, $real:expr, $kind:ident, [$($rev:expr),+], $new:path, $unpack:path) => {
        [$(Registration {
            name: $name,
            real_name: $real,
            kind: ExtensionKind::$kind,
            revision: $rev,
            new: $new,
            unpack: $unpack,
        }),+]
    };
}

static MARK: [Registration; 3] = register!("MARK", Target, [0, 1, 2], mark);
static CLASSIFY: [Registration; 2] = register!("CLASSIFY", Target, [0, 1], classify);
static IPMARK: [Registration; 2] = register!("IPMARK", Target, [1, 2], ipmark);
static CT: [Registration; 3] = register!("CT", Target, [0, 1, 2], ct);
static NOTRACK: [Registration; 3] =
    register!("NOTRACK", "CT", Target, [0, 1, 2], ct::new_notrack, ct::unpack);
static SOCKET: [Registration; 5] = register!("socket", Match, [0, 1, 2, 3, 4], socket);
static RPFILTER: [Registration; 2] = register!("rpfilter", Match, [0, 1], rpfilter);

static REGISTRY: [&[Registration]; 7] = [
    &MARK, &CLASSIFY, &IPMARK, &CT, &NOTRACK, &SOCKET, &RPFILTER,
];

/// Every registration, grouped by extension, revisions ascending
pub fn registrations() -> impl Iterator<Item = &'static Registration> {
    REGISTRY.iter().flat_map(|group| group.iter())
}

/// Highest registered revision of `name`
pub fn latest_revision(name: &str) -> Option<u8> {
    registrations()
        .filter(|reg| reg.name == name)
        .map(|reg| reg.revision)
        .max()
}

/// Find `name` at `revision`, or at its latest revision when none is given
pub fn lookup(name: &str, revision: Option<u8>) -> Result<&'static Registration> {
    let wanted = match revision {
        Some(revision) => Some(revision),
        None => latest_revision(name),
    };

    let found = wanted.and_then(|wanted| {
        registrations().find(|reg| reg.name == name && reg.revision == wanted)
    });

    match found {
        Some(reg) => {
            debug!("🔌 Loaded {} revision {}", reg.name, reg.revision);
            Ok(reg)
        }
        None => Err(XtError::UnknownExtension {
            name: name.to_string(),
            revision,
        }),
    }
}

impl Registration {
    pub fn create(&self, ctx: &ExtensionContext) -> Box<dyn Extension> {
        (self.new)(self.revision, ctx)
    }

    pub fn decode(&self, data: &[u8], ctx: &ExtensionContext) -> Result<Box<dyn Extension>> {
        (self.unpack)(self.revision, data, ctx)
    }
}

/// Rebuild an extension from its kernel record
pub fn unpack(
    name: &str,
    revision: u8,
    data: &[u8],
    ctx: &ExtensionContext,
) -> Result<Box<dyn Extension>> {
    lookup(name, Some(revision))?.decode(data, ctx)
}
