//! High-level API for xtmask operations

use crate::exceptions::Result;
use crate::xt::{self, Extension, ExtensionContext, ExtensionKind, parse_args};
use log::{debug, info};
use serde::Serialize;

/// Options for parsing a rule
#[derive(Debug, Default)]
pub struct ParseOptions {
    /// Name maps and credential lookups handed to the extension
    pub context: ExtensionContext,
    /// Print numbers instead of looked-up names
    pub numeric: bool,
}

/// Result of parsing one extension's options
#[derive(Debug, Serialize)]
pub struct ParsedRule {
    pub extension: String,
    pub kind: ExtensionKind,
    pub revision: u8,
    pub size: usize,
    #[serde(skip)]
    pub record: Vec<u8>,
    pub hex: String,
    pub print: String,
    pub save: String,
    /// `-j NAME ...` / `-m name ...` as iptables-save writes it
    pub rule: String,
    pub xlate: Option<String>,
}

/// Decoded view of a kernel record
#[derive(Debug, Serialize)]
pub struct RecordView {
    pub extension: String,
    pub revision: u8,
    pub size: usize,
    pub hex: String,
    pub print: String,
    pub save: String,
    pub xlate: Option<String>,
}

/// One line of the extension listing
#[derive(Debug, Serialize)]
pub struct ExtensionInfo {
    pub name: &'static str,
    pub real_name: &'static str,
    pub kind: ExtensionKind,
    pub revision: u8,
    pub size: usize,
}

fn rule_text(ext: &dyn Extension, name: &str) -> String {
    format!("{} {}{}", ext.kind().flag(), name, ext.save())
}

/// Parse `args` for `name`, at `revision` or the latest one
pub fn parse_rule<S: AsRef<str>>(
    name: &str,
    revision: Option<u8>,
    args: &[S],
    options: &ParseOptions,
) -> Result<ParsedRule> {
    let reg = xt::lookup(name, revision)?;
    let mut ext = reg.create(&options.context);

    let flags = parse_args(ext.as_mut(), args)?;
    debug!("📋 {}.{} options seen: {:#x}", reg.name, reg.revision, flags.bits());

    let record = ext.pack();
    info!(
        "📦 Packed {}.{} into {} bytes",
        reg.name,
        reg.revision,
        record.len()
    );

    Ok(ParsedRule {
        extension: reg.name.to_string(),
        kind: reg.kind,
        revision: reg.revision,
        size: ext.size(),
        hex: hex::encode(&record),
        print: ext.print(options.numeric),
        save: ext.save(),
        rule: rule_text(ext.as_ref(), reg.name),
        xlate: ext.xlate(),
        record,
    })
}

/// Decode a kernel record with host lookups from `ctx`
pub fn describe_record_with(
    name: &str,
    revision: u8,
    bytes: &[u8],
    numeric: bool,
    ctx: &ExtensionContext,
) -> Result<RecordView> {
    let reg = xt::lookup(name, Some(revision))?;
    let ext = reg.decode(bytes, ctx)?;

    Ok(RecordView {
        extension: reg.name.to_string(),
        revision: reg.revision,
        size: ext.size(),
        hex: hex::encode(ext.pack()),
        print: ext.print(numeric),
        save: ext.save(),
        xlate: ext.xlate(),
    })
}

/// Decode a kernel record without name maps
pub fn describe_record(name: &str, revision: u8, bytes: &[u8], numeric: bool) -> Result<RecordView> {
    describe_record_with(name, revision, bytes, numeric, &ExtensionContext::default())
}

/// nftables form of a kernel record, if the extension has one
pub fn translate_record(name: &str, revision: u8, bytes: &[u8]) -> Result<Option<String>> {
    let ext = xt::unpack(name, revision, bytes, &ExtensionContext::default())?;
    Ok(ext.xlate())
}

/// Usage text of one extension revision
pub fn extension_help(name: &str, revision: Option<u8>) -> Result<String> {
    let reg = xt::lookup(name, revision)?;
    Ok(reg.create(&ExtensionContext::default()).help())
}

/// Every registered extension revision
pub fn list_extensions() -> Vec<ExtensionInfo> {
    let ctx = ExtensionContext::default();
    xt::registrations()
        .map(|reg| ExtensionInfo {
            name: reg.name,
            real_name: reg.real_name,
            kind: reg.kind,
            revision: reg.revision,
            size: reg.create(&ctx).size(),
        })
        .collect()
}
