// src/xt/accounts.rs
// User and group names from passwd(5)/group(5) style files

use super::socket::CredentialLookup;
use crate::utils::number::parse_unsigned;
use anyhow::{Context, Result};
use log::{debug, trace};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const DEFAULT_PASSWD_PATH: &str = "/etc/passwd";
pub const DEFAULT_GROUP_PATH: &str = "/etc/group";

/// `name:password:id:...` entries from one database file
fn parse_database(text: &str) -> Vec<(u32, String)> {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split(':');
            let name = fields.next()?.trim();
            let id = fields.nth(1)?;
            let id = parse_unsigned(id).and_then(|id| u32::try_from(id).ok());
            match id {
                Some(id) if !name.is_empty() => Some((id, name.to_string())),
                _ => {
                    trace!("🔍 Skipping account line {line:?}");
                    None
                }
            }
        })
        .collect()
}

fn read_optional(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Credential lookup backed by local account files
#[derive(Clone, Debug, Default)]
pub struct AccountFiles {
    users: Vec<(u32, String)>,
    groups: Vec<(u32, String)>,
}

impl AccountFiles {
    pub fn parse(passwd: &str, group: &str) -> Self {
        AccountFiles {
            users: parse_database(passwd),
            groups: parse_database(group),
        }
    }

    /// Load both files; a missing file contributes no names
    pub fn load(passwd: &Path, group: &Path) -> Result<Self> {
        let accounts = Self::parse(&read_optional(passwd)?, &read_optional(group)?);
        debug!(
            "📖 Loaded {} users and {} groups",
            accounts.users.len(),
            accounts.groups.len()
        );
        Ok(accounts)
    }

    pub fn load_system() -> Result<Self> {
        Self::load(Path::new(DEFAULT_PASSWD_PATH), Path::new(DEFAULT_GROUP_PATH))
    }
}

fn id_by_name(table: &[(u32, String)], name: &str) -> Option<u32> {
    table.iter().find(|(_, n)| n == name).map(|(id, _)| *id)
}

fn name_by_id(table: &[(u32, String)], id: u32) -> Option<String> {
    table.iter().find(|(i, _)| *i == id).map(|(_, n)| n.clone())
}

impl CredentialLookup for AccountFiles {
    fn uid_by_name(&self, name: &str) -> Option<u32> {
        id_by_name(&self.users, name)
    }

    fn gid_by_name(&self, name: &str) -> Option<u32> {
        id_by_name(&self.groups, name)
    }

    fn user_name(&self, uid: u32) -> Option<String> {
        name_by_id(&self.users, uid)
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        name_by_id(&self.groups, gid)
    }
}
