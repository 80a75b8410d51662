// src/xt/lmap.rs
// iproute2-style "id name" maps, used for device group names

use crate::utils::number::parse_unsigned;
use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Default location of the device group map
pub const DEFAULT_DEVGROUPS_PATH: &str = "/etc/iproute2/group";

/// Bidirectional id/name table, file order preserved
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceGroups {
    entries: Vec<(u32, String)>,
}

impl DeviceGroups {
    /// Parse map text. Blank lines and `#` comments are skipped; any other
    /// line must be `<id> <name>`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim_start();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(id), Some(name)) = (fields.next(), fields.next()) else {
                bail!("line {}: expected \"<id> <name>\"", index + 1);
            };
            let id = parse_unsigned(id)
                .and_then(|id| u32::try_from(id).ok())
                .with_context(|| format!("line {}: bad id \"{}\"", index + 1, id))?;

            entries.push((id, name.to_string()));
        }

        Ok(DeviceGroups { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let map = Self::parse(&text).with_context(|| format!("{}", path.display()))?;
        debug!("📖 Loaded {} device groups from {}", map.len(), path.display());
        Ok(map)
    }

    /// Like [`DeviceGroups::from_file`], but never fatal: a missing file is
    /// silent, any other failure is logged and the names are left out
    pub fn load_optional(path: &Path) -> Option<Self> {
        match Self::from_file(path) {
            Ok(map) => Some(map),
            Err(err)
                if err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::NotFound) =>
            {
                debug!("🔍 No device group map at {}", path.display());
                None
            }
            Err(err) => {
                warn!("⚠️ Warning: {err:#}");
                None
            }
        }
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| *id)
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, name)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "# device groups\n0\tdefault\n\n  0x10 uplink  # trailing\n7 lab\n";

    #[test]
    fn test_parse_skips_comments() {
        let map = DeviceGroups::parse(SAMPLE).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.id_of("uplink"), Some(0x10));
        assert_eq!(map.name_of(7), Some("lab"));
        assert_eq!(map.name_of(8), None);
    }

    #[test]
    fn test_parse_rejects_bad_lines() {
        assert!(DeviceGroups::parse("12\n").is_err());
        assert!(DeviceGroups::parse("twelve lab\n").is_err());
        assert!(DeviceGroups::parse("0x100000000 big\n").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let map = DeviceGroups::from_file(file.path()).unwrap();
        assert_eq!(map.id_of("default"), Some(0));
    }

    #[test]
    fn test_missing_file_is_optional() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("group");
        assert_eq!(DeviceGroups::load_optional(&missing), None);
        assert!(DeviceGroups::from_file(&missing).is_err());
    }

    #[test]
    fn test_unusable_map_is_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0 default\nbogus-line\n").unwrap();
        assert!(DeviceGroups::from_file(file.path()).is_err());
        assert_eq!(DeviceGroups::load_optional(file.path()), None);

        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(DeviceGroups::load_optional(dir.path()), None);
    }
}
