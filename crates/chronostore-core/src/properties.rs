//! `properties.txt` and the store identity file.
//!
//! `properties.txt` holds `key=value` lines; blank lines and `#` comments are
//! ignored, unknown keys are skipped. Its presence is what marks a directory
//! as an existing store.

use std::fmt::Write as _;
use std::path::Path;

use chronostore_error::{ChronoError, Result};
use chronostore_spine::{read_optional, write_atomic};
use tracing::warn;
use uuid::Uuid;

use crate::config::StoreConfig;

/// Version of the on-disk layout written by this crate.
pub const FORMAT_VERSION: u32 = 1;

const KEY_FORMAT_VERSION: &str = "format.version";
const KEY_DATASTORE_ID: &str = "datastore.id";
const KEY_CHRONICLE_CAPACITY: &str = "chronicle.spine.capacity";
const KEY_INDEX_CAPACITY: &str = "index.spine.capacity";
const KEY_LAST_SYNC: &str = "last.sync.epoch.ms";
const KEY_ASSEMBLAGE_COUNT: &str = "assemblage.count";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreProperties {
    pub format_version: u32,
    pub datastore_id: Option<Uuid>,
    pub chronicle_spine_capacity: u32,
    pub index_spine_capacity: u32,
    pub last_sync_epoch_ms: u64,
    pub assemblage_count: usize,
}

impl StoreProperties {
    /// Properties for a store opened with `config`.
    #[must_use]
    pub fn for_config(config: &StoreConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            datastore_id: None,
            chronicle_spine_capacity: config.chronicle_spine_capacity,
            index_spine_capacity: config.index_spine_capacity,
            last_sync_epoch_ms: 0,
            assemblage_count: 0,
        }
    }

    /// Read `path`; `None` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let Some(bytes) = read_optional(path)? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| ChronoError::table_corrupt(path, "properties file is not UTF-8"))?;
        Self::parse(&text, path).map(Some)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.render().as_bytes())
    }

    /// Fail unless a store with these properties can be opened with `config`.
    pub fn check_compatible(&self, config: &StoreConfig) -> Result<()> {
        let checks = [
            (
                KEY_FORMAT_VERSION,
                self.format_version,
                FORMAT_VERSION,
            ),
            (
                KEY_CHRONICLE_CAPACITY,
                self.chronicle_spine_capacity,
                config.chronicle_spine_capacity,
            ),
            (
                KEY_INDEX_CAPACITY,
                self.index_spine_capacity,
                config.index_spine_capacity,
            ),
        ];
        for (key, stored, requested) in checks {
            if stored != requested {
                return Err(ChronoError::ConfigMismatch {
                    key: key.to_owned(),
                    stored: stored.to_string(),
                    requested: requested.to_string(),
                });
            }
        }
        Ok(())
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{KEY_FORMAT_VERSION}={}", self.format_version);
        if let Some(id) = self.datastore_id {
            let _ = writeln!(out, "{KEY_DATASTORE_ID}={id}");
        }
        let _ = writeln!(out, "{KEY_CHRONICLE_CAPACITY}={}", self.chronicle_spine_capacity);
        let _ = writeln!(out, "{KEY_INDEX_CAPACITY}={}", self.index_spine_capacity);
        let _ = writeln!(out, "{KEY_LAST_SYNC}={}", self.last_sync_epoch_ms);
        let _ = writeln!(out, "{KEY_ASSEMBLAGE_COUNT}={}", self.assemblage_count);
        out
    }

    fn parse(text: &str, path: &Path) -> Result<Self> {
        let mut format_version = None;
        let mut datastore_id = None;
        let mut chronicle_spine_capacity = None;
        let mut index_spine_capacity = None;
        let mut last_sync_epoch_ms = 0;
        let mut assemblage_count = 0;

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ChronoError::table_corrupt(
                    path,
                    format!("line {} has no '=': {line}", number + 1),
                ));
            };
            let value = value.trim();
            match key.trim() {
                KEY_FORMAT_VERSION => format_version = Some(parse_number(path, key, value)?),
                KEY_DATASTORE_ID => {
                    datastore_id = Some(Uuid::parse_str(value).map_err(|err| {
                        ChronoError::table_corrupt(path, format!("bad {key} '{value}': {err}"))
                    })?);
                }
                KEY_CHRONICLE_CAPACITY => {
                    chronicle_spine_capacity = Some(parse_number(path, key, value)?);
                }
                KEY_INDEX_CAPACITY => index_spine_capacity = Some(parse_number(path, key, value)?),
                KEY_LAST_SYNC => last_sync_epoch_ms = parse_number(path, key, value)?,
                KEY_ASSEMBLAGE_COUNT => assemblage_count = parse_number(path, key, value)?,
                other => warn!(path = %path.display(), key = other, "unknown property ignored"),
            }
        }

        let require = |value: Option<u32>, key: &str| {
            value.ok_or_else(|| ChronoError::table_corrupt(path, format!("missing {key}")))
        };
        Ok(Self {
            format_version: require(format_version, KEY_FORMAT_VERSION)?,
            datastore_id,
            chronicle_spine_capacity: require(chronicle_spine_capacity, KEY_CHRONICLE_CAPACITY)?,
            index_spine_capacity: require(index_spine_capacity, KEY_INDEX_CAPACITY)?,
            last_sync_epoch_ms,
            assemblage_count,
        })
    }
}

fn parse_number<N: std::str::FromStr>(path: &Path, key: &str, value: &str) -> Result<N> {
    value
        .parse()
        .map_err(|_| ChronoError::table_corrupt(path, format!("bad {key} '{value}'")))
}

/// Read the identity file; `None` when absent.
pub fn read_datastore_id(path: &Path) -> Result<Option<Uuid>> {
    let Some(bytes) = read_optional(path)? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    Uuid::parse_str(text.trim()).map(Some).map_err(|err| {
        ChronoError::table_corrupt(path, format!("identity file does not hold a UUID: {err}"))
    })
}

pub fn write_datastore_id(path: &Path, id: Uuid) -> Result<()> {
    write_atomic(path, id.hyphenated().to_string().as_bytes())
}
