//! INI-backed settings store.
//!
//! Values are addressed with `section.key` notation; keys outside any section
//! are addressed by their bare name. `section/key` is accepted too.
//!
//! ```
//! use trellis::settings::IniSettings;
//! use trellis::{ApplicationConfig, SettingsStore};
//!
//! let settings: IniSettings = r#"
//! [application]
//! name = sandbox
//!
//! [threadpool]
//! workers = 2
//! "#
//! .parse()?;
//!
//! assert_eq!(settings.get("application.name").as_deref(), Some("sandbox"));
//! let config = ApplicationConfig::from_settings(&settings)?;
//! assert_eq!(config.pool.num_threads, Some(2));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use parking_lot::RwLock;
use trellis_core::SettingsStore;

/// Where [`IniSettings::load_default`] looks for its file.
pub const DEFAULT_SETTINGS_FILE: &str = "./config/config.ini";

/// Errors from loading or saving settings files.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The file could not be read or written.
    #[error("Failed to access settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The contents are not valid INI.
    #[error("Invalid INI{}: {message}", .path.as_ref().map(|p| format!(" in '{}'", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },
}

impl SettingsError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A [`SettingsStore`] read from INI text.
///
/// The store is mutable at runtime through [`set`](Self::set) and can be
/// written back with [`save`](Self::save).
#[derive(Debug, Default)]
pub struct IniSettings {
    values: RwLock<BTreeMap<String, Entry>>,
    source: Option<PathBuf>,
}

/// A value together with the section and key it is written under, so names
/// containing dots survive a save.
#[derive(Debug, Clone)]
struct Entry {
    section: Option<String>,
    name: String,
    value: String,
}

impl IniSettings {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses an INI file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::io(path, e))?;
        let ini = Ini::load_from_str(&content).map_err(|e| SettingsError::Parse {
            path: Some(path.to_path_buf()),
            message: e.to_string(),
        })?;

        let settings = Self {
            values: RwLock::new(flatten(&ini)),
            source: Some(path.to_path_buf()),
        };
        tracing::debug!(target: "trellis::settings", path = %path.display(), keys = settings.len(), "settings loaded");
        Ok(settings)
    }

    /// Loads [`DEFAULT_SETTINGS_FILE`], or returns an empty store if it does
    /// not exist.
    pub fn load_default() -> Result<Self, SettingsError> {
        let path = Path::new(DEFAULT_SETTINGS_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(target: "trellis::settings", "no settings file at {DEFAULT_SETTINGS_FILE}, using defaults");
            Ok(Self::new())
        }
    }

    /// The file this store was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Gets a value and tries to parse it as `T`.
    pub fn get_as<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|s| s.trim().parse().ok())
    }

    /// Gets a value as a bool.
    ///
    /// Recognizes: true/false, yes/no, 1/0, on/off (case-insensitive).
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|s| match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        })
    }

    /// Sets a value, replacing any previous one.
    ///
    /// A new key is split into section and name at its last dot.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let key = normalize(key);
        let value = value.into();
        let mut values = self.values.write();
        if let Some(entry) = values.get_mut(&key) {
            entry.value = value;
            return;
        }
        let (section, name) = split_key(&key);
        let entry = Entry {
            section: section.map(str::to_string),
            name: name.to_string(),
            value,
        };
        values.insert(key, entry);
    }

    /// Removes a value, returning it if it existed.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(&normalize(key)).map(|entry| entry.value)
    }

    /// Returns true if a value exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(&normalize(key))
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Names of all sections, sorted.
    pub fn sections(&self) -> Vec<String> {
        self.values
            .read()
            .values()
            .filter_map(|entry| entry.section.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Renders the store as INI text.
    pub fn to_ini_string(&self) -> String {
        let mut output = Vec::new();
        if self.to_ini().write_to(&mut output).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    /// Writes the store to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        self.to_ini()
            .write_to_file(path)
            .map_err(|e| SettingsError::io(path, e))
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for entry in self.values.read().values() {
            ini.with_section(entry.section.as_deref())
                .set(entry.name.as_str(), entry.value.as_str());
        }
        ini
    }
}

impl FromStr for IniSettings {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ini = Ini::load_from_str(s).map_err(|e| SettingsError::Parse {
            path: None,
            message: e.to_string(),
        })?;
        Ok(Self {
            values: RwLock::new(flatten(&ini)),
            source: None,
        })
    }
}

impl SettingsStore for IniSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .get(&normalize(key))
            .map(|entry| entry.value.clone())
    }
}

fn flatten(ini: &Ini) -> BTreeMap<String, Entry> {
    let mut values = BTreeMap::new();
    for (section, props) in ini.iter() {
        for (key, value) in props.iter() {
            let full = match section {
                Some(section) => format!("{section}.{key}"),
                None => key.to_string(),
            };
            let entry = Entry {
                section: section.map(str::to_string),
                name: key.to_string(),
                value: value.to_string(),
            };
            values.insert(full, entry);
        }
    }
    values
}

fn normalize(key: &str) -> String {
    key.replace('/', ".")
}

/// Splits `section.key` at the last dot; a key without one is global.
fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.rsplit_once('.') {
        Some((section, name)) => (Some(section), name),
        None => (None, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
verbose = yes

[application]
name = sandbox

[threadpool]
workers = 4
queue_capacity = 64
"#;

    #[test]
    fn test_parse_sections_and_globals() {
        let settings: IniSettings = SAMPLE.parse().unwrap();
        assert_eq!(settings.get("application.name").as_deref(), Some("sandbox"));
        assert_eq!(settings.get("threadpool/workers").as_deref(), Some("4"));
        assert_eq!(settings.get_as::<usize>("threadpool.queue_capacity"), Some(64));
        assert_eq!(settings.get_bool("verbose"), Some(true));
        assert_eq!(settings.get("threadpool.missing"), None);
        assert_eq!(settings.sections(), vec!["application", "threadpool"]);
        assert!(settings.source().is_none());
    }

    #[test]
    fn test_set_and_remove() {
        let settings = IniSettings::new();
        assert!(settings.is_empty());

        settings.set("threadpool.workers", "2");
        assert!(settings.contains("threadpool.workers"));
        assert_eq!(settings.len(), 1);
        assert_eq!(settings.remove("threadpool/workers").as_deref(), Some("2"));
        assert!(settings.is_empty());
    }

    #[test]
    fn test_bool_parsing() {
        let settings = IniSettings::new();
        for (raw, expected) in [("ON", Some(true)), ("0", Some(false)), ("maybe", None)] {
            settings.set("flag", raw);
            assert_eq!(settings.get_bool("flag"), expected, "{raw}");
        }
    }

    #[test]
    fn test_render_round_trips() {
        let settings: IniSettings = SAMPLE.parse().unwrap();
        let rendered = settings.to_ini_string();
        assert!(rendered.contains("[threadpool]"));

        let reparsed: IniSettings = rendered.parse().unwrap();
        assert_eq!(reparsed.get("threadpool.workers").as_deref(), Some("4"));
        assert_eq!(reparsed.get("verbose").as_deref(), Some("yes"));
    }

    #[test]
    fn test_dotted_section_names_survive_rendering() {
        let settings: IniSettings = "[net.tcp]\nport = 8080\n".parse().unwrap();
        settings.set("log.file.path", "/tmp/app.log");
        assert_eq!(settings.sections(), vec!["log.file", "net.tcp"]);

        let rendered = settings.to_ini_string();
        assert!(rendered.contains("[net.tcp]"), "{rendered}");
        assert!(rendered.contains("[log.file]"), "{rendered}");

        let reparsed: IniSettings = rendered.parse().unwrap();
        assert_eq!(reparsed.get("net.tcp.port").as_deref(), Some("8080"));
        assert_eq!(reparsed.get("log.file.path").as_deref(), Some("/tmp/app.log"));
        assert_eq!(reparsed.sections(), vec!["log.file", "net.tcp"]);
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let err = "[unterminated\nkey = value".parse::<IniSettings>().unwrap_err();
        assert!(matches!(err, SettingsError::Parse { path: None, .. }));
        assert!(err.to_string().starts_with("Invalid INI:"));
    }
}
