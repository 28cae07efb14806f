//! The configuration directory and the persistent `config.yaml`.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde_yaml::{Mapping, Value};

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "CLI_ONPREM_CONFIG_DIR";
/// Name of the configuration directory under `$HOME`.
pub const DEFAULT_CONFIG_DIR_NAME: &str = ".cli-onprem";
/// The general configuration file.
pub const CONFIG_FILE: &str = "config.yaml";

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Resolve the configuration directory: [`CONFIG_DIR_ENV`] if set and
/// non-empty, else `$HOME/.cli-onprem`. Does not create it.
pub fn config_dir() -> Result<Utf8PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        let dir = Utf8PathBuf::from_path_buf(dir.into())
            .map_err(|p| anyhow::anyhow!("{CONFIG_DIR_ENV} is not UTF-8: {}", p.display()))?;
        return Ok(dir);
    }
    let home = dirs::home_dir().context("Failed to get home directory")?;
    let home = Utf8PathBuf::from_path_buf(home)
        .map_err(|p| anyhow::anyhow!("Home directory is not UTF-8: {}", p.display()))?;
    Ok(home.join(DEFAULT_CONFIG_DIR_NAME))
}

/// Create `dir` if needed and restrict it to the owner.
#[context("Preparing config directory {dir}")]
pub fn ensure_config_dir(dir: &Utf8Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, Permissions::from_mode(DIR_MODE))?;
    Ok(())
}

/// Write `contents` to `path`, readable and writable by the owner only.
pub(crate) fn write_private_file(path: &Utf8Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Writing {path}"))?;
    std::fs::set_permissions(path, Permissions::from_mode(FILE_MODE))
        .with_context(|| format!("Setting permissions of {path}"))?;
    Ok(())
}

fn lookup<'a>(config: &'a Mapping, key: &str) -> Option<&'a Value> {
    let mut keys = key.split('.');
    let first = config.get(keys.next()?)?;
    keys.try_fold(first, |cur, k| cur.as_mapping()?.get(k))
}

/// Set `keys` below `map`, replacing any non-mapping intermediate value.
fn insert_path(map: &mut Mapping, keys: &[&str], value: Value) {
    match keys {
        [] => {}
        [last] => {
            map.insert(Value::from(*last), value);
        }
        [first, rest @ ..] => {
            let key = Value::from(*first);
            if !matches!(map.get(&key), Some(Value::Mapping(_))) {
                map.insert(key.clone(), Value::Mapping(Mapping::new()));
            }
            if let Some(Value::Mapping(child)) = map.get_mut(&key) {
                insert_path(child, rest, value);
            }
        }
    }
}

fn remove_path(map: &mut Mapping, keys: &[&str]) -> bool {
    match keys {
        [] => false,
        [last] => map.remove(*last).is_some(),
        [first, rest @ ..] => match map.get_mut(*first) {
            Some(Value::Mapping(child)) => remove_path(child, rest),
            _ => false,
        },
    }
}

/// Dot-addressed access to `config.yaml`.
///
/// Every operation re-reads the file; writes are read-modify-write.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    dir: Utf8PathBuf,
    path: Utf8PathBuf,
}

impl ConfigManager {
    /// A manager for `config.yaml` inside `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(CONFIG_FILE);
        Self { dir, path }
    }

    /// A manager for the default configuration directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(config_dir()?))
    }

    /// Path of the configuration file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Whether the configuration file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the whole configuration; a missing or empty file is an empty
    /// mapping.
    #[context("Loading {}", self.path)]
    pub fn load(&self) -> Result<Mapping> {
        if !self.exists() {
            return Ok(Mapping::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Mapping::new());
        }
        let config: Option<Mapping> = serde_yaml::from_str(&contents)?;
        Ok(config.unwrap_or_default())
    }

    /// Replace the whole configuration.
    #[context("Saving {}", self.path)]
    pub fn save(&self, config: &Mapping) -> Result<()> {
        ensure_config_dir(&self.dir)?;
        let contents = serde_yaml::to_string(config)?;
        write_private_file(&self.path, &contents)
    }

    /// Look up a dot-separated key such as `helm.registry_patterns`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let config = self.load()?;
        Ok(lookup(&config, key).cloned())
    }

    /// Set a dot-separated key, creating intermediate mappings.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut config = self.load()?;
        let keys: Vec<&str> = key.split('.').collect();
        insert_path(&mut config, &keys, value);
        tracing::debug!("Setting {key} in {}", self.path);
        self.save(&config)
    }

    /// Remove a dot-separated key. Returns whether it existed.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut config = self.load()?;
        let keys: Vec<&str> = key.split('.').collect();
        if !remove_path(&mut config, &keys) {
            return Ok(false);
        }
        self.save(&config)?;
        Ok(true)
    }

    /// A list of strings stored at `key`. Absent keys are an empty list;
    /// anything other than a sequence of strings is an error.
    pub fn get_string_list(&self, key: &str) -> Result<Vec<String>> {
        match self.get(key)? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(v) => serde_yaml::from_value(v)
                .with_context(|| format!("{key} in {} must be a list of strings", self.path)),
        }
    }
}
