//! Configuration store: device identity, input paths, bindings, scripts.
//!
//! Persisted as TOML under the user config directory. Every section and
//! field defaults in place when missing, so a freshly scanned setup and
//! a hand-edited file both load without ceremony; malformed entries
//! surface a parse error instead of being coerced.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Device name prefix used when `scan` is run without one.
pub const DEFAULT_PREFIX: &str = "BLE-M3";

/// The whole config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub inputs: Inputs,

    /// Encoded event-sequence key -> binding name. Several keys may map
    /// to the same name (one per recorded variant of the button).
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,

    /// Binding name -> command argv.
    #[serde(default)]
    pub scripts: BTreeMap<String, Vec<String>>,
}

/// `[device]` section: identity of the remote plus match tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Input-device name prefix the scan looks for.
    #[serde(default = "default_prefix")]
    pub name_prefix: String,

    /// Hex vendor id captured by the last scan (for udev rule text).
    #[serde(default)]
    pub vendor: String,

    /// Hex product id captured by the last scan.
    #[serde(default)]
    pub product: String,

    /// Inactivity gap in seconds that closes a sequence.
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Minimum fuzzy score required to execute a binding.
    #[serde(default = "default_threshold")]
    pub match_threshold: f64,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

fn default_timeout() -> f64 {
    0.2
}

fn default_threshold() -> f64 {
    50.0
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            name_prefix: default_prefix(),
            vendor: String::new(),
            product: String::new(),
            timeout: default_timeout(),
            match_threshold: default_threshold(),
        }
    }
}

impl DeviceSection {
    /// Sequence-closing gap as a [`std::time::Duration`].
    pub fn timeout_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout)
    }
}

/// `[inputs]` section: event-device paths for the two halves of the
/// remote. Either may be absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kbd: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<PathBuf>,
}

impl Inputs {
    pub fn is_empty(&self) -> bool {
        self.kbd.is_none() && self.mouse.is_none()
    }

    /// Configured paths with a label, for listings.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> + '_ {
        [
            ("kbd", self.kbd.as_deref()),
            ("mouse", self.mouse.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, path)| path.map(|p| (label, p)))
    }

    /// Configured paths that exist but cannot be read by this process.
    /// Readiness only; remediation text is the CLI's job.
    pub fn unreadable(&self) -> Vec<&Path> {
        self.iter()
            .map(|(_, path)| path)
            .filter(|path| path.exists() && !readable(path))
            .collect()
    }
}

/// access(2) check for read permission on a device node.
pub fn readable(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(cpath.as_ptr(), libc::R_OK) == 0 }
}

impl Config {
    /// Get the config file path
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("blebind");
        Ok(config_dir.join("config.toml"))
    }

    /// Load the config from file (or use defaults when none exists yet).
    pub fn load() -> Result<Self> {
        let path = Self::path()?;

        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {path:?}"))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Malformed config file: {path:?}"))?;
            info!("Loaded config from {:?}", path);
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save the config, rewriting the file wholesale.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)?;
        info!("Saved config to {:?}", path);
        Ok(())
    }

    /// How many distinct sequences are recorded under `name`.
    pub fn binding_count(&self, name: &str) -> usize {
        self.bindings.values().filter(|v| v.as_str() == name).count()
    }
}
