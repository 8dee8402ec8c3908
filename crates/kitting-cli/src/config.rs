//! Node configuration – reads/writes `~/.kitting/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kitting_runtime::FulfillmentConfig;
use serde::{Deserialize, Serialize};

/// Persisted node configuration. Every field has a default, so a partial
/// file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// rosbridge WebSocket endpoint.
    pub rosbridge_url: String,
    pub robot_base_frame: String,
    /// Vertical clearance above the part, metres.
    pub standoff_m: f64,
    pub transform_timeout_secs: f64,
    /// Sleep between polls of an empty order queue.
    pub poll_interval_ms: u64,
    pub start_max_retries: u32,
    pub start_backoff_secs: f64,
    /// Per-call timeout for rosbridge service requests.
    pub service_timeout_secs: f64,
    pub bus_capacity: usize,
    /// Wait after the start handshake before the first order poll.
    pub startup_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rosbridge_url: "ws://localhost:9090".to_string(),
            robot_base_frame: "arm1_base_link".to_string(),
            standoff_m: 0.10,
            transform_timeout_secs: 10.0,
            poll_interval_ms: 1000,
            start_max_retries: 125,
            start_backoff_secs: 4.0,
            service_timeout_secs: 5.0,
            bus_capacity: 1000,
            startup_grace_ms: 1000,
        }
    }
}

impl Config {
    pub fn service_timeout(&self) -> Duration {
        secs(self.service_timeout_secs)
    }

    pub fn fulfillment(&self) -> FulfillmentConfig {
        FulfillmentConfig {
            robot_base_frame: self.robot_base_frame.clone(),
            standoff_m: self.standoff_m,
            transform_timeout: secs(self.transform_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            start_max_retries: self.start_max_retries,
            start_backoff: secs(self.start_backoff_secs),
            startup_grace: Duration::from_millis(self.startup_grace_ms),
        }
    }
}

/// Negative, NaN and infinite values collapse to zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Return the path to `~/.kitting/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kitting").join("config.toml")
}

/// Load the config from disk with environment overrides applied. Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `KITTING_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KITTING_ROSBRIDGE_URL` | `rosbridge_url` |
/// | `KITTING_ROBOT_BASE_FRAME` | `robot_base_frame` |
/// | `KITTING_STANDOFF_M` | `standoff_m` |
/// | `KITTING_POLL_INTERVAL_MS` | `poll_interval_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("KITTING_ROSBRIDGE_URL") {
        cfg.rosbridge_url = v;
    }
    if let Some(v) = lookup("KITTING_ROBOT_BASE_FRAME") {
        cfg.robot_base_frame = v;
    }
    if let Some(v) = lookup("KITTING_STANDOFF_M")
        && let Ok(m) = v.parse::<f64>()
        && m.is_finite()
    {
        cfg.standoff_m = m;
    }
    if let Some(v) = lookup("KITTING_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.poll_interval_ms = ms;
    }
}

/// Save the config to disk, creating `~/.kitting/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
