//! Client configuration – reads/writes `~/.strider/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strider_runtime::RobotClientConfig;

/// Persisted client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Simulator stream endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint_url: String,

    /// Joint-name remapping file.  Absent means identity mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_map_path: Option<PathBuf>,

    /// Added to the resolved terrain height.
    #[serde(default)]
    pub ground_offset_m: f64,

    #[serde(default = "default_link_scale")]
    pub link_scale: f64,

    /// SQLite file holding the calibration offset.
    #[serde(default = "default_state_db")]
    pub state_db_path: PathBuf,

    #[serde(default = "default_camera_interval_ms")]
    pub camera_interval_ms: u64,

    #[serde(default = "default_terrain_probe_interval_ms")]
    pub terrain_probe_interval_ms: u64,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_min_apply_interval_ms")]
    pub min_apply_interval_ms: u64,
}

fn default_endpoint() -> String {
    "ws://localhost:8000/ws".to_string()
}
fn default_link_scale() -> f64 {
    1.0
}
fn default_state_db() -> PathBuf {
    strider_dir(&home_dir()).join("state.db")
}
fn default_camera_interval_ms() -> u64 {
    2300
}
fn default_terrain_probe_interval_ms() -> u64 {
    1500
}
fn default_reconnect_delay_ms() -> u64 {
    1500
}
fn default_min_apply_interval_ms() -> u64 {
    33
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint(),
            joint_map_path: None,
            ground_offset_m: 0.0,
            link_scale: default_link_scale(),
            state_db_path: default_state_db(),
            camera_interval_ms: default_camera_interval_ms(),
            terrain_probe_interval_ms: default_terrain_probe_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            min_apply_interval_ms: default_min_apply_interval_ms(),
        }
    }
}

impl Config {
    /// Library-level client configuration with these settings applied.
    pub fn client_config(&self) -> RobotClientConfig {
        let mut client = RobotClientConfig::default();
        client.connection.url = self.endpoint_url.clone();
        client.connection.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        client.min_apply_interval = Duration::from_millis(self.min_apply_interval_ms);
        client.composer.ground_offset_m = self.ground_offset_m;
        client.link_scale = self.link_scale;
        client.scheduler.camera_interval = Duration::from_millis(self.camera_interval_ms.max(1));
        client.scheduler.terrain_probe_interval = Duration::from_millis(self.terrain_probe_interval_ms.max(1));
        client
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn strider_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider")
}

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    strider_dir(home).join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    Ok(load_from(&config_path())?.map(|mut cfg| {
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_ENDPOINT` | `endpoint_url` |
/// | `STRIDER_JOINT_MAP` | `joint_map_path` |
/// | `STRIDER_GROUND_OFFSET` | `ground_offset_m` |
/// | `STRIDER_LINK_SCALE` | `link_scale` |
/// | `STRIDER_STATE_DB` | `state_db_path` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STRIDER_ENDPOINT")
        && !v.trim().is_empty()
    {
        cfg.endpoint_url = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("STRIDER_JOINT_MAP") {
        cfg.joint_map_path = (!v.is_empty()).then(|| PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("STRIDER_GROUND_OFFSET")
        && let Ok(offset) = v.trim().parse::<f64>()
        && offset.is_finite()
    {
        cfg.ground_offset_m = offset;
    }
    if let Ok(v) = std::env::var("STRIDER_LINK_SCALE")
        && let Ok(scale) = v.trim().parse::<f64>()
        && scale.is_finite()
        && scale > 0.0
    {
        cfg.link_scale = scale;
    }
    if let Ok(v) = std::env::var("STRIDER_STATE_DB")
        && !v.is_empty()
    {
        cfg.state_db_path = PathBuf::from(v);
    }
}

/// Save the config to disk, creating `~/.strider/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.joint_map_path = Some(PathBuf::from("/opt/rigs/walker.json"));
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.endpoint_url, "ws://localhost:8000/ws");
        assert_eq!(loaded.joint_map_path, cfg.joint_map_path);
        assert_eq!(loaded.camera_interval_ms, 2300);
        assert_eq!(loaded.min_apply_interval_ms, 33);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ground_offset_m = 0.4\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.ground_offset_m, 0.4);
        assert_eq!(loaded.link_scale, 1.0);
        assert_eq!(loaded.reconnect_delay_ms, 1500);
        assert!(loaded.joint_map_path.is_none());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "link_scale = \"big\"\n").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_strider_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".strider"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn client_config_carries_settings() {
        let mut cfg = Config::default();
        cfg.endpoint_url = "ws://sim.local:9000/ws".to_string();
        cfg.ground_offset_m = 0.25;
        cfg.camera_interval_ms = 4000;
        let client = cfg.client_config();
        assert_eq!(client.connection.url, "ws://sim.local:9000/ws");
        assert_eq!(client.composer.ground_offset_m, 0.25);
        assert_eq!(client.scheduler.camera_interval, Duration::from_secs(4));
        assert_eq!(client.min_apply_interval, Duration::from_millis(33));
    }

    // The override tests share process environment; keep each variable to
    // a single test.

    #[test]
    fn apply_env_overrides_changes_endpoint() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("STRIDER_ENDPOINT", "ws://robot-host:8000/ws") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.endpoint_url, "ws://robot-host:8000/ws");
        unsafe { std::env::remove_var("STRIDER_ENDPOINT") };
    }

    #[test]
    fn apply_env_overrides_ignores_bad_link_scale() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("STRIDER_LINK_SCALE", "-2") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.link_scale, 1.0);
        unsafe { std::env::set_var("STRIDER_LINK_SCALE", "0.5") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.link_scale, 0.5);
        unsafe { std::env::remove_var("STRIDER_LINK_SCALE") };
    }

    #[test]
    fn apply_env_overrides_changes_ground_offset() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::set_var("STRIDER_GROUND_OFFSET", "NaN") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ground_offset_m, 0.0);
        unsafe { std::env::set_var("STRIDER_GROUND_OFFSET", "0.15") };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ground_offset_m, 0.15);
        unsafe { std::env::remove_var("STRIDER_GROUND_OFFSET") };
    }

    #[test]
    fn apply_env_overrides_sets_paths() {
        // SAFETY: no other test touches these variables.
        unsafe {
            std::env::set_var("STRIDER_JOINT_MAP", "/tmp/map.json");
            std::env::set_var("STRIDER_STATE_DB", "/tmp/strider.db");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.joint_map_path, Some(PathBuf::from("/tmp/map.json")));
        assert_eq!(cfg.state_db_path, PathBuf::from("/tmp/strider.db"));
        unsafe {
            std::env::remove_var("STRIDER_JOINT_MAP");
            std::env::remove_var("STRIDER_STATE_DB");
        }
    }
}
