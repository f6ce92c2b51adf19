use anyhow::{Context, Result};
use mpmaster_server::ServerSettings;
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "config/mpmaster.toml";

/// Settings read from `config/mpmaster.toml`. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MasterConfig {
    /// TCP listen address, `host:port`.
    pub bind_address: String,
    /// Directory containing the world directories.
    pub world_root: PathBuf,
    pub region_cache_capacity: usize,
    pub max_frame_bytes: usize,
    pub max_in_flight_per_peer: usize,
    /// Seconds of silence after which a peer is dropped and its chunks freed.
    pub idle_timeout_secs: u64,
    /// Seconds between status log lines; 0 disables them.
    pub status_interval_secs: u64,
    pub tick_time_window: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        let settings = ServerSettings::default();
        Self {
            bind_address: settings.bind_address.to_string(),
            world_root: settings.world_root,
            region_cache_capacity: settings.region_cache_capacity,
            max_frame_bytes: settings.max_frame_bytes,
            max_in_flight_per_peer: settings.max_in_flight_per_peer,
            idle_timeout_secs: settings.idle_timeout.as_secs(),
            status_interval_secs: 60,
            tick_time_window: settings.tick_time_window,
        }
    }
}

impl MasterConfig {
    /// Load configuration from an explicit path, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<MasterConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    MasterConfig::default()
                }
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    warn!(
                        "Master config not found at {}. Using defaults",
                        path.display()
                    );
                } else {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                MasterConfig::default()
            }
        }
    }

    /// Save configuration to an explicit path.
    #[cfg(test)]
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let toml = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        Ok(())
    }

    /// Status log period, if enabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    /// Validate and convert into server settings.
    pub fn to_settings(&self) -> Result<ServerSettings> {
        let bind_address: SocketAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("invalid bind_address {:?}", self.bind_address))?;
        if self.idle_timeout_secs == 0 {
            anyhow::bail!("idle_timeout_secs must be at least 1");
        }
        Ok(ServerSettings {
            bind_address,
            world_root: self.world_root.clone(),
            region_cache_capacity: self.region_cache_capacity.max(1),
            max_frame_bytes: self.max_frame_bytes,
            max_in_flight_per_peer: self.max_in_flight_per_peer.max(1),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            tick_time_window: self.tick_time_window.max(1),
        })
    }
}
