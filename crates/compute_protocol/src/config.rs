//! Canonical system configuration (§6), shared by every binary and by tests
//! that want the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub event_bus_url: String,
    pub listen_port: u16,
    pub heartbeat_interval_secs: u64,
    pub schedule_interval_secs: u64,
    pub match_interval_secs: u64,
    pub reap_interval_secs: u64,
    pub offline_grace_secs: u64,
    pub assignment_timeout_secs: u64,
    pub match_confirm_window_secs: u64,
    pub default_job_timeout_secs: u64,
    pub default_max_retries: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            event_bus_url: "inproc://compute-marketplace".to_string(),
            listen_port: 8080,
            heartbeat_interval_secs: 30,
            schedule_interval_secs: 5,
            match_interval_secs: 10,
            reap_interval_secs: 60,
            offline_grace_secs: 120,
            assignment_timeout_secs: 5,
            match_confirm_window_secs: 300,
            default_job_timeout_secs: 3600,
            default_max_retries: 3,
        }
    }
}

impl PlatformConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs * 2)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs)
    }

    pub fn match_interval(&self) -> Duration {
        Duration::from_secs(self.match_interval_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_secs(self.offline_grace_secs)
    }

    pub fn assignment_timeout(&self) -> Duration {
        Duration::from_secs(self.assignment_timeout_secs)
    }

    pub fn match_confirm_window(&self) -> Duration {
        Duration::from_secs(self.match_confirm_window_secs)
    }

    pub fn default_job_timeout(&self) -> Duration {
        Duration::from_secs(self.default_job_timeout_secs)
    }

    /// Load from a TOML file, falling back to defaults for any key the file
    /// omits. Mirrors the teacher's `SentinelArgs`/`WorkerArgs` pattern of a
    /// typed config with sensible defaults rather than a loose JSON map.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
