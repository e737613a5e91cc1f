use std::{fs, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::systems::{debounce::clamp_window, recording::SessionSettings};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StillCaptureConfig {
    pub images_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    /// Minimum seconds between still captures (0.5 - 30)
    pub cooldown_secs: f32,
}

impl Default for StillCaptureConfig {
    fn default() -> Self {
        StillCaptureConfig {
            images_dir: PathBuf::from("images"),
            program: String::from("rpicam-still"),
            args: vec![
                String::from("--nopreview"),
                String::from("-o"),
                String::from("{output}"),
            ],
            cooldown_secs: 3.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    // -------- SENSOR SETTINGS
    /// BCM number of the input pin (GPIO 20 is physical pin 38)
    pub gpio_pin: u32,

    pub gpio_root: PathBuf,

    /// Treat a low level as "active"
    pub active_low: bool,

    /// How often (ms) to poll the pin
    pub poll_interval_ms: u64,

    /// Minimum time (ms) between accepted transitions (10 - 1000)
    pub debounce_ms: u64,

    // -------- RECORDING SETTINGS
    /// Length (s) of a new session, and of each extension
    pub base_duration_secs: u64,

    /// Hard cap (s) on the total length of one session
    pub max_duration_secs: u64,

    /// Pause (ms) before a queued trigger restarts recording after a session ends
    pub restart_settle_ms: u64,

    /// Triggers beyond this many pending are dropped
    pub max_queued_triggers: usize,

    /// How often (ms) the recording lifecycle checks its queue and timers
    pub lifecycle_tick_ms: u64,

    pub videos_dir: PathBuf,
    pub recorder_program: String,
    /// Arguments for the recorder program; "{output}" is replaced by the session file
    pub recorder_args: Vec<String>,

    // -------- STILL CAPTURE SETTINGS
    /// Take a still image on each rising edge, if present
    pub still_capture: Option<StillCaptureConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            gpio_pin: 20,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            active_low: false,
            poll_interval_ms: 1,
            debounce_ms: 100,
            base_duration_secs: 60,
            max_duration_secs: 300,
            restart_settle_ms: 500,
            max_queued_triggers: 64,
            lifecycle_tick_ms: 10,
            videos_dir: PathBuf::from("videos"),
            recorder_program: String::from("rpicam-vid"),
            recorder_args: vec![
                String::from("-t"),
                String::from("0"),
                String::from("--nopreview"),
                String::from("-o"),
                String::from("{output}"),
            ],
            still_capture: None,
        }
    }
}

impl MonitorConfig {
    pub fn debounce_window(&self) -> Duration {
        clamp_window(Duration::from_millis(self.debounce_ms))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn lifecycle_tick(&self) -> Duration {
        Duration::from_millis(self.lifecycle_tick_ms.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            base_duration: Duration::from_secs(self.base_duration_secs),
            max_duration: Duration::from_secs(self.max_duration_secs),
            restart_settle: Duration::from_millis(self.restart_settle_ms),
            max_queued_triggers: self.max_queued_triggers,
            output_dir: self.videos_dir.clone(),
        }
    }

    pub fn write_config_to_file(&self, config_file_path: &str) -> Result<()> {
        debug!("Current state of config: {:?}", self);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, text)
            .with_context(|| format!("failed to write config to {config_file_path}"))?;
        info!("Wrote config to file: {:?}", config_file_path);
        Ok(())
    }
}

pub fn load_config_from_file(config_file_path: &str) -> Result<MonitorConfig> {
    match fs::read_to_string(config_file_path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Monitor config file not found at {}; using defaults",
                config_file_path
            );
            Ok(MonitorConfig::default())
        }
        Err(e) => Err(anyhow!(
            "Failed to load Monitor Config from {config_file_path}: {e}"
        )),
        Ok(s) => {
            info!("Loaded Monitor config OK from \"{}\"", config_file_path);
            match serde_json::from_str::<MonitorConfig>(&s) {
                Ok(loaded_config) => {
                    debug!("Config parsed data from file: {:?}", &loaded_config);
                    Ok(loaded_config)
                }
                Err(e) => Err(anyhow!("Failed to parse config data: {}", e)),
            }
        }
    }
}
