pub mod crossing;
pub mod debounce;
pub mod recording;
pub mod still_capture;

use std::path::Path;

use anyhow::{Context, Result};
use debounce::EdgeDebouncer;
use log::info;
use recording::RecordingSessionController;
use still_capture::{CooldownGate, StillCapture};

use crate::{
    devices::{
        camera::{Recorder, StillCamera},
        gpio::Sensor,
    },
    monitor_config::MonitorConfig,
};

/// Everything the sampling loop owns
pub struct SamplingSystem<S: Sensor> {
    pub sensor: S,
    pub debouncer: EdgeDebouncer,
}

/// Still capture bookkeeping plus the camera it will hand to its own thread
pub struct StillSystem<C: StillCamera> {
    pub capture: StillCapture,
    pub camera: C,
}

/// Everything the recording lifecycle owns
pub struct LifecycleSystem<R: Recorder, C: StillCamera> {
    pub controller: RecordingSessionController<R>,
    pub still: Option<StillSystem<C>>,
}

pub struct Systems<S: Sensor, R: Recorder, C: StillCamera> {
    pub sampling: SamplingSystem<S>,
    pub lifecycle: LifecycleSystem<R, C>,
}

impl<S: Sensor, R: Recorder, C: StillCamera> Systems<S, R, C> {
    /// Build both halves from config. The sensor is read once here so the
    /// debouncer starts from the actual level rather than a guess.
    pub fn new(
        config: &MonitorConfig,
        mut sensor: S,
        recorder: R,
        still_camera: Option<C>,
    ) -> Result<Self> {
        let initial_state = sensor.read().context("failed to read initial sensor state")?;
        info!(
            "Initial state of GPIO pin {}: {}",
            config.gpio_pin,
            if initial_state { "HIGH" } else { "LOW" }
        );

        let debouncer = EdgeDebouncer::new(initial_state, config.debounce_window());
        info!("Debounce time: {}ms", debouncer.window().as_millis());

        let controller = RecordingSessionController::new(config.session_settings(), recorder);

        let still = match (&config.still_capture, still_camera) {
            (Some(still_config), Some(camera)) => Some(StillSystem {
                capture: StillCapture::new(
                    CooldownGate::new(still_config.cooldown_secs),
                    Path::new(&still_config.images_dir),
                ),
                camera,
            }),
            _ => None,
        };

        Ok(Systems {
            sampling: SamplingSystem { sensor, debouncer },
            lifecycle: LifecycleSystem { controller, still },
        })
    }
}
