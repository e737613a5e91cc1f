use std::{
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::devices::camera::StillCamera;

pub const MIN_COOLDOWN_SECS: f32 = 0.5;
pub const MAX_COOLDOWN_SECS: f32 = 30.0;

/// Minimum spacing between still captures, counted from the last
/// successful one
pub struct CooldownGate {
    cooldown: Duration,
    last_capture: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown_secs: f32) -> Self {
        CooldownGate {
            cooldown: clamp_cooldown(cooldown_secs),
            last_capture: None,
        }
    }

    /// Time left before another capture is allowed, None if allowed now
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_capture?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Start the cooldown from `now`
    pub fn stamp(&mut self, now: Instant) {
        self.last_capture = Some(now);
    }

    pub fn adjust(&mut self, delta_secs: f32) -> Duration {
        let next = self.cooldown.as_secs_f32() + delta_secs;
        self.cooldown = clamp_cooldown(next);
        self.cooldown
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

fn clamp_cooldown(secs: f32) -> Duration {
    // Round to tenths so repeated 0.5 steps don't drift
    let secs = (secs.clamp(MIN_COOLDOWN_SECS, MAX_COOLDOWN_SECS) * 10.).round() / 10.;
    Duration::from_millis((secs * 1000.) as u64)
}

/// Decides when a still should be taken and where it goes. The capture
/// itself happens elsewhere (see [`StillWorker`]) and is reported back with
/// [`StillCapture::complete`]; at most one capture is in flight.
pub struct StillCapture {
    gate: CooldownGate,
    images_dir: PathBuf,
    in_flight: Option<PathBuf>,
    captures_taken: usize,
}

impl StillCapture {
    pub fn new(gate: CooldownGate, images_dir: &Path) -> Self {
        StillCapture {
            gate,
            images_dir: images_dir.to_path_buf(),
            in_flight: None,
            captures_taken: 0,
        }
    }

    /// Destination for a triggered capture, unless cooling down or busy
    pub fn request(&mut self, now: Instant) -> Option<PathBuf> {
        if let Some(remaining) = self.gate.remaining(now) {
            info!(
                "Camera on cooldown - {:.1}s remaining",
                remaining.as_secs_f32()
            );
            return None;
        }
        self.begin()
    }

    /// Destination for a capture asked for by the user; ignores the cooldown
    pub fn request_manual(&mut self) -> Option<PathBuf> {
        self.begin()
    }

    fn begin(&mut self) -> Option<PathBuf> {
        if let Some(path) = &self.in_flight {
            info!("Still capture already in progress ({:?})", path);
            return None;
        }
        if let Err(e) = std::fs::create_dir_all(&self.images_dir) {
            error!("Cannot create images directory {:?}: {e}", self.images_dir);
            return None;
        }

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.images_dir.join(format!("capture_{stamp}.jpg"));
        let mut n = 1;
        while path.exists() {
            path = self.images_dir.join(format!("capture_{stamp}_{n}.jpg"));
            n += 1;
        }

        self.in_flight = Some(path.clone());
        Some(path)
    }

    /// Outcome of the capture in flight. Only a success starts the cooldown.
    pub fn complete(&mut self, success: bool, now: Instant) {
        let Some(path) = self.in_flight.take() else {
            warn!("Capture result with no capture in flight");
            return;
        };
        if success {
            self.gate.stamp(now);
            self.captures_taken += 1;
        } else {
            debug!("Capture of {:?} failed; cooldown not started", path);
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn gate_mut(&mut self) -> &mut CooldownGate {
        &mut self.gate
    }

    pub fn captures_taken(&self) -> usize {
        self.captures_taken
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StillResult {
    pub path: PathBuf,
    pub success: bool,
}

/// Owns the still camera on its own thread, so a slow capture never holds
/// up whoever submits the job
pub struct StillWorker {
    jobs: Sender<PathBuf>,
    results: Receiver<StillResult>,
    thread: JoinHandle<()>,
}

impl StillWorker {
    pub fn spawn<C: StillCamera + Send + 'static>(mut camera: C) -> Result<Self> {
        let (jobs, job_rx) = bounded::<PathBuf>(1);
        let (result_tx, results) = bounded::<StillResult>(4);

        let thread = thread::Builder::new()
            .name(String::from("stills"))
            .spawn(move || {
                for path in job_rx.iter() {
                    info!("Capturing image: {:?}", path);
                    let success = match camera.capture(&path) {
                        Ok(()) => true,
                        Err(e) => {
                            error!("Failed to capture image: {e:#}");
                            false
                        }
                    };
                    if result_tx.send(StillResult { path, success }).is_err() {
                        break;
                    }
                }
                debug!("Still capture thread exiting");
            })?;

        Ok(StillWorker {
            jobs,
            results,
            thread,
        })
    }

    /// False if the job could not be handed over
    pub fn submit(&self, path: PathBuf) -> bool {
        match self.jobs.try_send(path) {
            Ok(()) => true,
            Err(TrySendError::Full(path)) => {
                warn!("Still capture thread busy; skipping {:?}", path);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("Still capture thread has stopped");
                false
            }
        }
    }

    pub fn results(&self) -> &Receiver<StillResult> {
        &self.results
    }

    /// Let any capture in progress finish, then stop the thread
    pub fn shutdown(self) {
        let StillWorker {
            jobs,
            results,
            thread,
        } = self;
        drop(jobs);
        drop(results);
        if thread.join().is_err() {
            error!("Still capture thread panicked");
        }
    }
}
